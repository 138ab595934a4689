pub mod attachment_codec;
pub mod login_service;
pub mod recording_service;
pub mod response_extractor;
pub mod reveal;
pub mod webhook_service;

pub use attachment_codec::CodecError;
pub use login_service::{LoginClient, LoginError, LoginSession};
pub use recording_service::{
    AudioInputDevice, AudioInputStream, AudioRecorder, CommandAudioDevice, RecorderState,
    RecordingError,
};
pub use response_extractor::{extract_reply, interpret_body};
pub use reveal::RevealFrames;
pub use webhook_service::{
    TransportError, WebhookClient, WebhookFile, WebhookRequest, WebhookTransport,
};
