//! Microphone capture that yields a finalised audio attachment.
//!
//! An [`AudioRecorder`] is owned by whichever input surface offers voice
//! messages. It moves `Idle -> Recording -> Idle`; device failures leave it
//! `Idle`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::attachment_codec;
use crate::models::{Attachment, now_millis};

const READ_CHUNK_SIZE: usize = 8 * 1024;
/// Upper bound on collecting the final chunks once the device is released.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("Microphone unavailable: {message}")]
    DeviceAccess { message: String },

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("Audio capture failed: {message}")]
    Capture { message: String },
}

/// Source of microphone streams (permission prompt, device selection).
#[async_trait]
pub trait AudioInputDevice: Send + Sync {
    async fn open(&self) -> Result<Box<dyn AudioInputStream>, RecordingError>;
}

/// An open microphone stream holding the hardware until released.
#[async_trait]
pub trait AudioInputStream: Send {
    fn mime_type(&self) -> &str;

    /// Next buffered chunk, `None` once the device stops producing.
    /// After `release` it yields whatever is still buffered, then `None`.
    async fn next_chunk(&mut self) -> Option<Result<Bytes, RecordingError>>;

    /// Stop all tracks. Must be safe to call more than once.
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

/// Releases the device exactly once, however the capture task ends.
struct StreamGuard {
    stream: Box<dyn AudioInputStream>,
    released: bool,
}

impl StreamGuard {
    fn new(stream: Box<dyn AudioInputStream>) -> Self {
        Self {
            stream,
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.stream.release();
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Default)]
struct Capture {
    chunks: Vec<Bytes>,
    error: Option<RecordingError>,
}

struct ActiveRecording {
    mime_type: String,
    stop_tx: oneshot::Sender<()>,
    pump: JoinHandle<Capture>,
    ticker: JoinHandle<()>,
}

pub struct AudioRecorder {
    device: Arc<dyn AudioInputDevice>,
    active: Option<ActiveRecording>,
    elapsed: Arc<watch::Sender<u64>>,
}

impl AudioRecorder {
    pub fn new(device: Arc<dyn AudioInputDevice>) -> Self {
        let (elapsed, _) = watch::channel(0);
        Self {
            device,
            active: None,
            elapsed: Arc::new(elapsed),
        }
    }

    pub fn state(&self) -> RecorderState {
        if self.active.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Whole seconds since the current (or last) recording started.
    pub fn elapsed_seconds(&self) -> u64 {
        *self.elapsed.borrow()
    }

    /// Receiver ticking once per second while recording, for UI display.
    pub fn subscribe_elapsed(&self) -> watch::Receiver<u64> {
        self.elapsed.subscribe()
    }

    /// Acquire the microphone and begin buffering audio.
    pub async fn start(&mut self) -> Result<(), RecordingError> {
        if self.active.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }

        let stream = self.device.open().await.inspect_err(|e| {
            warn!(error = %e, "Failed to acquire microphone");
        })?;
        let mime_type = stream.mime_type().to_string();
        let (stop_tx, stop_rx) = oneshot::channel();

        self.elapsed.send_replace(0);
        let pump = tokio::spawn(pump_chunks(StreamGuard::new(stream), stop_rx));
        let ticker = tokio::spawn(tick_elapsed(self.elapsed.clone()));

        info!(mime = %mime_type, "Recording started");
        self.active = Some(ActiveRecording {
            mime_type,
            stop_tx,
            pump,
            ticker,
        });
        Ok(())
    }

    /// Finish the recording and return it as an audio attachment.
    ///
    /// Returns `Ok(None)` when nothing is being recorded. The device is
    /// released on every path out of this call.
    pub async fn stop(&mut self) -> Result<Option<Attachment>, RecordingError> {
        let Some(active) = self.active.take() else {
            debug!("stop called while idle");
            return Ok(None);
        };

        active.ticker.abort();
        // The pump may already have exited if the device ended the stream.
        let _ = active.stop_tx.send(());

        let capture = active.pump.await.map_err(|e| RecordingError::Capture {
            message: e.to_string(),
        })?;

        if let Some(error) = capture.error {
            if capture.chunks.is_empty() {
                return Err(error);
            }
            warn!(error = %error, "Audio capture ended early, keeping partial recording");
        }

        let mut buffer = BytesMut::new();
        for chunk in &capture.chunks {
            buffer.extend_from_slice(chunk);
        }

        let name = format!(
            "voice-message-{}.{}",
            now_millis(),
            extension_for(&active.mime_type)
        );
        info!(name = %name, bytes = buffer.len(), seconds = self.elapsed_seconds(), "Recording finished");

        Ok(Some(attachment_codec::materialize(
            name,
            active.mime_type,
            buffer.freeze(),
        )))
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("Recorder dropped while recording, abandoning capture");
            active.ticker.abort();
            // Dropping the aborted pump releases the device.
            active.pump.abort();
        }
    }
}

async fn pump_chunks(mut stream: StreamGuard, mut stop_rx: oneshot::Receiver<()>) -> Capture {
    let mut capture = Capture::default();
    let mut stopped = false;
    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                stopped = true;
                break;
            }
            chunk = stream.stream.next_chunk() => match chunk {
                Some(Ok(data)) => capture.chunks.push(data),
                Some(Err(e)) => {
                    capture.error = Some(e);
                    break;
                }
                None => break,
            },
        }
    }

    if stopped {
        stream.release();
        flush_remaining(&mut stream, &mut capture).await;
    }
    capture
}

/// Collect the chunks a released device still holds.
async fn flush_remaining(stream: &mut StreamGuard, capture: &mut Capture) {
    let drain = async {
        while let Some(chunk) = stream.stream.next_chunk().await {
            match chunk {
                Ok(data) => capture.chunks.push(data),
                Err(e) => {
                    capture.error = Some(e);
                    break;
                }
            }
        }
    };

    if tokio::time::timeout(FLUSH_TIMEOUT, drain).await.is_err() {
        warn!("Capture device still producing after release, dropping the rest");
    }
}

async fn tick_elapsed(elapsed: Arc<watch::Sender<u64>>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        elapsed.send_modify(|secs| *secs += 1);
    }
}

/// File extension for a recording MIME type, e.g. `audio/webm;codecs=opus` -> `webm`.
fn extension_for(mime_type: &str) -> &str {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/').map(|(_, sub)| sub) {
        Some("mpeg") => "mp3",
        Some("x-wav") | Some("wave") => "wav",
        Some(sub) if !sub.is_empty() => sub,
        _ => "bin",
    }
}

/// Captures audio by running an external recorder that writes to stdout,
/// e.g. `arecord -q -f cd -t wav -`. Killing the process releases the device.
pub struct CommandAudioDevice {
    program: String,
    args: Vec<String>,
    mime_type: String,
}

impl CommandAudioDevice {
    pub fn new(program: impl Into<String>, args: Vec<String>, mime_type: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            mime_type: mime_type.into(),
        }
    }

    /// Parse a shell-like command line split on whitespace.
    pub fn from_command_line(command_line: &str, mime_type: impl Into<String>) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), mime_type))
    }
}

#[async_trait]
impl AudioInputDevice for CommandAudioDevice {
    async fn open(&self) -> Result<Box<dyn AudioInputStream>, RecordingError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecordingError::DeviceAccess {
                message: format!("failed to start '{}': {}", self.program, e),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| RecordingError::DeviceAccess {
            message: "capture process has no stdout".to_string(),
        })?;

        debug!(program = %self.program, pid = ?child.id(), "Audio capture process started");
        Ok(Box::new(CommandAudioStream {
            child: Some(child),
            stdout,
            mime_type: self.mime_type.clone(),
        }))
    }
}

struct CommandAudioStream {
    child: Option<Child>,
    stdout: ChildStdout,
    mime_type: String,
}

#[async_trait]
impl AudioInputStream for CommandAudioStream {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn next_chunk(&mut self) -> Option<Result<Bytes, RecordingError>> {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        match self.stdout.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(Bytes::from(buf)))
            }
            Err(e) => Some(Err(RecordingError::Capture {
                message: e.to_string(),
            })),
        }
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.start_kill()
        {
            debug!(error = %e, "Capture process already exited");
        }
    }
}
