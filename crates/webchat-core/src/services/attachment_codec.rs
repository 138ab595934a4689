//! Conversion between live attachments and their durable `data:` URL form.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use bytes::Bytes;
use tracing::debug;

use crate::models::{Attachment, AttachmentSource, generate_id};

const FALLBACK_MIME: &str = "application/octet-stream";
const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),
}

/// Read a file from disk and wrap it as a fresh attachment.
///
/// The MIME type is guessed from the file extension.
pub async fn materialize_path(path: &Path) -> Result<Attachment, CodecError> {
    let data = tokio::fs::read(path).await.map_err(|source| CodecError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "attachment".to_string());
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    debug!(path = %path.display(), mime = %mime_type, size = data.len(), "Materialized attachment");
    Ok(materialize(name, mime_type, Bytes::from(data)))
}

/// Wrap in-memory bytes as a fresh attachment. Images also get a preview.
pub fn materialize(name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Attachment {
    let mime_type = mime_type.into();
    let preview_url = has_prefix(&mime_type, "image/").then(|| encode_data_url(&mime_type, &data));

    Attachment {
        id: generate_id(),
        name: name.into(),
        size: Some(data.len() as u64),
        mime_type,
        preview_url,
        source: AttachmentSource::Live(data),
    }
}

/// Convert an attachment to its storage-safe form.
///
/// Image previews are reused as the stored url. Anything else is base64
/// encoded. Already durable attachments are returned unchanged.
pub fn serialize(attachment: Attachment) -> Attachment {
    let AttachmentSource::Live(data) = &attachment.source else {
        return attachment;
    };

    let url = match &attachment.preview_url {
        Some(preview) if is_image(&attachment) => preview.clone(),
        _ => encode_data_url(&attachment.mime_type, data),
    };

    Attachment {
        source: AttachmentSource::Durable(url),
        ..attachment
    }
}

/// Binary content of an attachment from whichever representation it holds.
pub fn bytes(attachment: &Attachment) -> Result<Bytes, CodecError> {
    match &attachment.source {
        AttachmentSource::Live(data) => Ok(data.clone()),
        AttachmentSource::Durable(url) => decode_data_url(url).map(|(_, data)| Bytes::from(data)),
    }
}

pub fn is_image(attachment: &Attachment) -> bool {
    has_prefix(&attachment.mime_type, "image/")
}

pub fn is_audio(attachment: &Attachment) -> bool {
    has_prefix(&attachment.mime_type, "audio/")
}

fn has_prefix(mime_type: &str, prefix: &str) -> bool {
    mime_type
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Render a byte count in the largest fitting unit with at most two decimals.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, SIZE_UNITS[unit])
}

pub fn encode_data_url(mime_type: &str, data: &[u8]) -> String {
    let mime_type = if mime_type.is_empty() {
        FALLBACK_MIME
    } else {
        mime_type
    };
    format!("data:{};base64,{}", mime_type, BASE64_STANDARD.encode(data))
}

/// Split a base64 `data:` URL into its MIME type and decoded bytes.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>), CodecError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| CodecError::InvalidDataUrl("missing data: scheme".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| CodecError::InvalidDataUrl("missing payload separator".to_string()))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| CodecError::InvalidDataUrl("only base64 payloads are supported".to_string()))?;

    let data = BASE64_STANDARD
        .decode(payload)
        .map_err(|e| CodecError::InvalidDataUrl(e.to_string()))?;

    Ok((mime_type.to_string(), data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> Attachment {
        materialize("photo.png", "image/png", Bytes::from_static(&[0x89, 0x50, 0x4e, 0x47]))
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 Bytes");
        assert_eq!(format_size(500), "500 Bytes");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1_048_576), "1 MB");
        assert_eq!(format_size(1_073_741_824), "1 GB");
        assert_eq!(format_size(5 * 1_099_511_627_776), "5120 GB");
    }

    #[test]
    fn test_format_size_rounds_to_two_decimals() {
        // 1234 / 1024 = 1.2050...
        assert_eq!(format_size(1234), "1.21 KB");
    }

    #[test]
    fn test_materialize_image_has_preview() {
        let attachment = png();
        assert!(attachment.is_live());
        assert_eq!(attachment.size, Some(4));
        assert_eq!(
            attachment.preview_url.as_deref(),
            Some("data:image/png;base64,iVBORw==")
        );
    }

    #[test]
    fn test_materialize_non_image_has_no_preview() {
        let attachment = materialize("a.pdf", "application/pdf", Bytes::from_static(b"%PDF"));
        assert!(attachment.preview_url.is_none());
    }

    #[test]
    fn test_serialize_reuses_image_preview() {
        let attachment = png();
        let preview = attachment.preview_url.clone().unwrap();
        let durable = serialize(attachment);

        assert_eq!(durable.url(), Some(preview.as_str()));
        assert!(durable.live_data().is_none());
    }

    #[test]
    fn test_serialize_encodes_other_files() {
        let attachment = materialize("hello.txt", "text/plain", Bytes::from_static(b"hello"));
        let durable = serialize(attachment);
        assert_eq!(durable.url(), Some("data:text/plain;base64,aGVsbG8="));
    }

    #[test]
    fn test_serialize_is_idempotent() {
        let once = serialize(png());
        let twice = serialize(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_classification_tolerates_bad_types() {
        let mut attachment = png();
        assert!(is_image(&attachment));
        assert!(!is_audio(&attachment));

        attachment.mime_type = "AUDIO/webm".to_string();
        assert!(is_audio(&attachment));

        attachment.mime_type = String::new();
        assert!(!is_image(&attachment));
        assert!(!is_audio(&attachment));

        attachment.mime_type = "ü".to_string();
        assert!(!is_image(&attachment));
    }

    #[test]
    fn test_bytes_from_both_representations() {
        let live = materialize("a.bin", "application/octet-stream", Bytes::from_static(b"\x00\x01\x02"));
        assert_eq!(bytes(&live).unwrap().as_ref(), b"\x00\x01\x02");

        let durable = serialize(live);
        assert_eq!(bytes(&durable).unwrap().as_ref(), b"\x00\x01\x02");
    }

    #[test]
    fn test_decode_rejects_non_data_urls() {
        assert!(matches!(
            decode_data_url("blob:https://example.com/123"),
            Err(CodecError::InvalidDataUrl(_))
        ));
        assert!(decode_data_url("data:text/plain,hello").is_err());
    }

    #[test]
    fn test_empty_mime_gets_fallback() {
        assert_eq!(encode_data_url("", b"x"), "data:application/octet-stream;base64,eA==");
    }

    #[tokio::test]
    async fn test_materialize_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        tokio::fs::write(&path, b"%PDF-1.4").await.unwrap();

        let attachment = materialize_path(&path).await.unwrap();
        assert_eq!(attachment.name, "report.pdf");
        assert_eq!(attachment.mime_type, "application/pdf");
        assert_eq!(attachment.size, Some(8));
    }

    #[tokio::test]
    async fn test_materialize_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = materialize_path(&dir.path().join("missing.png")).await;
        assert!(matches!(result, Err(CodecError::Read { .. })));
    }
}
