//! Normalisation of webhook reply bodies into plain text.
//!
//! Webhook backends answer in a handful of shapes. The rules below are tried
//! in order against the parsed body and the first match wins.

use serde_json::Value;

use super::webhook_service::TransportError;

/// Reply used when the endpoint accepted the turn without a JSON body.
pub const GENERIC_SUCCESS: &str = "Request processed successfully";

/// Reply used when the JSON body matched none of the known shapes.
pub const UNRECOGNIZED_REPLY: &str = "Received response from webhook";

type ExtractionRule = fn(&Value) -> Option<String>;

const RULES: &[(&str, ExtractionRule)] = &[
    ("bare string", bare_string),
    ("message field", message_field),
    ("output field", output_field),
    ("first list element", first_element),
];

fn bare_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field)?.as_str().map(str::to_string)
}

fn message_field(value: &Value) -> Option<String> {
    string_field(value, "message")
}

fn output_field(value: &Value) -> Option<String> {
    string_field(value, "output")
}

/// A string first element is taken as-is, even when empty. Otherwise its
/// first non-empty `message` or `output` is used.
fn first_element(value: &Value) -> Option<String> {
    let first = value.as_array()?.first()?;
    if let Some(text) = first.as_str() {
        return Some(text.to_string());
    }
    [
        first.get("message").and_then(Value::as_str),
        first.get("output").and_then(Value::as_str),
    ]
    .into_iter()
    .flatten()
    .find(|text| !text.is_empty())
    .map(str::to_string)
}

/// Apply the extraction rules to an already parsed body.
pub fn extract_reply(value: &Value) -> String {
    for (name, rule) in RULES {
        if let Some(text) = rule(value) {
            tracing::debug!(rule = *name, "Extracted webhook reply");
            return text;
        }
    }

    tracing::debug!(body = %value, "Webhook reply did not match a known shape");
    UNRECOGNIZED_REPLY.to_string()
}

/// Interpret a successful (2xx) response body.
///
/// Empty bodies and non-JSON content types are acknowledged without parsing.
/// A body declared as JSON that fails to parse is a format error.
pub fn interpret_body(
    status: u16,
    content_type: Option<&str>,
    body: &str,
) -> Result<String, TransportError> {
    let is_json = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"));

    if status == 204 || body.trim().is_empty() || !is_json {
        tracing::debug!(status, content_type = ?content_type, "Received non-JSON webhook response");
        return Ok(GENERIC_SUCCESS.to_string());
    }

    let value: Value = serde_json::from_str(body).map_err(|e| {
        tracing::warn!(error = %e, "Webhook declared JSON but body did not parse");
        TransportError::Format
    })?;

    Ok(extract_reply(&value))
}
