//! Webhook payload parsing and validation.
//!
//! Pure functions over the inbound body. Nothing here performs I/O, so the
//! workflow can call them during replay without recording their output.

use crate::{
    error::ParseError,
    models::{AccountScope, WebhookEnvelope, WebhookEvent},
};

const EVENT_PATH_PREFIX: &str = "/restapi/v1.0/account/";
const EXTENSION_SEGMENT: &str = "/extension/";
const VOICEMAIL_SUFFIX: &str = "/voicemail";

/// Parses a raw webhook body into an event.
///
/// Every envelope field is optional, so any JSON object of the notification
/// shape parses. Whether the result is usable is decided by
/// [`is_valid_payload`] and [`is_voicemail_event`].
///
/// # Errors
///
/// Returns `ParseError::Empty` for a blank body and
/// `ParseError::MalformedJson` for anything that does not decode.
pub fn parse(raw_body: &str) -> Result<WebhookEvent, ParseError> {
    if raw_body.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let envelope: WebhookEnvelope = serde_json::from_str(raw_body)
        .map_err(|e| ParseError::MalformedJson { reason: e.to_string() })?;

    Ok(WebhookEvent::from_envelope(envelope, raw_body))
}

/// Returns true if the event names an event path.
pub fn is_valid_payload(event: &WebhookEvent) -> bool {
    !event.event_path.trim().is_empty()
}

/// Returns true if the event path is an extension voicemail notification.
pub fn is_voicemail_event(event: &WebhookEvent) -> bool {
    let path = event.event_path.as_str();
    path.starts_with(EVENT_PATH_PREFIX)
        && path.contains(EXTENSION_SEGMENT)
        && path.ends_with(VOICEMAIL_SUFFIX)
}

/// Returns the id of the first `AudioTranscription` attachment.
pub fn transcription_attachment_id(event: &WebhookEvent) -> Option<i64> {
    event.message.transcription_attachment_id()
}

/// Extracts the numeric account and extension ids from an event path.
///
/// # Errors
///
/// Returns `ParseError::MissingAccountScope` unless both `account/<digits>`
/// and `extension/<digits>` appear in the path.
pub fn parse_account_scope(event_path: &str) -> Result<AccountScope, ParseError> {
    let missing = || ParseError::MissingAccountScope { event_path: event_path.to_string() };

    let account_id = numeric_segment_after(event_path, "account/").ok_or_else(missing)?;
    let extension_id = numeric_segment_after(event_path, "extension/").ok_or_else(missing)?;

    Ok(AccountScope { account_id, extension_id })
}

fn numeric_segment_after(path: &str, marker: &str) -> Option<i64> {
    let start = path.find(marker)? + marker.len();
    let digits: &str = path[start..].split('/').next()?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOICEMAIL_BODY: &str = r#"{
        "uuid": "4a4c1b7e-0000-4000-8000-1234567890ab",
        "event": "/restapi/v1.0/account/123/extension/456/voicemail",
        "timestamp": "2024-03-01T17:45:15.000Z",
        "subscriptionId": "sub-1",
        "ownerId": "456",
        "body": {
            "id": 987,
            "from": {"phoneNumber": "+15551230001", "name": "Jane Caller"},
            "to": [{"phoneNumber": "+15551230002", "name": "Front Desk"}],
            "attachments": [
                {"id": 1, "uri": "https://media/1", "type": "AudioRecording"},
                {"id": 2, "uri": "https://media/2", "type": "AudioTranscription"}
            ],
            "vmTranscriptionStatus": "Completed"
        }
    }"#;

    #[test]
    fn parses_voicemail_notification() {
        let event = parse(VOICEMAIL_BODY).unwrap();

        assert_eq!(event.id, "4a4c1b7e-0000-4000-8000-1234567890ab");
        assert_eq!(event.message_id(), 987);
        assert_eq!(event.raw_body, VOICEMAIL_BODY);
        assert!(is_valid_payload(&event));
        assert!(is_voicemail_event(&event));
        assert_eq!(transcription_attachment_id(&event), Some(2));
    }

    #[test]
    fn blank_body_is_empty() {
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert_eq!(parse("  \n\t"), Err(ParseError::Empty));
    }

    #[test]
    fn broken_json_is_malformed() {
        assert!(matches!(parse("{\"event\":"), Err(ParseError::MalformedJson { .. })));
        assert!(matches!(parse("[1, 2, 3]"), Err(ParseError::MalformedJson { .. })));
    }

    #[test]
    fn object_without_event_is_invalid() {
        let event = parse(r#"{"uuid": "abc"}"#).unwrap();
        assert!(!is_valid_payload(&event));
    }

    #[test]
    fn non_voicemail_paths_rejected() {
        for path in [
            "/restapi/v1.0/account/123/extension/456/message-store",
            "/restapi/v1.0/account/123/voicemail",
            "/account/123/extension/456/voicemail",
            "/restapi/v1.0/account/123/extension/456/voicemail/extra",
        ] {
            let body = format!(r#"{{"event": "{path}"}}"#);
            let event = parse(&body).unwrap();
            assert!(!is_voicemail_event(&event), "{path} should not be a voicemail event");
        }
    }

    #[test]
    fn account_scope_extracted_from_path() {
        let scope = parse_account_scope("/restapi/v1.0/account/123/extension/456/voicemail").unwrap();
        assert_eq!(scope, AccountScope { account_id: 123, extension_id: 456 });
    }

    #[test]
    fn account_scope_requires_numeric_ids() {
        assert!(parse_account_scope("/restapi/v1.0/account/~/extension/~/voicemail").is_err());
        assert!(parse_account_scope("/restapi/v1.0/account/123/voicemail").is_err());
        assert!(parse_account_scope("").is_err());
    }
}
