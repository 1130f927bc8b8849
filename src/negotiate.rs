//! The negotiate exchange: URLs, payload types, and response validation.
//!
//! A negotiate response is judged in a fixed order, where earlier checks take
//! priority over later ones:
//!
//! 1. HTTP status must be 200.
//! 2. The body must parse as a JSON object.
//! 3. An `error` field aborts with the server's message.
//! 4. A `ProtocolVersion` field marks a legacy ASP.NET SignalR server. This is
//!    checked before any other field because legacy payloads reuse field
//!    names with different shapes.
//! 5. A string `url` field is a redirect (with an optional `accessToken`),
//!    which is reported but not followed.
//! 6. If `availableTransports` is an array, at least one entry must be
//!    `WebSockets` with the `Text` transfer format. An absent field is
//!    treated as compatible.
//! 7. The connection identifier is taken from `connectionToken`, falling back
//!    to `connectionId`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SignalRError};
use crate::http::HttpResponse;

/// Negotiate protocol version requested by this client.
pub const NEGOTIATE_VERSION: u32 = 1;

/// Transport name advertised for WebSockets.
pub const WEBSOCKETS_TRANSPORT: &str = "WebSockets";

/// Transfer format required by this client.
pub const TEXT_TRANSFER_FORMAT: &str = "Text";

/// `http://{host}/negotiate?negotiateVersion=1`
pub fn negotiate_url(host: &str) -> String {
    format!("http://{host}/negotiate?negotiateVersion={NEGOTIATE_VERSION}")
}

/// `ws://{host}`
pub fn transport_url(host: &str) -> String {
    format!("ws://{host}")
}

// ── Wire types ──────────────────────────────────────────────────────

/// One entry of the `availableTransports` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    /// Transport name, e.g. `"WebSockets"`, `"ServerSentEvents"`, `"LongPolling"`.
    pub transport: String,
    /// Transfer formats supported over this transport, e.g. `"Text"`, `"Binary"`.
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

impl AvailableTransport {
    /// Returns `true` for a WebSockets entry that lists the Text format.
    pub fn supports_websockets_text(&self) -> bool {
        self.transport == WEBSOCKETS_TRANSPORT
            && self
                .transfer_formats
                .iter()
                .any(|f| f == TEXT_TRANSFER_FORMAT)
    }
}

/// Outcome of a negotiate response that passed validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiated {
    /// Identifier to correlate the transport with this negotiation.
    pub connection_id: Option<String>,
    /// Well-formed entries of `availableTransports`, or `None` when the
    /// server omitted the field.
    pub available_transports: Option<Vec<AvailableTransport>>,
    /// `negotiateVersion` echoed by the server, if any.
    pub negotiate_version: Option<u64>,
}

// ── Validation ──────────────────────────────────────────────────────

/// Validate a completed negotiate exchange.
///
/// # Errors
///
/// Returns the error for the first failed check, in the order listed in the
/// [module documentation](self).
pub fn validate_response(response: &HttpResponse) -> Result<Negotiated> {
    if response.status != 200 {
        return Err(SignalRError::NegotiateStatus {
            status: response.status,
        });
    }
    validate_body(&response.body)
}

/// Validate a negotiate body, skipping the status check.
///
/// # Errors
///
/// See [`validate_response`].
pub fn validate_body(body: &str) -> Result<Negotiated> {
    let object = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(object)) => object,
        _ => {
            return Err(SignalRError::MalformedResponse {
                body: body.to_string(),
            })
        }
    };
    validate_object(&object)
}

fn validate_object(object: &Map<String, Value>) -> Result<Negotiated> {
    if let Some(error) = object.get("error") {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(SignalRError::ServerError { message });
    }

    if object.contains_key("ProtocolVersion") {
        return Err(SignalRError::LegacyServer);
    }

    if let Some(url) = string_field(object, "url") {
        return Err(SignalRError::RedirectNotSupported {
            url: url.to_string(),
            access_token: string_field(object, "accessToken").map(str::to_string),
        });
    }

    let available_transports: Option<Vec<AvailableTransport>> =
        match object.get("availableTransports") {
            Some(Value::Array(entries)) => {
                if !entries.iter().any(entry_supports_websockets_text) {
                    return Err(SignalRError::NoCompatibleTransport);
                }
                Some(
                    entries
                        .iter()
                        .filter_map(|e| serde_json::from_value(e.clone()).ok())
                        .collect(),
                )
            }
            _ => None,
        };

    let connection_id = string_field(object, "connectionToken")
        .or_else(|| string_field(object, "connectionId"))
        .map(str::to_string);

    Ok(Negotiated {
        connection_id,
        available_transports,
        negotiate_version: object.get("negotiateVersion").and_then(Value::as_u64),
    })
}

fn string_field<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    object.get(name).and_then(Value::as_str)
}

/// Checked on the raw value so that one malformed format entry does not hide
/// a valid `"Text"` next to it.
fn entry_supports_websockets_text(entry: &Value) -> bool {
    let Some(entry) = entry.as_object() else {
        return false;
    };
    if string_field(entry, "transport") != Some(WEBSOCKETS_TRANSPORT) {
        return false;
    }
    entry
        .get("transferFormats")
        .and_then(Value::as_array)
        .is_some_and(|formats| {
            formats
                .iter()
                .any(|f| f.as_str() == Some(TEXT_TRANSFER_FORMAT))
        })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn ok(body: &str) -> HttpResponse {
        HttpResponse::new(200, body)
    }

    #[test]
    fn urls_follow_host() {
        assert_eq!(
            negotiate_url("localhost:5000/chat"),
            "http://localhost:5000/chat/negotiate?negotiateVersion=1"
        );
        assert_eq!(transport_url("localhost:5000/chat"), "ws://localhost:5000/chat");
    }

    #[test]
    fn status_is_checked_before_body() {
        let err = validate_response(&HttpResponse::new(404, "not json")).unwrap_err();
        assert!(matches!(err, SignalRError::NegotiateStatus { status: 404 }));
    }

    #[test]
    fn non_object_body_is_malformed() {
        for body in ["", "[]", "42", "\"text\"", "{"] {
            let err = validate_response(&ok(body)).unwrap_err();
            assert!(
                matches!(err, SignalRError::MalformedResponse { .. }),
                "body {body:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn error_field_wins_over_legacy_marker() {
        let err = validate_body(r#"{"error":"nope","ProtocolVersion":"1.5"}"#).unwrap_err();
        match err {
            SignalRError::ServerError { message } => assert_eq!(message, "nope"),
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[test]
    fn legacy_marker_wins_over_everything_else() {
        let err = validate_body(
            r#"{"ProtocolVersion":"1.5","url":"http://x","connectionId":"a",
                "availableTransports":[{"transport":"WebSockets","transferFormats":["Text"]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SignalRError::LegacyServer));
    }

    #[test]
    fn redirect_extracts_url_and_token() {
        let err = validate_body(r#"{"url":"https://other/hub","accessToken":"tok"}"#).unwrap_err();
        match err {
            SignalRError::RedirectNotSupported { url, access_token } => {
                assert_eq!(url, "https://other/hub");
                assert_eq!(access_token.as_deref(), Some("tok"));
            }
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[test]
    fn non_string_url_is_not_a_redirect() {
        let negotiated = validate_body(r#"{"url":5,"connectionId":"abc"}"#).unwrap();
        assert_eq!(negotiated.connection_id.as_deref(), Some("abc"));
    }

    #[test]
    fn websockets_text_is_compatible() {
        let negotiated = validate_body(
            r#"{"availableTransports":[
                {"transport":"LongPolling","transferFormats":["Text","Binary"]},
                {"transport":"WebSockets","transferFormats":["Binary","Text"]}]}"#,
        )
        .unwrap();
        let transports = negotiated.available_transports.unwrap();
        assert_eq!(transports.len(), 2);
        assert!(transports[1].supports_websockets_text());
    }

    #[test]
    fn websockets_binary_only_is_incompatible() {
        let err = validate_body(
            r#"{"availableTransports":[{"transport":"WebSockets","transferFormats":["Binary"]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SignalRError::NoCompatibleTransport));
    }

    #[test]
    fn empty_transport_list_is_incompatible() {
        let err = validate_body(r#"{"availableTransports":[]}"#).unwrap_err();
        assert!(matches!(err, SignalRError::NoCompatibleTransport));
    }

    #[test]
    fn malformed_format_entry_does_not_hide_text() {
        let negotiated = validate_body(
            r#"{"availableTransports":[{"transport":"WebSockets","transferFormats":[1,"Text"]}]}"#,
        )
        .unwrap();
        // The entry is compatible but does not deserialize into the typed form.
        assert_eq!(negotiated.available_transports, Some(vec![]));
    }

    #[test]
    fn missing_transport_list_is_assumed_compatible() {
        let negotiated = validate_body(r#"{"connectionId":"abc"}"#).unwrap();
        assert!(negotiated.available_transports.is_none());
        assert_eq!(negotiated.connection_id.as_deref(), Some("abc"));
    }

    #[test]
    fn connection_token_takes_precedence() {
        let negotiated =
            validate_body(r#"{"connectionId":"id","connectionToken":"token"}"#).unwrap();
        assert_eq!(negotiated.connection_id.as_deref(), Some("token"));
    }

    #[test]
    fn non_string_identifiers_are_ignored() {
        let negotiated = validate_body(r#"{"connectionId":"id","connectionToken":7}"#).unwrap();
        assert_eq!(negotiated.connection_id.as_deref(), Some("id"));
    }

    #[test]
    fn negotiate_version_is_reported() {
        let negotiated = validate_body(r#"{"negotiateVersion":1,"connectionToken":"t"}"#).unwrap();
        assert_eq!(negotiated.negotiate_version, Some(1));
    }
}
