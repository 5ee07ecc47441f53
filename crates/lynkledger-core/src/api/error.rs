use std::collections::BTreeMap;
use std::fmt;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Keys the backend uses for a single human-readable message.
const MESSAGE_KEYS: [&str; 3] = ["detail", "message", "error"];

/// Key the backend uses for validation errors not tied to one field.
const NON_FIELD_ERRORS_KEY: &str = "non_field_errors";

/// Per-field validation messages, keyed by field name.
pub type FieldErrors = BTreeMap<String, String>;

/// Error payload sent by the backend, classified once from its shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(untagged)]
pub enum ErrorBody {
    FieldErrors {
        #[serde(rename = "fieldErrors")]
        field_errors: FieldErrors,
    },
    Message {
        message: String,
    },
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|item| item.as_str().map(str::to_string)),
        _ => None,
    }
}

fn joined_strings(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
}

impl ErrorBody {
    pub fn message(text: impl Into<String>) -> Self {
        ErrorBody::Message {
            message: text.into(),
        }
    }

    /// Classify a response body.
    ///
    /// `{"detail": ..}`, `{"message": ..}`, `{"error": ..}` and
    /// `{"non_field_errors": [..]}` become a message; any other object of
    /// strings or string lists becomes field errors (first message per field).
    /// Everything else is kept as a truncated message.
    pub fn parse(status: StatusCode, body: &str) -> Self {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            let reason = status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Self::message(reason);
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => return Self::message(truncate_body(trimmed)),
        };

        match value {
            Value::Object(map) => {
                for key in MESSAGE_KEYS {
                    if let Some(Value::String(text)) = map.get(key) {
                        return Self::message(text.clone());
                    }
                }
                if let Some(text) = map.get(NON_FIELD_ERRORS_KEY).and_then(joined_strings) {
                    return Self::message(text);
                }
                let field_errors: FieldErrors = map
                    .iter()
                    .filter_map(|(field, value)| first_string(value).map(|m| (field.clone(), m)))
                    .collect();
                if field_errors.is_empty() {
                    Self::message(truncate_body(trimmed))
                } else {
                    ErrorBody::FieldErrors { field_errors }
                }
            }
            other => match joined_strings(&other) {
                Some(text) => Self::message(text),
                None => Self::message(truncate_body(trimmed)),
            },
        }
    }

    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ErrorBody::FieldErrors { field_errors } => Some(field_errors),
            ErrorBody::Message { .. } => None,
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorBody::Message { message } => f.write_str(message),
            ErrorBody::FieldErrors { field_errors } => {
                let parts: Vec<String> = field_errors
                    .iter()
                    .map(|(field, message)| format!("{}: {}", field, message))
                    .collect();
                f.write_str(&parts.join("; "))
            }
        }
    }
}

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No response reached the client.
    Network,
    /// 4xx other than 401.
    Client,
    /// Terminal 401: refresh unavailable, failed, or already retried.
    Unauthorized,
    /// 5xx.
    Server,
    /// 2xx whose body did not match the expected type.
    Decode,
    /// Failure before anything was sent (bad request, credential storage).
    Local,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Unauthorized: {body}")]
    Unauthorized { body: ErrorBody },

    #[error("Request failed with status {status}: {body}")]
    Status { status: StatusCode, body: ErrorBody },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Credential storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = ErrorBody::parse(status, body);
        if status == StatusCode::UNAUTHORIZED {
            GatewayError::Unauthorized { body }
        } else {
            GatewayError::Status { status, body }
        }
    }

    /// Map a transport error, keeping "nothing was sent" apart from
    /// "no response came back".
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_builder() {
            GatewayError::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Network(err)
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Network(_) => ErrorKind::Network,
            GatewayError::Unauthorized { .. } => ErrorKind::Unauthorized,
            GatewayError::Status { status, .. } if status.is_server_error() => ErrorKind::Server,
            GatewayError::Status { .. } => ErrorKind::Client,
            GatewayError::Decode(_) => ErrorKind::Decode,
            GatewayError::Storage(_) | GatewayError::InvalidRequest(_) => ErrorKind::Local,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GatewayError::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            GatewayError::Status { status, .. } => Some(*status),
            GatewayError::Network(err) => err.status(),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&ErrorBody> {
        match self {
            GatewayError::Unauthorized { body } | GatewayError::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, GatewayError::Unauthorized { .. })
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Network(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            GatewayError::Unauthorized { body } | GatewayError::Status { body, .. } => {
                body.to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detail_message() {
        let body = ErrorBody::parse(
            StatusCode::UNAUTHORIZED,
            r#"{"detail": "Given token not valid for any token type", "code": "token_not_valid"}"#,
        );
        assert_eq!(body, ErrorBody::message("Given token not valid for any token type"));
    }

    #[test]
    fn test_parse_field_errors() {
        let body = ErrorBody::parse(
            StatusCode::BAD_REQUEST,
            r#"{"email": ["Enter a valid email address.", "Too long."], "password": "Too short."}"#,
        );
        let fields = body.field_errors().expect("expected field errors");
        assert_eq!(fields["email"], "Enter a valid email address.");
        assert_eq!(fields["password"], "Too short.");
        assert_eq!(
            body.to_string(),
            "email: Enter a valid email address.; password: Too short."
        );
    }

    #[test]
    fn test_parse_non_field_errors() {
        let body = ErrorBody::parse(
            StatusCode::BAD_REQUEST,
            r#"{"non_field_errors": ["User is already a member", "Try another email"]}"#,
        );
        assert_eq!(
            body,
            ErrorBody::message("User is already a member; Try another email")
        );
    }

    #[test]
    fn test_parse_plain_and_empty_bodies() {
        assert_eq!(
            ErrorBody::parse(StatusCode::BAD_GATEWAY, "<html>upstream down</html>"),
            ErrorBody::message("<html>upstream down</html>")
        );
        assert_eq!(
            ErrorBody::parse(StatusCode::NOT_FOUND, "  "),
            ErrorBody::message("Not Found")
        );
        assert_eq!(
            ErrorBody::parse(StatusCode::BAD_REQUEST, r#"["first", "second"]"#),
            ErrorBody::message("first; second")
        );
    }

    #[test]
    fn test_long_body_is_truncated() {
        let long = "é".repeat(400);
        let ErrorBody::Message { message } = ErrorBody::parse(StatusCode::INTERNAL_SERVER_ERROR, &long)
        else {
            panic!("expected message body");
        };
        assert!(message.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_error_body_serializes_tagged_shapes() {
        let message = serde_json::to_value(ErrorBody::message("nope")).unwrap();
        assert_eq!(message, serde_json::json!({"message": "nope"}));

        let mut fields = FieldErrors::new();
        fields.insert("email".to_string(), "required".to_string());
        let fields = serde_json::to_value(ErrorBody::FieldErrors { field_errors: fields }).unwrap();
        assert_eq!(fields, serde_json::json!({"fieldErrors": {"email": "required"}}));
    }

    #[test]
    fn test_from_status_kinds() {
        let err = GatewayError::from_status(StatusCode::UNAUTHORIZED, "");
        assert!(err.is_unauthorized());
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.user_message(), "Unauthorized");

        let err = GatewayError::from_status(StatusCode::FORBIDDEN, r#"{"detail": "No access"}"#);
        assert_eq!(err.kind(), ErrorKind::Client);
        assert_eq!(err.user_message(), "No access");
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));

        let err = GatewayError::from_status(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(err.kind(), ErrorKind::Server);
    }

    #[test]
    fn test_unauthorized_user_message_uses_server_detail() {
        let err = GatewayError::from_status(
            StatusCode::UNAUTHORIZED,
            r#"{"detail": "No active account found with the given credentials"}"#,
        );
        assert_eq!(
            err.user_message(),
            "No active account found with the given credentials"
        );
    }
}
