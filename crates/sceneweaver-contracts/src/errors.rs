use std::fmt;

use serde_json::Value;

const MAX_BODY_CHARS: usize = 512;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApiErrorKind {
    /// Caught on the client; no request was sent.
    Validation,
    /// The backend answered with a non-success status.
    Rejected { status: u16 },
    /// No response at all (connect, timeout, broken body).
    Transport,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiError {
    kind: ApiErrorKind,
    message: String,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Validation,
            message: message.into(),
        }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Rejected { status },
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Transport,
            message: message.into(),
        }
    }

    /// Builds the error for a non-success response, decoding the backend's `detail` payload.
    pub fn from_response(status: u16, body: &str) -> Self {
        if status == 401 {
            return Self::rejected(status, "Your session has expired. Please log in again.");
        }
        let message = error_payload_message(body)
            .unwrap_or_else(|| format!("Request failed with status {status}"));
        Self::rejected(status, message)
    }

    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        match self.kind {
            ApiErrorKind::Rejected { status } => Some(status),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind == ApiErrorKind::Validation
    }

    pub fn is_transport(&self) -> bool {
        self.kind == ApiErrorKind::Transport
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

/// Extracts a display string from an error body.
///
/// Understands `{"detail": "..."}` and `{"detail": [{"msg": "..."}, ...]}`; any other non-empty
/// body is returned verbatim (truncated).
pub fn error_payload_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Ok(parsed) = serde_json::from_str::<Value>(trimmed) else {
        return Some(truncate_text(trimmed, MAX_BODY_CHARS));
    };
    match parsed.get("detail") {
        Some(Value::String(detail)) => {
            Some(detail.trim().to_string()).filter(|text| !text.is_empty())
        }
        Some(Value::Array(items)) => {
            let messages = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(text) => Some(text.trim()),
                    other => other.get("msg").and_then(Value::as_str).map(str::trim),
                })
                .filter(|text| !text.is_empty())
                .collect::<Vec<&str>>();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join(", "))
            }
        }
        Some(Value::Null) | None => parsed
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(truncate_text(trimmed, MAX_BODY_CHARS))),
        Some(other) => Some(truncate_text(&other.to_string(), MAX_BODY_CHARS)),
    }
}

/// Cuts `value` to `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_text(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", value[..cut].trim_end()),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{error_payload_message, truncate_text, ApiError, ApiErrorKind};

    #[test]
    fn truncate_text_cuts_on_char_boundaries() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("exactly", 7), "exactly");
        assert_eq!(truncate_text("two words", 4), "two…");
        assert_eq!(truncate_text("ééééé", 2), "éé…");
    }

    #[test]
    fn single_detail_message() {
        assert_eq!(
            error_payload_message(r#"{"detail": "Image not found"}"#).as_deref(),
            Some("Image not found")
        );
    }

    #[test]
    fn validation_detail_list_is_joined() {
        let body = r#"{"detail": [
            {"loc": ["body", "prompt"], "msg": "field required", "type": "missing"},
            {"loc": ["body", "seed"], "msg": "value is not a valid integer"}
        ]}"#;
        assert_eq!(
            error_payload_message(body).as_deref(),
            Some("field required, value is not a valid integer")
        );
    }

    #[test]
    fn plain_text_body_is_passed_through() {
        assert_eq!(
            error_payload_message("Internal Server Error").as_deref(),
            Some("Internal Server Error")
        );
        assert_eq!(error_payload_message("   "), None);
    }

    #[test]
    fn unauthorized_maps_to_login_prompt() {
        let err = ApiError::from_response(401, r#"{"detail": "Could not validate credentials"}"#);
        assert_eq!(err.status(), Some(401));
        assert!(err.message().contains("log in again"));
    }

    #[test]
    fn empty_error_body_falls_back_to_status() {
        let err = ApiError::from_response(502, "");
        assert_eq!(err.kind(), ApiErrorKind::Rejected { status: 502 });
        assert_eq!(err.to_string(), "Request failed with status 502");
    }

    #[test]
    fn kinds_are_distinguishable() {
        assert!(ApiError::validation("Prompt cannot be empty").is_validation());
        assert!(ApiError::transport("connection refused").is_transport());
        assert_eq!(ApiError::rejected(404, "gone").status(), Some(404));
    }
}
