use std::collections::BTreeMap;
use std::fmt;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

/// Fixed message reported when an attachment upload is rejected with 413.
pub const SIZE_LIMIT_MESSAGE: &str = "file exceeds size limit";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Request cancelled")]
    Cancelled,

    #[error(transparent)]
    Api(#[from] ErrorResult),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// HTTP status of the failed call, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Api(result) => Some(result.status),
            ApiError::RequestFailed(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(StatusCode::TOO_MANY_REQUESTS)
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self.status() {
            Some(StatusCode::UNAUTHORIZED) => {
                Some("Verify JIRA_EMAIL and JIRA_API_TOKEN for this site")
            }
            Some(StatusCode::FORBIDDEN) => {
                Some("The account lacks permission for this resource")
            }
            Some(StatusCode::NOT_FOUND) => Some("Check if the resource ID is correct"),
            Some(StatusCode::TOO_MANY_REQUESTS) => {
                Some("Consider reducing request frequency and try again later")
            }
            Some(StatusCode::PAYLOAD_TOO_LARGE) => {
                Some("Attachments must stay below the site's upload limit")
            }
            _ => match self {
                ApiError::RequestFailed(err) if err.is_timeout() => {
                    Some("Check your network connection or raise JIRA_TIMEOUT_SECS")
                }
                _ => None,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Structured failure of a call that reached the server with status >= 400.
#[derive(Debug, Clone)]
pub struct ErrorResult {
    pub status: StatusCode,
    pub method: Method,
    pub path: String,
    pub messages: Vec<String>,
    pub field_errors: BTreeMap<String, String>,
    pub raw_body: Option<String>,
}

/// The service's standard error document. Either member may be absent or
/// explicitly `null`.
#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    #[serde(default, rename = "errorMessages")]
    error_messages: Option<Vec<String>>,
    #[serde(default)]
    errors: Option<BTreeMap<String, String>>,
}

impl ErrorResult {
    /// Builds the result from a failed response body, keeping the raw text
    /// when the body is not the structured error document.
    pub fn from_body(status: StatusCode, method: Method, path: &str, body: &[u8]) -> Self {
        let mut result = Self::bare(status, method, path);

        match serde_json::from_slice::<ErrorPayload>(body) {
            Ok(payload) => {
                result.messages = payload.error_messages.unwrap_or_default();
                result.field_errors = payload.errors.unwrap_or_default();
            }
            Err(_) => {
                let text = String::from_utf8_lossy(body);
                if !text.trim().is_empty() {
                    result.raw_body = Some(text.into_owned());
                }
            }
        }

        result
    }

    pub fn size_limit(method: Method, path: &str) -> Self {
        let mut result = Self::bare(StatusCode::PAYLOAD_TOO_LARGE, method, path);
        result.messages.push(SIZE_LIMIT_MESSAGE.to_string());
        result
    }

    fn bare(status: StatusCode, method: Method, path: &str) -> Self {
        Self {
            status,
            method,
            path: path.to_string(),
            messages: Vec::new(),
            field_errors: BTreeMap::new(),
            raw_body: None,
        }
    }

    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    pub fn is_size_limit(&self) -> bool {
        self.status == StatusCode::PAYLOAD_TOO_LARGE
            && self.messages.iter().any(|m| m == SIZE_LIMIT_MESSAGE)
    }

    /// Top-level messages followed by `field: message` entries.
    pub fn details(&self) -> Vec<String> {
        self.messages
            .iter()
            .cloned()
            .chain(
                self.field_errors
                    .iter()
                    .map(|(field, msg)| format!("{field}: {msg}")),
            )
            .collect()
    }
}

impl fmt::Display for ErrorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.method, self.path, self.status.as_u16())?;
        let reason = self.status_text();
        if !reason.is_empty() {
            write!(f, " {reason}")?;
        }

        let details = self.details();
        if !details.is_empty() {
            write!(f, " - {}", details.join("; "))
        } else if let Some(raw) = &self.raw_body {
            write!(f, " - {raw}")
        } else {
            Ok(())
        }
    }
}

impl std::error::Error for ErrorResult {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_structured_messages() {
        let body = br#"{"errorMessages":["Issue does not exist","Try again"],"errors":{}}"#;
        let result = ErrorResult::from_body(StatusCode::NOT_FOUND, Method::GET, "/issue/X-1", body);

        assert_eq!(
            result.to_string(),
            "GET /issue/X-1: 404 Not Found - Issue does not exist; Try again"
        );
        assert!(result.raw_body.is_none());
    }

    #[test]
    fn test_display_field_errors_after_messages() {
        let body = br#"{"errorMessages":["Bad input"],"errors":{"summary":"required","assignee":"unknown user"}}"#;
        let result =
            ErrorResult::from_body(StatusCode::BAD_REQUEST, Method::POST, "/issue", body);

        assert_eq!(
            result.to_string(),
            "POST /issue: 400 Bad Request - Bad input; assignee: unknown user; summary: required"
        );
    }

    #[test]
    fn test_null_members_are_treated_as_absent() {
        let body = br#"{"errorMessages":null,"errors":{"summary":"required"}}"#;
        let result =
            ErrorResult::from_body(StatusCode::BAD_REQUEST, Method::POST, "/issue", body);

        assert!(result.raw_body.is_none());
        assert_eq!(
            result.to_string(),
            "POST /issue: 400 Bad Request - summary: required"
        );

        let body = br#"{"errorMessages":["Login required"],"errors":null}"#;
        let result = ErrorResult::from_body(StatusCode::UNAUTHORIZED, Method::GET, "/myself", body);
        assert!(result.raw_body.is_none());
        assert_eq!(
            result.to_string(),
            "GET /myself: 401 Unauthorized - Login required"
        );
    }

    #[test]
    fn test_display_raw_body_fallback() {
        let body = b"<html>upstream exploded</html>";
        let result = ErrorResult::from_body(
            StatusCode::BAD_GATEWAY,
            Method::PUT,
            "/issue/X-1",
            body,
        );

        assert_eq!(result.raw_body.as_deref(), Some("<html>upstream exploded</html>"));
        assert_eq!(
            result.to_string(),
            "PUT /issue/X-1: 502 Bad Gateway - <html>upstream exploded</html>"
        );
    }

    #[test]
    fn test_display_empty_body() {
        let result =
            ErrorResult::from_body(StatusCode::UNAUTHORIZED, Method::GET, "/myself", b"");
        assert!(result.raw_body.is_none());
        assert_eq!(result.to_string(), "GET /myself: 401 Unauthorized");
    }

    #[test]
    fn test_json_without_known_members_has_no_details() {
        let result =
            ErrorResult::from_body(StatusCode::FORBIDDEN, Method::DELETE, "/issue/X-1", b"{}");
        assert!(result.details().is_empty());
        assert!(result.raw_body.is_none());
        assert_eq!(result.to_string(), "DELETE /issue/X-1: 403 Forbidden");
    }

    #[test]
    fn test_unknown_status_has_no_reason() {
        let status = StatusCode::from_u16(499).unwrap();
        let result = ErrorResult::from_body(status, Method::GET, "/x", b"");
        assert_eq!(result.to_string(), "GET /x: 499");
    }

    #[test]
    fn test_size_limit() {
        let result = ErrorResult::size_limit(Method::POST, "/issue/X-1/attachments");
        assert!(result.is_size_limit());
        assert!(result.to_string().ends_with("413 Payload Too Large - file exceeds size limit"));
    }

    #[test]
    fn test_api_error_helpers() {
        let err = ApiError::from(ErrorResult::from_body(
            StatusCode::TOO_MANY_REQUESTS,
            Method::GET,
            "/search",
            b"",
        ));
        assert!(err.is_rate_limited());
        assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert!(err.suggestion().is_some());

        assert!(!ApiError::Cancelled.is_rate_limited());
        assert!(ApiError::Cancelled.suggestion().is_none());
    }
}
