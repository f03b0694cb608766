use std::time::Duration;

use axum::{
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Everything a control API handler can fail with.
///
/// Validation variants are produced before anything reaches the event queue.
/// `Apply` carries the consumer's own error text untouched.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to read request body: {0}")]
    ReadBody(String),
    #[error("{0}")]
    Decode(String),
    #[error("{field:?} should be a valid json. Error: {source}")]
    InvalidJson {
        field: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid or empty job label specified: {0:?}")]
    InvalidJobLabel(String),
    #[error("Invalid or empty event name specified: {0:?}")]
    InvalidEventName(String),
    #[error("nil value specified for clusterm configuration")]
    NilConfig,
    #[error("node with name {0:?} doesn't exist")]
    NodeNotFound(String),
    #[error("info for {0:?} job doesn't exist")]
    JobNotExist(String),
    #[error("{0}")]
    Apply(String),
    #[error("cluster event consumer is not running")]
    ConsumerGone,
    #[error("timed out after {0:?} waiting for the event to be applied")]
    Timeout(Duration),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ApiError {
    /// The control API reports every failure class as a server error.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// True for failures detected before the request touched the queue.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ApiError::ReadBody(_)
                | ApiError::Decode(_)
                | ApiError::InvalidJson { .. }
                | ApiError::InvalidJobLabel(_)
                | ApiError::InvalidEventName(_)
                | ApiError::NilConfig
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{self}\n"),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_quote_offending_values() {
        assert_eq!(
            ApiError::InvalidJobLabel("foo".to_string()).to_string(),
            r#"Invalid or empty job label specified: "foo""#
        );
        assert_eq!(
            ApiError::JobNotExist("last".to_string()).to_string(),
            r#"info for "last" job doesn't exist"#
        );
    }

    #[test]
    fn rejections_are_classified() {
        assert!(ApiError::NilConfig.is_rejection());
        assert!(!ApiError::Apply("boom".to_string()).is_rejection());
        assert!(!ApiError::NodeNotFound("n1".to_string()).is_rejection());
    }
}
