//! Error types for the translation core

use serde::Serialize;
use serde_json::Value;

/// Errors raised while translating a request or decoding an engine result
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    /// A DSL keyword or modifier with no SQL counterpart
    #[error("unsupported element: {0}")]
    Unsupported(String),

    /// The request violates a structural invariant
    #[error("malformed request: {0}")]
    Malformed(String),

    /// A pipeline reference that cannot be resolved among its siblings
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// The engine returned data the decoder cannot interpret
    #[error("bucket {bucket:?}: {reason}")]
    ResultShape { bucket: String, reason: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TranslateError>;

/// Elasticsearch-style error response
#[derive(Debug, Serialize)]
struct EsErrorResponse {
    error: EsErrorDetail,
    status: u16,
}

#[derive(Debug, Serialize)]
struct EsErrorDetail {
    root_cause: Vec<RootCause>,
    #[serde(rename = "type")]
    error_type: String,
    reason: String,
}

#[derive(Debug, Serialize)]
struct RootCause {
    #[serde(rename = "type")]
    error_type: String,
    reason: String,
}

impl TranslateError {
    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        Self::Malformed(what.into())
    }

    pub(crate) fn shape(bucket: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResultShape {
            bucket: bucket.into(),
            reason: reason.into(),
        }
    }

    /// Elasticsearch exception type reported for this error
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Unsupported(_) => "parsing_exception",
            Self::Malformed(_) | Self::Json(_) => "illegal_argument_exception",
            Self::Resolution(_) => "aggregation_execution_exception",
            Self::ResultShape { .. } => "search_phase_execution_exception",
            Self::Config(_) => "index_not_found_exception",
        }
    }

    /// HTTP status the request boundary should answer with
    pub fn status(&self) -> u16 {
        match self {
            Self::Unsupported(_) | Self::Malformed(_) | Self::Json(_) | Self::Resolution(_) => 400,
            Self::Config(_) => 404,
            Self::ResultShape { .. } => 500,
        }
    }

    /// Render the error the way Elasticsearch would answer it
    pub fn to_es_body(&self) -> Value {
        let error_type = self.error_type().to_string();
        let reason = self.to_string();

        let body = EsErrorResponse {
            error: EsErrorDetail {
                root_cause: vec![RootCause {
                    error_type: error_type.clone(),
                    reason: reason.clone(),
                }],
                error_type,
                reason,
            },
            status: self.status(),
        };

        serde_json::to_value(body).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message() {
        let err = TranslateError::unsupported("fuzzy");
        assert_eq!(err.to_string(), "unsupported element: fuzzy");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_result_shape_names_bucket() {
        let err = TranslateError::shape("$bucket:a%0", "unsupported result data");
        assert!(err.to_string().contains("$bucket:a%0"));
        assert_eq!(err.error_type(), "search_phase_execution_exception");
    }

    #[test]
    fn test_es_body() {
        let body = TranslateError::malformed("bad").to_es_body();
        assert_eq!(body["status"], 400);
        assert_eq!(body["error"]["type"], "illegal_argument_exception");
        assert_eq!(body["error"]["root_cause"][0]["reason"], "malformed request: bad");
    }
}
