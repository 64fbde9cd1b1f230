use serde::Serialize;
use thiserror::Error;

/// Failure to obtain page markup for a URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("page fetch timed out")]
    Timeout,
    #[error("page returned HTTP {0}")]
    HttpStatus(u16),
    #[error("page fetch failed: {0}")]
    Network(String),
}

impl AcquisitionError {
    /// Whether the next strategy in the chain may be tried.
    /// A non-2xx answer is authoritative; only transport failures fall through.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network(_))
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::HttpStatus(status.as_u16())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Failure reported by the completion service call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("completion service rejected credentials: {0}")]
    AuthFailure(String),
    #[error("completion service rate limited the request: {0}")]
    RateLimited(String),
    #[error("completion service error: {0}")]
    Service(String),
    #[error("completion request failed: {0}")]
    Network(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SitemapError {
    #[error("sitemap unavailable: {0}")]
    Unavailable(String),
}

/// Everything an orchestrator can surface besides an extraction outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request",
            Self::Acquisition(AcquisitionError::Timeout) => "fetch_timeout",
            Self::Acquisition(AcquisitionError::HttpStatus(_)) => "fetch_http_status",
            Self::Acquisition(AcquisitionError::Network(_)) => "fetch_network",
            Self::Completion(CompletionError::AuthFailure(_)) => "completion_auth",
            Self::Completion(CompletionError::RateLimited(_)) => "completion_rate_limited",
            Self::Completion(CompletionError::Service(_)) => "completion_service",
            Self::Completion(CompletionError::Network(_)) => "completion_network",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.code().to_string(),
            details: Some(self.to_string()),
            raw: None,
        }
    }
}

/// Serialized error shape returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl From<&SitemapError> for ErrorBody {
    fn from(err: &SitemapError) -> Self {
        ErrorBody {
            error: "sitemap_unavailable".to_string(),
            details: Some(err.to_string()),
            raw: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_fall_back() {
        assert!(AcquisitionError::Timeout.allows_fallback());
        assert!(AcquisitionError::Network("reset".into()).allows_fallback());
        assert!(!AcquisitionError::HttpStatus(404).allows_fallback());
    }

    #[test]
    fn codes_are_stable() {
        let e: PipelineError = AcquisitionError::HttpStatus(503).into();
        assert_eq!(e.code(), "fetch_http_status");
        let e: PipelineError = CompletionError::RateLimited("slow down".into()).into();
        assert_eq!(e.code(), "completion_rate_limited");
        assert_eq!(PipelineError::Validation("x".into()).code(), "invalid_request");
    }

    #[test]
    fn error_body_omits_empty_fields() {
        let body = ErrorBody::from(&SitemapError::Unavailable("HTTP 500".into()));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "sitemap_unavailable");
        assert!(json.get("raw").is_none());
    }
}
