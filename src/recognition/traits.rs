//! Recognition abstraction traits
//!
//! Defines the interface to the celebrity recognition service and the closed
//! set of failure kinds the pipeline branches on.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::ImageReference;

/// A face the service matched to a known identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedFace {
    /// Durable identifier assigned by the recognition service
    pub identity_id: String,
    pub display_name: String,
}

impl RecognizedFace {
    pub fn new(identity_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identity_id: identity_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Recognition result for one image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recognition {
    pub faces: Vec<RecognizedFace>,
    /// Faces detected but not matched to any identity
    pub unrecognized_count: usize,
}

/// Why a recognition call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognitionErrorKind {
    /// Image missing, corrupt, too large or in an unsupported format
    InvalidInput,
    AccessDenied,
    RateLimited,
    Throttled,
    ServiceInternal,
    Unknown,
}

impl RecognitionErrorKind {
    /// Map a service error code to its kind.
    ///
    /// This is the only place provider codes are inspected.
    pub fn from_code(code: &str) -> Self {
        match code {
            "InvalidS3ObjectException"
            | "InvalidParameterException"
            | "ImageTooLargeException"
            | "InvalidImageFormatException" => RecognitionErrorKind::InvalidInput,
            "AccessDeniedException" => RecognitionErrorKind::AccessDenied,
            "ProvisionedThroughputExceededException" => RecognitionErrorKind::RateLimited,
            "ThrottlingException" => RecognitionErrorKind::Throttled,
            "InternalServerError" => RecognitionErrorKind::ServiceInternal,
            _ => RecognitionErrorKind::Unknown,
        }
    }

    /// Whether redelivering the image later may succeed
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            RecognitionErrorKind::RateLimited
                | RecognitionErrorKind::Throttled
                | RecognitionErrorKind::ServiceInternal
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecognitionErrorKind::InvalidInput => "invalid_input",
            RecognitionErrorKind::AccessDenied => "access_denied",
            RecognitionErrorKind::RateLimited => "rate_limited",
            RecognitionErrorKind::Throttled => "throttled",
            RecognitionErrorKind::ServiceInternal => "service_internal",
            RecognitionErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognition failure with its classified kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("recognition failed ({kind}): {message}")]
pub struct RecognitionError {
    kind: RecognitionErrorKind,
    message: String,
}

impl RecognitionError {
    pub fn new(kind: RecognitionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build from a raw service error code
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        Self::new(RecognitionErrorKind::from_code(code), message)
    }

    pub fn kind(&self) -> RecognitionErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Celebrity recognition trait
/// Implementations must be thread-safe and async-compatible
#[async_trait]
pub trait CelebrityRecognizer: Send + Sync + 'static {
    /// Recognize the celebrities visible in a stored image
    async fn recognize(&self, image: &ImageReference) -> Result<Recognition, RecognitionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_classification() {
        let cases = [
            ("InvalidS3ObjectException", RecognitionErrorKind::InvalidInput, false),
            ("InvalidParameterException", RecognitionErrorKind::InvalidInput, false),
            ("ImageTooLargeException", RecognitionErrorKind::InvalidInput, false),
            ("InvalidImageFormatException", RecognitionErrorKind::InvalidInput, false),
            ("AccessDeniedException", RecognitionErrorKind::AccessDenied, false),
            ("ProvisionedThroughputExceededException", RecognitionErrorKind::RateLimited, true),
            ("ThrottlingException", RecognitionErrorKind::Throttled, true),
            ("InternalServerError", RecognitionErrorKind::ServiceInternal, true),
            ("SomethingNew", RecognitionErrorKind::Unknown, false),
            ("", RecognitionErrorKind::Unknown, false),
        ];

        for (code, kind, retryable) in cases {
            let err = RecognitionError::from_code(code, "boom");
            assert_eq!(err.kind(), kind, "code {code}");
            assert_eq!(err.is_retryable(), retryable, "code {code}");
        }
    }

    #[test]
    fn test_error_display() {
        let err = RecognitionError::new(RecognitionErrorKind::Throttled, "slow down");
        assert_eq!(err.to_string(), "recognition failed (throttled): slow down");
    }
}
