//! Storage abstraction traits
//!
//! Defines the interface for per-identity aggregate persistence.
//! Implementations own their concurrency control; callers never lock.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Accumulated images for one recognized identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// Identity ID from the recognition service
    pub identity_id: String,
    /// Public image URLs in arrival order
    pub image_urls: Vec<String>,
}

impl AggregateRecord {
    pub fn new(identity_id: impl Into<String>, image_urls: Vec<String>) -> Self {
        Self {
            identity_id: identity_id.into(),
            image_urls,
        }
    }

    pub fn contains(&self, image_url: &str) -> bool {
        self.image_urls.iter().any(|u| u == image_url)
    }
}

/// How a merge treats a URL the record already holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Always append
    Append,
    /// Append only if the URL is not present yet
    Unique,
}

impl MergeMode {
    /// Compute the list to write, or `None` when nothing changes.
    pub fn apply(self, current: &[String], image_url: &str) -> Option<Vec<String>> {
        if self == MergeMode::Unique && current.iter().any(|u| u == image_url) {
            return None;
        }
        let mut images = Vec::with_capacity(current.len() + 1);
        images.extend_from_slice(current);
        images.push(image_url.to_string());
        Some(images)
    }
}

/// Why a store operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// Table or collection does not exist
    NotFound,
    ThroughputExceeded,
    /// Concurrent writers kept winning, or a conditional write was rejected
    Conflict,
    RequestLimitExceeded,
    ServiceInternal,
    ItemTooLarge,
    Unknown,
}

impl StoreErrorKind {
    /// Map a service error code to its kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "ResourceNotFoundException" => StoreErrorKind::NotFound,
            "ProvisionedThroughputExceededException" => StoreErrorKind::ThroughputExceeded,
            "ConditionalCheckFailedException" | "TransactionConflictException" => {
                StoreErrorKind::Conflict
            }
            "RequestLimitExceeded" => StoreErrorKind::RequestLimitExceeded,
            "InternalServerError" => StoreErrorKind::ServiceInternal,
            "ItemCollectionSizeLimitExceededException" => StoreErrorKind::ItemTooLarge,
            _ => StoreErrorKind::Unknown,
        }
    }

    /// Whether retrying the merge later may succeed
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            StoreErrorKind::ThroughputExceeded
                | StoreErrorKind::Conflict
                | StoreErrorKind::RequestLimitExceeded
                | StoreErrorKind::ServiceInternal
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoreErrorKind::NotFound => "not_found",
            StoreErrorKind::ThroughputExceeded => "throughput_exceeded",
            StoreErrorKind::Conflict => "conflict",
            StoreErrorKind::RequestLimitExceeded => "request_limit_exceeded",
            StoreErrorKind::ServiceInternal => "service_internal",
            StoreErrorKind::ItemTooLarge => "item_too_large",
            StoreErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store failure with its classified kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store operation failed ({kind}): {message}")]
pub struct StoreError {
    kind: StoreErrorKind,
    message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::from_code(code), message)
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Aggregate storage trait
/// Implementations must be thread-safe and async-compatible
#[async_trait]
pub trait AggregateStore: Send + Sync + 'static {
    /// Get the record for an identity
    async fn get(&self, identity_id: &str) -> Result<Option<AggregateRecord>, StoreError>;

    /// Create the record as `[image_url]` or append to its end, atomically.
    /// Concurrent merges for the same identity must all survive.
    async fn merge(&self, identity_id: &str, image_url: &str)
        -> Result<AggregateRecord, StoreError>;

    /// Like `merge`, but leaves the record untouched if it already holds `image_url`
    async fn merge_unique(
        &self,
        identity_id: &str,
        image_url: &str,
    ) -> Result<AggregateRecord, StoreError>;
}
