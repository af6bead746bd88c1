//! Ingestion event types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Location of a stored image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Bucket holding the object
    pub bucket: String,
    /// Object key inside the bucket
    pub key: String,
    /// Region the bucket lives in
    pub region: String,
}

impl ImageReference {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            region: region.into(),
        }
    }

    /// Public URL of the object.
    ///
    /// Pure function of bucket, region and key; this is the value stored in
    /// aggregate records.
    pub fn public_url(&self) -> String {
        format!(
            "http://{}.s3-{}.amazonaws.com/{}",
            self.bucket, self.region, self.key
        )
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{} ({})", self.bucket, self.key, self.region)
    }
}

/// One opaque message body as delivered by the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Transport identifier, used to ask for redelivery
    pub message_id: String,
    pub body: String,
}

impl InboundMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
        }
    }
}

/// Notification of one newly stored image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionEvent {
    /// Message this event was decoded from
    pub message_id: String,
    pub image: ImageReference,
}
