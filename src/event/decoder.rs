//! Ingestion event decoder
//!
//! A message body is one of:
//! - a single-object notification `{"bucket", "key", "region"}`
//! - an envelope `{"records": [...]}` (or `"Records"`, as storage notifications
//!   spell it) holding one or more per-object records
//!
//! Either form may arrive wrapped once more as a JSON string by the queue.
//! Per-object records are accepted flat or in the native storage shape
//! `{"awsRegion", "s3": {"bucket": {"name"}, "object": {"key"}}}`.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::types::{ImageReference, InboundMessage, IngestionEvent};

/// Failure to decode one message. Never affects sibling messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message {message_id}: malformed JSON: {reason}")]
    Malformed { message_id: String, reason: String },

    #[error("message {message_id}: not a storage notification")]
    UnknownShape { message_id: String },

    #[error("message {message_id}: record {index} has no {field}")]
    MissingField {
        message_id: String,
        index: usize,
        field: &'static str,
    },
}

impl DecodeError {
    pub fn message_id(&self) -> &str {
        match self {
            DecodeError::Malformed { message_id, .. }
            | DecodeError::UnknownShape { message_id }
            | DecodeError::MissingField { message_id, .. } => message_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Notification {
    Envelope(Envelope),
    Single(ObjectRecord),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(alias = "Records")]
    records: Vec<ObjectRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ObjectRecord {
    Native(NativeRecord),
    Flat(FlatRecord),
}

#[derive(Debug, Deserialize)]
struct NativeRecord {
    #[serde(rename = "awsRegion")]
    aws_region: Option<String>,
    s3: NativeEntity,
}

#[derive(Debug, Deserialize)]
struct NativeEntity {
    bucket: NativeBucket,
    object: NativeObject,
}

#[derive(Debug, Deserialize)]
struct NativeBucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NativeObject {
    key: String,
}

#[derive(Debug, Deserialize)]
struct FlatRecord {
    bucket: Option<String>,
    key: String,
    region: Option<String>,
}

impl ObjectRecord {
    fn into_parts(self) -> (Option<String>, String, Option<String>) {
        match self {
            ObjectRecord::Native(r) => (Some(r.s3.bucket.name), r.s3.object.key, r.aws_region),
            ObjectRecord::Flat(r) => (r.bucket, r.key, r.region),
        }
    }
}

/// Result of decoding one message of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage<'a> {
    pub message_id: &'a str,
    pub events: Result<Vec<IngestionEvent>, DecodeError>,
}

/// Stateless decoder from queue messages to ingestion events.
///
/// Bucket and region defaults fill in flat records that omit them.
#[derive(Debug, Clone, Default)]
pub struct EventDecoder {
    default_bucket: Option<String>,
    default_region: Option<String>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(bucket: Option<String>, region: Option<String>) -> Self {
        Self {
            default_bucket: bucket.filter(|b| !b.is_empty()),
            default_region: region.filter(|r| !r.is_empty()),
        }
    }

    /// Decode a batch lazily, one entry per message, in batch order.
    pub fn decode<'a>(
        &'a self,
        batch: &'a [InboundMessage],
    ) -> impl Iterator<Item = DecodedMessage<'a>> + 'a {
        batch.iter().map(move |message| DecodedMessage {
            message_id: &message.message_id,
            events: self.decode_message(message),
        })
    }

    /// Decode a batch into a flat sequence of events and per-message errors.
    pub fn events<'a>(
        &'a self,
        batch: &'a [InboundMessage],
    ) -> impl Iterator<Item = Result<IngestionEvent, DecodeError>> + 'a {
        self.decode(batch).flat_map(|decoded| match decoded.events {
            Ok(events) => events.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(e) => vec![Err(e)],
        })
    }

    /// Decode a single message body.
    pub fn decode_message(&self, message: &InboundMessage) -> Result<Vec<IngestionEvent>, DecodeError> {
        let message_id = message.message_id.as_str();
        let malformed = |e: serde_json::Error| DecodeError::Malformed {
            message_id: message_id.to_string(),
            reason: e.to_string(),
        };

        let value: Value = serde_json::from_str(&message.body).map_err(malformed)?;

        // Queue wrapping: the document itself arrives as a JSON string
        let value = match value {
            Value::String(inner) => serde_json::from_str::<Value>(&inner).map_err(malformed)?,
            other => other,
        };

        let notification: Notification =
            serde_json::from_value(value).map_err(|_| DecodeError::UnknownShape {
                message_id: message_id.to_string(),
            })?;

        let records = match notification {
            Notification::Envelope(envelope) => envelope.records,
            Notification::Single(record) => vec![record],
        };

        debug!("Message {} carries {} record(s)", message_id, records.len());

        records
            .into_iter()
            .enumerate()
            .map(|(index, record)| self.to_event(message_id, index, record))
            .collect()
    }

    fn to_event(
        &self,
        message_id: &str,
        index: usize,
        record: ObjectRecord,
    ) -> Result<IngestionEvent, DecodeError> {
        let missing = |field| DecodeError::MissingField {
            message_id: message_id.to_string(),
            index,
            field,
        };

        let (bucket, key, region) = record.into_parts();
        let bucket = bucket
            .filter(|b| !b.is_empty())
            .or_else(|| self.default_bucket.clone())
            .ok_or_else(|| missing("bucket"))?;
        let region = region
            .filter(|r| !r.is_empty())
            .or_else(|| self.default_region.clone())
            .ok_or_else(|| missing("region"))?;
        if key.is_empty() {
            return Err(missing("key"));
        }

        Ok(IngestionEvent {
            message_id: message_id.to_string(),
            image: ImageReference { bucket, key, region },
        })
    }
}
