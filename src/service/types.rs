//! Service layer types

use crate::event::{DecodeError, ImageReference};
use crate::recognition::RecognitionError;
use crate::storage::{AggregateRecord, StoreError};

/// Furthest stage an event reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStage {
    Decoded,
    Recognized,
    Merging,
    Done,
}

/// What the transport should do with a batch item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Disposition {
    /// Fully processed
    Done,
    /// Failed terminally; logged and not redelivered
    Dropped,
    /// Failed transiently; redeliver the item later
    Redeliver,
}

/// A face whose merge failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceMergeFailure {
    pub identity_id: String,
    pub error: StoreError,
}

/// Outcome of one ingestion event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Recognition succeeded and every face was merged
    Done {
        image: ImageReference,
        records: Vec<AggregateRecord>,
        unrecognized_count: usize,
    },
    RecognitionFailed {
        image: ImageReference,
        error: RecognitionError,
    },
    /// At least one face's merge failed; the others were still attempted
    MergeFailed {
        image: ImageReference,
        records: Vec<AggregateRecord>,
        failures: Vec<FaceMergeFailure>,
    },
    /// The batch deadline expired while the event was in flight
    Cancelled {
        image: ImageReference,
        stage: EventStage,
    },
}

impl EventOutcome {
    pub fn image(&self) -> &ImageReference {
        match self {
            EventOutcome::Done { image, .. }
            | EventOutcome::RecognitionFailed { image, .. }
            | EventOutcome::MergeFailed { image, .. }
            | EventOutcome::Cancelled { image, .. } => image,
        }
    }

    pub fn stage(&self) -> EventStage {
        match self {
            EventOutcome::Done { .. } => EventStage::Done,
            EventOutcome::RecognitionFailed { .. } => EventStage::Decoded,
            EventOutcome::MergeFailed { .. } => EventStage::Merging,
            EventOutcome::Cancelled { stage, .. } => *stage,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            EventOutcome::Done { .. } => Disposition::Done,
            EventOutcome::RecognitionFailed { error, .. } if error.is_retryable() => {
                Disposition::Redeliver
            }
            EventOutcome::RecognitionFailed { .. } => Disposition::Dropped,
            EventOutcome::MergeFailed { failures, .. }
                if failures.iter().any(|f| f.error.is_retryable()) =>
            {
                Disposition::Redeliver
            }
            EventOutcome::MergeFailed { .. } => Disposition::Dropped,
            EventOutcome::Cancelled { .. } => Disposition::Redeliver,
        }
    }
}

/// Result for one message of the batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResult {
    DecodeFailed(DecodeError),
    Processed(Vec<EventOutcome>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub message_id: String,
    pub result: ItemResult,
}

impl ItemOutcome {
    /// Worst disposition among the item's events
    pub fn disposition(&self) -> Disposition {
        match &self.result {
            ItemResult::DecodeFailed(_) => Disposition::Dropped,
            ItemResult::Processed(events) => events
                .iter()
                .map(EventOutcome::disposition)
                .max()
                .unwrap_or(Disposition::Done),
        }
    }
}

/// Outcome of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub items: Vec<ItemOutcome>,
}

impl BatchOutcome {
    /// True when no item needs redelivery
    pub fn is_success(&self) -> bool {
        self.items
            .iter()
            .all(|item| item.disposition() != Disposition::Redeliver)
    }

    /// Message IDs the transport should redeliver
    pub fn redeliver_ids(&self) -> impl Iterator<Item = &str> {
        self.items
            .iter()
            .filter(|item| item.disposition() == Disposition::Redeliver)
            .map(|item| item.message_id.as_str())
    }

    pub fn decode_failures(&self) -> impl Iterator<Item = &DecodeError> {
        self.items.iter().filter_map(|item| match &item.result {
            ItemResult::DecodeFailed(e) => Some(e),
            ItemResult::Processed(_) => None,
        })
    }

    pub fn count(&self, disposition: Disposition) -> usize {
        self.items
            .iter()
            .filter(|item| item.disposition() == disposition)
            .count()
    }
}
