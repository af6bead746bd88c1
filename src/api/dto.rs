//! Queue batch request/response data transfer objects

use serde::{Deserialize, Serialize};

use crate::event::InboundMessage;
use crate::service::BatchOutcome;

/// Batch of queue messages as delivered to the consumer
#[derive(Debug, Deserialize)]
pub struct QueueBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueMessage>,
}

#[derive(Debug, Deserialize)]
pub struct QueueMessage {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub body: String,
}

impl QueueBatch {
    pub fn into_messages(self) -> Vec<InboundMessage> {
        self.records
            .into_iter()
            .map(|r| InboundMessage::new(r.message_id, r.body))
            .collect()
    }
}

/// Partial batch response: the messages to redeliver
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchResponse {
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<ItemFailure>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

impl From<&BatchOutcome> for BatchResponse {
    fn from(outcome: &BatchOutcome) -> Self {
        Self {
            batch_item_failures: outcome
                .redeliver_ids()
                .map(|id| ItemFailure {
                    item_identifier: id.to_string(),
                })
                .collect(),
        }
    }
}

impl BatchResponse {
    pub fn is_success(&self) -> bool {
        self.batch_item_failures.is_empty()
    }
}
