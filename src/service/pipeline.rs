//! Ingest pipeline - core business logic
//!
//! Drives each decoded event through recognition and then one merge per
//! recognized face, and folds the results into a per-message disposition the
//! transport acts on. Nothing is retried in-process: transient failures are
//! handed back to the transport for redelivery.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::event::{EventDecoder, InboundMessage, IngestionEvent};
use crate::recognition::CelebrityRecognizer;
use crate::storage::{AggregateRecord, AggregateStore, StoreError};

use super::types::*;

/// Recognition-and-aggregation pipeline
pub struct IngestPipeline<R: CelebrityRecognizer, S: AggregateStore> {
    recognizer: Arc<R>,
    store: Arc<S>,
    decoder: EventDecoder,
    deduplicate: bool,
}

impl<R: CelebrityRecognizer, S: AggregateStore> IngestPipeline<R, S> {
    /// Create a new pipeline
    pub fn new(recognizer: Arc<R>, store: Arc<S>, decoder: EventDecoder, config: &PipelineConfig) -> Self {
        Self {
            recognizer,
            store,
            decoder,
            deduplicate: config.deduplicate_images,
        }
    }

    /// Get a reference to the store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Process one transport batch.
    ///
    /// Messages are handled in order; a failure in one never stops the rest.
    pub async fn process_batch(&self, batch: &[InboundMessage], deadline: Option<Instant>) -> BatchOutcome {
        let start = Instant::now();
        let mut items = Vec::with_capacity(batch.len());

        for decoded in self.decoder.decode(batch) {
            let result = match decoded.events {
                Ok(events) => {
                    let mut outcomes = Vec::with_capacity(events.len());
                    for event in &events {
                        outcomes.push(self.process_event(event, deadline).await);
                    }
                    ItemResult::Processed(outcomes)
                }
                Err(e) => {
                    warn!(message_id = decoded.message_id, error = %e, "Dropping undecodable message");
                    ItemResult::DecodeFailed(e)
                }
            };
            items.push(ItemOutcome {
                message_id: decoded.message_id.to_string(),
                result,
            });
        }

        let outcome = BatchOutcome { items };
        info!(
            "Batch of {} message(s) processed in {}ms: {} done, {} dropped, {} to redeliver",
            batch.len(),
            start.elapsed().as_millis(),
            outcome.count(Disposition::Done),
            outcome.count(Disposition::Dropped),
            outcome.count(Disposition::Redeliver),
        );
        outcome
    }

    /// Process a single ingestion event
    pub async fn process_event(&self, event: &IngestionEvent, deadline: Option<Instant>) -> EventOutcome {
        let image = event.image.clone();
        debug!(message_id = %event.message_id, image = %image, "Recognizing");

        let recognition = match with_deadline(deadline, self.recognizer.recognize(&image)).await {
            None => {
                warn!(image = %image, "Deadline expired during recognition");
                return EventOutcome::Cancelled {
                    image,
                    stage: EventStage::Decoded,
                };
            }
            Some(Err(error)) => {
                if error.is_retryable() {
                    warn!(image = %image, kind = %error.kind(), error = %error, "Recognition failed, will be redelivered");
                } else {
                    error!(image = %image, kind = %error.kind(), error = %error, "Recognition failed, dropping image");
                }
                return EventOutcome::RecognitionFailed { image, error };
            }
            Some(Ok(recognition)) => recognition,
        };

        info!(
            "{} celebrities and {} unrecognized people in {}",
            recognition.faces.len(),
            recognition.unrecognized_count,
            image
        );

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!(image = %image, "Deadline expired before merging");
            return EventOutcome::Cancelled {
                image,
                stage: EventStage::Recognized,
            };
        }

        let image_url = image.public_url();
        let mut records = Vec::with_capacity(recognition.faces.len());
        let mut failures = Vec::new();

        for face in &recognition.faces {
            match with_deadline(deadline, self.merge(&face.identity_id, &image_url)).await {
                None => {
                    warn!(image = %image, identity = %face.identity_id, "Deadline expired during merge");
                    return EventOutcome::Cancelled {
                        image,
                        stage: EventStage::Merging,
                    };
                }
                Some(Ok(record)) => {
                    info!(
                        "{} ({}) updated with {}",
                        face.display_name, face.identity_id, image.key
                    );
                    records.push(record);
                }
                Some(Err(error)) => {
                    error!(
                        identity = %face.identity_id,
                        image = %image_url,
                        kind = %error.kind(),
                        error = %error,
                        "Merge failed"
                    );
                    failures.push(FaceMergeFailure {
                        identity_id: face.identity_id.clone(),
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            EventOutcome::Done {
                image,
                records,
                unrecognized_count: recognition.unrecognized_count,
            }
        } else {
            EventOutcome::MergeFailed {
                image,
                records,
                failures,
            }
        }
    }

    async fn merge(&self, identity_id: &str, image_url: &str) -> Result<AggregateRecord, StoreError> {
        if self.deduplicate {
            self.store.merge_unique(identity_id, image_url).await
        } else {
            self.store.merge(identity_id, image_url).await
        }
    }
}

/// Run `fut` unless `deadline` passes first; `None` means it was aborted.
async fn with_deadline<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), fut)
            .await
            .ok(),
        None => Some(fut.await),
    }
}
