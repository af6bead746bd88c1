//! Queue batch handler

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::recognition::CelebrityRecognizer;
use crate::service::IngestPipeline;
use crate::storage::AggregateStore;

use super::dto::{BatchResponse, QueueBatch};

/// Run one queue batch payload through the pipeline.
///
/// Only an unparseable outer batch is an error; everything inside it is
/// reported per message in the response.
pub async fn handle_batch<R, S>(
    pipeline: &IngestPipeline<R, S>,
    payload: &str,
    deadline: Option<Instant>,
) -> Result<BatchResponse>
where
    R: CelebrityRecognizer,
    S: AggregateStore,
{
    let batch: QueueBatch = serde_json::from_str(payload).context("Invalid queue batch payload")?;
    let messages = batch.into_messages();
    info!("Received batch of {} message(s)", messages.len());

    let outcome = pipeline.process_batch(&messages, deadline).await;
    Ok(BatchResponse::from(&outcome))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::event::{EventDecoder, ImageReference};
    use crate::recognition::{Recognition, RecognitionError, RecognitionErrorKind, RecognizedFace};
    use crate::storage::MemoryStore;

    /// Finds Ada in every image except those under `throttled/`
    struct AdaEverywhere;

    #[async_trait]
    impl CelebrityRecognizer for AdaEverywhere {
        async fn recognize(&self, image: &ImageReference) -> Result<Recognition, RecognitionError> {
            if image.key.starts_with("throttled/") {
                return Err(RecognitionError::new(RecognitionErrorKind::Throttled, "slow down"));
            }
            Ok(Recognition {
                faces: vec![RecognizedFace::new("C1", "Ada")],
                unrecognized_count: 0,
            })
        }
    }

    fn pipeline() -> IngestPipeline<AdaEverywhere, MemoryStore> {
        IngestPipeline::new(
            Arc::new(AdaEverywhere),
            Arc::new(MemoryStore::new()),
            EventDecoder::new(),
            &PipelineConfig::default(),
        )
    }

    fn queue_payload(messages: &[(&str, String)]) -> String {
        let records: Vec<_> = messages
            .iter()
            .map(|(id, body)| serde_json::json!({ "messageId": id, "body": body }))
            .collect();
        serde_json::json!({ "Records": records }).to_string()
    }

    fn notification(key: &str) -> String {
        serde_json::json!({
            "Records": [{
                "awsRegion": "r",
                "s3": { "bucket": { "name": "b" }, "object": { "key": key } }
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_successful_batch() {
        let pipeline = pipeline();
        let payload = queue_payload(&[("m1", notification("k.jpg"))]);

        let response = handle_batch(&pipeline, &payload, None).await.unwrap();
        assert!(response.is_success());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({ "batchItemFailures": [] })
        );

        let record = pipeline.store().get("C1").await.unwrap().unwrap();
        assert_eq!(record.image_urls, vec!["http://b.s3-r.amazonaws.com/k.jpg"]);
    }

    #[tokio::test]
    async fn test_reports_items_to_redeliver() {
        let pipeline = pipeline();
        let payload = queue_payload(&[
            ("m1", notification("k.jpg")),
            ("m2", notification("throttled/k.jpg")),
            ("m3", "not json".to_string()),
        ]);

        let response = handle_batch(&pipeline, &payload, None).await.unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({ "batchItemFailures": [{ "itemIdentifier": "m2" }] })
        );
    }

    #[tokio::test]
    async fn test_invalid_outer_payload() {
        let pipeline = pipeline();
        assert!(handle_batch(&pipeline, "[1, 2", None).await.is_err());
    }
}
