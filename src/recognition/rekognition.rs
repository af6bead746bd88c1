//! Amazon Rekognition recognition client

use async_trait::async_trait;
use aws_sdk_rekognition::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_rekognition::operation::recognize_celebrities::RecognizeCelebritiesError;
use aws_sdk_rekognition::types::{Image, S3Object};
use aws_sdk_rekognition::Client;
use tracing::{debug, warn};

use super::traits::{
    CelebrityRecognizer, Recognition, RecognitionError, RecognitionErrorKind, RecognizedFace,
};
use crate::event::ImageReference;

/// Rekognition-backed celebrity recognizer
#[derive(Clone)]
pub struct RekognitionClient {
    client: Client,
}

impl std::fmt::Debug for RekognitionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RekognitionClient").finish()
    }
}

impl RekognitionClient {
    /// Create a client from shared SDK configuration
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }

    /// Create from a pre-built client (for testing)
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn classify(err: SdkError<RecognizeCelebritiesError>) -> RecognitionError {
        let kind = match &err {
            SdkError::ServiceError(_) => err
                .as_service_error()
                .and_then(|e| e.code())
                .map(RecognitionErrorKind::from_code)
                .unwrap_or(RecognitionErrorKind::Unknown),
            // Transport-level failures are transient
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                RecognitionErrorKind::ServiceInternal
            }
            _ => RecognitionErrorKind::Unknown,
        };
        RecognitionError::new(kind, DisplayErrorContext(&err).to_string())
    }
}

#[async_trait]
impl CelebrityRecognizer for RekognitionClient {
    async fn recognize(&self, image: &ImageReference) -> Result<Recognition, RecognitionError> {
        let s3_object = S3Object::builder()
            .bucket(image.bucket.as_str())
            .name(image.key.as_str())
            .build();

        let output = self
            .client
            .recognize_celebrities()
            .image(Image::builder().s3_object(s3_object).build())
            .send()
            .await
            .map_err(Self::classify)?;

        let faces: Vec<RecognizedFace> = output
            .celebrity_faces()
            .iter()
            .filter_map(|celebrity| match (celebrity.id(), celebrity.name()) {
                (Some(id), name) => Some(RecognizedFace::new(id, name.unwrap_or_default())),
                (None, name) => {
                    warn!("Celebrity {:?} returned without an id, skipping", name);
                    None
                }
            })
            .collect();

        let unrecognized_count = output.unrecognized_faces().len();
        debug!(
            "Rekognition found {} celebrities and {} unrecognized faces in {}",
            faces.len(),
            unrecognized_count,
            image
        );

        Ok(Recognition {
            faces,
            unrecognized_count,
        })
    }
}
