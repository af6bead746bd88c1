//! DynamoDB aggregate store
//!
//! Merges are a single `UpdateItem` using `list_append(if_not_exists(...))`,
//! so the table performs the create-or-append atomically and concurrent
//! merges never overwrite each other.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use aws_smithy_types::timeout::TimeoutConfig;
use tracing::debug;

use super::traits::{AggregateRecord, AggregateStore, StoreError, StoreErrorKind};

/// Partition key attribute
pub const ATTR_ID: &str = "ID";
/// Image URL list attribute
pub const ATTR_IMAGES: &str = "images";

const APPEND_EXPRESSION: &str = "SET #images = list_append(if_not_exists(#images, :empty), :images)";
const ABSENT_CONDITION: &str = "attribute_not_exists(#images) OR NOT contains(#images, :url)";

/// DynamoDB store configuration
#[derive(Debug, Clone)]
pub struct DynamoDbConfig {
    /// DynamoDB table name
    pub table_name: String,
    /// Optional endpoint override (e.g. LocalStack)
    pub endpoint: Option<String>,
    /// Timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// DynamoDB-based aggregate store
#[derive(Clone)]
pub struct DynamoDbStore {
    client: Client,
    table_name: String,
}

impl std::fmt::Debug for DynamoDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbStore")
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl DynamoDbStore {
    /// Create a store, inheriting HTTP client, retry and region settings from
    /// the shared SDK configuration.
    pub fn new(sdk_config: &aws_config::SdkConfig, config: DynamoDbConfig) -> Self {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);

        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if let Some(timeout_ms) = config.timeout_ms {
            let timeout_config = TimeoutConfig::builder()
                .operation_timeout(Duration::from_millis(timeout_ms))
                .build();
            builder = builder.timeout_config(timeout_config);
        }

        Self {
            client: Client::from_conf(builder.build()),
            table_name: config.table_name,
        }
    }

    /// Create from a pre-built client (for testing)
    pub fn from_client(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }

    fn item_to_record(identity_id: &str, item: &HashMap<String, AttributeValue>) -> AggregateRecord {
        let image_urls = item
            .get(ATTR_IMAGES)
            .and_then(|v| v.as_l().ok())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_s().ok())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        AggregateRecord::new(identity_id, image_urls)
    }

    fn classify<E>(err: &SdkError<E>) -> StoreError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
    {
        let kind = match err {
            SdkError::ServiceError(_) => err
                .as_service_error()
                .and_then(|e| e.code())
                .map(StoreErrorKind::from_code)
                .unwrap_or(StoreErrorKind::Unknown),
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                StoreErrorKind::ServiceInternal
            }
            _ => StoreErrorKind::Unknown,
        };
        StoreError::new(kind, DisplayErrorContext(err).to_string())
    }

    fn is_conditional_check_failed(err: &SdkError<UpdateItemError>) -> bool {
        match err {
            SdkError::ServiceError(service_err) => matches!(
                service_err.err(),
                UpdateItemError::ConditionalCheckFailedException(_)
            ),
            _ => false,
        }
    }

    async fn update(
        &self,
        identity_id: &str,
        image_url: &str,
        unique: bool,
    ) -> Result<AggregateRecord, StoreError> {
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(ATTR_ID, AttributeValue::S(identity_id.to_string()))
            .update_expression(APPEND_EXPRESSION)
            .expression_attribute_names("#images", ATTR_IMAGES)
            .expression_attribute_values(
                ":images",
                AttributeValue::L(vec![AttributeValue::S(image_url.to_string())]),
            )
            .expression_attribute_values(":empty", AttributeValue::L(Vec::new()))
            .return_values(ReturnValue::AllNew);

        if unique {
            request = request
                .condition_expression(ABSENT_CONDITION)
                .expression_attribute_values(":url", AttributeValue::S(image_url.to_string()));
        }

        match request.send().await {
            Ok(output) => Ok(output
                .attributes()
                .map(|item| Self::item_to_record(identity_id, item))
                .unwrap_or_else(|| {
                    AggregateRecord::new(identity_id, vec![image_url.to_string()])
                })),
            Err(e) if unique && Self::is_conditional_check_failed(&e) => {
                debug!("{} already holds {}", identity_id, image_url);
                self.get(identity_id).await?.ok_or_else(|| {
                    StoreError::new(
                        StoreErrorKind::Conflict,
                        format!("{} vanished during merge", identity_id),
                    )
                })
            }
            Err(e) => Err(Self::classify(&e)),
        }
    }
}

#[async_trait]
impl AggregateStore for DynamoDbStore {
    async fn get(&self, identity_id: &str) -> Result<Option<AggregateRecord>, StoreError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(ATTR_ID, AttributeValue::S(identity_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;

        Ok(response
            .item()
            .map(|item| Self::item_to_record(identity_id, item)))
    }

    async fn merge(&self, identity_id: &str, image_url: &str) -> Result<AggregateRecord, StoreError> {
        self.update(identity_id, image_url, false).await
    }

    async fn merge_unique(
        &self,
        identity_id: &str,
        image_url: &str,
    ) -> Result<AggregateRecord, StoreError> {
        self.update(identity_id, image_url, true).await
    }
}
