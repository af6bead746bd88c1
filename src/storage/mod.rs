//! Storage module for per-identity aggregates

pub mod traits;
pub mod memory;
pub mod sqlite;
#[cfg(feature = "aws")]
pub mod dynamodb;

pub use traits::{AggregateRecord, AggregateStore, MergeMode, StoreError, StoreErrorKind};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
#[cfg(feature = "aws")]
pub use dynamodb::{DynamoDbConfig, DynamoDbStore};
