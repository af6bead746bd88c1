//! Service layer module

pub mod pipeline;
pub mod types;

pub use pipeline::IngestPipeline;
pub use types::*;
