//! Ingestion events
//!
//! Queue messages announcing newly stored images, and the decoder that
//! normalizes them into one event per image.

pub mod decoder;
pub mod types;

pub use decoder::{DecodeError, DecodedMessage, EventDecoder};
pub use types::{ImageReference, InboundMessage, IngestionEvent};
