//! API module - queue transport adapter

pub mod dto;
pub mod queue;

pub use queue::handle_batch;
