//! Celebrity Recognition Pipeline Library

pub mod config;
pub mod event;
pub mod recognition;
pub mod service;
pub mod storage;
pub mod api;

pub use config::Config;
