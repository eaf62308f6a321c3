//! Core types and utilities for nodeforge
//!
//! # Modules
//!
//! - `config`: Environment loading and the typed engine configuration
//! - `error`: Error types and Result alias
//! - `hashing`: Order-independent hashing of JSON values
//! - `types`: Descriptors, generated schemas and tools, selection values

pub mod config;
pub mod error;
pub mod hashing;
pub mod types;

// Re-exports
pub use config::{EngineConfig, WarmingStrategy};
pub use error::{Error, Result};
pub use types::*;
