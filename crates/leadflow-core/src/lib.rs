//! # leadflow-core
//!
//! Core types, configuration, and utilities for Leadflow.
//!
//! This crate provides shared functionality used across all Leadflow crates:
//!
//! - **Configuration**: Loading, validation, and management of config files
//! - **Types**: Domain types for jobs, messages, sending numbers, and leads
//! - **Utilities**: ID generation and phone-number normalization

pub mod config;
pub mod error;
pub mod id;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
