//! Core types and utilities for the verdant engine.
//!
//! This crate provides the error taxonomy, configuration structures, closed
//! selection enums and the progress/cancellation interfaces shared by the
//! dataset partitioner and the training orchestrator.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod progress;
pub mod types;

pub use backend::*;
pub use cli::*;
pub use config::*;
pub use error::{Error, ErrorKind, Result};
pub use progress::*;
pub use types::*;
