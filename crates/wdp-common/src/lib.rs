//! WDP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared domain types, logging, and error handling for the weather data
//! pipeline.
//!
//! # Overview
//!
//! - **Types**: the records that flow between the extract, transform, and load
//!   stages, plus the [`BatchHandle`](types::BatchHandle) that correlates them
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Error Handling**: [`WdpError`] and the [`Result`] alias
//!
//! # Example
//!
//! ```no_run
//! use wdp_common::types::{BatchHandle, Subject};
//!
//! fn describe(subject: &Subject) -> String {
//!     let batch = BatchHandle::now();
//!     format!("{subject} fetched in batch {batch}")
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, WdpError};
