//! FDC Common Library
//!
//! Shared types, utilities, and error handling for the FDC workspace.
//!
//! # Overview
//!
//! This crate provides the plumbing used across all FDC workspace members:
//!
//! - **Error Handling**: Shared error and result types
//! - **Logging**: Centralized tracing setup (console, file, or both)
//! - **Checksums**: File integrity verification for downloaded archives
//! - **Types**: Record identifiers, normalized records, and run reports

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{FdcError, Result};
pub use types::{FieldValue, IngestReport, NormalizedRecord, RawRecord, RecordId};
