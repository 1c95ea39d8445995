//! COUNTER Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the COUNTER usage ingestion workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CounterError`] and the [`Result`] alias used at the
//!   edges of the pipeline (configuration, input files, serialization)
//! - **Logging**: `tracing` subscriber initialisation shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use counter_common::logging::{init_logging, LogConfig};
//! use counter_common::Result;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{CounterError, Result};
