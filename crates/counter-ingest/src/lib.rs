//! COUNTER usage ingestion
//!
//! Converts COUNTER Release 5 JSON reports (as returned by SUSHI endpoints)
//! into flat usage records and loads them into PostgreSQL.
//!
//! # Pipeline
//!
//! 1. [`sushi::UsageReportConverter`] turns a [`sushi::RawUsageDocument`]
//!    into [`sushi::FlatUsageRecord`]s, aborting the whole report when a
//!    value does not fit its column
//! 2. [`dedup::DuplicateChecker`] holds back usage that is already stored
//! 3. [`sequencer::PrimaryKeySequencer`] numbers the batch
//! 4. [`db::UsageStore::insert_usage`] loads it in one transaction
//! 5. [`fallback::FallbackPersistence`] saves the raw report to object
//!    storage when any of the above fails
//!
//! [`coordinator::IngestionCoordinator`] runs the whole sequence.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod dedup;
pub mod error;
pub mod fallback;
pub mod sequencer;
pub mod storage;
pub mod sushi;

pub use config::IngestConfig;
pub use coordinator::{IngestOutcome, IngestionCoordinator, SushiReportRequest};
pub use error::{ConversionError, FallbackError, IngestError, IngestStage, ObjectStoreError, StoreError};
