//! Unified Listing synchronizer
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pushes product-accessibility records from external vendor feeds into the
//! central Unified Listing store.
//!
//! # Overview
//!
//! - **Task queue** ([`queue`]): runs async tasks under a fixed concurrency
//!   ceiling, refilling the window as tasks finish
//! - **Batch pipeline** ([`pipeline`]): ordered fixed-size batches
//! - **Reconciliation** ([`reconcile`]): create/update/skip decisions by
//!   filtered deep equality ([`normalize`]), writes through the task queue
//! - **API client** ([`api`]): login, listing and single-record writes
//! - **Source sync** ([`sync`]): the per-source run tying it all together
//!
//! # Example
//!
//! ```no_run
//! use ul_sync::{config::SyncConfig, record::load_records, sync::SourceSync};
//!
//! #[tokio::main]
//! async fn main() -> ul_sync::Result<()> {
//!     let config = SyncConfig::load(None)?;
//!     let records = load_records("./downloads/gari.json")?;
//!
//!     let report = SourceSync::new(config)?.run("gari", records).await?;
//!     println!("{:?}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod queue;
pub mod reconcile;
pub mod record;
pub mod report;
pub mod sync;

// Re-export commonly used types
pub use error::{Result, SyncError};
pub use queue::{run_queue, QueueError, TaskQueue};
pub use reconcile::{ReconcileOptions, ReconcileReport, Reconciler};
pub use record::{Record, RecordStatus};
