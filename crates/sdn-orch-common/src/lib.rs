//! Reconciliation building blocks for the SDN controller.
//!
//! - [`TaskStatus`] / [`TaskError`]: outcome of one reconciliation item
//! - [`run_batch`]: fan-out over a batch of items that captures one result
//!   per item, so a failing item never aborts its siblings
//! - [`RefIndex`]: reverse index whose entries live exactly as long as at
//!   least one holder references them
//!
//! # Example
//!
//! ```
//! use sdn_orch_common::{run_batch, BatchOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let hosts = vec![("h1".to_string(), 1u32), ("h2".to_string(), 2)];
//! let report = run_batch("hosts-added", hosts, BatchOptions::default(), |n| async move {
//!     if n % 2 == 0 {
//!         Err(format!("host {n} unreachable"))
//!     } else {
//!         Ok(())
//!     }
//! })
//! .await;
//!
//! assert_eq!(report.succeeded(), 1);
//! let failed: Vec<_> = report.failures().map(|o| o.item.as_str()).collect();
//! assert_eq!(failed, ["h2"]);
//! # }
//! ```

mod batch;
mod ref_index;
mod task;

pub use batch::{run_batch, BatchOptions, BatchReport, ItemOutcome};
pub use ref_index::RefIndex;
pub use task::{TaskError, TaskResult, TaskResultExt, TaskStatus};
