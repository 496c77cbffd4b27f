//! Fan-out over a batch of reconciliation items.
//!
//! Every item runs to completion (or to its deadline) and reports its own
//! outcome. A failing item is logged and recorded; it never cancels or
//! short-circuits the other items of the batch.

use crate::task::{TaskError, TaskResult, TaskResultExt, TaskStatus};
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error};

/// Options for [`run_batch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Deadline applied to each item individually. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl BatchOptions {
    /// Creates options with a per-item deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Outcome of one item in a batch.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    /// Caller-supplied description of the item (usually an object id).
    pub item: String,
    /// What happened to it.
    pub result: TaskResult<()>,
}

impl ItemOutcome {
    pub fn status(&self) -> TaskStatus {
        self.result.to_status()
    }
}

/// Per-item outcomes of a batch, in input order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    label: String,
    outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn outcomes(&self) -> &[ItemOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of items that did not need further attention.
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status().is_success())
            .count()
    }

    /// Items that failed or timed out.
    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| o.status().is_failure())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Runs `f` over every item concurrently and collects one result per item.
///
/// Items are given as `(description, item)` pairs; the description is what
/// gets logged when the item fails.
pub async fn run_batch<T, I, F, Fut, E>(
    label: &str,
    items: I,
    options: BatchOptions,
    f: F,
) -> BatchReport
where
    I: IntoIterator<Item = (String, T)>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    let f = &f;
    let futures = items.into_iter().map(|(item, value)| async move {
        let result = match options.timeout {
            Some(after) => match tokio::time::timeout(after, f(value)).await {
                Ok(result) => result.map_err(|e| TaskError::failed(e.to_string())),
                Err(_) => Err(TaskError::timed_out(after)),
            },
            None => f(value)
                .await
                .map_err(|e| TaskError::failed(e.to_string())),
        };

        if let Err(ref e) = result {
            if e.to_status().is_failure() {
                error!(batch = label, item = %item, error = %e, "Reconciliation item failed");
            }
        }

        ItemOutcome { item, result }
    });

    let outcomes = join_all(futures).await;
    debug!(batch = label, items = outcomes.len(), "Batch processed");

    BatchReport {
        label: label.to_string(),
        outcomes,
    }
}
