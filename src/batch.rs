//! Running one operation over many selected items.

use std::future::Future;

use futures::future::join_all;

use crate::error::ClientError;

/// Per-item results of a batch. Items are identified by name.
#[derive(Debug)]
pub struct BatchOutcome<R> {
    pub succeeded: Vec<(String, R)>,
    pub failed: Vec<(String, ClientError)>,
}

impl<R> Default for BatchOutcome<R> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<R> BatchOutcome<R> {
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }

    pub fn any_succeeded(&self) -> bool {
        !self.succeeded.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|(n, _)| n.as_str()).collect()
    }
}

/// Run `action` for every name concurrently and wait for all of them.
/// Every item runs to completion; one failure does not cancel the rest.
pub async fn run_all<I, F, Fut, R>(label: &str, names: I, action: F) -> BatchOutcome<R>
where
    I: IntoIterator<Item = String>,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<R, ClientError>>,
{
    let names: Vec<String> = names.into_iter().collect();
    let results = join_all(names.iter().cloned().map(&action)).await;

    let mut outcome = BatchOutcome::default();
    for (name, result) in names.into_iter().zip(results) {
        match result {
            Ok(r) => outcome.succeeded.push((name, r)),
            Err(e) => outcome.failed.push((name, e)),
        }
    }

    if outcome.failed.is_empty() {
        tracing::debug!(operation = label, count = outcome.succeeded.len(), "batch complete");
    } else {
        tracing::warn!(
            operation = label,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            items = ?outcome.failed_names(),
            "batch partially failed"
        );
    }
    outcome
}
