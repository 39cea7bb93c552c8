//! First-success racing
//!
//! Runs equivalent requests against several explorers at once and keeps the
//! first answer. Only when every request fails is an error returned.

use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::network::explorer::ExplorerError;

/// Every explorer failed
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateError {
    /// One entry per attempted explorer, in completion order
    pub errors: Vec<ExplorerError>,
}

impl AggregateError {
    pub fn single(error: ExplorerError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    /// The error worth showing: server errors first, then network failures
    pub fn most_relevant(&self) -> Option<&ExplorerError> {
        self.errors.iter().min_by_key(|e| e.relevance())
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.most_relevant() {
            Some(error) if self.errors.len() > 1 => {
                write!(f, "{} (all {} explorers failed)", error, self.errors.len())
            }
            Some(error) => write!(f, "{}", error),
            None => write!(f, "No explorer was queried"),
        }
    }
}

impl std::error::Error for AggregateError {}

/// Run every operation concurrently and return the first success
///
/// Each operation is spawned on the runtime and bounded by `timeout`. Once a
/// value arrives the remaining tasks are left to finish in the background
/// and their results are discarded.
pub async fn race_to_success<T, F>(operations: Vec<F>, timeout: Duration) -> Result<T, AggregateError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, ExplorerError>> + Send + 'static,
{
    let mut pending: FuturesUnordered<_> = operations
        .into_iter()
        .map(|operation| {
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, operation).await {
                    Ok(result) => result,
                    Err(_) => Err(ExplorerError::Timeout(timeout)),
                }
            })
        })
        .collect();

    let mut errors = Vec::with_capacity(pending.len());
    while let Some(joined) = pending.next().await {
        match joined {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => errors.push(e),
            Err(e) => errors.push(ExplorerError::Unexpected(format!("request task failed: {}", e))),
        }
    }

    Err(AggregateError { errors })
}
