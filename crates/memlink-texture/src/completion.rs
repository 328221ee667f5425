//! Bounded completion polling.

use std::time::{Duration, Instant};

use memlink_core::{MemError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Upper bounds for one busy-poll; whichever trips first fails `Timeout`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompletionPolicy {
    pub max_polls: u32,
    /// Wall-clock bound in milliseconds; `None` relies on `max_polls` alone.
    pub deadline_ms: Option<u64>,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            max_polls: 10_000,
            deadline_ms: Some(1_000),
        }
    }
}

/// Call `query` until it reports completion, yielding the CPU in between.
///
/// Returns the number of polls taken.  A failing query aborts immediately.
pub fn poll_until_complete(
    policy: &CompletionPolicy,
    operation: &str,
    mut query: impl FnMut() -> Result<bool>,
) -> Result<u32> {
    let start = Instant::now();
    let deadline = policy.deadline_ms.map(Duration::from_millis);
    let mut polls = 0u32;
    while polls < policy.max_polls {
        polls += 1;
        if query()? {
            if polls > 1 {
                debug!(operation, polls, "Completion after polling");
            }
            return Ok(polls);
        }
        if deadline.is_some_and(|d| start.elapsed() >= d) {
            break;
        }
        std::thread::yield_now();
    }
    Err(MemError::Timeout {
        operation: operation.to_string(),
        polls,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}
