// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Loop configuration and task completion handles.

use crate::error::Result;
use std::time::Duration;
use tokio::sync::oneshot;

/// Timing settings for a [`Loop`](super::Loop).
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Pause between the end of one round and the start of the next.
    pub delay: Duration,

    /// Run the first round as soon as the loop starts.
    /// When false the first round waits one `delay`.
    pub run_on_start: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            delay: crate::config::DEFAULT_REPLICATION_INTERVAL,
            run_on_start: true,
        }
    }
}

impl LoopConfig {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

/// How an immediate task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The task ran to completion.
    Ran,
    /// The task never ran: the loop was stopped before (or when) it was scheduled.
    Skipped,
}

/// Handle to an immediate task scheduled on a loop.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle {
    rx: Option<oneshot::Receiver<Result<()>>>,
}

impl TaskHandle {
    pub(crate) fn pending(rx: oneshot::Receiver<Result<()>>) -> Self {
        Self { rx: Some(rx) }
    }

    pub(crate) fn skipped() -> Self {
        Self { rx: None }
    }

    /// Whether the loop accepted the task.
    pub fn is_scheduled(&self) -> bool {
        self.rx.is_some()
    }

    /// Wait for the task to finish.
    ///
    /// Returns the task's error if it failed (which also stopped the loop).
    pub async fn wait(self) -> Result<Completion> {
        let Some(rx) = self.rx else {
            return Ok(Completion::Skipped);
        };
        match rx.await {
            Ok(Ok(())) => Ok(Completion::Ran),
            Ok(Err(e)) => Err(e),
            // Sender dropped: the loop was stopped with the task still queued
            Err(_) => Ok(Completion::Skipped),
        }
    }
}
