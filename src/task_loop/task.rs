// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Units of work run by a [`Loop`](super::Loop).

use crate::error::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by [`Task::execute`].
pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Something a loop can run, periodically or on demand.
///
/// Returning `Err` means the task hit something it did not expect. The loop
/// treats that as fatal and stops. Failures a task can live with (a network
/// blip during replication) should be reported through the task's own
/// channel and end in `Ok(())`.
pub trait Task: Send + Sync + 'static {
    /// Run the task once.
    fn execute(&self) -> TaskFuture<'_>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "task"
    }
}

/// Adapter turning an async closure into a [`Task`].
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn execute(&self) -> TaskFuture<'_> {
        Box::pin((self.f)())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build a shared task from an async closure.
///
/// ```rust
/// use pouch_link::task_loop::task_fn;
///
/// let task = task_fn("heartbeat", || async { Ok(()) });
/// assert_eq!(task.name(), "heartbeat");
/// ```
pub fn task_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Task>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnTask { name: name.into(), f })
}
