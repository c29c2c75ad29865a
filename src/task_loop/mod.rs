// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Periodic task runner with on-demand rounds.
//!
//! A [`Loop`] runs a default task every `delay`, and accepts immediate
//! tasks that run as soon as the loop's worker is free, without moving the
//! periodic deadline.
//!
//! # Execution Model
//!
//! ```text
//!   schedule_immediate_task() ──► mpsc ──┐
//!                                        ▼
//!   start() ──spawn──► worker ── round: [immediate jobs, FIFO] → default task
//!                        │                      │
//!                        │          sleep(delay) after the round
//!                        ▼
//!                 gate (Mutex) ── one task in flight per Loop
//! ```
//!
//! - One worker per running loop. Every task of a loop, across stop/start
//!   generations, runs under the same gate, so two tasks never overlap.
//! - A round drains every queued immediate job before the default task.
//!   Jobs arriving while the worker sleeps run right away.
//! - `stop()` never aborts a running task. Queued jobs are discarded and
//!   no task starts after the running one.
//! - A task error or panic is fatal: the loop stops and the error is kept
//!   for [`Loop::wait_for_current_task`].

mod task;
mod types;

pub use task::{task_fn, FnTask, Task, TaskFuture};
pub use types::{Completion, LoopConfig, TaskHandle};

use crate::error::{LinkError, Result};
use crate::metrics;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, Instrument};

/// A queued immediate task.
struct Job {
    task: Arc<dyn Task>,
    done: Option<oneshot::Sender<Result<()>>>,
}

/// Control state. Never held across an await.
struct Control {
    running: bool,
    /// Bumped on every start so a finished worker cannot touch a newer one.
    generation: u64,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    stop_tx: Option<watch::Sender<bool>>,
    fatal: Option<LinkError>,
}

struct Shared {
    control: Mutex<Control>,
    gate: tokio::sync::Mutex<()>,
    in_flight: AtomicBool,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Periodic + on-demand task runner.
///
/// # Example
///
/// ```rust,no_run
/// use pouch_link::task_loop::{task_fn, Loop, LoopConfig};
/// use std::time::Duration;
///
/// # async fn example() {
/// let replicate = task_fn("replicate", || async { Ok(()) });
/// let lp = Loop::new("io.cozy.files", replicate, LoopConfig::with_delay(Duration::from_secs(30)));
///
/// lp.start();
/// lp.schedule_immediate().wait().await.unwrap();
/// lp.stop();
/// lp.wait_for_current_task().await.unwrap();
/// # }
/// ```
pub struct Loop {
    name: String,
    config: LoopConfig,
    task: Arc<dyn Task>,
    shared: Arc<Shared>,
}

impl Loop {
    /// Create a stopped loop.
    pub fn new(name: impl Into<String>, task: Arc<dyn Task>, config: LoopConfig) -> Self {
        Self {
            name: name.into(),
            config,
            task,
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    running: false,
                    generation: 0,
                    jobs: None,
                    stop_tx: None,
                    fatal: None,
                }),
                gate: tokio::sync::Mutex::new(()),
                in_flight: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn delay(&self) -> Duration {
        self.config.delay
    }

    pub fn is_running(&self) -> bool {
        self.shared.control().running
    }

    /// Whether a task is executing right now.
    pub fn is_task_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Error that stopped the loop, if any.
    pub fn last_error(&self) -> Option<LinkError> {
        self.shared.control().fatal.clone()
    }

    /// Start the loop. No-op if already running.
    ///
    /// Clears a previous fatal error. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut control = self.shared.control();
        if control.running {
            debug!(loop_name = %self.name, "Loop already running");
            return;
        }

        control.running = true;
        control.generation += 1;
        control.fatal = None;

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        control.jobs = Some(jobs_tx);
        control.stop_tx = Some(stop_tx);

        let worker = Worker {
            delay: self.config.delay,
            run_on_start: self.config.run_on_start,
            task: Arc::clone(&self.task),
            jobs: jobs_rx,
            runner: Runner {
                name: self.name.clone(),
                generation: control.generation,
                shared: Arc::clone(&self.shared),
                stop_rx,
            },
        };
        drop(control);

        let span = tracing::info_span!("loop", loop_name = %self.name);
        tokio::spawn(worker.run().instrument(span));

        metrics::set_loop_running(&self.name, true);
        info!(
            loop_name = %self.name,
            delay_ms = self.config.delay.as_millis() as u64,
            "Loop started"
        );
    }

    /// Stop the loop. No-op if not running.
    ///
    /// A task already executing finishes; use
    /// [`wait_for_current_task`](Self::wait_for_current_task) to wait for it.
    pub fn stop(&self) {
        let mut control = self.shared.control();
        if !control.running {
            return;
        }
        control.running = false;
        // Dropping the sender discards queued jobs once the worker exits
        control.jobs = None;
        if let Some(stop_tx) = control.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        drop(control);

        metrics::set_loop_running(&self.name, false);
        info!(loop_name = %self.name, "Loop stopped");
    }

    /// Queue the loop's default task for immediate execution.
    pub fn schedule_immediate(&self) -> TaskHandle {
        self.schedule_immediate_task(Arc::clone(&self.task))
    }

    /// Queue `task` for immediate execution.
    ///
    /// Ignored when the loop is not running: the task never runs and the
    /// returned handle resolves to [`Completion::Skipped`].
    pub fn schedule_immediate_task(&self, task: Arc<dyn Task>) -> TaskHandle {
        let control = self.shared.control();
        let Some(jobs) = control.jobs.as_ref().filter(|_| control.running) else {
            debug!(loop_name = %self.name, task = task.name(), "Loop not running, dropping immediate task");
            metrics::record_immediate_task_dropped(&self.name);
            return TaskHandle::skipped();
        };

        let (done_tx, done_rx) = oneshot::channel();
        let job = Job {
            task,
            done: Some(done_tx),
        };
        if jobs.send(job).is_err() {
            // Worker already gone (fatal error raced with us)
            metrics::record_immediate_task_dropped(&self.name);
            return TaskHandle::skipped();
        }

        metrics::record_immediate_task(&self.name);
        TaskHandle::pending(done_rx)
    }

    /// Wait until the task currently executing (if any) has finished.
    ///
    /// Returns the fatal error if a task failure stopped the loop.
    pub async fn wait_for_current_task(&self) -> Result<()> {
        drop(self.shared.gate.lock().await);
        match self.shared.control().fatal.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Loop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("name", &self.name)
            .field("delay", &self.config.delay)
            .field("running", &self.is_running())
            .finish()
    }
}

/// The single execution context of one loop generation.
struct Worker {
    delay: Duration,
    run_on_start: bool,
    task: Arc<dyn Task>,
    jobs: mpsc::UnboundedReceiver<Job>,
    runner: Runner,
}

/// Runs tasks under the gate on behalf of one worker generation.
struct Runner {
    name: String,
    generation: u64,
    shared: Arc<Shared>,
    stop_rx: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let mut next_round = if self.run_on_start {
            Instant::now()
        } else {
            Instant::now() + self.delay
        };

        loop {
            if self.runner.stopped() {
                break;
            }

            tokio::select! {
                biased;

                // Priority: check stop first
                _ = self.runner.stop_rx.changed() => {
                    continue;
                }

                job = self.jobs.recv() => {
                    let Some(job) = job else { break };
                    if !self.run_job(job).await {
                        break;
                    }
                }

                _ = tokio::time::sleep_until(next_round) => {
                    if !self.round().await {
                        break;
                    }
                    next_round = Instant::now() + self.delay;
                }
            }
        }

        // Remaining jobs are dropped with the receiver: their handles resolve as skipped
        self.jobs.close();
        debug!(generation = self.runner.generation, "Loop worker exited");
    }

    /// Drain queued jobs, then run the default task.
    async fn round(&mut self) -> bool {
        while let Ok(job) = self.jobs.try_recv() {
            if !self.run_job(job).await {
                return false;
            }
        }

        let task = Arc::clone(&self.task);
        matches!(self.runner.run_task(task).await, Some(Ok(())))
    }

    async fn run_job(&mut self, job: Job) -> bool {
        let Job { task, done } = job;
        match self.runner.run_task(task).await {
            Some(result) => {
                let ok = result.is_ok();
                if let Some(done) = done {
                    let _ = done.send(result);
                }
                ok
            }
            // Stopped before it could start: dropping `done` reports it as skipped
            None => false,
        }
    }
}

impl Runner {
    fn stopped(&self) -> bool {
        *self.stop_rx.borrow() || self.stop_rx.has_changed().is_err()
    }

    /// Run one task under the gate. `None` when the loop stopped first.
    async fn run_task(&self, task: Arc<dyn Task>) -> Option<Result<()>> {
        let _gate = self.shared.gate.lock().await;
        if self.stopped() {
            return None;
        }

        self.shared.in_flight.store(true, Ordering::SeqCst);
        let started = Instant::now();
        let outcome = AssertUnwindSafe(async { task.execute().await })
            .catch_unwind()
            .await;
        self.shared.in_flight.store(false, Ordering::SeqCst);

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(LinkError::TaskPanicked {
                loop_name: self.name.clone(),
                message: panic_message(panic.as_ref()),
            }),
        };

        match result {
            Ok(()) => {
                debug!(
                    task = task.name(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Task complete"
                );
                Some(Ok(()))
            }
            Err(e) => {
                self.fail(&e);
                Some(Err(e))
            }
        }
    }

    /// Stop this generation after a task failure.
    fn fail(&self, err: &LinkError) {
        let reason = match err {
            LinkError::TaskPanicked { .. } => "panic",
            _ => "error",
        };
        error!(error = %err, reason, "Task failed, stopping loop");
        metrics::record_task_failure(&self.name, reason);

        let mut control = self.shared.control();
        if control.generation != self.generation {
            return;
        }
        control.fatal = Some(err.clone());
        if control.running {
            control.running = false;
            control.jobs = None;
            if let Some(stop_tx) = control.stop_tx.take() {
                let _ = stop_tx.send(true);
            }
            metrics::set_loop_running(&self.name, false);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
