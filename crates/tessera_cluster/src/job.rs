//! One-shot cancellable completion primitive for distributed work.
//!
//! State machine: Pending → {Completed, Errored, Cancelled}
//!
//! - All three targets are terminal and sticky.
//! - `cancel()` is idempotent: calling it on a terminal job is a silent no-op.
//! - `send_error()` / `complete()` on a terminal job is a caller bug and is
//!   rejected with `TesseraError::ContractViolation`.
//! - Callbacks always run with the internal lock released, so they may call
//!   back into the job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use tessera_common::error::{TesseraError, TesseraResult};

/// Lifecycle state of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Completed,
    Errored,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Pending)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Completed => write!(f, "completed"),
            JobState::Errored => write!(f, "errored"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

type CancelCallback = Box<dyn FnOnce() + Send>;
type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct JobInner {
    state: JobState,
    error_message: Option<String>,
    counters: HashMap<String, f64>,
    on_cancel: Option<CancelCallback>,
    on_error: Option<ErrorCallback>,
}

/// Thread-safe handle tracking one unit of asynchronous distributed work.
///
/// Shared as `Arc<Job>` between the owner driving the work and any number of
/// waiters; dropped once the last reference goes away.
pub struct Job {
    name: String,
    inner: Mutex<JobInner>,
    cond: Condvar,
}

impl Job {
    /// Error message recorded when a job is cancelled.
    pub const CANCELLED_MESSAGE: &'static str = "Job cancelled";

    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            inner: Mutex::new(JobInner {
                state: JobState::Pending,
                error_message: None,
                counters: HashMap::new(),
                on_cancel: None,
                on_error: None,
            }),
            cond: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().state
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().error_message.clone()
    }

    /// True once the job ended without completing normally
    /// (either cancelled or errored).
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.inner.lock().state,
            JobState::Cancelled | JobState::Errored
        )
    }

    /// Cancel the job. Runs the cancel callback, then the error callback with
    /// [`Job::CANCELLED_MESSAGE`]. No-op if the job is already terminal.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = JobState::Cancelled;
        inner.error_message = Some(Self::CANCELLED_MESSAGE.to_string());
        let on_cancel = inner.on_cancel.take();
        let on_error = inner.on_error.clone();
        drop(inner);

        self.cond.notify_all();
        tracing::debug!(job = %self.name, "job cancelled");

        if let Some(f) = on_cancel {
            f();
        }
        if let Some(f) = on_error {
            f(Self::CANCELLED_MESSAGE);
        }
    }

    /// Register the cancel callback. If the job already ended abnormally the
    /// callback runs immediately on the calling thread; a completed job never
    /// runs it.
    pub fn on_cancel<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.inner.lock();
        match inner.state {
            JobState::Cancelled | JobState::Errored => {
                drop(inner);
                f();
            }
            JobState::Completed => {}
            JobState::Pending => inner.on_cancel = Some(Box::new(f)),
        }
    }

    /// Register the error callback. If the job already ended abnormally the
    /// callback runs immediately with the recorded message.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let f: ErrorCallback = Arc::new(f);
        match (inner.state, inner.error_message.clone()) {
            (JobState::Cancelled | JobState::Errored, Some(message)) => {
                inner.on_error = Some(Arc::clone(&f));
                drop(inner);
                f(&message);
            }
            _ => inner.on_error = Some(f),
        }
    }

    /// Fail the job with `message`. Sending an error to a finished job is
    /// rejected.
    pub fn send_error(&self, message: impl Into<String>) -> TesseraResult<()> {
        let message = message.into();
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return Err(TesseraError::contract_violation(
                "E-JOB-001",
                format!(
                    "refusing to send an error to a finished job '{}' (state={})",
                    self.name, inner.state
                ),
            ));
        }
        inner.state = JobState::Errored;
        inner.error_message = Some(message.clone());
        let on_error = inner.on_error.clone();
        drop(inner);

        self.cond.notify_all();
        tracing::debug!(job = %self.name, error = %message, "job errored");

        if let Some(f) = on_error {
            f(&message);
        }
        Ok(())
    }

    /// Mark the job as successfully completed.
    pub fn complete(&self) -> TesseraResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return Err(TesseraError::contract_violation(
                "E-JOB-002",
                format!(
                    "refusing to complete a finished job '{}' (state={})",
                    self.name, inner.state
                ),
            ));
        }
        inner.state = JobState::Completed;
        inner.on_cancel = None;
        drop(inner);

        self.cond.notify_all();
        Ok(())
    }

    /// Block until the job is terminal.
    pub fn wait(&self) {
        let mut inner = self.inner.lock();
        while !inner.state.is_terminal() {
            self.cond.wait(&mut inner);
        }
    }

    /// Block for at most `timeout`. Returns whether the job is terminal.
    /// Expiry never changes the job's state.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(d) => d,
            None => {
                self.wait();
                return true;
            }
        };
        let mut inner = self.inner.lock();
        while !inner.state.is_terminal() {
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.state.is_terminal()
    }

    pub fn get_counters(&self) -> HashMap<String, f64> {
        self.inner.lock().counters.clone()
    }

    /// Counter value, or `0.0` if the counter was never set.
    pub fn get_counter(&self, name: &str) -> f64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0.0)
    }

    pub fn set_counter(&self, name: &str, value: f64) {
        self.inner.lock().counters.insert(name.to_string(), value);
    }

    pub fn incr_counter(&self, name: &str, delta: f64) {
        *self
            .inner
            .lock()
            .counters
            .entry(name.to_string())
            .or_insert(0.0) += delta;
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("error_message", &inner.error_message)
            .field("counters", &inner.counters)
            .finish()
    }
}
