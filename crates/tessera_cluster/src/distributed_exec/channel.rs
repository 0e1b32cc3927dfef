//! Bounded gather channel shared by sub-query workers and the consumer.
//!
//! One lock guards the row buffer, the pending sub-query queue, the progress
//! counters and the terminal status; every state change notifies all waiters.
//!
//! Status: Running → {Done, Failed, Cancelled}, all sticky.
//! - Done: every sub-query finished without error.
//! - Failed: first sub-query error (by completion order) wins.
//! - Cancelled: consumer cancel or cursor teardown.
//!
//! Buffered rows are always delivered before the terminal status is observed.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use tessera_common::datum::OwnedRow;
use tessera_common::error::{TesseraError, TesseraResult};

use super::SubQuery;

#[derive(Debug, Clone)]
enum GatherStatus {
    Running,
    Done,
    Failed(TesseraError),
    Cancelled,
}

/// What the consumer receives from one pull.
#[derive(Debug)]
pub(crate) enum Pulled {
    Row(OwnedRow),
    EndOfStream,
    Error(TesseraError),
}

/// Terminal transition caused by a worker completion.
#[derive(Debug)]
pub(crate) enum Terminal {
    Done,
    Failed(TesseraError),
}

/// Point-in-time view of gather progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatherStats {
    pub total: usize,
    pub started: usize,
    pub finished: usize,
    pub active: usize,
    pub buffered: usize,
    pub peak_buffered: usize,
    pub peak_active: usize,
}

struct GatherState {
    buffer: VecDeque<OwnedRow>,
    pending: VecDeque<(usize, SubQuery)>,
    status: GatherStatus,
    total: usize,
    started: usize,
    finished: usize,
    active: usize,
    peak_buffered: usize,
    peak_active: usize,
}

pub(crate) struct GatherChannel {
    capacity: usize,
    state: Mutex<GatherState>,
    cond: Condvar,
}

impl GatherChannel {
    pub(crate) fn new(capacity: usize, queries: Vec<SubQuery>) -> Self {
        let total = queries.len();
        let status = if total == 0 {
            GatherStatus::Done
        } else {
            GatherStatus::Running
        };
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(GatherState {
                buffer: VecDeque::with_capacity(capacity.max(1)),
                pending: queries.into_iter().enumerate().collect(),
                status,
                total,
                started: 0,
                finished: 0,
                active: 0,
                peak_buffered: 0,
                peak_active: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Take the next unstarted sub-query, or `None` once the gather is no
    /// longer running or every sub-query has been admitted.
    pub(crate) fn admit(&self) -> Option<(usize, SubQuery)> {
        let mut st = self.state.lock();
        if !matches!(st.status, GatherStatus::Running) {
            return None;
        }
        let next = st.pending.pop_front()?;
        st.started += 1;
        st.active += 1;
        st.peak_active = st.peak_active.max(st.active);
        Some(next)
    }

    /// Enqueue a row, blocking while the buffer is full. Returns `false`
    /// without enqueuing once the gather stopped running.
    pub(crate) fn push(&self, row: OwnedRow) -> bool {
        let mut st = self.state.lock();
        loop {
            if !matches!(st.status, GatherStatus::Running) {
                return false;
            }
            if st.buffer.len() < self.capacity {
                st.buffer.push_back(row);
                st.peak_buffered = st.peak_buffered.max(st.buffer.len());
                self.cond.notify_all();
                return true;
            }
            self.cond.wait(&mut st);
        }
    }

    /// Dequeue the next row for the single consumer, blocking while the
    /// buffer is empty and the gather is still running.
    pub(crate) fn pull(&self) -> Pulled {
        let mut st = self.state.lock();
        loop {
            if let Some(row) = st.buffer.pop_front() {
                self.cond.notify_all();
                return Pulled::Row(row);
            }
            let terminal = match &st.status {
                GatherStatus::Running => None,
                GatherStatus::Done => Some(Pulled::EndOfStream),
                GatherStatus::Failed(e) => Some(Pulled::Error(e.clone())),
                GatherStatus::Cancelled => Some(Pulled::Error(TesseraError::Cancelled(
                    "gather cancelled".into(),
                ))),
            };
            match terminal {
                Some(pulled) => return pulled,
                None => self.cond.wait(&mut st),
            }
        }
    }

    /// Record a worker's completion. The first error flips the gather to
    /// Failed; later errors are dropped. Returns the terminal transition this
    /// completion caused, if any.
    pub(crate) fn complete(&self, result: TesseraResult<()>) -> Option<Terminal> {
        let mut st = self.state.lock();
        st.active = st.active.saturating_sub(1);
        st.finished += 1;

        let mut transition = None;
        let mut never_started = VecDeque::new();
        if matches!(st.status, GatherStatus::Running) {
            match result {
                Err(e) => {
                    st.status = GatherStatus::Failed(e.clone());
                    never_started = std::mem::take(&mut st.pending);
                    transition = Some(Terminal::Failed(e));
                }
                Ok(()) if st.finished == st.total => {
                    st.status = GatherStatus::Done;
                    transition = Some(Terminal::Done);
                }
                Ok(()) => {}
            }
        }
        drop(st);
        self.cond.notify_all();
        drop(never_started);
        transition
    }

    /// Stop the gather. Returns `true` if this call moved it out of Running.
    pub(crate) fn cancel(&self) -> bool {
        let mut st = self.state.lock();
        if !matches!(st.status, GatherStatus::Running) {
            return false;
        }
        st.status = GatherStatus::Cancelled;
        let never_started = std::mem::take(&mut st.pending);
        drop(st);
        self.cond.notify_all();
        drop(never_started);
        true
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(
            self.state.lock().status,
            GatherStatus::Failed(_) | GatherStatus::Cancelled
        )
    }

    pub(crate) fn stats(&self) -> GatherStats {
        let st = self.state.lock();
        GatherStats {
            total: st.total,
            started: st.started,
            finished: st.finished,
            active: st.active,
            buffered: st.buffer.len(),
            peak_buffered: st.peak_buffered,
            peak_active: st.peak_active,
        }
    }
}
