//! Injectable deferral of store housekeeping.
//!
//! The store asks its [`Scheduler`] whether a job should run right away or at
//! the end of the current turn. Requests for a job already queued in the
//! turn collapse into one run.

use indexmap::IndexSet;
use tracing::trace;

/// Deferred housekeeping the store can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Job {
    /// Apply pending record-array changes.
    SyncArrays,
    /// Deliver buffered notifications.
    DispatchNotifications,
}

/// Scheduler decision for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Run the job now.
    Now,
    /// The job was queued for [`Scheduler::drain`].
    Deferred,
}

/// Decides when deferred store work runs.
pub trait Scheduler {
    /// Requests `job`.
    fn schedule(&mut self, job: Job) -> Dispatch;

    /// Returns the jobs queued since the last drain, in request order.
    fn drain(&mut self) -> Vec<Job>;

    /// Returns `true` when jobs are waiting.
    fn has_pending(&self) -> bool;
}

/// Runs every job as soon as it is requested.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&mut self, _job: Job) -> Dispatch {
        Dispatch::Now
    }

    fn drain(&mut self) -> Vec<Job> {
        Vec::new()
    }

    fn has_pending(&self) -> bool {
        false
    }
}

/// Queues jobs until the host ends the turn.
#[derive(Clone, Debug, Default)]
pub struct TurnScheduler {
    queue: IndexSet<Job>,
}

impl TurnScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for TurnScheduler {
    fn schedule(&mut self, job: Job) -> Dispatch {
        if self.queue.insert(job) {
            trace!(?job, "scheduler.queue");
        }
        Dispatch::Deferred
    }

    fn drain(&mut self) -> Vec<Job> {
        self.queue.drain(..).collect()
    }

    fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }
}
