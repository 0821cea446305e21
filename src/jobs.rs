use std::fmt;

use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::config::JobIdPolicy;

/// Number shown to the user in `[n]` job notices.
pub type JobId = usize;

/// A detached child the shell has not reaped yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundJob {
    pub id: JobId,
    pub pid: Pid,
    /// Program name only, not the full argument vector.
    pub name: String,
}

impl fmt::Display for BackgroundJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]  {}  Running  {}", self.id, self.pid, self.name)
    }
}

/// Ordered store of running background jobs with a fixed capacity.
///
/// Entries are kept in registration order and removal never reorders the
/// remaining ones. Every pid in the table belongs to a child that has not been
/// reaped yet: the reaper is the only caller of [`JobTable::remove`].
#[derive(Debug)]
pub struct JobTable {
    jobs: Vec<BackgroundJob>,
    capacity: usize,
    policy: JobIdPolicy,
    next_id: JobId,
}

impl JobTable {
    pub fn new(capacity: usize, policy: JobIdPolicy) -> Self {
        Self {
            jobs: Vec::with_capacity(capacity),
            capacity,
            policy,
            next_id: 1,
        }
    }

    /// Record a freshly forked background child.
    ///
    /// Returns `None` when the table is full. The process keeps running in that
    /// case, it just is not listed.
    pub fn register(&mut self, pid: Pid, name: impl Into<String>) -> Option<JobId> {
        let name = name.into();
        if self.jobs.len() >= self.capacity {
            warn!(%pid, %name, capacity = self.capacity, "job table full, not tracking job");
            return None;
        }
        let id = match self.policy {
            JobIdPolicy::Monotonic => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
            JobIdPolicy::Positional => self.jobs.len() + 1,
        };
        debug!(id, %pid, %name, "registered background job");
        self.jobs.push(BackgroundJob { id, pid, name });
        Some(id)
    }

    /// Jobs in registration order.
    pub fn list(&self) -> &[BackgroundJob] {
        &self.jobs
    }

    /// Take the job owning `pid` out of the table.
    pub fn remove(&mut self, pid: Pid) -> Option<BackgroundJob> {
        let idx = self.jobs.iter().position(|job| job.pid == pid)?;
        Some(self.jobs.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
