use crate::config::ShellConfig;
use crate::jobs::JobTable;
use crate::reaper::{Completion, Reaper};

/// Everything a running shell owns between two command lines.
///
/// Components receive the session by `&mut` reference; there is no global
/// job list. All mutation happens on the thread running the prompt loop.
#[derive(Debug)]
pub struct Session {
    pub config: ShellConfig,
    /// Background jobs visible to the user.
    pub jobs: JobTable,
    /// Every background pid not waited for yet, tracked or not.
    pub reaper: Reaper,
    /// Set by the `exit` builtin; the prompt loop stops when it sees it.
    pub should_exit: bool,
}

impl Session {
    pub fn new(config: ShellConfig) -> Self {
        let jobs = JobTable::new(config.max_jobs, config.job_ids);
        Self {
            config,
            jobs,
            reaper: Reaper::new(),
            should_exit: false,
        }
    }

    /// Finished background jobs, if SIGCHLD fired since the last call.
    pub fn collect_finished(&mut self) -> Vec<Completion> {
        self.reaper.drain_if_notified(&mut self.jobs)
    }

    /// Finished background jobs, polled regardless of notifications.
    pub fn poll_finished(&mut self) -> Vec<Completion> {
        self.reaper.drain(&mut self.jobs)
    }

    /// Block until every background child has exited.
    pub fn wait_background(&mut self) -> Vec<Completion> {
        self.reaper.wait_all(&mut self.jobs)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}
