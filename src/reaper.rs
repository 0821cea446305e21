//! Reclaims background children once they exit.
//!
//! The SIGCHLD handler only raises a flag. Everything else (waiting, touching
//! the job table, building the user-visible notice) happens when the
//! interactive loop calls [`Reaper::drain_if_notified`] between commands, so
//! no allocation or formatted output ever runs in signal context.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::jobs::{BackgroundJob, JobTable};

static CHILD_EXITED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigchld(_signal: libc::c_int) {
    CHILD_EXITED.store(true, Ordering::SeqCst);
}

/// Route SIGCHLD to the flag checked by [`Reaper::drain_if_notified`].
///
/// `SA_RESTART` keeps the line editor's blocking reads from failing with
/// `EINTR` whenever a background job finishes.
pub fn install_sigchld_handler() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_sigchld),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe { sigaction(Signal::SIGCHLD, &action) }?;
    Ok(())
}

/// A background child that has terminated and been waited for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// The table entry, or `None` when the job was never tracked (table full).
    pub job: Option<BackgroundJob>,
    pub pid: Pid,
    pub status: WaitStatus,
}

impl Completion {
    fn state(&self) -> String {
        match self.status {
            WaitStatus::Exited(_, 0) => "Done".to_string(),
            WaitStatus::Exited(_, code) => format!("Exit {code}"),
            WaitStatus::Signaled(_, signal, _) => format!("Killed ({})", signal.as_str()),
            _ => "Done".to_string(),
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.job {
            Some(job) => write!(f, "[{}] {}  {}", job.id, self.state(), job.name),
            None => write!(f, "{} {}", self.pid, self.state()),
        }
    }
}

/// Tracks every background pid until it has been waited for.
///
/// This is wider than the job table: children dropped by a full table are
/// still watched here so they never linger as zombies.
#[derive(Debug, Default)]
pub struct Reaper {
    pending: Vec<Pid>,
}

impl Reaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching a freshly forked background child.
    pub fn watch(&mut self, pid: Pid) {
        self.pending.push(pid);
    }

    /// Number of background children not reaped yet.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Drain only if a SIGCHLD arrived since the last call.
    pub fn drain_if_notified(&mut self, jobs: &mut JobTable) -> Vec<Completion> {
        if CHILD_EXITED.swap(false, Ordering::SeqCst) {
            self.drain(jobs)
        } else {
            Vec::new()
        }
    }

    /// Collect every watched child that has already exited, without blocking.
    ///
    /// Finished children are removed from `jobs`. A pid that the kernel no
    /// longer knows about was reaped elsewhere; it is dropped quietly.
    pub fn drain(&mut self, jobs: &mut JobTable) -> Vec<Completion> {
        let mut done = Vec::new();
        let mut running = Vec::with_capacity(self.pending.len());
        for pid in self.pending.drain(..) {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    debug!(%pid, ?status, "reaped background child");
                    done.push(Completion {
                        job: jobs.remove(pid),
                        pid,
                        status,
                    });
                }
                Ok(_) | Err(Errno::EINTR) => running.push(pid),
                Err(Errno::ECHILD) => {
                    debug!(%pid, "child already reaped elsewhere");
                    jobs.remove(pid);
                }
                Err(err) => {
                    warn!(%pid, %err, "waitpid on background child failed");
                    running.push(pid);
                }
            }
        }
        self.pending = running;
        done
    }

    /// Block until every watched child has exited.
    pub fn wait_all(&mut self, jobs: &mut JobTable) -> Vec<Completion> {
        let mut done = Vec::new();
        for pid in std::mem::take(&mut self.pending) {
            loop {
                match waitpid(pid, None) {
                    Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                        done.push(Completion {
                            job: jobs.remove(pid),
                            pid,
                            status,
                        });
                        break;
                    }
                    Ok(_) | Err(Errno::EINTR) => continue,
                    Err(err) => {
                        if err != Errno::ECHILD {
                            warn!(%pid, %err, "waitpid on background child failed");
                        }
                        jobs.remove(pid);
                        break;
                    }
                }
            }
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobIdPolicy;
    use nix::sys::signal::kill;
    use std::process::Command;
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    fn spawn(program: &str, args: &[&str]) -> Pid {
        let child = Command::new(program).args(args).spawn().unwrap();
        // The reaper owns the wait from here on; dropping `Child` does not wait.
        Pid::from_raw(child.id() as i32)
    }

    fn drain_until_idle(reaper: &mut Reaper, jobs: &mut JobTable) -> Vec<Completion> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut all = Vec::new();
        while reaper.outstanding() > 0 && Instant::now() < deadline {
            all.extend(reaper.drain(jobs));
            sleep(Duration::from_millis(10));
        }
        all
    }

    #[test]
    fn test_drain_removes_finished_job_once() {
        let mut jobs = JobTable::new(8, JobIdPolicy::Monotonic);
        let mut reaper = Reaper::new();
        let pid = spawn("true", &[]);
        jobs.register(pid, "true");
        reaper.watch(pid);

        let done = drain_until_idle(&mut reaper, &mut jobs);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].pid, pid);
        assert_eq!(done[0].to_string(), "[1] Done  true");
        assert!(jobs.is_empty());

        assert!(reaper.drain(&mut jobs).is_empty());
    }

    #[test]
    fn test_running_child_stays_tracked() {
        let mut jobs = JobTable::new(8, JobIdPolicy::Monotonic);
        let mut reaper = Reaper::new();
        let pid = spawn("sleep", &["5"]);
        jobs.register(pid, "sleep");
        reaper.watch(pid);

        assert!(reaper.drain(&mut jobs).is_empty());
        assert_eq!(jobs.len(), 1);
        assert_eq!(reaper.outstanding(), 1);

        kill(pid, Signal::SIGKILL).unwrap();
        let done = reaper.wait_all(&mut jobs);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].to_string(), "[1] Killed (SIGKILL)  sleep");
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_nonzero_exit_is_reported() {
        let mut jobs = JobTable::new(8, JobIdPolicy::Monotonic);
        let mut reaper = Reaper::new();
        let pid = spawn("sh", &["-c", "exit 3"]);
        jobs.register(pid, "sh");
        reaper.watch(pid);

        let done = reaper.wait_all(&mut jobs);
        assert_eq!(done[0].to_string(), "[1] Exit 3  sh");
    }

    #[test]
    fn test_already_reaped_child_is_benign() {
        let mut jobs = JobTable::new(8, JobIdPolicy::Monotonic);
        let mut reaper = Reaper::new();
        let pid = spawn("true", &[]);
        jobs.register(pid, "true");
        reaper.watch(pid);

        waitpid(pid, None).unwrap();

        let done = reaper.drain(&mut jobs);
        assert!(done.is_empty());
        assert!(jobs.is_empty());
        assert_eq!(reaper.outstanding(), 0);
    }

    #[test]
    fn test_untracked_child_is_still_reaped() {
        let mut jobs = JobTable::new(1, JobIdPolicy::Monotonic);
        let mut reaper = Reaper::new();
        for _ in 0..3 {
            let pid = spawn("true", &[]);
            jobs.register(pid, "true");
            reaper.watch(pid);
        }
        assert_eq!(jobs.len(), 1);

        let done = drain_until_idle(&mut reaper, &mut jobs);
        assert_eq!(done.len(), 3);
        assert_eq!(done.iter().filter(|c| c.job.is_some()).count(), 1);
        assert!(jobs.is_empty());
    }
}
