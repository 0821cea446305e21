//! Runs `a | b | ...` as one child per stage joined by pipes.
//!
//! The parent drops each pipe end as soon as the child that needs it has been
//! forked. A write end left open in the parent would keep the next stage from
//! ever seeing end-of-file.

use std::os::fd::{AsRawFd, OwnedFd};

use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{Result, ShellError};
use crate::launcher::{spawn, wait_for};
use crate::redirect::{self, StreamBinding};
use crate::session::Session;

/// Create a pipe whose raw descriptors close on exec.
///
/// Children only keep the copies duplicated onto 0 and 1.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::OFlag;
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};
    let (read, write) = nix::unistd::pipe().map_err(ShellError::Pipe)?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(ShellError::Pipe)?;
    }
    Ok((read, write))
}

/// Run every stage to completion in the foreground.
///
/// Each stage resolves its own redirection first; a file bound that way wins
/// over the pipe on the same stream. `background` is accepted for symmetry
/// with single commands but pipelines always run in the foreground.
pub fn run_pipeline(session: &mut Session, stages: Vec<Command>, background: bool) -> Result<()> {
    run_stages(session, stages, background).1
}

/// [`run_pipeline`], also handing back the pid of every child it forked.
fn run_stages(
    session: &mut Session,
    stages: Vec<Command>,
    background: bool,
) -> (Vec<Pid>, Result<()>) {
    if background {
        warn!("background pipelines are not supported");
        eprintln!("myshell: background pipelines are not supported, running in foreground");
    }

    let on_failure = session.config.redirect_failure;
    let mut resolved = Vec::with_capacity(stages.len());
    for mut stage in stages {
        let binding = match redirect::resolve(&mut stage, on_failure) {
            Ok(binding) => binding,
            Err(err) => return (Vec::new(), Err(err)),
        };
        if stage.is_empty() {
            return (Vec::new(), Err(ShellError::EmptyPipelineStage));
        }
        resolved.push((stage, binding));
    }

    let mut children = Vec::with_capacity(resolved.len());
    let spawned = spawn_stages(resolved, &mut children);
    if let Err(err) = &spawned {
        warn!(%err, forked = children.len(), "pipeline construction failed");
    }

    // Every forked child is waited for, even after a failure, so none is
    // left behind as a zombie.
    let mut waited = Ok(());
    for &pid in &children {
        match wait_for(pid) {
            Ok(status) => debug!(%pid, ?status, "pipeline stage finished"),
            Err(err) => {
                if waited.is_ok() {
                    waited = Err(err);
                }
            }
        }
    }
    (children, spawned.and(waited))
}

fn spawn_stages(stages: Vec<(Command, StreamBinding)>, children: &mut Vec<Pid>) -> Result<()> {
    let last = stages.len().saturating_sub(1);
    let mut upstream: Option<OwnedFd> = None;
    for (i, (command, binding)) in stages.into_iter().enumerate() {
        let (next_read, write_end) = if i < last {
            let (read, write) = cloexec_pipe()?;
            (Some(read), Some(write))
        } else {
            (None, None)
        };

        let stdin = binding.stdin.as_ref().or(upstream.as_ref());
        let stdout = binding.stdout.as_ref().or(write_end.as_ref());
        children.push(spawn(
            &command,
            stdin.map(AsRawFd::as_raw_fd),
            stdout.map(AsRawFd::as_raw_fd),
        )?);

        // This stage's read end and write end are released here; only the
        // next stage's read end survives the iteration.
        upstream = next_read;
        drop(write_end);
    }
    Ok(())
}
