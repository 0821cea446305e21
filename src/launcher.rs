//! Forks and execs a single external command.

use std::ffi::CString;
use std::io::Write;
use std::os::fd::{AsRawFd, RawFd};
use std::ptr;

use nix::errno::Errno;
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, close, dup2, fork};
use tracing::debug;

use crate::command::Command;
use crate::error::{Result, ShellError};
use crate::redirect;
use crate::session::Session;

const EXIT_NOT_FOUND: libc::c_int = 127;
const EXIT_CANNOT_EXEC: libc::c_int = 126;

/// Everything the child needs, built before `fork` so the child itself never
/// allocates between `fork` and `exec`.
struct PreparedExec {
    argv: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    error_prefix: Vec<u8>,
}

impl PreparedExec {
    fn new(command: &Command) -> Result<Self> {
        let argv = command
            .argv()
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let argv_ptrs = argv
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();
        let error_prefix = format!("myshell: {}: ", command.program().unwrap_or_default()).into_bytes();
        Ok(Self {
            argv,
            argv_ptrs,
            error_prefix,
        })
    }

    /// Runs in the child: install the streams, replace the image, or die.
    fn exec(&self, stdin: Option<RawFd>, stdout: Option<RawFd>) -> ! {
        // An ignored disposition survives exec; the program gets the defaults.
        for sig in TERMINAL_INTERRUPTS {
            // SAFETY: signal(2) is async-signal-safe.
            unsafe { libc::signal(sig as libc::c_int, libc::SIG_DFL) };
        }
        if let Err(err) = bind_stream(stdin, libc::STDIN_FILENO)
            .and_then(|()| bind_stream(stdout, libc::STDOUT_FILENO))
        {
            self.report(err.desc());
            // SAFETY: `_exit` skips atexit handlers and stdio flushing that
            // belong to the parent.
            unsafe { libc::_exit(EXIT_CANNOT_EXEC) }
        }

        // SAFETY: `argv_ptrs` is a NULL-terminated array of pointers into
        // `argv`, which outlives this call.
        unsafe { libc::execvp(self.argv[0].as_ptr(), self.argv_ptrs.as_ptr()) };

        let err = Errno::last();
        let (reason, code) = match err {
            Errno::ENOENT => ("command not found", EXIT_NOT_FOUND),
            other => (other.desc(), EXIT_CANNOT_EXEC),
        };
        self.report(reason);
        unsafe { libc::_exit(code) }
    }

    fn report(&self, reason: &str) {
        for chunk in [&self.error_prefix[..], reason.as_bytes(), &b"\n"[..]] {
            // SAFETY: plain write(2) on stderr with a valid buffer.
            unsafe { libc::write(libc::STDERR_FILENO, chunk.as_ptr().cast(), chunk.len()) };
        }
    }
}

/// Keyboard signals the terminal sends to the whole foreground group.
const TERMINAL_INTERRUPTS: [Signal; 2] = [Signal::SIGINT, Signal::SIGQUIT];

/// Make the shell itself immune to Ctrl-C and Ctrl-\.
///
/// The terminal delivers them to every process in the foreground group, so a
/// running command and the shell waiting on it both receive them. Children
/// put the default action back before exec.
pub fn ignore_interrupts() -> nix::Result<()> {
    for sig in TERMINAL_INTERRUPTS {
        // SAFETY: SigIgn installs no handler code.
        unsafe { signal(sig, SigHandler::SigIgn) }?;
    }
    Ok(())
}

fn bind_stream(fd: Option<RawFd>, target: RawFd) -> nix::Result<()> {
    match fd {
        Some(fd) if fd != target => {
            dup2(fd, target)?;
            close(fd)
        }
        _ => Ok(()),
    }
}

/// Fork a child that runs `command` with the given descriptors on its
/// standard input and output. `None` leaves the inherited stream in place.
pub(crate) fn spawn(command: &Command, stdin: Option<RawFd>, stdout: Option<RawFd>) -> Result<Pid> {
    let prepared = PreparedExec::new(command)?;
    // SAFETY: the child only calls async-signal-safe functions (signal, dup2,
    // close, execvp, write, _exit) before its image is replaced.
    match unsafe { fork() }.map_err(ShellError::Fork)? {
        ForkResult::Parent { child } => {
            debug!(pid = %child, %command, "spawned");
            Ok(child)
        }
        ForkResult::Child => prepared.exec(stdin, stdout),
    }
}

/// Block until `pid` terminates.
///
/// `Ok(None)` means the child was already reaped by someone else, which is
/// not an error.
pub(crate) fn wait_for(pid: Pid) -> Result<Option<WaitStatus>> {
    loop {
        match waitpid(pid, None) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                return Ok(Some(status));
            }
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                debug!(%pid, "child already reaped");
                return Ok(None);
            }
            Err(err) => return Err(ShellError::Wait(err)),
        }
    }
}

/// Run one external command, in the foreground or as a background job.
///
/// A foreground command is waited for and its status discarded. A background
/// command is handed to the reaper, entered in the job table and announced as
/// `[id] pid` on `out`; control returns immediately.
pub fn launch(
    session: &mut Session,
    mut command: Command,
    background: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let binding = redirect::resolve(&mut command, session.config.redirect_failure)?;
    let Some(name) = command.program().map(str::to_string) else {
        // Nothing left but the redirection; opening the file was the whole job.
        return Ok(());
    };

    let pid = spawn(
        &command,
        binding.stdin.as_ref().map(AsRawFd::as_raw_fd),
        binding.stdout.as_ref().map(AsRawFd::as_raw_fd),
    )?;
    drop(binding);

    if background {
        session.reaper.watch(pid);
        if let Some(id) = session.jobs.register(pid, name) {
            writeln!(out, "[{id}] {pid}")?;
        }
        return Ok(());
    }

    let status = wait_for(pid)?;
    debug!(%pid, ?status, "foreground command finished");
    Ok(())
}
