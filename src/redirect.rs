use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::command::Command;
use crate::config::RedirectFailure;
use crate::error::{Result, ShellError};

/// Which stream a redirection rebinds and how the file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `<`: read-only, bound to standard input.
    Read,
    /// `>`: create or truncate, bound to standard output.
    Truncate,
    /// `>>`: create or append, bound to standard output.
    Append,
}

impl RedirectKind {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "<" => Some(Self::Read),
            ">" => Some(Self::Truncate),
            ">>" => Some(Self::Append),
            _ => None,
        }
    }

    pub fn operator(self) -> &'static str {
        match self {
            Self::Read => "<",
            Self::Truncate => ">",
            Self::Append => ">>",
        }
    }

    fn open_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Self::Read => options.read(true),
            Self::Truncate => options.write(true).create(true).truncate(true).mode(0o644),
            Self::Append => options.append(true).create(true).mode(0o644),
        };
        options
    }
}

impl fmt::Display for RedirectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "reading",
            Self::Truncate => "writing",
            Self::Append => "appending",
        })
    }
}

/// A single `op path` pair lifted out of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub kind: RedirectKind,
    pub target: PathBuf,
}

impl Redirection {
    /// Open the target the way the operator asks for.
    pub fn open(&self) -> Result<File> {
        self.kind
            .open_options()
            .open(&self.target)
            .map_err(|source| ShellError::Redirect {
                kind: self.kind,
                path: self.target.clone(),
                source,
            })
    }

    fn bind(&self) -> Result<StreamBinding> {
        let fd = OwnedFd::from(self.open()?);
        Ok(match self.kind {
            RedirectKind::Read => StreamBinding {
                stdin: Some(fd),
                stdout: None,
            },
            RedirectKind::Truncate | RedirectKind::Append => StreamBinding {
                stdin: None,
                stdout: Some(fd),
            },
        })
    }
}

/// Remove the first redirection operator and its file name from `command`.
///
/// Only the first operator is honored; any later `<`, `>` or `>>` stays in the
/// argument vector as an ordinary word. An operator in last position is an
/// error, and it is still removed from the command.
pub fn take_redirection(command: &mut Command) -> Result<Option<Redirection>> {
    let argv = command.argv_mut();
    let Some((idx, kind)) = argv
        .iter()
        .enumerate()
        .find_map(|(i, token)| RedirectKind::from_token(token).map(|kind| (i, kind)))
    else {
        return Ok(None);
    };

    if idx + 1 >= argv.len() {
        argv.remove(idx);
        return Err(ShellError::MissingRedirectTarget(kind.operator()));
    }
    let target = PathBuf::from(argv.remove(idx + 1));
    argv.remove(idx);

    Ok(Some(Redirection { kind, target }))
}

/// Files a child should install as its standard streams before exec.
///
/// The descriptors are opened by the parent and duplicated onto 0 or 1 by
/// the child. `None` keeps whatever the child inherits.
#[derive(Debug, Default)]
pub struct StreamBinding {
    pub stdin: Option<OwnedFd>,
    pub stdout: Option<OwnedFd>,
}

/// Resolve the redirection embedded in `command`, if any.
///
/// On failure the policy decides: [`RedirectFailure::Inherit`] reports the
/// error on stderr and lets the command run with inherited streams,
/// [`RedirectFailure::Abort`] hands the error back to the caller.
pub fn resolve(command: &mut Command, on_failure: RedirectFailure) -> Result<StreamBinding> {
    let outcome = match take_redirection(command) {
        Ok(None) => return Ok(StreamBinding::default()),
        Ok(Some(redirection)) => {
            debug!(op = redirection.kind.operator(), target = %redirection.target.display(), "redirecting");
            redirection.bind()
        }
        Err(err) => Err(err),
    };

    match outcome {
        Ok(binding) => Ok(binding),
        Err(err) if on_failure == RedirectFailure::Inherit => {
            warn!(%err, "redirection failed, keeping inherited streams");
            eprintln!("myshell: {err}");
            Ok(StreamBinding::default())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::tokenize;
    use std::fs;
    use std::io::Write;

    fn cmd(line: &str) -> Command {
        Command::new(tokenize(line))
    }

    #[test]
    fn test_no_operator_leaves_command_alone() {
        let mut c = cmd("ls -l /tmp");
        assert_eq!(take_redirection(&mut c).unwrap(), None);
        assert_eq!(c.argv(), ["ls", "-l", "/tmp"]);
    }

    #[test]
    fn test_first_operator_is_excised() {
        let mut c = cmd("sort < in.txt -r");
        let r = take_redirection(&mut c).unwrap().unwrap();
        assert_eq!(r.kind, RedirectKind::Read);
        assert_eq!(r.target, PathBuf::from("in.txt"));
        assert_eq!(c.argv(), ["sort", "-r"]);
    }

    #[test]
    fn test_only_first_operator_honored() {
        let mut c = cmd("cat a >> log > other");
        let r = take_redirection(&mut c).unwrap().unwrap();
        assert_eq!(r.kind, RedirectKind::Append);
        assert_eq!(r.target, PathBuf::from("log"));
        assert_eq!(c.argv(), ["cat", "a", ">", "other"]);
    }

    #[test]
    fn test_missing_target_is_error() {
        let mut c = cmd("ls >");
        assert!(matches!(
            take_redirection(&mut c),
            Err(ShellError::MissingRedirectTarget(">"))
        ));
        assert_eq!(c.argv(), ["ls"]);
    }

    #[test]
    fn test_truncate_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        fs::write(&path, "stale contents\n").unwrap();

        let truncate = Redirection {
            kind: RedirectKind::Truncate,
            target: path.clone(),
        };
        truncate.open().unwrap().write_all(b"one\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\n");

        let append = Redirection {
            kind: RedirectKind::Append,
            target: path.clone(),
        };
        append.open().unwrap().write_all(b"two\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_resolve_binds_expected_stream() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mut c = Command::new(vec![
            "echo".to_string(),
            ">".to_string(),
            out.display().to_string(),
        ]);
        let binding = resolve(&mut c, RedirectFailure::Abort).unwrap();
        assert!(binding.stdin.is_none());
        assert!(binding.stdout.is_some());
        assert!(out.exists());
        assert_eq!(c.argv(), ["echo"]);
    }

    #[test]
    fn test_resolve_failure_policies() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope").display().to_string();

        let mut c = Command::new(vec!["cat".into(), "<".into(), missing.clone()]);
        let binding = resolve(&mut c, RedirectFailure::Inherit).unwrap();
        assert!(binding.stdin.is_none() && binding.stdout.is_none());
        assert_eq!(c.argv(), ["cat"]);

        let mut c = Command::new(vec!["cat".into(), "<".into(), missing]);
        let err = resolve(&mut c, RedirectFailure::Abort).unwrap_err();
        assert!(matches!(
            err,
            ShellError::Redirect {
                kind: RedirectKind::Read,
                ..
            }
        ));
    }
}
