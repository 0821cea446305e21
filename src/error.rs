use std::ffi::NulError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::redirect::RedirectKind;

/// Failures the orchestration core reports back to the interactive loop.
///
/// None of these are fatal to the shell: the loop prints the error and reads
/// the next line. A missing executable is not represented here at all, because
/// it is only ever observed inside the forked child.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("cannot open {path} for {kind}: {source}")]
    Redirect {
        kind: RedirectKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("syntax error: `{0}` needs a file name")]
    MissingRedirectTarget(&'static str),

    #[error("syntax error near `|`: empty pipeline stage")]
    EmptyPipelineStage,

    #[error("argument contains a NUL byte: {0}")]
    Nul(#[from] NulError),

    #[error("pipe failed: {0}")]
    Pipe(#[source] nix::Error),

    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("wait failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("cannot write to terminal: {0}")]
    Output(#[from] io::Error),
}

pub type Result<T, E = ShellError> = std::result::Result<T, E>;
