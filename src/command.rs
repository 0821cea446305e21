use crate::error::{Result, ShellError};
use crate::session::Session;
use std::fmt;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// The shell never adopts a child's code as its own status; the type only
/// shows up in builtin results and log lines.
pub type ExitCode = i32;

/// Token that separates pipeline stages.
pub const PIPE: &str = "|";

/// Trailing token that detaches a command from the prompt.
pub const BACKGROUND: &str = "&";

/// Split a raw input line into shell tokens.
///
/// Tokens are separated by whitespace only. There is no quoting, so operators
/// must stand alone (`ls > out`, not `ls>out`).
pub fn tokenize(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// Remove a trailing `&` and report whether it was there.
pub fn strip_background(tokens: &mut Vec<String>) -> bool {
    if tokens.last().map(String::as_str) == Some(BACKGROUND) {
        tokens.pop();
        true
    } else {
        false
    }
}

/// An argument vector about to become one process. Element 0 is the program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    argv: Vec<String>,
}

impl Command {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// Program name, or `None` once redirection removed every token.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub(crate) fn argv_mut(&mut self) -> &mut Vec<String> {
        &mut self.argv
    }

    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

/// Cut a token vector at every `|` into pipeline stages.
///
/// A stage with no tokens (`| wc`, `ls |`, `ls | | wc`) is a syntax error.
pub fn split_pipeline(tokens: Vec<String>) -> Result<Vec<Command>> {
    let mut stages = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if token == PIPE {
            if current.is_empty() {
                return Err(ShellError::EmptyPipelineStage);
            }
            stages.push(Command::new(std::mem::take(&mut current)));
        } else {
            current.push(token);
        }
    }
    if current.is_empty() {
        return Err(ShellError::EmptyPipelineStage);
    }
    stages.push(Command::new(current));
    Ok(stages)
}

/// Builtin lookup the dispatcher consults before spawning anything.
///
/// Builtins run in the shell process itself and never fork.
pub trait Builtins {
    /// Exact match of `name` against the builtin table.
    fn is_builtin(&self, name: &str) -> bool;

    /// Run the builtin named by `args[0]`.
    fn run_builtin(
        &self,
        args: &[String],
        session: &mut Session,
        stdout: &mut dyn Write,
    ) -> anyhow::Result<ExitCode>;
}

/// Object-safe trait for a builtin invocation ready to run.
pub trait ExecutableCommand {
    /// Executes the command, writing any user-facing output to `stdout`.
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        session: &mut Session,
    ) -> anyhow::Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    /// Name this factory answers to.
    fn name(&self) -> &'static str;

    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
