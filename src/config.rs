//! Runtime settings for a shell session.

/// Prompt printed before every line, matching the classic `myshell>` look.
pub const DEFAULT_PROMPT: &str = "myshell> ";

/// How many background jobs the job table tracks before dropping new ones.
pub const DEFAULT_MAX_JOBS: usize = 64;

/// Strategy used to number background jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobIdPolicy {
    /// Every job gets a fresh id; ids are never handed out twice in a session.
    #[default]
    Monotonic,
    /// The id is the table length plus one at registration time. Ids can
    /// repeat once earlier jobs have been removed.
    Positional,
}

/// What happens to a command whose redirection target cannot be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectFailure {
    /// Report the error and run the command with its inherited streams.
    #[default]
    Inherit,
    /// Report the error and do not run the command.
    Abort,
}

/// Settings shared by every component of a [`Session`](crate::Session).
///
/// The binary fills this from its command-line flags; library users and tests
/// usually start from [`ShellConfig::default`] and tweak single fields.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Prompt shown by the interactive loop.
    pub prompt: String,
    /// Capacity of the background job table.
    pub max_jobs: usize,
    /// Job numbering strategy.
    pub job_ids: JobIdPolicy,
    /// Behavior on a failed redirection.
    pub redirect_failure: RedirectFailure,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            max_jobs: DEFAULT_MAX_JOBS,
            job_ids: JobIdPolicy::default(),
            redirect_failure: RedirectFailure::default(),
        }
    }
}
