//! `myshell` command-line entry point.
//!
//! Usage:
//!   myshell                    # interactive prompt
//!   myshell -c "<line>"        # run one line, wait for its background jobs, exit

use argh::FromArgs;
use myshell::config::{DEFAULT_MAX_JOBS, DEFAULT_PROMPT, JobIdPolicy, RedirectFailure};
use myshell::launcher::ignore_interrupts;
use myshell::{Interpreter, ShellConfig};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// A small interactive shell: external commands, `<` `>` `>>` redirection,
/// pipelines and background jobs.
struct Args {
    #[argh(option, default = "DEFAULT_PROMPT.to_string()")]
    /// prompt shown before each line
    prompt: String,

    #[argh(option, default = "DEFAULT_MAX_JOBS")]
    /// how many background jobs are tracked at once
    max_jobs: usize,

    #[argh(switch)]
    /// number jobs by table position instead of a running counter
    positional_job_ids: bool,

    #[argh(switch)]
    /// do not run a command whose redirection target cannot be opened
    strict_redirects: bool,

    #[argh(option, short = 'c')]
    /// run this line and exit
    command: Option<String>,
}

impl Args {
    fn config(&self) -> ShellConfig {
        ShellConfig {
            prompt: self.prompt.clone(),
            max_jobs: self.max_jobs,
            job_ids: if self.positional_job_ids {
                JobIdPolicy::Positional
            } else {
                JobIdPolicy::Monotonic
            },
            redirect_failure: if self.strict_redirects {
                RedirectFailure::Abort
            } else {
                RedirectFailure::Inherit
            },
        }
    }
}

fn main() -> ExitCode {
    // MYSHELL_LOG takes the usual EnvFilter syntax, e.g. `myshell=debug`.
    let filter = EnvFilter::try_from_env("MYSHELL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args: Args = argh::from_env();
    let mut shell = Interpreter::new(args.config());

    match args.command {
        Some(line) => {
            if let Err(err) = ignore_interrupts() {
                tracing::warn!(%err, "cannot ignore SIGINT");
            }
            let mut stdout = std::io::stdout();
            let result = shell.run_line(&line, &mut stdout);
            if let Err(err) = shell.finish_background(&mut stdout) {
                eprintln!("myshell: {err}");
            }
            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("myshell: {err:#}");
                    ExitCode::FAILURE
                }
            }
        }
        None => match shell.repl() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("myshell: {err}");
                ExitCode::FAILURE
            }
        },
    }
}
