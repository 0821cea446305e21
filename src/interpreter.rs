use crate::builtin::BuiltinTable;
use crate::command::{Builtins, tokenize};
use crate::config::ShellConfig;
use crate::dispatch::dispatch;
use crate::launcher::ignore_interrupts;
use crate::reaper::{Completion, install_sigchld_handler};
use crate::session::Session;
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, Result};
use std::io::Write;
use tracing::warn;

/// The interactive front end: reads lines, dispatches them, and prints job
/// completion notices between commands.
///
/// Example
/// ```no_run
/// use myshell::{Interpreter, ShellConfig};
/// let mut sh = Interpreter::new(ShellConfig::default());
/// sh.run_line("echo hello", &mut std::io::stdout()).unwrap();
/// ```
pub struct Interpreter {
    session: Session,
    builtins: Box<dyn Builtins>,
    /// Whether SIGCHLD raises the reaper's flag. Without it every call to
    /// [`Interpreter::report_finished`] polls the background jobs.
    notified: bool,
}

impl Interpreter {
    /// Create an interpreter with the default builtin table.
    pub fn new(config: ShellConfig) -> Self {
        Self::with_builtins(config, Box::new(BuiltinTable::default()))
    }

    /// Create an interpreter with a custom builtin table.
    pub fn with_builtins(config: ShellConfig, builtins: Box<dyn Builtins>) -> Self {
        Self {
            session: Session::new(config),
            builtins,
            notified: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn should_exit(&self) -> bool {
        self.session.should_exit
    }

    /// Tokenize and run one line. Output meant for the user (job notices,
    /// builtin output) goes to `out`.
    pub fn run_line(&mut self, line: &str, out: &mut dyn Write) -> anyhow::Result<()> {
        dispatch(&mut self.session, self.builtins.as_ref(), tokenize(line), out)
    }

    /// Have SIGCHLD wake the reaper instead of polling before every prompt.
    pub fn enable_child_notifications(&mut self) -> nix::Result<()> {
        install_sigchld_handler()?;
        self.notified = true;
        Ok(())
    }

    /// Print notices for background jobs that finished since the last check.
    pub fn report_finished(&mut self, out: &mut dyn Write) -> std::io::Result<()> {
        let done = if self.notified {
            self.session.collect_finished()
        } else {
            self.session.poll_finished()
        };
        print_completions(&done, out)
    }

    /// Wait for every background job and print its notice.
    pub fn finish_background(&mut self, out: &mut dyn Write) -> std::io::Result<()> {
        let done = self.session.wait_background();
        print_completions(&done, out)
    }

    /// Read-Eval-Print Loop on a line editor with in-memory history.
    ///
    /// Stops on `exit` or end of input. Errors from a single line are printed
    /// and the loop carries on; Ctrl-C only interrupts the running command.
    pub fn repl(&mut self) -> Result<()> {
        if let Err(err) = ignore_interrupts() {
            warn!(%err, "cannot ignore SIGINT; Ctrl-C will end the shell");
        }
        if let Err(err) = self.enable_child_notifications() {
            warn!(%err, "cannot install SIGCHLD handler; polling for finished jobs");
        }
        let mut rl = DefaultEditor::new()?;
        let mut stdout = std::io::stdout();

        while !self.session.should_exit {
            if let Err(err) = self.report_finished(&mut stdout) {
                warn!(%err, "cannot print job notices");
            }
            let prompt = self.session.config.prompt.clone();
            match rl.readline(&prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    if let Err(err) = self.run_line(&line, &mut stdout) {
                        eprintln!("myshell: {err:#}");
                    }
                    let _ = stdout.flush();
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}

fn print_completions(done: &[Completion], out: &mut dyn Write) -> std::io::Result<()> {
    // Jobs the table had no room for finish silently, as they started.
    for completion in done.iter().filter(|c| c.job.is_some()) {
        writeln!(out, "{completion}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    #[test]
    fn test_run_line_external_with_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let out_file = dir.path().join("out");
        let mut sh = Interpreter::default();

        sh.run_line(&format!("echo hello > {}", out_file.display()), &mut Vec::new())
            .unwrap();
        sh.run_line(&format!("echo hello >> {}", out_file.display()), &mut Vec::new())
            .unwrap();
        assert_eq!(fs::read_to_string(&out_file).unwrap(), "hello\nhello\n");
    }

    #[test]
    fn test_background_job_is_announced_and_completed_once() {
        let mut sh = Interpreter::default();
        let mut out = Vec::new();
        sh.run_line("sleep 0.1 &", &mut out).unwrap();
        sh.run_line("jobs", &mut out).unwrap();
        sh.finish_background(&mut out).unwrap();
        sh.finish_background(&mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3, "unexpected output: {text:?}");
        assert!(lines[0].starts_with("[1] "));
        assert!(lines[1].ends_with("Running  sleep"));
        assert_eq!(lines[2], "[1] Done  sleep");
        assert!(sh.session().jobs.is_empty());
    }

    #[test]
    fn test_sigchld_notice_is_reported_once() {
        let mut sh = Interpreter::default();
        sh.enable_child_notifications().unwrap();
        let mut announced = Vec::new();
        sh.run_line("true &", &mut announced).unwrap();
        assert!(String::from_utf8(announced).unwrap().starts_with("[1] "));

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut out = Vec::new();
        while out.is_empty() && Instant::now() < deadline {
            sleep(Duration::from_millis(20));
            sh.report_finished(&mut out).unwrap();
        }
        assert_eq!(String::from_utf8(out).unwrap(), "[1] Done  true\n");
        assert!(sh.session().jobs.is_empty());
        assert_eq!(sh.session().reaper.outstanding(), 0);

        let mut again = Vec::new();
        sh.report_finished(&mut again).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_overflowing_job_table_never_fails() {
        let mut sh = Interpreter::new(ShellConfig {
            max_jobs: 2,
            ..ShellConfig::default()
        });
        let mut out = Vec::new();
        for _ in 0..5 {
            sh.run_line("sleep 0.1 &", &mut out).unwrap();
        }
        assert_eq!(sh.session().jobs.len(), 2);
        assert_eq!(sh.session().reaper.outstanding(), 5);

        sh.finish_background(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Done").count(), 2);
        assert_eq!(sh.session().reaper.outstanding(), 0);
    }

    #[test]
    fn test_exit_builtin_stops_the_loop() {
        let mut sh = Interpreter::default();
        assert!(!sh.should_exit());
        sh.run_line("exit", &mut Vec::new()).unwrap();
        assert!(sh.should_exit());
    }

    #[test]
    fn test_errors_do_not_poison_the_session() {
        let mut sh = Interpreter::default();
        assert!(sh.run_line("| wc", &mut Vec::new()).is_err());
        assert!(sh.run_line("true", &mut Vec::new()).is_ok());
    }
}
