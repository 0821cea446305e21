use crate::command::{Builtins, CommandFactory, ExecutableCommand, ExitCode};
use crate::session::Session;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process. They see the session so they can
/// inspect the job table or ask the prompt loop to stop.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd" or "jobs".
    fn name() -> &'static str;

    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        match <T as BuiltinCommand>::execute(*self, stdout, session) {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(stdout, "{}: {:#}", T::name(), e)?;
                Ok(1)
            }
        }
    }
}

/// Usage text or a parse error from `argh`, shown instead of running the builtin.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, _session: &mut Session) -> Result<ExitCode> {
        writeln!(stdout, "{}", self.output.trim_end())?;
        Ok(if self.is_error { 1 } else { 0 })
    }
}

/// Creates a `T` from an argument vector when the name matches.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl Cd {
    fn resolve_target(&self, home: Option<PathBuf>) -> Result<PathBuf> {
        match &self.target {
            Some(t) if !t.is_empty() => Ok(PathBuf::from(t)),
            _ => home.ok_or_else(|| anyhow::anyhow!("no target and HOME not set")),
        }
    }
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, _session: &mut Session) -> Result<ExitCode> {
        let target = self.resolve_target(env::var_os("HOME").map(PathBuf::from))?;
        let canonical = fs::canonicalize(&target)
            .with_context(|| format!("can't canonicalize {}", target.display()))?;
        env::set_current_dir(&canonical)
            .with_context(|| format!("can't chdir to {}", canonical.display()))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Leave the shell. Background jobs keep running.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored; the shell always exits with status 0
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        session.should_exit = true;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List background jobs that have not finished yet.
pub struct Jobs {
    #[argh(switch, short = 'p')]
    /// print only process ids
    pub pids_only: bool,
}

impl BuiltinCommand for Jobs {
    fn name() -> &'static str {
        "jobs"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        for job in session.jobs.list() {
            if self.pids_only {
                writeln!(stdout, "{}", job.pid)?;
            } else {
                writeln!(stdout, "{job}")?;
            }
        }
        Ok(0)
    }
}

/// The builtin table handed to the dispatcher.
pub struct BuiltinTable {
    commands: Vec<Box<dyn CommandFactory>>,
}

impl BuiltinTable {
    /// Create a table from a custom set of factories.
    pub fn new(commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self { commands }
    }

    /// Names of every builtin, in lookup order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.iter().map(|factory| factory.name())
    }
}

impl Default for BuiltinTable {
    /// `cd`, `exit` and `jobs`.
    fn default() -> Self {
        Self::new(vec![
            Box::new(Factory::<Cd>::default()),
            Box::new(Factory::<Exit>::default()),
            Box::new(Factory::<Jobs>::default()),
        ])
    }
}

impl Builtins for BuiltinTable {
    fn is_builtin(&self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }

    fn run_builtin(
        &self,
        args: &[String],
        session: &mut Session,
        stdout: &mut dyn Write,
    ) -> Result<ExitCode> {
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("empty builtin invocation"))?;
        let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
        let cmd = self
            .commands
            .iter()
            .find_map(|factory| factory.try_create(name, &rest))
            .ok_or_else(|| anyhow::anyhow!("not a builtin: {}", name))?;
        cmd.execute(stdout, session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::tokenize;
    use nix::unistd::Pid;
    use std::env as stdenv;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX.get_or_init(|| Mutex::new(())).lock().unwrap()
    }

    fn run(table: &BuiltinTable, line: &str, session: &mut Session) -> (ExitCode, String) {
        let mut out = Vec::new();
        let code = table.run_builtin(&tokenize(line), session, &mut out).unwrap();
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_table_knows_its_names() {
        let table = BuiltinTable::default();
        assert!(table.is_builtin("cd"));
        assert!(table.is_builtin("exit"));
        assert!(table.is_builtin("jobs"));
        assert!(!table.is_builtin("ls"));
        assert!(!table.is_builtin("CD"));
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        let orig = stdenv::current_dir().unwrap();

        let table = BuiltinTable::default();
        let line = format!("cd {}", canonical_temp.display());
        let (code, _) = run(&table, &line, &mut Session::default());

        let new_cwd = fs::canonicalize(stdenv::current_dir().unwrap()).unwrap();
        stdenv::set_current_dir(orig).expect("failed to restore cwd");

        assert_eq!(code, 0);
        assert_eq!(new_cwd, canonical_temp);
    }

    #[test]
    fn test_cd_defaults_to_home() {
        let cd = Cd { target: None };
        let home = PathBuf::from("/home/someone");
        assert_eq!(cd.resolve_target(Some(home.clone())).unwrap(), home);
        assert!(cd.resolve_target(None).is_err());

        let cd = Cd {
            target: Some("/tmp".to_string()),
        };
        assert_eq!(cd.resolve_target(None).unwrap(), PathBuf::from("/tmp"));
    }

    #[test]
    fn test_cd_nonexistent_path_reports_and_fails() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();

        let table = BuiltinTable::default();
        let line = format!("cd /nonexistent_dir_for_myshell_test_{}", std::process::id());
        let (code, out) = run(&table, &line, &mut Session::default());

        assert_eq!(code, 1);
        assert!(out.starts_with("cd: can't canonicalize"));
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_exit_sets_flag() {
        let table = BuiltinTable::default();
        let mut session = Session::default();
        let (code, _) = run(&table, "exit 3", &mut session);
        assert_eq!(code, 0);
        assert!(session.should_exit);
    }

    #[test]
    fn test_jobs_lists_table_in_order() {
        let table = BuiltinTable::default();
        let mut session = Session::default();
        session.jobs.register(Pid::from_raw(101), "sleep");
        session.jobs.register(Pid::from_raw(202), "yes");

        let (_, out) = run(&table, "jobs", &mut session);
        assert_eq!(out, "[1]  101  Running  sleep\n[2]  202  Running  yes\n");

        let (_, out) = run(&table, "jobs -p", &mut session);
        assert_eq!(out, "101\n202\n");
    }

    #[test]
    fn test_bad_arguments_print_usage() {
        let table = BuiltinTable::default();
        let (code, out) = run(&table, "jobs --bogus", &mut Session::default());
        assert_eq!(code, 1);
        assert!(out.contains("--bogus"));
    }
}
