//! A small interactive shell built around its process-orchestration core.
//!
//! A tokenized command line is classified by the [`dispatch`] module as a
//! builtin, a pipeline or a single external program. External programs are
//! forked and exec'd by the [`launcher`], after the [`redirect`] module has
//! turned any `<`, `>` or `>>` into file descriptors for the child. Pipelines
//! join one child per stage with pipes ([`pipeline`]). Commands ending in `&`
//! become background jobs recorded in the [`jobs`] table, and the [`reaper`]
//! collects them once SIGCHLD reports that they exited.
//!
//! All mutable state lives in a [`Session`]; the [`Interpreter`] wraps it with
//! a line editor and the builtin table.

mod builtin;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
mod interpreter;
pub mod jobs;
pub mod launcher;
pub mod pipeline;
pub mod reaper;
pub mod redirect;
mod session;

pub use builtin::BuiltinTable;
pub use config::ShellConfig;
pub use error::ShellError;
pub use interpreter::Interpreter;
pub use session::Session;
