use std::io::Write;

use tracing::debug;

use crate::command::{Builtins, Command, PIPE, split_pipeline, strip_background};
use crate::launcher::launch;
use crate::pipeline::run_pipeline;
use crate::session::Session;

/// Where a tokenized line goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Token 0 names a builtin; runs in the shell process.
    Builtin,
    /// At least one `|` token.
    Pipeline,
    /// Anything else: one external program.
    External,
}

/// Decide how `tokens` should run. `None` for an empty line.
pub fn classify(tokens: &[String], builtins: &dyn Builtins) -> Option<Route> {
    let first = tokens.first()?;
    Some(if builtins.is_builtin(first) {
        Route::Builtin
    } else if tokens.iter().any(|t| t == PIPE) {
        Route::Pipeline
    } else {
        Route::External
    })
}

/// Run one tokenized command line.
///
/// A trailing `&` is stripped first and turns into the background flag.
/// Builtins ignore the flag; pipelines run in the foreground regardless.
pub fn dispatch(
    session: &mut Session,
    builtins: &dyn Builtins,
    mut tokens: Vec<String>,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let background = strip_background(&mut tokens);
    let Some(route) = classify(&tokens, builtins) else {
        return Ok(());
    };
    debug!(?route, background, "dispatching");

    match route {
        Route::Builtin => {
            let code = builtins.run_builtin(&tokens, session, out)?;
            debug!(builtin = %tokens[0], code, "builtin finished");
        }
        Route::Pipeline => run_pipeline(session, split_pipeline(tokens)?, background)?,
        Route::External => launch(session, Command::new(tokens), background, out)?,
    }
    Ok(())
}
