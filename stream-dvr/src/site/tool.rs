//! Running external helper tools (URL resolvers, scraping CLIs).

use std::process::Stdio;
use std::time::Duration;

use tracing::trace;

use crate::{Error, Result};

/// Substitute `{name}` in every argument.
pub(crate) fn expand_args(argv: &[String], name: &str) -> Vec<String> {
    argv.iter().map(|arg| arg.replace("{name}", name)).collect()
}

/// Run `argv` with `{name}` substituted and return its trimmed stdout.
///
/// A non-zero exit or a timeout is an error carrying the tool's stderr.
pub async fn run_tool(argv: &[String], name: &str, timeout: Duration) -> Result<String> {
    let args = expand_args(argv, name);
    let Some((program, rest)) = args.split_first() else {
        return Err(Error::config("empty tool command"));
    };

    trace!("Running {} {:?}", program, rest);

    let mut cmd = process_utils::tokio_command(program);
    cmd.args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| Error::Other(format!("{} timed out after {:?}", program, timeout)))?
        .map_err(|e| Error::Other(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Other(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
