//! Out-of-process script execution.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::{Error, Result};

/// Runs `body` through `shell -c` with extra environment variables.
///
/// A non-zero exit status, or death by signal, is [`Error::ScriptFailed`].
pub(crate) fn run_shell(
    shell: &Path,
    name: &str,
    body: &str,
    env: &[(&str, OsString)],
) -> Result<()> {
    log::debug!("Running script '{}' with {}", name, shell.display());
    let status = Command::new(shell)
        .arg("-c")
        .arg(body)
        .envs(env.iter().map(|(k, v)| (*k, v)))
        .stdin(Stdio::null())
        .status()?;
    if status.success() {
        return Ok(());
    }
    let code = status.code().unwrap_or(-1);
    log::error!("Script '{}' exited with status {}", name, code);
    Err(Error::ScriptFailed {
        name: name.to_string(),
        status: code,
    })
}

/// Runs a probe script file; true if it exits successfully.
///
/// Failure to start the shell counts as an unsuccessful probe.
pub(crate) fn probe(shell: &Path, script: &Path, env: &[(&str, OsString)]) -> bool {
    let status = Command::new(shell)
        .arg(script)
        .envs(env.iter().map(|(k, v)| (*k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status();
    match status {
        Ok(status) => status.success(),
        Err(e) => {
            log::warn!("Cannot run probe '{}': {}", script.display(), e);
            false
        }
    }
}
