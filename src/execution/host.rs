//! Direct host execution
//!
//! Runs an approved command on the host, inheriting the caller's stdio.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// Host execution errors
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Execute argv directly on the host and return its exit code.
pub async fn run_on_host(argv: &[String]) -> Result<i32, HostError> {
    let (program, args) = argv.split_first().ok_or(HostError::EmptyCommand)?;

    debug!(command = %argv.join(" "), "executing on host");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| HostError::Spawn {
            command: program.clone(),
            source,
        })?;

    let status = child.wait().await.map_err(|source| HostError::Wait {
        command: program.clone(),
        source,
    })?;

    Ok(status.code().unwrap_or(-1))
}
