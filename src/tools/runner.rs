//! Tool runner trait and the process-backed implementation.
//!
//! A runner reports a non-zero exit as `Ok(false)`. It only errors when the
//! program cannot be started at all, which callers treat as an environment
//! problem rather than a derivation outcome.

use super::command::ExternalCommand;
use std::fs::File;
use std::io;
use std::process::{Command, Stdio};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("required program not installed: {program}")]
    NotInstalled { program: String },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },
}

/// Runs one [`ExternalCommand`] to completion.
///
/// Implementations must be `Send + Sync`; one runner is shared by every
/// image object in a package.
pub trait ToolRunner: Send + Sync {
    /// Run the command with stdout/stderr redirected to its capture files.
    /// Returns whether the program exited successfully.
    fn run(&self, command: &ExternalCommand) -> Result<bool, ToolError>;
}

/// Runs commands as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, command: &ExternalCommand) -> Result<bool, ToolError> {
        let spawn_error = |e: io::Error| ToolError::Spawn {
            program: command.program.clone(),
            source: Arc::new(e),
        };
        let stdout = File::create(&command.stdout).map_err(spawn_error)?;
        let stderr = File::create(&command.stderr).map_err(spawn_error)?;

        debug!(command = %command.command_line(), "running external tool");
        let status = match Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
        {
            Ok(status) => status,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ToolError::NotInstalled {
                    program: command.program.clone(),
                });
            }
            Err(e) => return Err(spawn_error(e)),
        };

        if !status.success() {
            warn!(
                tool = %command.tool_name(),
                code = ?status.code(),
                stderr = %command.stderr.display(),
                "external tool failed"
            );
        }
        Ok(status.success())
    }
}
