use std::ffi::OsString;
use std::path::PathBuf;

/// One subprocess invocation.
///
/// Describes *what* to run; a [`ToolRunner`](super::ToolRunner) decides how.
/// `outputs` lists the files the program is expected to leave behind on
/// success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<OsString>,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub outputs: Vec<PathBuf>,
}

impl ExternalCommand {
    /// Short name of the program, used for log files and diagnostics.
    pub fn tool_name(&self) -> String {
        tool_name(&self.program)
    }

    /// Shell-like rendering for logs. Not meant to be re-parsed.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// File name part of a program, so `/opt/fsl/bin/slicer` logs as `slicer`.
pub(crate) fn tool_name(program: &str) -> String {
    std::path::Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string())
}
