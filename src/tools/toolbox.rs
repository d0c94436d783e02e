//! The fixed argument conventions of every external step.
//!
//! Command builders are pure so the argument vectors can be unit tested;
//! [`Toolbox::run`] executes one and checks that its declared outputs exist.

use super::command::{ExternalCommand, tool_name};
use super::runner::{ToolError, ToolRunner};
use crate::config::ToolsConfig;
use crate::workspace::Workspace;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Result of one external step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Succeeded,
    /// The program exited non-zero.
    Failed { tool: String },
    /// The program reported success but a declared output is absent.
    MissingOutput { tool: String, path: PathBuf },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Succeeded)
    }
}

pub struct Toolbox<'a> {
    runner: &'a dyn ToolRunner,
    programs: &'a ToolsConfig,
    workspace: &'a Workspace,
}

impl<'a> Toolbox<'a> {
    pub fn new(
        runner: &'a dyn ToolRunner,
        programs: &'a ToolsConfig,
        workspace: &'a Workspace,
    ) -> Self {
        Self {
            runner,
            programs,
            workspace,
        }
    }

    pub fn programs(&self) -> &ToolsConfig {
        self.programs
    }

    fn command(&self, program: &str, args: Vec<OsString>, outputs: Vec<PathBuf>) -> ExternalCommand {
        let (stdout, stderr) = self.workspace.log_paths(&tool_name(program));
        ExternalCommand {
            program: program.to_string(),
            args,
            stdout,
            stderr,
            outputs,
        }
    }

    /// Run one command and verify its outputs.
    pub fn run(&self, command: &ExternalCommand) -> Result<ToolOutcome, ToolError> {
        let tool = command.tool_name();
        if !self.runner.run(command)? {
            return Ok(ToolOutcome::Failed { tool });
        }
        if let Some(missing) = command.outputs.iter().find(|p| !p.exists()) {
            warn!(%tool, output = %missing.display(), "tool succeeded without writing its output");
            return Ok(ToolOutcome::MissingOutput {
                tool,
                path: missing.clone(),
            });
        }
        Ok(ToolOutcome::Succeeded)
    }

    // =========================================================================
    // Command builders
    // =========================================================================

    pub fn convert_volume(&self, input: &Path, output: &Path) -> ExternalCommand {
        self.command(
            &self.programs.converter,
            vec![input.into(), output.into()],
            vec![output.to_path_buf()],
        )
    }

    pub fn resample_volume(&self, input: &Path, output: &Path) -> ExternalCommand {
        self.command(
            &self.programs.resampler,
            vec![input.into(), output.into()],
            vec![output.to_path_buf()],
        )
    }

    /// `prefix` is the AFNI dataset name without `.HEAD`/`.BRIK`.
    pub fn afni_copy(&self, input: &Path, prefix: &Path) -> ExternalCommand {
        self.command(
            &self.programs.afni_copier,
            vec![input.into(), prefix.into()],
            vec![with_suffix(prefix, ".HEAD"), with_suffix(prefix, ".BRIK")],
        )
    }

    pub fn describe_dicom(&self, slices: &[PathBuf], output: &Path) -> ExternalCommand {
        let mut args: Vec<OsString> = vec!["--xcede".into()];
        args.extend(slices.iter().map(|s| s.as_os_str().to_owned()));
        args.push(output.into());
        self.command(&self.programs.dicom_describer, args, vec![output.to_path_buf()])
    }

    pub fn describe_afni(&self, head: &Path, output: &Path) -> ExternalCommand {
        self.command(
            &self.programs.afni_describer,
            vec!["--xcede".into(), head.into(), output.into()],
            vec![output.to_path_buf()],
        )
    }

    pub fn describe_nrrd(&self, input: &Path, output: &Path) -> ExternalCommand {
        self.command(
            &self.programs.nrrd_describer,
            vec!["--xcede".into(), input.into(), output.into()],
            vec![output.to_path_buf()],
        )
    }

    pub fn dicom_to_nrrd(&self, dicom_dir: &Path, output_dir: &Path, volume: &str) -> ExternalCommand {
        self.command(
            &self.programs.dicom_to_nrrd,
            vec![
                "--inputDicomDirectory".into(),
                dicom_dir.into(),
                "--outputDirectory".into(),
                output_dir.into(),
                "--outputVolume".into(),
                volume.into(),
            ],
            vec![output_dir.join(volume)],
        )
    }

    pub fn render_thumbnail(&self, volume: &Path, output: &Path) -> ExternalCommand {
        self.command(
            &self.programs.thumbnail_renderer,
            vec![volume.into(), "-a".into(), output.into()],
            vec![output.to_path_buf()],
        )
    }
}

/// Append a suffix to the final path component (`image+orig` → `image+orig.HEAD`).
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}
