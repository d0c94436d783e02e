//! External tool invocation.
//!
//! | Step | Default program | Arguments |
//! |---|---|---|
//! | Canonical volume | `mri_convert` | `<input> <output.nii.gz>` |
//! | Fallback conversion | `ResampleScalarVolume` | `<input> <output.nii.gz>` |
//! | AFNI copy | `3dcopy` | `<input> <prefix>` |
//! | DICOM descriptor | `dicom2bxh` | `--xcede <slice>... <output>` |
//! | AFNI descriptor | `afni2bxh` | `--xcede <head> <output>` |
//! | NRRD descriptor | `nrrd2bxh` | `--xcede <input> <output>` |
//! | DICOM to NRRD | `DicomToNrrdConverter` | `--inputDicomDirectory <dir> --outputDirectory <dir> --outputVolume <name>` |
//! | Thumbnail | `slicer` | `<volume> -a <output.png>` |
//!
//! The module is split into:
//! - **Command**: [`ExternalCommand`], a plain description of one invocation
//! - **Runner**: [`ToolRunner`] trait + [`SystemRunner`]
//! - **Toolbox**: builds the commands above and checks declared outputs

mod command;
pub mod runner;
mod toolbox;

pub use command::ExternalCommand;
pub use runner::{SystemRunner, ToolError, ToolRunner};
pub use toolbox::{ToolOutcome, Toolbox};
pub(crate) use toolbox::with_suffix;

#[cfg(test)]
pub use runner::tests::MockRunner;
