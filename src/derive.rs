//! Lazily derived artifacts.
//!
//! Every artifact lives in a [`Slot`]: unset until first requested, then
//! computed once and memoized, including failures. A slot's mutex is held for
//! the whole computation, so concurrent requests for the same artifact wait
//! for the first caller instead of starting the tool again.
//!
//! Derivation rules, first matching row wins:
//!
//! | Artifact | Identity when | Otherwise |
//! |---|---|---|
//! | `nifti_1` | NIfTI-1 member | converter on DICOM > MINC > AFNI `.BRIK` > NRRD |
//! | `nifti_1_gz` | canonical ends in `.nii.gz` | gzip the canonical volume in-process |
//! | `afni` | AFNI pair | copier on canonical (DICOM) or MINC > NIfTI-1 > NRRD member |
//! | `nrrd` | NRRD member | DICOM directory converter; unsupported for other volumes |
//! | `xcede` | never | describer chosen by source format |
//! | `thumbnail` | never | renderer on the canonical volume |
//!
//! Sources with no volumetric member fail with "image is not a volume".
//! Slots store [`Location`]s relative to the workspace, resolved against the
//! current root when read.

use crate::classify::{AFNI_DATA_SUFFIX, AFNI_HEAD_SUFFIX, FileSet, FormatCategory};
use crate::object::ImageError;
use crate::tools::{ExternalCommand, ToolOutcome, Toolbox, with_suffix};
use crate::workspace::Workspace;
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const CANONICAL_NAME: &str = "image.nii.gz";
pub const AFNI_PREFIX: &str = "image+orig";
pub const DESCRIPTOR_NAME: &str = "image.xcede";
pub const NRRD_NAME: &str = "image.nrrd";
pub const THUMBNAIL_NAME: &str = "thumbnail.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Artifact {
    CanonicalVolume,
    CompressedVolume,
    AfniVolume,
    NrrdVolume,
    Descriptor,
    Thumbnail,
}

impl Artifact {
    pub const ALL: [Artifact; 6] = [
        Artifact::CanonicalVolume,
        Artifact::CompressedVolume,
        Artifact::AfniVolume,
        Artifact::NrrdVolume,
        Artifact::Descriptor,
        Artifact::Thumbnail,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Artifact::CanonicalVolume => "nifti_1",
            Artifact::CompressedVolume => "nifti_1_gz",
            Artifact::AfniVolume => "afni",
            Artifact::NrrdVolume => "nrrd",
            Artifact::Descriptor => "xcede",
            Artifact::Thumbnail => "thumbnail",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Failures
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NotAVolume,
    Unsupported(String),
    ToolFailed { tool: String },
    MissingOutput { tool: String, path: PathBuf },
    /// A prerequisite artifact failed.
    Dependency {
        artifact: Artifact,
        reason: Box<FailureReason>,
    },
    Io(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotAVolume => f.write_str("image is not a volume"),
            FailureReason::Unsupported(what) => write!(f, "{what}"),
            FailureReason::ToolFailed { tool } => {
                write!(f, "{tool} failed (see logs/{tool}.stderr)")
            }
            FailureReason::MissingOutput { tool, path } => {
                write!(f, "{tool} reported success but wrote no {}", path.display())
            }
            FailureReason::Dependency { artifact, reason } => {
                write!(f, "requires {artifact}: {reason}")
            }
            FailureReason::Io(message) => write!(f, "I/O error: {message}"),
        }
    }
}

/// A terminal derivation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot derive {artifact}: {reason}")]
pub struct Failure {
    pub artifact: Artifact,
    pub reason: FailureReason,
}

impl Failure {
    pub fn new(artifact: Artifact, reason: FailureReason) -> Self {
        Self { artifact, reason }
    }

    /// The innermost reason, following dependency chains.
    pub fn root_reason(&self) -> &FailureReason {
        let mut reason = &self.reason;
        while let FailureReason::Dependency { reason: inner, .. } = reason {
            reason = inner;
        }
        reason
    }

    pub fn is_not_a_volume(&self) -> bool {
        *self.root_reason() == FailureReason::NotAVolume
    }
}

fn fail(artifact: Artifact, reason: FailureReason) -> ImageError {
    ImageError::Derivation(Failure::new(artifact, reason))
}

// =============================================================================
// Slots
// =============================================================================

/// Observable state of one slot.
#[derive(Debug, Clone)]
pub enum SlotState<T> {
    Unset,
    Ready(T),
    Failed(ImageError),
}

impl<T> SlotState<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> SlotState<U> {
        match self {
            SlotState::Unset => SlotState::Unset,
            SlotState::Ready(value) => SlotState::Ready(f(value)),
            SlotState::Failed(error) => SlotState::Failed(error),
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, SlotState::Unset)
    }
}

/// A value computed at most once per workspace generation.
///
/// Environment errors (a tool that cannot be started) leave the slot unset;
/// every other outcome is final.
pub struct Slot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState::Unset),
        }
    }
}

impl<T: Clone> Slot<T> {
    pub fn state(&self) -> SlotState<T> {
        self.state.lock().clone()
    }

    pub fn get_or_compute(
        &self,
        compute: impl FnOnce() -> Result<T, ImageError>,
    ) -> Result<T, ImageError> {
        let mut state = self.state.lock();
        match &*state {
            SlotState::Ready(value) => return Ok(value.clone()),
            SlotState::Failed(error) => return Err(error.clone()),
            SlotState::Unset => {}
        }
        let result = compute();
        match &result {
            Ok(value) => *state = SlotState::Ready(value.clone()),
            Err(error) if error.is_terminal() => *state = SlotState::Failed(error.clone()),
            Err(_) => {}
        }
        result
    }
}

/// Where an artifact lives, relative to its workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A classified member under `unpacked/`. AFNI members are stems.
    Member(String),
    /// A file produced in the workspace root. The AFNI export is a prefix.
    Derived(&'static str),
}

impl Location {
    pub fn resolve(&self, workspace: &Workspace) -> PathBuf {
        match self {
            Location::Member(name) => workspace.member_path(name),
            Location::Derived(name) => workspace.artifact_path(name),
        }
    }
}

// =============================================================================
// Derivation rules
// =============================================================================

/// Inputs every rule reads from.
pub struct DeriveContext<'a> {
    pub workspace: &'a Workspace,
    pub files: &'a FileSet,
    pub toolbox: Toolbox<'a>,
}

impl DeriveContext<'_> {
    fn member(&self, name: &str) -> PathBuf {
        self.workspace.member_path(name)
    }
}

/// The derived-artifact slots of one workspace generation.
#[derive(Default)]
pub struct ArtifactCache {
    canonical: Slot<Location>,
    compressed: Slot<Location>,
    afni: Slot<Location>,
    nrrd: Slot<Location>,
    descriptor: Slot<Location>,
    thumbnail: Slot<Location>,
}

impl ArtifactCache {
    fn slot(&self, artifact: Artifact) -> &Slot<Location> {
        match artifact {
            Artifact::CanonicalVolume => &self.canonical,
            Artifact::CompressedVolume => &self.compressed,
            Artifact::AfniVolume => &self.afni,
            Artifact::NrrdVolume => &self.nrrd,
            Artifact::Descriptor => &self.descriptor,
            Artifact::Thumbnail => &self.thumbnail,
        }
    }

    pub fn state(&self, artifact: Artifact) -> SlotState<Location> {
        self.slot(artifact).state()
    }

    pub fn resolve(&self, artifact: Artifact, ctx: &DeriveContext<'_>) -> Result<Location, ImageError> {
        self.slot(artifact).get_or_compute(|| {
            let result = match artifact {
                Artifact::CanonicalVolume => self.derive_canonical(ctx),
                Artifact::CompressedVolume => self.derive_compressed(ctx),
                Artifact::AfniVolume => self.derive_afni(ctx),
                Artifact::NrrdVolume => self.derive_nrrd(ctx),
                Artifact::Descriptor => self.derive_descriptor(ctx),
                Artifact::Thumbnail => self.derive_thumbnail(ctx),
            };
            match &result {
                Ok(location) => info!(%artifact, ?location, "artifact ready"),
                Err(error) => warn!(%artifact, %error, "artifact unavailable"),
            }
            result
        })
    }

    /// Resolve a prerequisite, reporting its failure as a failure of `for_artifact`.
    fn require(
        &self,
        needed: Artifact,
        for_artifact: Artifact,
        ctx: &DeriveContext<'_>,
    ) -> Result<PathBuf, ImageError> {
        self.require_location(needed, for_artifact, ctx)
            .map(|location| location.resolve(ctx.workspace))
    }

    fn require_location(
        &self,
        needed: Artifact,
        for_artifact: Artifact,
        ctx: &DeriveContext<'_>,
    ) -> Result<Location, ImageError> {
        match self.resolve(needed, ctx) {
            Ok(location) => Ok(location),
            Err(ImageError::Derivation(failure)) => Err(fail(
                for_artifact,
                FailureReason::Dependency {
                    artifact: failure.artifact,
                    reason: Box::new(failure.reason),
                },
            )),
            Err(other) => Err(other),
        }
    }

    fn derive_canonical(&self, ctx: &DeriveContext<'_>) -> Result<Location, ImageError> {
        let artifact = Artifact::CanonicalVolume;
        let files = ctx.files;
        if let Some(name) = files.first(FormatCategory::Nifti) {
            return Ok(Location::Member(name.to_string()));
        }

        let input = if let Some(name) = files.first(FormatCategory::Dicom) {
            ctx.member(name)
        } else if let Some(name) = files.first(FormatCategory::Minc) {
            ctx.member(name)
        } else if let Some(stem) = files.first(FormatCategory::Afni) {
            ctx.member(&format!("{stem}{AFNI_DATA_SUFFIX}"))
        } else if let Some(name) = files.first(FormatCategory::Nrrd) {
            ctx.member(name)
        } else {
            return Err(fail(artifact, FailureReason::NotAVolume));
        };

        let output = ctx.workspace.artifact_path(CANONICAL_NAME);
        let outcome = ctx.toolbox.run(&ctx.toolbox.convert_volume(&input, &output))?;
        if !outcome.is_success() && ctx.toolbox.programs().allow_resample {
            warn!(input = %input.display(), "converter failed, trying resampler");
            let fallback = ctx.toolbox.run(&ctx.toolbox.resample_volume(&input, &output))?;
            if fallback.is_success() {
                return Ok(Location::Derived(CANONICAL_NAME));
            }
        }
        check_outcome(artifact, outcome)?;
        Ok(Location::Derived(CANONICAL_NAME))
    }

    fn derive_compressed(&self, ctx: &DeriveContext<'_>) -> Result<Location, ImageError> {
        let artifact = Artifact::CompressedVolume;
        let location = self.require_location(Artifact::CanonicalVolume, artifact, ctx)?;
        let path = location.resolve(ctx.workspace);
        if path.to_string_lossy().ends_with(".nii.gz") {
            return Ok(location);
        }

        let output = ctx.workspace.artifact_path(CANONICAL_NAME);
        gzip_file(&path, &output).map_err(|e| fail(artifact, FailureReason::Io(e.to_string())))?;
        Ok(Location::Derived(CANONICAL_NAME))
    }

    fn derive_afni(&self, ctx: &DeriveContext<'_>) -> Result<Location, ImageError> {
        let artifact = Artifact::AfniVolume;
        let files = ctx.files;
        if let Some(stem) = files.first(FormatCategory::Afni) {
            return Ok(Location::Member(stem.to_string()));
        }

        let input = if files.has(FormatCategory::Dicom) {
            self.require(Artifact::CanonicalVolume, artifact, ctx)?
        } else if let Some(name) = files
            .first(FormatCategory::Minc)
            .or_else(|| files.first(FormatCategory::Nifti))
            .or_else(|| files.first(FormatCategory::Nrrd))
        {
            ctx.member(name)
        } else {
            return Err(fail(artifact, FailureReason::NotAVolume));
        };

        let prefix = ctx.workspace.artifact_path(AFNI_PREFIX);
        run_step(ctx, artifact, &ctx.toolbox.afni_copy(&input, &prefix))?;
        Ok(Location::Derived(AFNI_PREFIX))
    }

    fn derive_nrrd(&self, ctx: &DeriveContext<'_>) -> Result<Location, ImageError> {
        let artifact = Artifact::NrrdVolume;
        let files = ctx.files;
        if let Some(name) = files.first(FormatCategory::Nrrd) {
            return Ok(Location::Member(name.to_string()));
        }
        if let Some(first) = files.first(FormatCategory::Dicom) {
            let slice = ctx.member(first);
            let series_dir = slice
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| ctx.workspace.unpacked_dir());
            let command = ctx
                .toolbox
                .dicom_to_nrrd(&series_dir, ctx.workspace.root(), NRRD_NAME);
            run_step(ctx, artifact, &command)?;
            return Ok(Location::Derived(NRRD_NAME));
        }
        for category in [FormatCategory::Afni, FormatCategory::Minc, FormatCategory::Nifti] {
            if files.has(category) {
                return Err(fail(
                    artifact,
                    FailureReason::Unsupported(format!("NRRD export from {category} is not supported")),
                ));
            }
        }
        Err(fail(artifact, FailureReason::NotAVolume))
    }

    fn derive_descriptor(&self, ctx: &DeriveContext<'_>) -> Result<Location, ImageError> {
        let artifact = Artifact::Descriptor;
        let files = ctx.files;
        let output = ctx.workspace.artifact_path(DESCRIPTOR_NAME);

        let command = if files.has(FormatCategory::Dicom) {
            let slices: Vec<PathBuf> = files
                .get(FormatCategory::Dicom)
                .iter()
                .map(|name| ctx.member(name))
                .collect();
            ctx.toolbox.describe_dicom(&slices, &output)
        } else if let Some(stem) = files.first(FormatCategory::Afni) {
            let head = ctx.member(&format!("{stem}{AFNI_HEAD_SUFFIX}"));
            ctx.toolbox.describe_afni(&head, &output)
        } else if files.has(FormatCategory::Minc) || files.has(FormatCategory::Nifti) {
            let prefix = self.require(Artifact::AfniVolume, artifact, ctx)?;
            let head = with_suffix(&prefix, AFNI_HEAD_SUFFIX);
            ctx.toolbox.describe_afni(&head, &output)
        } else if let Some(name) = files.first(FormatCategory::Nrrd) {
            ctx.toolbox.describe_nrrd(&ctx.member(name), &output)
        } else {
            return Err(fail(artifact, FailureReason::NotAVolume));
        };

        run_step(ctx, artifact, &command)?;
        Ok(Location::Derived(DESCRIPTOR_NAME))
    }

    fn derive_thumbnail(&self, ctx: &DeriveContext<'_>) -> Result<Location, ImageError> {
        let artifact = Artifact::Thumbnail;
        let volume = self.require(Artifact::CanonicalVolume, artifact, ctx)?;
        let output = ctx.workspace.artifact_path(THUMBNAIL_NAME);
        run_step(ctx, artifact, &ctx.toolbox.render_thumbnail(&volume, &output))?;
        Ok(Location::Derived(THUMBNAIL_NAME))
    }
}

fn run_step(ctx: &DeriveContext<'_>, artifact: Artifact, command: &ExternalCommand) -> Result<(), ImageError> {
    let outcome = ctx.toolbox.run(command)?;
    check_outcome(artifact, outcome)
}

fn check_outcome(artifact: Artifact, outcome: ToolOutcome) -> Result<(), ImageError> {
    match outcome {
        ToolOutcome::Succeeded => Ok(()),
        ToolOutcome::Failed { tool } => Err(fail(artifact, FailureReason::ToolFailed { tool })),
        ToolOutcome::MissingOutput { tool, path } => {
            Err(fail(artifact, FailureReason::MissingOutput { tool, path }))
        }
    }
}

fn gzip_file(input: &Path, output: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(input)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(output)?), Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ToolsConfig, WorkspaceConfig};
    use crate::tools::MockRunner;
    use crate::tools::ToolError;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _parent: TempDir,
        workspace: Workspace,
        programs: ToolsConfig,
        files: FileSet,
    }

    fn fixture(members: &[(&str, FormatCategory)]) -> Fixture {
        let parent = TempDir::new().unwrap();
        let workspace = Workspace::acquire(&WorkspaceConfig {
            root: Some(parent.path().to_path_buf()),
            ..WorkspaceConfig::default()
        })
        .unwrap();
        for (name, _) in members {
            let path = workspace.member_path(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"member").unwrap();
        }
        let files = FileSet::from_classified(members.iter().map(|(n, c)| (n.to_string(), *c)));
        Fixture {
            _parent: parent,
            workspace,
            programs: ToolsConfig::default(),
            files,
        }
    }

    impl Fixture {
        fn ctx<'a>(&'a self, runner: &'a MockRunner) -> DeriveContext<'a> {
            DeriveContext {
                workspace: &self.workspace,
                files: &self.files,
                toolbox: Toolbox::new(runner, &self.programs, &self.workspace),
            }
        }
    }

    fn failure(error: ImageError) -> Failure {
        match error {
            ImageError::Derivation(failure) => failure,
            other => panic!("expected a derivation failure, got {other:?}"),
        }
    }

    // =========================================================================
    // Canonical volume
    // =========================================================================

    #[test]
    fn nifti_member_is_its_own_canonical_volume() {
        let fx = fixture(&[("t1.nii.gz", FormatCategory::Nifti)]);
        let runner = MockRunner::new();
        let cache = ArtifactCache::default();

        let location = cache.resolve(Artifact::CanonicalVolume, &fx.ctx(&runner)).unwrap();
        assert_eq!(location, Location::Member("t1.nii.gz".into()));
        assert!(runner.get_invocations().is_empty());
    }

    #[test]
    fn dicom_series_is_converted_once() {
        let fx = fixture(&[
            ("IM2", FormatCategory::Dicom),
            ("IM1", FormatCategory::Dicom),
        ]);
        let runner = MockRunner::new();
        let cache = ArtifactCache::default();
        let ctx = fx.ctx(&runner);

        let first = cache.resolve(Artifact::CanonicalVolume, &ctx).unwrap();
        let second = cache.resolve(Artifact::CanonicalVolume, &ctx).unwrap();
        assert_eq!(first, Location::Derived(CANONICAL_NAME));
        assert_eq!(first, second);
        assert_eq!(runner.count("mri_convert"), 1);

        let invocation = &runner.get_invocations()[0];
        assert_eq!(invocation.args[0], fx.workspace.member_path("IM1").into_os_string());
    }

    #[test]
    fn afni_source_converts_its_data_half() {
        let fx = fixture(&[
            ("anat+orig.HEAD", FormatCategory::Afni),
            ("anat+orig.BRIK", FormatCategory::Afni),
        ]);
        let runner = MockRunner::new();
        ArtifactCache::default()
            .resolve(Artifact::CanonicalVolume, &fx.ctx(&runner))
            .unwrap();
        let invocation = &runner.get_invocations()[0];
        assert_eq!(invocation.args[0], fx.workspace.member_path("anat+orig.BRIK").into_os_string());
    }

    #[test]
    fn converter_failure_is_memoized() {
        let fx = fixture(&[("scan.mnc", FormatCategory::Minc)]);
        let runner = MockRunner::failing(&["mri_convert"]);
        let cache = ArtifactCache::default();
        let ctx = fx.ctx(&runner);

        let error = failure(cache.resolve(Artifact::CanonicalVolume, &ctx).unwrap_err());
        assert_eq!(error.reason, FailureReason::ToolFailed { tool: "mri_convert".into() });
        assert!(cache.resolve(Artifact::CanonicalVolume, &ctx).is_err());
        assert_eq!(runner.count("mri_convert"), 1);
        assert!(matches!(cache.state(Artifact::CanonicalVolume), SlotState::Failed(_)));
    }

    #[test]
    fn resampler_fallback_when_allowed() {
        let mut fx = fixture(&[("scan.nrrd", FormatCategory::Nrrd)]);
        fx.programs.allow_resample = true;
        let runner = MockRunner::failing(&["mri_convert"]);
        let cache = ArtifactCache::default();

        let location = cache.resolve(Artifact::CanonicalVolume, &fx.ctx(&runner)).unwrap();
        assert_eq!(location, Location::Derived(CANONICAL_NAME));
        assert_eq!(runner.count("ResampleScalarVolume"), 1);
    }

    #[test]
    fn missing_output_is_a_failure() {
        let fx = fixture(&[("IM1", FormatCategory::Dicom)]);
        let runner = MockRunner::silent(&["mri_convert"]);
        let error = failure(
            ArtifactCache::default()
                .resolve(Artifact::CanonicalVolume, &fx.ctx(&runner))
                .unwrap_err(),
        );
        assert!(matches!(error.reason, FailureReason::MissingOutput { .. }));
    }

    #[test]
    fn missing_tool_leaves_slot_unset() {
        let fx = fixture(&[("IM1", FormatCategory::Dicom)]);
        let runner = MockRunner::missing(&["mri_convert"]);
        let cache = ArtifactCache::default();

        let error = cache.resolve(Artifact::CanonicalVolume, &fx.ctx(&runner)).unwrap_err();
        assert!(matches!(error, ImageError::Tool(ToolError::NotInstalled { .. })));
        assert!(cache.state(Artifact::CanonicalVolume).is_unset());
    }

    #[test]
    fn raster_only_sources_are_not_volumes() {
        let fx = fixture(&[("shot.png", FormatCategory::Png)]);
        let runner = MockRunner::new();
        let cache = ArtifactCache::default();
        let ctx = fx.ctx(&runner);

        for artifact in Artifact::ALL {
            let error = failure(cache.resolve(artifact, &ctx).unwrap_err());
            assert!(error.is_not_a_volume(), "{artifact}: {error}");
        }
        assert!(runner.get_invocations().is_empty());
    }

    // =========================================================================
    // Dependent artifacts
    // =========================================================================

    #[test]
    fn compressed_volume_reuses_gzipped_canonical() {
        let fx = fixture(&[("t1.nii.gz", FormatCategory::Nifti)]);
        let runner = MockRunner::new();
        let location = ArtifactCache::default()
            .resolve(Artifact::CompressedVolume, &fx.ctx(&runner))
            .unwrap();
        assert_eq!(location, Location::Member("t1.nii.gz".into()));
    }

    #[test]
    fn compressed_volume_gzips_plain_nifti() {
        let fx = fixture(&[("t1.nii", FormatCategory::Nifti)]);
        let runner = MockRunner::new();
        let location = ArtifactCache::default()
            .resolve(Artifact::CompressedVolume, &fx.ctx(&runner))
            .unwrap();
        assert_eq!(location, Location::Derived(CANONICAL_NAME));

        let mut decoded = Vec::new();
        let file = File::open(location.resolve(&fx.workspace)).unwrap();
        std::io::Read::read_to_end(&mut flate2::read::GzDecoder::new(file), &mut decoded).unwrap();
        assert_eq!(decoded, b"member");
    }

    #[test]
    fn descriptor_for_dicom_lists_all_slices() {
        let fx = fixture(&[
            ("IM1", FormatCategory::Dicom),
            ("IM2", FormatCategory::Dicom),
        ]);
        let runner = MockRunner::new();
        let location = ArtifactCache::default()
            .resolve(Artifact::Descriptor, &fx.ctx(&runner))
            .unwrap();
        assert_eq!(location, Location::Derived(DESCRIPTOR_NAME));
        let invocation = &runner.get_invocations()[0];
        assert_eq!(invocation.tool_name(), "dicom2bxh");
        assert_eq!(invocation.args.len(), 4);
    }

    #[test]
    fn descriptor_for_nifti_goes_through_afni() {
        let fx = fixture(&[("t1.nii", FormatCategory::Nifti)]);
        let runner = MockRunner::new();
        let cache = ArtifactCache::default();
        cache.resolve(Artifact::Descriptor, &fx.ctx(&runner)).unwrap();

        let tools: Vec<String> = runner.get_invocations().iter().map(|c| c.tool_name()).collect();
        assert_eq!(tools, vec!["3dcopy", "afni2bxh"]);
        assert!(matches!(cache.state(Artifact::AfniVolume), SlotState::Ready(_)));
        let head = fx.workspace.artifact_path("image+orig.HEAD");
        assert_eq!(runner.get_invocations()[1].args[1], head.into_os_string());
    }

    #[test]
    fn thumbnail_failure_names_the_dependency() {
        let fx = fixture(&[("IM1", FormatCategory::Dicom)]);
        let runner = MockRunner::failing(&["mri_convert"]);
        let cache = ArtifactCache::default();
        let ctx = fx.ctx(&runner);

        let error = failure(cache.resolve(Artifact::Thumbnail, &ctx).unwrap_err());
        assert_eq!(error.artifact, Artifact::Thumbnail);
        assert!(matches!(
            error.reason,
            FailureReason::Dependency { artifact: Artifact::CanonicalVolume, .. }
        ));
        assert_eq!(runner.count("slicer"), 0);
        assert!(matches!(cache.state(Artifact::CanonicalVolume), SlotState::Failed(_)));
    }

    #[test]
    fn nrrd_from_dicom_uses_series_directory() {
        let fx = fixture(&[("series/IM1", FormatCategory::Dicom)]);
        let runner = MockRunner::new();
        let location = ArtifactCache::default()
            .resolve(Artifact::NrrdVolume, &fx.ctx(&runner))
            .unwrap();
        assert_eq!(location, Location::Derived(NRRD_NAME));
        let invocation = &runner.get_invocations()[0];
        assert_eq!(invocation.args[1], fx.workspace.member_path("series").into_os_string());
    }

    #[test]
    fn nrrd_from_nifti_is_unsupported() {
        let fx = fixture(&[("t1.nii", FormatCategory::Nifti)]);
        let runner = MockRunner::new();
        let error = failure(
            ArtifactCache::default()
                .resolve(Artifact::NrrdVolume, &fx.ctx(&runner))
                .unwrap_err(),
        );
        assert!(matches!(error.reason, FailureReason::Unsupported(_)));
    }

    #[test]
    fn artifact_names_round_trip() {
        for artifact in Artifact::ALL {
            assert_eq!(Artifact::from_name(artifact.name()), Some(artifact));
        }
        assert_eq!(Artifact::from_name("jpeg"), None);
    }
}
