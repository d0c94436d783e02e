//! The image object: one source, one workspace generation at a time.
//!
//! ```text
//!   ImageObject::new ──► (no workspace)
//!        │ first files()/artifact()/metadata extraction
//!        ▼
//!   Generation { workspace, files slot, artifact slots }
//!        │ release()
//!        ▼
//!   (no workspace) ──► next access builds a fresh generation
//! ```
//!
//! Accessors take a shared lock on the current generation for the whole
//! call, so [`ImageObject::release`] waits for in-flight derivations and the
//! next access never sees a half-torn-down workspace. Paths handed out are
//! valid until the next release.

use crate::classify::FileSet;
use crate::config::BundleConfig;
use crate::derive::{Artifact, ArtifactCache, DeriveContext, Failure, Location, Slot, SlotState};
use crate::metadata::{self, MetadataRecord, MetadataSource};
use crate::source::{RemoteAccess, Source, SourceError, SourceLocator, open_source};
use crate::tools::{SystemRunner, ToolError, ToolRunner, Toolbox};
use crate::unpack::{UnpackError, unpack};
use crate::workspace::Workspace;
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone)]
pub enum ImageError {
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("source error: {0}")]
    Source(#[source] Arc<SourceError>),
    #[error(transparent)]
    Derivation(#[from] Failure),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("workspace error while {context}: {source}")]
    Workspace {
        context: &'static str,
        #[source]
        source: Arc<io::Error>,
    },
}

impl ImageError {
    fn workspace(context: &'static str, source: io::Error) -> Self {
        ImageError::Workspace {
            context,
            source: Arc::new(source),
        }
    }

    /// Whether the error is a final outcome for the current generation.
    /// Environment errors are not: installing the tool fixes them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ImageError::Tool(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ImageError::NotFound(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ImageError::Derivation(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<SourceError> for ImageError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::NotFound(locator) => ImageError::NotFound(locator),
            other => ImageError::Source(Arc::new(other)),
        }
    }
}

impl From<UnpackError> for ImageError {
    fn from(e: UnpackError) -> Self {
        match e {
            UnpackError::Source(e) => e.into(),
            UnpackError::Archive { name, source } => ImageError::workspace(
                "expanding the archive",
                io::Error::new(io::ErrorKind::InvalidData, format!("{name}: {source}")),
            ),
            UnpackError::Io(e) => ImageError::workspace("classifying members", e),
        }
    }
}

/// Construction options. The defaults run real tools with stock programs,
/// reject remote locators and leave metadata absent.
#[derive(Clone)]
pub struct ImageOptions {
    pub config: Arc<BundleConfig>,
    pub runner: Arc<dyn ToolRunner>,
    pub remote: RemoteAccess,
    pub metadata: MetadataSource,
    /// Fail construction with [`ImageError::NotFound`] when the source is absent.
    pub check_existence: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            config: Arc::new(BundleConfig::default()),
            runner: Arc::new(SystemRunner),
            remote: RemoteAccess::None,
            metadata: MetadataSource::None,
            check_existence: false,
        }
    }
}

/// Everything bound to one workspace.
struct Generation {
    workspace: Workspace,
    files: Slot<Arc<FileSet>>,
    artifacts: ArtifactCache,
}

pub struct ImageObject {
    source: Box<dyn Source>,
    config: Arc<BundleConfig>,
    runner: Arc<dyn ToolRunner>,
    extract_on_demand: bool,
    metadata: Mutex<Option<MetadataRecord>>,
    generation: RwLock<Option<Generation>>,
    generations: AtomicUsize,
}

impl ImageObject {
    /// Open a source with default options.
    pub fn open(locator: &str) -> Result<Self, ImageError> {
        Self::new(locator, ImageOptions::default())
    }

    pub fn new(locator: &str, options: ImageOptions) -> Result<Self, ImageError> {
        let locator = SourceLocator::parse(locator)?;
        let source = open_source(locator, &options.remote, &options.config.remote)?;
        Self::from_source(source, options)
    }

    /// Wrap an already-opened source. `options.remote` is ignored.
    pub fn from_source(source: Box<dyn Source>, options: ImageOptions) -> Result<Self, ImageError> {
        if options.check_existence && !source.exists()? {
            return Err(ImageError::NotFound(source.locator().to_string()));
        }
        let (extract_on_demand, metadata) = match options.metadata {
            MetadataSource::None => (false, Some(MetadataRecord::empty())),
            MetadataSource::Supplied(record) => (false, Some(record)),
            MetadataSource::Extract => (true, None),
        };
        debug!(source = %source.locator(), "image object created");
        Ok(Self {
            source,
            config: options.config,
            runner: options.runner,
            extract_on_demand,
            metadata: Mutex::new(metadata),
            generation: RwLock::new(None),
            generations: AtomicUsize::new(0),
        })
    }

    pub fn locator(&self) -> &SourceLocator {
        self.source.locator()
    }

    /// Check the source without fetching it.
    pub fn exists(&self) -> Result<bool, ImageError> {
        Ok(self.source.exists()?)
    }

    /// Shared access to the current generation, creating one if needed.
    fn session(&self) -> Result<MappedRwLockReadGuard<'_, Generation>, ImageError> {
        loop {
            if let Ok(generation) = RwLockReadGuard::try_map(self.generation.read_recursive(), Option::as_ref) {
                return Ok(generation);
            }
            let mut slot = self.generation.write();
            if slot.is_none() {
                let workspace = Workspace::acquire(&self.config.workspace)
                    .map_err(|e| ImageError::workspace("acquiring the workspace", e))?;
                self.generations.fetch_add(1, Ordering::Relaxed);
                *slot = Some(Generation {
                    workspace,
                    files: Slot::default(),
                    artifacts: ArtifactCache::default(),
                });
            }
        }
    }

    fn files_in(&self, generation: &Generation) -> Result<Arc<FileSet>, ImageError> {
        generation
            .files
            .get_or_compute(|| Ok(Arc::new(unpack(self.source.as_ref(), &generation.workspace)?)))
    }

    fn artifact_in(&self, generation: &Generation, artifact: Artifact) -> Result<PathBuf, ImageError> {
        let files = self.files_in(generation)?;
        let ctx = DeriveContext {
            workspace: &generation.workspace,
            files: &files,
            toolbox: Toolbox::new(self.runner.as_ref(), &self.config.tools, &generation.workspace),
        };
        let location = generation.artifacts.resolve(artifact, &ctx)?;
        Ok(location.resolve(&generation.workspace))
    }

    /// The classified members. Fetches and expands the source on first use.
    pub fn files(&self) -> Result<Arc<FileSet>, ImageError> {
        let generation = self.session()?;
        self.files_in(&generation)
    }

    /// Root of the current workspace, creating it if needed.
    pub fn workspace_root(&self) -> Result<PathBuf, ImageError> {
        Ok(self.session()?.workspace.root().to_path_buf())
    }

    /// Path of a member as listed in [`ImageObject::files`].
    pub fn member_path(&self, name: &str) -> Result<PathBuf, ImageError> {
        let generation = self.session()?;
        self.files_in(&generation)?;
        Ok(generation.workspace.member_path(name))
    }

    /// Derive (or return the memoized) artifact.
    pub fn artifact(&self, artifact: Artifact) -> Result<PathBuf, ImageError> {
        let generation = self.session()?;
        self.artifact_in(&generation, artifact)
    }

    pub fn canonical_volume(&self) -> Result<PathBuf, ImageError> {
        self.artifact(Artifact::CanonicalVolume)
    }

    pub fn compressed_volume(&self) -> Result<PathBuf, ImageError> {
        self.artifact(Artifact::CompressedVolume)
    }

    /// AFNI dataset prefix; `.HEAD` and `.BRIK` sit beside it.
    pub fn afni_volume(&self) -> Result<PathBuf, ImageError> {
        self.artifact(Artifact::AfniVolume)
    }

    pub fn nrrd_volume(&self) -> Result<PathBuf, ImageError> {
        self.artifact(Artifact::NrrdVolume)
    }

    pub fn descriptor(&self) -> Result<PathBuf, ImageError> {
        self.artifact(Artifact::Descriptor)
    }

    pub fn thumbnail(&self) -> Result<PathBuf, ImageError> {
        self.artifact(Artifact::Thumbnail)
    }

    /// Inspect a slot without computing it.
    pub fn slot_state(&self, artifact: Artifact) -> SlotState<PathBuf> {
        match &*self.generation.read_recursive() {
            Some(generation) => generation
                .artifacts
                .state(artifact)
                .map(|location: Location| location.resolve(&generation.workspace)),
            None => SlotState::Unset,
        }
    }

    pub fn files_state(&self) -> SlotState<Arc<FileSet>> {
        match &*self.generation.read_recursive() {
            Some(generation) => generation.files.state(),
            None => SlotState::Unset,
        }
    }

    /// The metadata record. In extract mode the first call inspects the
    /// source; later calls return the stored record.
    pub fn metadata(&self) -> Result<MetadataRecord, ImageError> {
        let stored = self.metadata.lock().clone();
        match stored {
            Some(record) => Ok(record),
            None if self.extract_on_demand => self.extract_metadata(),
            None => Ok(MetadataRecord::empty()),
        }
    }

    /// Replace the record with one built by inspection.
    pub fn extract_metadata(&self) -> Result<MetadataRecord, ImageError> {
        let generation = self.session()?;
        let files = self.files_in(&generation)?;
        let record = metadata::extract(
            &files,
            |name| generation.workspace.member_path(name),
            || match self.artifact_in(&generation, Artifact::CanonicalVolume) {
                Ok(path) => Ok(Some(path)),
                Err(ImageError::Derivation(failure)) => {
                    debug!(%failure, "volume fields unavailable");
                    Ok(None)
                }
                Err(other) => Err(other),
            },
        )?;
        *self.metadata.lock() = Some(record.clone());
        Ok(record)
    }

    /// Tear down the current workspace and forget every derived artifact.
    /// Idempotent; the next access starts a fresh generation.
    pub fn release(&self) {
        let mut slot = self.generation.write();
        if let Some(mut generation) = slot.take() {
            generation.workspace.release();
            info!(source = %self.source.locator(), "image released");
        }
    }

    /// Whether a workspace currently exists.
    pub fn is_acquired(&self) -> bool {
        self.generation.read_recursive().is_some()
    }

    /// How many workspaces this object has created so far.
    pub fn generation_count(&self) -> usize {
        self.generations.load(Ordering::Relaxed)
    }
}
