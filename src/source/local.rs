use super::{Source, SourceError, SourceLocator};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file on the local filesystem, referenced by absolute path.
#[derive(Debug)]
pub struct LocalSource {
    locator: SourceLocator,
    path: PathBuf,
}

impl LocalSource {
    pub fn new(path: &Path) -> io::Result<Self> {
        let path = std::path::absolute(path)?;
        Ok(Self {
            locator: SourceLocator::Local(path.clone()),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for LocalSource {
    fn locator(&self) -> &SourceLocator {
        &self.locator
    }

    fn exists(&self) -> Result<bool, SourceError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn fetch(&self, dest: &Path) -> Result<(), SourceError> {
        if !self.exists()? {
            return Err(SourceError::NotFound(self.locator.to_string()));
        }
        link_file(&self.path, dest)?;
        debug!(source = %self.path.display(), dest = %dest.display(), "linked local source");
        Ok(())
    }
}

/// Make `src` available at `dest` without touching `src`.
#[cfg(unix)]
pub fn link_file(src: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dest)
}

/// Make `src` available at `dest` without touching `src`.
#[cfg(not(unix))]
pub fn link_file(src: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(src, dest).map(|_| ())
}
