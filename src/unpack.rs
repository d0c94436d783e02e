//! Fetch a source into a workspace and classify its members.
//!
//! The fetched file keeps the source's base name under `source/`.
//! A `.zip` source is expanded into `unpacked/`; anything else is linked
//! there under its base name. Every regular file under `unpacked/` is then
//! classified by name and content.

use crate::classify::{FileSet, classify};
use crate::source::{Source, SourceError, link_file};
use crate::workspace::Workspace;
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Base name used when a locator has no usable final component.
const FALLBACK_NAME: &str = "source";

#[derive(Error, Debug)]
pub enum UnpackError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("cannot expand archive {name}: {source}")]
    Archive {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Fetch, expand and classify `source` inside `workspace`.
pub fn unpack(source: &dyn Source, workspace: &Workspace) -> Result<FileSet, UnpackError> {
    let locator = source.locator();
    let name = locator
        .base_name()
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    let fetched = workspace.fetched_path(&name);
    source.fetch(&fetched)?;
    debug!(%locator, path = %fetched.display(), "fetched source");

    let unpacked = workspace.unpacked_dir();
    if locator.is_archive() {
        expand_zip(&fetched, &unpacked).map_err(|source| UnpackError::Archive {
            name: name.clone(),
            source,
        })?;
    } else {
        link_file(&fetched, &workspace.member_path(&name))?;
    }

    let mut classified = Vec::new();
    for entry in WalkDir::new(&unpacked).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        // Links made by `link_file` count as members.
        if !(entry.file_type().is_file() || entry.path_is_symlink()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&unpacked) else {
            continue;
        };
        let member = relative_name(relative);
        let category = classify(entry.path())?;
        classified.push((member, category));
    }

    let files = FileSet::from_classified(classified);
    info!(
        %locator,
        members = files.member_count(),
        dominant = ?files.dominant(),
        "classified source"
    );
    Ok(files)
}

fn expand_zip(archive: &Path, dest: &Path) -> Result<(), zip::result::ZipError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    zip.extract(dest)
}

/// Member names always use `/`, whatever the platform separator.
fn relative_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
