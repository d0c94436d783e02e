//! Source locators and fetching.
//!
//! A source is either a local path or a `scheme://bucket/key` remote object.
//! Both implement the [`Source`] capability: an existence check that never
//! fetches, and a fetch that materializes the source as one file inside a
//! workspace.
//!
//! | Locator | Implementation | Fetch |
//! |---------|----------------|-------|
//! | `/data/t1.nii.gz` | [`LocalSource`] | link (the original is never moved) |
//! | `s3://bucket/key` | [`RemoteSource`] | download through an [`ObjectStore`] |

mod local;
mod remote;
mod s3;

pub use local::{LocalSource, link_file};
pub use remote::{ObjectStore, RemoteSource};
pub use s3::{Credentials, S3Store};

#[cfg(test)]
pub use remote::tests::MemoryStore;

use crate::config::RemoteConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("invalid source locator: {0}")]
    InvalidLocator(String),
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("transport error for {locator}: {message}")]
    Transport { locator: String, message: String },
    #[error("access denied for {locator}: {message}")]
    Credentials { locator: String, message: String },
    #[error("remote locator {0} needs an access key pair")]
    MissingCredentials(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a source lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Local(PathBuf),
    Remote {
        scheme: String,
        bucket: String,
        key: String,
    },
}

impl SourceLocator {
    /// Parse a locator. Anything without `://` is a local path.
    pub fn parse(raw: &str) -> Result<Self, SourceError> {
        let Some((scheme, rest)) = raw.split_once("://") else {
            if raw.is_empty() {
                return Err(SourceError::InvalidLocator(raw.to_string()));
            }
            return Ok(SourceLocator::Local(PathBuf::from(raw)));
        };

        let valid_scheme = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if !valid_scheme || bucket.is_empty() || key.is_empty() || key.ends_with('/') {
            return Err(SourceError::InvalidLocator(raw.to_string()));
        }
        Ok(SourceLocator::Remote {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// The name the fetched file gets inside the workspace.
    pub fn base_name(&self) -> Option<String> {
        match self {
            SourceLocator::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string()),
            SourceLocator::Remote { key, .. } => key
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        }
    }

    /// Archives are recognized by their `.zip` suffix.
    pub fn is_archive(&self) -> bool {
        self.base_name()
            .map(|n| n.ends_with(".zip"))
            .unwrap_or(false)
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SourceLocator::Remote { .. })
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Local(path) => write!(f, "{}", path.display()),
            SourceLocator::Remote {
                scheme,
                bucket,
                key,
            } => write!(f, "{scheme}://{bucket}/{key}"),
        }
    }
}

/// The fetch capability shared by local and remote sources.
pub trait Source: Send + Sync {
    fn locator(&self) -> &SourceLocator;

    /// Whether the source exists. Absence is `Ok(false)`; transport and
    /// credential problems are errors.
    fn exists(&self) -> Result<bool, SourceError>;

    /// Materialize the source as the file `dest`.
    fn fetch(&self, dest: &Path) -> Result<(), SourceError>;
}

/// How remote locators are reached.
#[derive(Clone, Default)]
pub enum RemoteAccess {
    /// No remote access configured; remote locators are rejected.
    #[default]
    None,
    /// Build an [`S3Store`] from these credentials for `s3://` locators.
    Credentials(Credentials),
    /// Use an existing store for any scheme.
    Store(Arc<dyn ObjectStore>),
}

impl fmt::Debug for RemoteAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteAccess::None => f.write_str("None"),
            RemoteAccess::Credentials(c) => f.debug_tuple("Credentials").field(c).finish(),
            RemoteAccess::Store(_) => f.write_str("Store(..)"),
        }
    }
}

/// Select the implementation for a locator.
pub fn open_source(
    locator: SourceLocator,
    access: &RemoteAccess,
    remote: &RemoteConfig,
) -> Result<Box<dyn Source>, SourceError> {
    match locator {
        SourceLocator::Local(path) => Ok(Box::new(LocalSource::new(&path)?)),
        SourceLocator::Remote {
            ref scheme,
            ref bucket,
            ref key,
        } => {
            let store: Arc<dyn ObjectStore> = match access {
                RemoteAccess::Store(store) => Arc::clone(store),
                RemoteAccess::Credentials(credentials) if scheme == "s3" => {
                    Arc::new(S3Store::new(remote, credentials.clone())?)
                }
                RemoteAccess::Credentials(_) => {
                    return Err(SourceError::InvalidLocator(format!(
                        "unsupported scheme {scheme}:// in {locator}"
                    )));
                }
                RemoteAccess::None => {
                    return Err(SourceError::MissingCredentials(locator.to_string()));
                }
            };
            let (bucket, key) = (bucket.clone(), key.clone());
            Ok(Box::new(RemoteSource::new(locator, bucket, key, store)))
        }
    }
}
