//! Batches of images described by a manifest.
//!
//! A package directory looks like:
//!
//! ```text
//! <dir>/
//! ├── image03.txt      # tab-separated: header row, description row, data rows
//! └── image03/
//!     └── <image_file> # one source per row
//! ```
//!
//! Headers have `.` replaced by `_`. A table-backed package reads the same
//! columns from any [`TableSource`]; there `image_file` is a full locator.
//!
//! Rows are independent: a row without `image_file`, with the wrong number
//! of columns, or whose image cannot be constructed is reported as a
//! [`RowError`] and the rest of the batch still loads. Only a missing
//! manifest (or table) fails the whole load.

use crate::config::effective_threads;
use crate::derive::Artifact;
use crate::metadata::{MetadataRecord, MetadataSource};
use crate::object::{ImageError, ImageObject, ImageOptions};
use crate::source::{RemoteAccess, S3Store};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const MANIFEST_FILENAME: &str = "image03.txt";
pub const IMAGE_DIR: &str = "image03";
pub const DEFAULT_TABLE: &str = "image03";

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("cannot build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// One manifest row, keyed by normalized header.
pub type Row = BTreeMap<String, String>;

/// A rejected row. Rows are numbered from 1, counting data rows only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("row {row}: {reason}")]
pub struct RowError {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Manifest {
    pub headers: Vec<String>,
    pub rows: Vec<(usize, Result<Row, RowError>)>,
}

/// Parse tab-separated manifest bytes.
///
/// The first line holds the headers and the second a free-text description,
/// which is skipped even when blank. Blank data lines are ignored and
/// surrounding quotes are removed. Data lines are decoded one by one, so a
/// stray non-UTF-8 byte only affects its own row.
pub fn parse_manifest(data: impl AsRef<[u8]>) -> Manifest {
    let mut lines = data.as_ref().split(|&b| b == b'\n');
    let Some(header_line) = lines.next().filter(|l| !is_blank(l)) else {
        return Manifest::default();
    };
    let headers: Vec<String> = split_row(&String::from_utf8_lossy(header_line))
        .into_iter()
        .map(|h| h.replace('.', "_"))
        .collect();
    let _description = lines.next();

    let rows = lines
        .filter(|l| !is_blank(l))
        .enumerate()
        .map(|(i, raw)| {
            let number = i + 1;
            let line = String::from_utf8_lossy(raw);
            if let Cow::Owned(_) = line {
                warn!(row = number, "manifest row is not valid UTF-8, decoding lossily");
            }
            let values = split_row(&line);
            if values.len() != headers.len() {
                return (
                    number,
                    Err(RowError {
                        row: number,
                        reason: format!("expected {} columns, found {}", headers.len(), values.len()),
                    }),
                );
            }
            (number, Ok(headers.iter().cloned().zip(values).collect()))
        })
        .collect();
    Manifest { headers, rows }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn split_row(line: &str) -> Vec<String> {
    line.trim_end_matches(['\r', '\n'])
        .split('\t')
        .map(|v| {
            let v = v.trim();
            v.strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(v)
                .to_string()
        })
        .collect()
}

// =============================================================================
// Table sources
// =============================================================================

/// Tabular rows from some backing store.
pub trait TableSource {
    fn rows(&self) -> Result<Vec<Row>, PackageError>;
}

/// `SELECT * FROM <table>` on a SQLite database, column names lowercased.
pub struct SqliteTable {
    path: PathBuf,
    table: String,
}

impl SqliteTable {
    pub fn new(path: &Path, table: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            table: table.to_string(),
        }
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.path.display(), self.table)
    }
}

impl TableSource for SqliteTable {
    fn rows(&self) -> Result<Vec<Row>, PackageError> {
        if !self.path.is_file() {
            return Err(PackageError::ManifestNotFound(self.describe()));
        }
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let tables: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [&self.table],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(PackageError::ManifestNotFound(self.describe()));
        }

        let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", self.table.replace('"', "\"\"")))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_lowercase()).collect();
        let rows = stmt.query_map([], |row| {
            let mut values = Row::new();
            for (i, column) in columns.iter().enumerate() {
                let value: Value = row.get(i)?;
                values.insert(column.clone(), value_text(value));
            }
            Ok(values)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn value_text(value: Value) -> String {
    match value {
        Value::Null | Value::Blob(_) => String::new(),
        Value::Integer(v) => v.to_string(),
        Value::Real(v) => v.to_string(),
        Value::Text(v) => v,
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Builds [`Package`]s; every image gets a copy of the template options with
/// the row as its supplied metadata.
pub struct PackageLoader {
    options: ImageOptions,
    workers: usize,
}

impl PackageLoader {
    pub fn new(options: ImageOptions) -> Self {
        let workers = effective_threads(&options.config.processing);
        Self { options, workers }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn load_dir(&self, dir: &Path) -> Result<Package, PackageError> {
        let manifest_path = dir.join(MANIFEST_FILENAME);
        let bytes = match fs::read(&manifest_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PackageError::ManifestNotFound(manifest_path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let manifest = parse_manifest(&bytes);
        let image_dir = dir.join(IMAGE_DIR);
        info!(manifest = %manifest_path.display(), rows = manifest.rows.len(), "loading package");
        self.build(manifest.rows, |file| image_dir.join(file).to_string_lossy().into_owned())
    }

    pub fn load_table(&self, table: &dyn TableSource) -> Result<Package, PackageError> {
        let rows = table
            .rows()?
            .into_iter()
            .enumerate()
            .map(|(i, row)| (i + 1, Ok(row)))
            .collect();
        self.build(rows, str::to_string)
    }

    /// Template options with one store shared by every remote row.
    fn shared_options(&self) -> Result<ImageOptions, PackageError> {
        let mut options = self.options.clone();
        if let RemoteAccess::Credentials(credentials) = &self.options.remote {
            let store = S3Store::new(&self.options.config.remote, credentials.clone())
                .map_err(ImageError::from)?;
            options.remote = RemoteAccess::Store(Arc::new(store));
        }
        Ok(options)
    }

    fn build(
        &self,
        rows: Vec<(usize, Result<Row, RowError>)>,
        locate: impl Fn(&str) -> String + Sync + Send,
    ) -> Result<Package, PackageError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("imgbundle-{i}"))
            .build()?;
        let options = self.shared_options()?;

        let results: Vec<Result<ImageObject, RowError>> = pool.install(|| {
            rows.into_par_iter()
                .map(|(number, row)| image_for_row(number, row?, &options, &locate))
                .collect()
        });

        let mut images = Vec::new();
        let mut rejected = Vec::new();
        for result in results {
            match result {
                Ok(image) => images.push(image),
                Err(e) => {
                    warn!(row = e.row, reason = %e.reason, "rejected manifest row");
                    rejected.push(e);
                }
            }
        }
        info!(images = images.len(), rejected = rejected.len(), "package loaded");
        Ok(Package {
            images,
            rejected,
            pool,
        })
    }
}

fn image_for_row(
    number: usize,
    row: Row,
    template: &ImageOptions,
    locate: &(impl Fn(&str) -> String + Sync),
) -> Result<ImageObject, RowError> {
    let reject = |reason: String| RowError { row: number, reason };
    let file = row
        .get("image_file")
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .ok_or_else(|| reject("missing image_file".to_string()))?;

    let mut options = template.clone();
    options.metadata = MetadataSource::Supplied(MetadataRecord::from_supplied(&row));
    ImageObject::new(&locate(file), options).map_err(|e| reject(e.to_string()))
}

/// Loaded images plus the rows that were rejected.
pub struct Package {
    images: Vec<ImageObject>,
    rejected: Vec<RowError>,
    pool: ThreadPool,
}

impl Package {
    pub fn images(&self) -> &[ImageObject] {
        &self.images
    }

    pub fn rejected(&self) -> &[RowError] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Derive one artifact for every image on the package's pool.
    /// Results are in image order.
    pub fn derive_all(&self, artifact: Artifact) -> Vec<Result<PathBuf, ImageError>> {
        self.pool.install(|| {
            self.images
                .par_iter()
                .map(|image| image.artifact(artifact))
                .collect()
        })
    }

    pub fn release_all(&self) {
        for image in &self.images {
            image.release();
        }
    }
}
