//! Bundle configuration.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! serialized to a TOML table and the user's file is merged on top, so a
//! config file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [workspace]
//! # root = "/scratch"       # Parent directory for workspaces (default: system temp)
//! prefix = "imgbundle-"     # Prefix of each workspace directory name
//! keep = false              # Leave workspaces on disk when objects are dropped
//!
//! [tools]
//! converter = "mri_convert"
//! resampler = "ResampleScalarVolume"
//! allow_resample = false    # Retry failed conversions with the resampler
//! afni_copier = "3dcopy"
//! dicom_describer = "dicom2bxh"
//! afni_describer = "afni2bxh"
//! nrrd_describer = "nrrd2bxh"
//! dicom_to_nrrd = "DicomToNrrdConverter"
//! thumbnail_renderer = "slicer"
//!
//! [remote]
//! endpoint = "https://s3.amazonaws.com"
//! region = "us-east-1"
//! timeout_secs = 300
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Credentials are never read from config files; callers pass them in.
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up by [`load_config`].
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration shared by every image object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundleConfig {
    /// Where and how workspaces are created.
    pub workspace: WorkspaceConfig,
    /// External program names.
    pub tools: ToolsConfig,
    /// Remote object store access.
    pub remote: RemoteConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl BundleConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace.prefix.is_empty() {
            return Err(ConfigError::Validation(
                "workspace.prefix must not be empty".into(),
            ));
        }
        for (key, program) in self.tools.programs() {
            if program.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "tools.{key} must not be empty"
                )));
            }
        }
        if self.remote.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "remote.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.remote.endpoint.is_empty() {
            return Err(ConfigError::Validation(
                "remote.endpoint must not be empty".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Parent directory for workspaces. `None` uses the system temp directory.
    pub root: Option<PathBuf>,
    pub prefix: String,
    /// Keep workspace directories when their object is dropped. An explicit
    /// release still removes them.
    pub keep: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            prefix: "imgbundle-".to_string(),
            keep: false,
        }
    }
}

/// Program names for every external tool the derivations invoke.
///
/// Values are looked up on `PATH` unless they contain a path separator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Volume converter producing the canonical NIfTI-1 volume.
    pub converter: String,
    /// Fallback converter tried when the main converter fails.
    pub resampler: String,
    /// Whether the resampler fallback is attempted at all.
    pub allow_resample: bool,
    pub afni_copier: String,
    pub dicom_describer: String,
    pub afni_describer: String,
    pub nrrd_describer: String,
    pub dicom_to_nrrd: String,
    pub thumbnail_renderer: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            converter: "mri_convert".to_string(),
            resampler: "ResampleScalarVolume".to_string(),
            allow_resample: false,
            afni_copier: "3dcopy".to_string(),
            dicom_describer: "dicom2bxh".to_string(),
            afni_describer: "afni2bxh".to_string(),
            nrrd_describer: "nrrd2bxh".to_string(),
            dicom_to_nrrd: "DicomToNrrdConverter".to_string(),
            thumbnail_renderer: "slicer".to_string(),
        }
    }
}

impl ToolsConfig {
    /// `(config key, program)` pairs, in config-file order.
    pub fn programs(&self) -> [(&'static str, &str); 8] {
        [
            ("converter", self.converter.as_str()),
            ("resampler", self.resampler.as_str()),
            ("afni_copier", self.afni_copier.as_str()),
            ("dicom_describer", self.dicom_describer.as_str()),
            ("afni_describer", self.afni_describer.as_str()),
            ("nrrd_describer", self.nrrd_describer.as_str()),
            ("dicom_to_nrrd", self.dicom_to_nrrd.as_str()),
            ("thumbnail_renderer", self.thumbnail_renderer.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Base URL of the object store. Buckets are addressed path-style.
    pub endpoint: String,
    pub region: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://s3.amazonaws.com".to_string(),
            region: "us-east-1".to_string(),
            timeout_secs: 300,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers for package loading.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(BundleConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config does not serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// Tables merge key-by-key; any other overlay value replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a TOML file as a raw value. `Ok(None)` when the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<BundleConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: BundleConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load `config.toml` from the given directory, falling back to defaults.
pub fn load_config(dir: &Path) -> Result<BundleConfig, ConfigError> {
    resolve_config(load_raw_config(&dir.join(CONFIG_FILENAME))?)
}

/// Load an explicitly named config file. A missing file is an error here.
pub fn load_config_file(path: &Path) -> Result<BundleConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imgbundle configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# ---------------------------------------------------------------------------
# Workspaces
# ---------------------------------------------------------------------------
# Every image object owns one disposable directory. Archives are expanded
# into <workspace>/unpacked/, tool output is captured in <workspace>/logs/.
[workspace]
# Parent directory for workspaces. Defaults to the system temp directory.
# root = "/scratch/imgbundle"
prefix = "imgbundle-"
# Leave workspaces on disk after the object goes away (debugging aid).
keep = false

# ---------------------------------------------------------------------------
# External programs
# ---------------------------------------------------------------------------
# Plain names are resolved on PATH.
[tools]
# Produces the canonical NIfTI-1 volume from DICOM, MINC, AFNI or NRRD.
converter = "mri_convert"
# Fallback converter, used only when allow_resample = true.
resampler = "ResampleScalarVolume"
allow_resample = false
# Writes the AFNI head/data pair.
afni_copier = "3dcopy"
# XCEDE descriptor writers, one per source format.
dicom_describer = "dicom2bxh"
afni_describer = "afni2bxh"
nrrd_describer = "nrrd2bxh"
dicom_to_nrrd = "DicomToNrrdConverter"
# Renders thumbnail.png from the canonical volume.
thumbnail_renderer = "slicer"

# ---------------------------------------------------------------------------
# Remote sources (s3://bucket/key)
# ---------------------------------------------------------------------------
# Credentials are never read from this file; pass them on the command line.
[remote]
endpoint = "https://s3.amazonaws.com"
region = "us-east-1"
timeout_secs = 300

# ---------------------------------------------------------------------------
# Parallel processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for package loading. Omit for auto (= CPU cores).
# Values above the core count are clamped down.
# max_processes = 4
"##
}
