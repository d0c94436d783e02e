//! # imgbundle
//!
//! Imaging study objects with lazily derived artifacts. A source (a local
//! file, a `.zip` of files, or a remote object) is classified by member name
//! and content, and derived volumes, descriptors and thumbnails are produced
//! on first request by external converters inside a disposable workspace.
//!
//! # Pipeline
//!
//! ```text
//! 1. Fetch     locator   →  <workspace>/source/      (local link or download)
//! 2. Unpack    source    →  <workspace>/unpacked/    (zip extraction or link)
//! 3. Classify  members   →  FileSet                  (name rules, DICOM magic)
//! 4. Derive    FileSet   →  <workspace>/image.*      (memoized per artifact)
//! ```
//!
//! Nothing runs until it is asked for. Each stage's result is memoized in the
//! current workspace generation; [`object::ImageObject::release`] drops the
//! generation and the next access starts over in a fresh workspace.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`object`] | `ImageObject`: generation lifecycle, accessors, metadata |
//! | [`derive`] | Artifact slots and derivation rules |
//! | [`classify`] | Format categories and the `FileSet` of classified members |
//! | [`unpack`] | Fetch, zip extraction and member discovery |
//! | [`source`] | Locators, local files and remote object stores |
//! | [`workspace`] | Scratch directory with `source/`, `unpacked/` and `logs/` |
//! | [`tools`] | External command descriptions, runners and the configured toolbox |
//! | [`header`] | Minimal NIfTI-1 and DICOM header readers |
//! | [`metadata`] | The 63-field image record and extraction by inspection |
//! | [`package`] | Package manifests and SQLite tables loaded into image objects |
//! | [`config`] | `config.toml` loading, merging and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Failures
//!
//! A derivation failure is memoized like a success: asking again returns the
//! same error without rerunning the tool. Failures that name a missing
//! prerequisite carry the prerequisite's own failure as a chain. Problems with
//! the environment (a converter that cannot be started) are not memoized.

pub mod classify;
pub mod config;
pub mod derive;
pub mod header;
pub mod metadata;
pub mod object;
pub mod output;
pub mod package;
pub mod source;
pub mod tools;
pub mod unpack;
pub mod workspace;

pub use derive::Artifact;
pub use object::{ImageError, ImageObject, ImageOptions};

#[cfg(test)]
pub(crate) mod test_helpers;
