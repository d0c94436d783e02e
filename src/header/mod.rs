//! Minimal header readers for metadata extraction.
//!
//! Neither reader decodes pixel data. Both are deliberately narrow: the
//! NIfTI reader decodes dimensions, voxel sizes and units; the DICOM reader
//! walks top-level data elements and keeps their raw values for lookup.

pub mod dicom;
pub mod nifti;

pub use dicom::{DicomHeader, read_dicom_header};
pub use nifti::{NiftiHeader, read_nifti_header};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed header: {0}")]
    Malformed(String),
    #[error("unsupported encoding: {0}")]
    Unsupported(String),
}
