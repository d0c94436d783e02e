//! Shared test utilities for the imgbundle test suite.
//!
//! Byte-level builders for the formats the crate sniffs and parses, plus
//! small writers that put them on disk.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let bytes = dicom_bytes(&[DicomElement::text((0x0008, 0x0060), "CS", "MR")]);
//! write_nifti(&tmp.path().join("t1.nii.gz"), &[64, 64, 30], &[1.0, 1.0, 1.2], 2);
//! write_zip(&tmp.path().join("series.zip"), &[("IM1", &bytes)]);
//! ```

use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::io::Write;
use std::path::Path;

pub const EXPLICIT_LE: &str = "1.2.840.10008.1.2.1";
pub const IMPLICIT_LE: &str = "1.2.840.10008.1.2";

// =============================================================================
// DICOM
// =============================================================================

/// One data element for [`dicom_bytes`].
#[derive(Debug, Clone)]
pub struct DicomElement {
    pub tag: (u16, u16),
    pub vr: [u8; 2],
    pub value: Vec<u8>,
    /// Items of an undefined-length sequence (`vr == SQ`).
    pub items: Vec<DicomElement>,
}

impl DicomElement {
    /// A string element, padded to even length.
    pub fn text(tag: (u16, u16), vr: &str, value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        if bytes.len() % 2 == 1 {
            bytes.push(if vr == "UI" { 0 } else { b' ' });
        }
        Self {
            tag,
            vr: vr_bytes(vr),
            value: bytes,
            items: Vec::new(),
        }
    }

    pub fn us(tag: (u16, u16), values: &[u16]) -> Self {
        Self {
            tag,
            vr: *b"US",
            value: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            items: Vec::new(),
        }
    }

    /// A sequence with undefined length holding one item of `items`.
    pub fn undefined_sequence(tag: (u16, u16), items: Vec<DicomElement>) -> Self {
        Self {
            tag,
            vr: *b"SQ",
            value: Vec::new(),
            items,
        }
    }

    fn encode(&self, out: &mut Vec<u8>, explicit: bool) {
        out.extend_from_slice(&self.tag.0.to_le_bytes());
        out.extend_from_slice(&self.tag.1.to_le_bytes());
        let sequence = &self.vr == b"SQ";
        let long = matches!(&self.vr, b"OB" | b"OW" | b"SQ" | b"UN" | b"UT");
        let length = if sequence {
            u32::MAX
        } else {
            self.value.len() as u32
        };
        if explicit {
            out.extend_from_slice(&self.vr);
            if long {
                out.extend_from_slice(&[0, 0]);
                out.extend_from_slice(&length.to_le_bytes());
            } else {
                out.extend_from_slice(&(length as u16).to_le_bytes());
            }
        } else {
            out.extend_from_slice(&length.to_le_bytes());
        }

        if sequence {
            // Item (FFFE,E000), undefined length.
            out.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF]);
            for item in &self.items {
                item.encode(out, explicit);
            }
            // Item delimiter (FFFE,E00D) then sequence delimiter (FFFE,E0DD).
            out.extend_from_slice(&[0xFE, 0xFF, 0x0D, 0xE0, 0, 0, 0, 0]);
            out.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0, 0, 0, 0, 0]);
        } else {
            out.extend_from_slice(&self.value);
        }
    }
}

fn vr_bytes(vr: &str) -> [u8; 2] {
    let bytes = vr.as_bytes();
    [bytes[0], bytes[1]]
}

fn dicom_with_syntax(elements: &[DicomElement], transfer_syntax: &str) -> Vec<u8> {
    let mut out = vec![0u8; 128];
    out.extend_from_slice(b"DICM");
    DicomElement::text((0x0002, 0x0010), "UI", transfer_syntax).encode(&mut out, true);
    let explicit = transfer_syntax != IMPLICIT_LE;
    for element in elements {
        element.encode(&mut out, explicit);
    }
    out
}

/// A Part 10 file in explicit VR little endian.
pub fn dicom_bytes(elements: &[DicomElement]) -> Vec<u8> {
    dicom_with_syntax(elements, EXPLICIT_LE)
}

/// A Part 10 file whose data set is implicit VR little endian.
pub fn dicom_bytes_implicit(elements: &[DicomElement]) -> Vec<u8> {
    dicom_with_syntax(elements, IMPLICIT_LE)
}

pub fn write_dicom(path: &Path, elements: &[DicomElement]) {
    fs::write(path, dicom_bytes(elements)).unwrap();
}

/// A minimal MR slice: preamble, marker and a modality element.
pub fn write_fake_dicom(path: &Path) {
    write_dicom(path, &[DicomElement::text((0x0008, 0x0060), "CS", "MR")]);
}

// =============================================================================
// NIfTI-1
// =============================================================================

/// A little-endian single-file (`n+1`) header with the given extents,
/// voxel sizes and `xyzt_units` code, followed by the 4-byte extension flag.
pub fn nifti_header_bytes(dims: &[u16], pixdim: &[f32], units: u8) -> Vec<u8> {
    let mut bytes = vec![0u8; 352];
    bytes[0..4].copy_from_slice(&348i32.to_le_bytes());
    bytes[40..42].copy_from_slice(&(dims.len() as i16).to_le_bytes());
    for (i, extent) in dims.iter().enumerate() {
        let at = 42 + 2 * i;
        bytes[at..at + 2].copy_from_slice(&(*extent as i16).to_le_bytes());
    }
    for (i, size) in pixdim.iter().enumerate() {
        let at = 80 + 4 * i;
        bytes[at..at + 4].copy_from_slice(&size.to_le_bytes());
    }
    bytes[123] = units;
    bytes[344..348].copy_from_slice(b"n+1\0");
    bytes
}

/// Write a header-only NIfTI file, gzipped when the name ends in `.gz`.
pub fn write_nifti(path: &Path, dims: &[u16], pixdim: &[f32], units: u8) {
    let bytes = nifti_header_bytes(dims, pixdim, units);
    if path.to_string_lossy().ends_with(".gz") {
        let mut encoder = GzEncoder::new(fs::File::create(path).unwrap(), Compression::fast());
        encoder.write_all(&bytes).unwrap();
        encoder.finish().unwrap();
    } else {
        fs::write(path, bytes).unwrap();
    }
}

// =============================================================================
// Archives and rasters
// =============================================================================

/// Write a zip archive; names may contain `/` for nested members.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = zip::ZipWriter::new(fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

pub fn write_png(path: &Path, width: u32, height: u32) {
    image::RgbImage::new(width, height).save(path).unwrap();
}

pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    image::RgbImage::new(width, height).save(path).unwrap();
}
