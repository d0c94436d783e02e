//! Minimal NIfTI-1 header reader.
//!
//! Only the fields metadata extraction needs are decoded:
//!
//! | Offset | Field | Type |
//! |--------|-------|------|
//! | 0 | `sizeof_hdr` (must be 348, also detects byte order) | i32 |
//! | 40 | `dim[8]` | i16 × 8 |
//! | 76 | `pixdim[8]` | f32 × 8 |
//! | 123 | `xyzt_units` | u8 |
//! | 344 | `magic` (`n+1\0` or `ni1\0`) | 4 bytes |
//!
//! Gzip-compressed files are detected by their magic bytes, not their name.

use super::HeaderError;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

pub const HEADER_SIZE: usize = 348;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    /// Extent of each dimension; `len()` is the number of dimensions.
    pub dims: Vec<u16>,
    /// Voxel size per dimension, aligned with `dims`.
    pub pixdim: Vec<f32>,
    pub spatial_unit: Option<SpatialUnit>,
    pub temporal_unit: Option<TemporalUnit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialUnit {
    Meters,
    Millimeters,
    Micrometers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalUnit {
    Seconds,
    Milliseconds,
    Microseconds,
}

impl SpatialUnit {
    fn from_code(units: u8) -> Option<Self> {
        match units & 0x07 {
            1 => Some(SpatialUnit::Meters),
            2 => Some(SpatialUnit::Millimeters),
            3 => Some(SpatialUnit::Micrometers),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpatialUnit::Meters => "Meters",
            SpatialUnit::Millimeters => "Millimeters",
            SpatialUnit::Micrometers => "Micrometers",
        }
    }
}

impl TemporalUnit {
    fn from_code(units: u8) -> Option<Self> {
        match units & 0x38 {
            8 => Some(TemporalUnit::Seconds),
            16 => Some(TemporalUnit::Milliseconds),
            24 => Some(TemporalUnit::Microseconds),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TemporalUnit::Seconds => "Seconds",
            TemporalUnit::Milliseconds => "Milliseconds",
            TemporalUnit::Microseconds => "Microseconds",
        }
    }
}

/// Read the header of a `.nii` or `.nii.gz` file.
pub fn read_nifti_header(path: &Path) -> Result<NiftiHeader, HeaderError> {
    let mut file = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 2];
    file.read_exact(&mut magic)?;
    let mut stream = Cursor::new(magic).chain(file);

    let mut bytes = [0u8; HEADER_SIZE];
    if magic == GZIP_MAGIC {
        GzDecoder::new(stream).read_exact(&mut bytes)?;
    } else {
        stream.read_exact(&mut bytes)?;
    }
    parse_nifti_header(&bytes)
}

/// Decode a raw 348-byte header.
pub fn parse_nifti_header(bytes: &[u8]) -> Result<NiftiHeader, HeaderError> {
    if bytes.len() < HEADER_SIZE {
        return Err(HeaderError::Malformed("NIfTI header is truncated".into()));
    }
    let little = match (
        i32::from_le_bytes(word(bytes, 0)),
        i32::from_be_bytes(word(bytes, 0)),
    ) {
        (348, _) => true,
        (_, 348) => false,
        _ => return Err(HeaderError::Malformed("sizeof_hdr is not 348".into())),
    };
    let magic = &bytes[344..348];
    if magic != b"n+1\0" && magic != b"ni1\0" {
        return Err(HeaderError::Malformed("missing NIfTI-1 magic".into()));
    }

    let i16_at = |offset: usize| {
        let pair = [bytes[offset], bytes[offset + 1]];
        if little {
            i16::from_le_bytes(pair)
        } else {
            i16::from_be_bytes(pair)
        }
    };
    let f32_at = |offset: usize| {
        if little {
            f32::from_le_bytes(word(bytes, offset))
        } else {
            f32::from_be_bytes(word(bytes, offset))
        }
    };

    let ndim = i16_at(40);
    if !(1..=7).contains(&ndim) {
        return Err(HeaderError::Malformed(format!("dim[0] out of range: {ndim}")));
    }
    let ndim = ndim as usize;
    let dims = (1..=ndim)
        .map(|i| i16_at(40 + 2 * i).max(0) as u16)
        .collect();
    let pixdim = (1..=ndim).map(|i| f32_at(76 + 4 * i)).collect();
    let units = bytes[123];

    Ok(NiftiHeader {
        dims,
        pixdim,
        spatial_unit: SpatialUnit::from_code(units),
        temporal_unit: TemporalUnit::from_code(units),
    })
}

fn word(bytes: &[u8], offset: usize) -> [u8; 4] {
    [
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{nifti_header_bytes, write_nifti};
    use tempfile::TempDir;

    #[test]
    fn parse_little_endian_header() {
        let bytes = nifti_header_bytes(&[64, 64, 30, 120], &[3.0, 3.0, 4.0, 2.5], 2 | 8);
        let header = parse_nifti_header(&bytes).unwrap();
        assert_eq!(header.dims, vec![64, 64, 30, 120]);
        assert_eq!(header.pixdim, vec![3.0, 3.0, 4.0, 2.5]);
        assert_eq!(header.spatial_unit, Some(SpatialUnit::Millimeters));
        assert_eq!(header.temporal_unit, Some(TemporalUnit::Seconds));
    }

    #[test]
    fn parse_big_endian_header() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&348i32.to_be_bytes());
        bytes[40..42].copy_from_slice(&3i16.to_be_bytes());
        for (i, extent) in [10i16, 20, 30].iter().enumerate() {
            bytes[42 + 2 * i..44 + 2 * i].copy_from_slice(&extent.to_be_bytes());
        }
        for (i, size) in [1.5f32, 1.5, 2.0].iter().enumerate() {
            bytes[80 + 4 * i..84 + 4 * i].copy_from_slice(&size.to_be_bytes());
        }
        bytes[123] = 3;
        bytes[344..348].copy_from_slice(b"n+1\0");

        let header = parse_nifti_header(&bytes).unwrap();
        assert_eq!(header.dims, vec![10, 20, 30]);
        assert_eq!(header.pixdim, vec![1.5, 1.5, 2.0]);
        assert_eq!(header.spatial_unit, Some(SpatialUnit::Micrometers));
        assert_eq!(header.temporal_unit, None);
    }

    #[test]
    fn reject_bad_size_and_magic() {
        let mut bytes = nifti_header_bytes(&[2, 2, 2], &[1.0, 1.0, 1.0], 2);
        bytes[344] = b'x';
        assert!(parse_nifti_header(&bytes).is_err());

        let mut bytes = nifti_header_bytes(&[2, 2, 2], &[1.0, 1.0, 1.0], 2);
        bytes[0] = 0;
        assert!(parse_nifti_header(&bytes).is_err());

        assert!(parse_nifti_header(&[0u8; 10]).is_err());
    }

    #[test]
    fn read_plain_and_gzipped_files() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("t1.nii");
        let gz = tmp.path().join("t1.nii.gz");
        write_nifti(&plain, &[4, 5, 6], &[1.0, 1.0, 1.2], 2);
        write_nifti(&gz, &[4, 5, 6], &[1.0, 1.0, 1.2], 2);

        let a = read_nifti_header(&plain).unwrap();
        let b = read_nifti_header(&gz).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.dims, vec![4, 5, 6]);
    }

    #[test]
    fn read_non_nifti_file_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fake.nii");
        std::fs::write(&path, b"definitely not a header").unwrap();
        assert!(read_nifti_header(&path).is_err());
    }
}
