//! Minimal DICOM Part 10 reader.
//!
//! Layout of a file:
//!   Bytes 0-127:   preamble (ignored)
//!   Bytes 128-131: `DICM`
//!   File meta group (0002,xxxx), always explicit VR little endian
//!   Data set, encoded per the transfer syntax (0002,0010)
//!
//! Explicit and implicit VR little endian data sets are supported. Sequences
//! are skipped, including undefined-length ones, so only top-level elements
//! are kept. Reading stops at pixel data. A malformed element ends the walk
//! but keeps everything read before it.

use super::HeaderError;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

pub type Tag = (u16, u16);

pub mod tags {
    use super::Tag;

    pub const TRANSFER_SYNTAX: Tag = (0x0002, 0x0010);
    pub const STUDY_DATE: Tag = (0x0008, 0x0020);
    pub const MODALITY: Tag = (0x0008, 0x0060);
    pub const MANUFACTURER: Tag = (0x0008, 0x0070);
    pub const MANUFACTURER_MODEL: Tag = (0x0008, 0x1090);
    pub const PATIENT_SEX: Tag = (0x0010, 0x0040);
    pub const PATIENT_AGE: Tag = (0x0010, 0x1010);
    pub const SLICE_THICKNESS: Tag = (0x0018, 0x0050);
    pub const REPETITION_TIME: Tag = (0x0018, 0x0080);
    pub const ECHO_TIME: Tag = (0x0018, 0x0081);
    pub const MAGNETIC_FIELD_STRENGTH: Tag = (0x0018, 0x0087);
    pub const SOFTWARE_VERSIONS: Tag = (0x0018, 0x1020);
    pub const RECEIVE_COIL: Tag = (0x0018, 0x1250);
    pub const TRANSMIT_COIL: Tag = (0x0018, 0x1251);
    pub const ACQUISITION_MATRIX: Tag = (0x0018, 0x1310);
    pub const FLIP_ANGLE: Tag = (0x0018, 0x1314);
    pub const PATIENT_POSITION: Tag = (0x0018, 0x5100);
    pub const PHOTOMETRIC_INTERPRETATION: Tag = (0x0028, 0x0004);
    pub const PIXEL_DATA: Tag = (0x7FE0, 0x0010);
}

const PREAMBLE: usize = 128;
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const ITEM: Tag = (0xFFFE, 0xE000);
const ITEM_DELIMITER: Tag = (0xFFFE, 0xE00D);
const SEQUENCE_DELIMITER: Tag = (0xFFFE, 0xE0DD);

const IMPLICIT_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
const EXPLICIT_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
const DEFLATED_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";

/// VRs with a 2-byte reserved field and a 4-byte length in explicit encoding.
const LONG_VRS: &[&[u8; 2]] = &[
    b"OB", b"OD", b"OF", b"OL", b"OV", b"OW", b"SQ", b"SV", b"UC", b"UN", b"UR", b"UT", b"UV",
];

/// Raw top-level element values of one DICOM file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DicomHeader {
    elements: BTreeMap<Tag, Vec<u8>>,
}

impl DicomHeader {
    pub fn raw(&self, tag: Tag) -> Option<&[u8]> {
        self.elements.get(&tag).map(Vec::as_slice)
    }

    /// String value with padding removed; `None` when absent or blank.
    pub fn text(&self, tag: Tag) -> Option<String> {
        let raw = self.raw(tag)?;
        let text = String::from_utf8_lossy(raw);
        let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// First value of a decimal or integer string.
    pub fn number(&self, tag: Tag) -> Option<f64> {
        self.text(tag)?.split('\\').next()?.trim().parse().ok()
    }

    /// Values of an unsigned short element.
    pub fn u16_values(&self, tag: Tag) -> Option<Vec<u16>> {
        let raw = self.raw(tag)?;
        if raw.is_empty() || raw.len() % 2 != 0 {
            return None;
        }
        Some(
            raw.chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
        )
    }
}

pub fn read_dicom_header(path: &Path) -> Result<DicomHeader, HeaderError> {
    read_dicom(BufReader::new(File::open(path)?))
}

pub fn parse_dicom(bytes: &[u8]) -> Result<DicomHeader, HeaderError> {
    read_dicom(bytes)
}

/// Walk a DICOM stream. Nothing past the pixel data tag is read.
pub fn read_dicom(input: impl BufRead) -> Result<DicomHeader, HeaderError> {
    let mut reader = Reader {
        inner: input,
        pos: 0,
        pending: None,
    };
    match reader.take(PREAMBLE + 4) {
        Ok(lead) if &lead[PREAMBLE..] == b"DICM" => {}
        Ok(_) | Err(HeaderError::Malformed(_)) => {
            return Err(HeaderError::Malformed("missing DICM marker".into()));
        }
        Err(e) => return Err(e),
    }
    let mut header = DicomHeader::default();

    // File meta information: explicit VR little endian, group 0002 only.
    while matches!(reader.peek_tag(), Ok((0x0002, _))) {
        let tag = reader.tag()?;
        if let Some(value) = read_value(&mut reader, true)? {
            header.elements.insert(tag, value);
        }
    }

    let syntax = header.text(tags::TRANSFER_SYNTAX).unwrap_or_default();
    let explicit = match syntax.as_str() {
        IMPLICIT_LITTLE_ENDIAN => false,
        EXPLICIT_BIG_ENDIAN | DEFLATED_LITTLE_ENDIAN => {
            return Err(HeaderError::Unsupported(format!("transfer syntax {syntax}")));
        }
        _ => true,
    };

    while !reader.at_end()? {
        let tag = match reader.tag() {
            Ok(tag) if tag >= tags::PIXEL_DATA => break,
            Ok(tag) => tag,
            Err(e) => {
                debug!(error = %e, offset = reader.pos, "stopping DICOM walk");
                break;
            }
        };
        match read_value(&mut reader, explicit) {
            Ok(Some(value)) => {
                header.elements.insert(tag, value);
            }
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, offset = reader.pos, "stopping DICOM walk");
                break;
            }
        }
    }
    Ok(header)
}

// ---------------------------------------------------------------------------
// Element walking
// ---------------------------------------------------------------------------

struct Reader<R> {
    inner: R,
    pos: u64,
    /// A tag read by `peek_tag` and not yet consumed.
    pending: Option<Tag>,
}

impl<R: BufRead> Reader<R> {
    fn truncated(&self) -> HeaderError {
        HeaderError::Malformed(format!("truncated at offset {}", self.pos))
    }

    fn at_end(&mut self) -> Result<bool, HeaderError> {
        Ok(self.pending.is_none() && self.inner.fill_buf()?.is_empty())
    }

    fn take(&mut self, n: usize) -> Result<Vec<u8>, HeaderError> {
        let mut value = Vec::new();
        self.inner.by_ref().take(n as u64).read_to_end(&mut value)?;
        if value.len() < n {
            return Err(self.truncated());
        }
        self.pos += n as u64;
        Ok(value)
    }

    fn skip(&mut self, n: u64) -> Result<(), HeaderError> {
        let skipped = io::copy(&mut self.inner.by_ref().take(n), &mut io::sink())?;
        if skipped < n {
            return Err(self.truncated());
        }
        self.pos += n;
        Ok(())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], HeaderError> {
        let mut buf = [0u8; N];
        match self.inner.read_exact(&mut buf) {
            Ok(()) => {
                self.pos += N as u64;
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(self.truncated()),
            Err(e) => Err(e.into()),
        }
    }

    fn u16(&mut self) -> Result<u16, HeaderError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, HeaderError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn tag(&mut self) -> Result<Tag, HeaderError> {
        match self.pending.take() {
            Some(tag) => Ok(tag),
            None => Ok((self.u16()?, self.u16()?)),
        }
    }

    fn peek_tag(&mut self) -> Result<Tag, HeaderError> {
        let tag = self.tag()?;
        self.pending = Some(tag);
        Ok(tag)
    }
}

/// Read the VR, length and value of an element whose tag was just read.
/// Undefined-length values are skipped and yield `None`.
fn read_value<R: BufRead>(
    reader: &mut Reader<R>,
    explicit: bool,
) -> Result<Option<Vec<u8>>, HeaderError> {
    let length = if explicit {
        let vr: [u8; 2] = reader.array()?;
        if LONG_VRS.iter().any(|long| **long == vr) {
            reader.skip(2)?;
            reader.u32()?
        } else {
            u32::from(reader.u16()?)
        }
    } else {
        reader.u32()?
    };

    if length == UNDEFINED_LENGTH {
        skip_sequence(reader, explicit)?;
        return Ok(None);
    }
    reader.take(length as usize).map(Some)
}

/// Skip items up to and including the sequence delimiter.
fn skip_sequence<R: BufRead>(reader: &mut Reader<R>, explicit: bool) -> Result<(), HeaderError> {
    loop {
        let tag = reader.tag()?;
        let length = reader.u32()?;
        match tag {
            SEQUENCE_DELIMITER => return Ok(()),
            ITEM if length == UNDEFINED_LENGTH => skip_item(reader, explicit)?,
            ITEM => reader.skip(u64::from(length))?,
            other => {
                return Err(HeaderError::Malformed(format!(
                    "unexpected ({:04X},{:04X}) inside sequence",
                    other.0, other.1
                )));
            }
        }
    }
}

/// Skip the elements of an undefined-length item up to its delimiter.
fn skip_item<R: BufRead>(reader: &mut Reader<R>, explicit: bool) -> Result<(), HeaderError> {
    loop {
        if reader.tag()? == ITEM_DELIMITER {
            reader.u32()?;
            return Ok(());
        }
        read_value(reader, explicit)?;
    }
}
