//! Descriptive metadata records.
//!
//! Every image carries one [`MetadataRecord`] over the fixed [`FIELDS`]
//! schema. A record is either supplied by the caller (usually a manifest row)
//! or extracted by inspecting the classified members:
//!
//! | Dominant format | Source of fields |
//! |---|---|
//! | DICOM | canonical volume header + first slice's DICOM header |
//! | NIfTI-1, MINC, AFNI, NRRD | canonical volume header |
//! | PNG, JPEG | raster dimensions |
//!
//! Each field is determined independently; anything that cannot be read is
//! left absent without affecting the others.

use crate::classify::{FileSet, FormatCategory};
use crate::header::{DicomHeader, NiftiHeader, dicom::tags, read_dicom_header, read_nifti_header};
use chrono::NaiveDate;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The image03 field schema, in manifest column order.
pub const FIELDS: [&str; 63] = [
    "acquisition_matrix",
    "collection_id",
    "collection_title",
    "comments_misc",
    "dataset_id",
    "decay_correction",
    "extent4_type",
    "extent5_type",
    "flip_angle",
    "frame_end_times",
    "frame_end_unit",
    "frame_start_times",
    "frame_start_unit",
    "gender",
    "image_description",
    "image_extent1",
    "image_extent2",
    "image_extent3",
    "image_extent4",
    "image_extent5",
    "image_file",
    "image_file_format",
    "image_history",
    "image_modality",
    "image_num_dimensions",
    "image_orientation",
    "image_resolution1",
    "image_resolution2",
    "image_resolution3",
    "image_resolution4",
    "image_resolution5",
    "image_slice_thickness",
    "image_thumbnail_file",
    "image_unit1",
    "image_unit2",
    "image_unit3",
    "image_unit4",
    "image_unit5",
    "interview_age",
    "interview_date",
    "magnetic_field_strength",
    "mri_echo_time_pd",
    "mri_field_of_view_pd",
    "mri_repetition_time_pd",
    "patient_position",
    "pet_isotope",
    "pet_tracer",
    "photomet_interpret",
    "qc_description",
    "qc_fail_quest_reason",
    "qc_outcome",
    "receive_coil",
    "scan_type",
    "scanner_manufacturer_pd",
    "scanner_software_versions_pd",
    "scanner_type_pd",
    "src_subject_id",
    "subjectkey",
    "time_diff_inject_to_image",
    "time_diff_units",
    "transformation_performed",
    "transformation_type",
    "transmit_coil",
];

/// Look up the schema entry for a field name.
pub fn field(name: &str) -> Option<&'static str> {
    FIELDS.iter().copied().find(|f| *f == name)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Real(v) => write!(f, "{v}"),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Real(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// A value per schema field; fields not stored are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    values: BTreeMap<&'static str, FieldValue>,
}

impl MetadataRecord {
    /// A record with every field absent.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Normalize caller-supplied values: unknown keys are dropped, values
    /// trimmed, blank values absent.
    pub fn from_supplied<K, V, I>(row: I) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut record = Self::empty();
        for (key, value) in row {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            record.set(key.as_ref(), value);
        }
        record
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).map(FieldValue::to_string)
    }

    /// Store a value. Returns false (and stores nothing) for unknown fields.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> bool {
        match field(name) {
            Some(key) => {
                self.values.insert(key, value.into());
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of fields present.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Every schema field in order, with its value when present.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, Option<&FieldValue>)> {
        FIELDS.iter().map(|name| (*name, self.values.get(name)))
    }

    /// Present fields only.
    pub fn present(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

/// Serializes the whole schema, absent fields as `null`.
impl Serialize for MetadataRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FIELDS.len()))?;
        for (name, value) in self.fields() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

/// How an image obtains its metadata.
#[derive(Debug, Clone, Default)]
pub enum MetadataSource {
    /// Every field absent until extraction is requested.
    #[default]
    None,
    /// A record from the caller, normalized with [`MetadataRecord::from_supplied`].
    Supplied(MetadataRecord),
    /// Extract by inspection on first access.
    Extract,
}

// =============================================================================
// Extraction
// =============================================================================

/// The `image_file_format` value for a dominant category.
pub fn file_format_label(category: FormatCategory) -> Option<&'static str> {
    match category {
        FormatCategory::Dicom => Some("DICOM"),
        FormatCategory::Nifti => Some("NIFTI"),
        FormatCategory::Minc => Some("MINC"),
        FormatCategory::Afni => Some("AFNI"),
        FormatCategory::Nrrd => Some("NRRD"),
        FormatCategory::Png => Some("PNG"),
        FormatCategory::Jpeg => Some("JPEG"),
        FormatCategory::Other => None,
    }
}

/// Build a record by inspection, starting from all-absent.
///
/// `member` resolves a member name to its path. `canonical_volume` is only
/// called for volumetric sources; `Ok(None)` means the volume could not be
/// derived and its fields stay absent, while an error aborts extraction.
pub fn extract<E>(
    files: &FileSet,
    member: impl Fn(&str) -> PathBuf,
    canonical_volume: impl FnOnce() -> Result<Option<PathBuf>, E>,
) -> Result<MetadataRecord, E> {
    let mut record = MetadataRecord::empty();
    let Some(dominant) = files.dominant() else {
        return Ok(record);
    };
    if let Some(label) = file_format_label(dominant) {
        record.set("image_file_format", label);
    }

    match dominant {
        FormatCategory::Png | FormatCategory::Jpeg => {
            if let Some(name) = files.first(dominant) {
                fill_raster(&mut record, &member(name));
            }
        }
        _ => {
            if let Some(volume) = canonical_volume()? {
                match read_nifti_header(&volume) {
                    Ok(header) => fill_volume(&mut record, &header),
                    Err(e) => debug!(volume = %volume.display(), error = %e, "unreadable volume header"),
                }
            }
            let first_slice = files.first(FormatCategory::Dicom).filter(|_| dominant == FormatCategory::Dicom);
            if let Some(first) = first_slice {
                let path = member(first);
                match read_dicom_header(&path) {
                    Ok(header) => fill_dicom(&mut record, &header),
                    Err(e) => debug!(slice = %path.display(), error = %e, "unreadable DICOM header"),
                }
            }
        }
    }
    Ok(record)
}

fn fill_volume(record: &mut MetadataRecord, header: &NiftiHeader) {
    record.set("image_num_dimensions", header.dims.len() as i64);
    for (i, (extent, size)) in header.dims.iter().zip(&header.pixdim).take(5).enumerate() {
        let n = i + 1;
        record.set(&format!("image_extent{n}"), i64::from(*extent));
        record.set(&format!("image_resolution{n}"), round_f32(*size));
        let unit = match i {
            0..=2 => header.spatial_unit.map(|u| u.label()),
            3 => header.temporal_unit.map(|u| u.label()),
            _ => None,
        };
        if let Some(unit) = unit {
            record.set(&format!("image_unit{n}"), unit);
        }
    }
}

fn fill_dicom(record: &mut MetadataRecord, header: &DicomHeader) {
    let texts = [
        ("interview_age", tags::PATIENT_AGE),
        ("gender", tags::PATIENT_SEX),
        ("image_modality", tags::MODALITY),
        ("scanner_manufacturer_pd", tags::MANUFACTURER),
        ("scanner_type_pd", tags::MANUFACTURER_MODEL),
        ("scanner_software_versions_pd", tags::SOFTWARE_VERSIONS),
        ("patient_position", tags::PATIENT_POSITION),
        ("photomet_interpret", tags::PHOTOMETRIC_INTERPRETATION),
        ("receive_coil", tags::RECEIVE_COIL),
        ("transmit_coil", tags::TRANSMIT_COIL),
    ];
    for (name, tag) in texts {
        if let Some(value) = header.text(tag) {
            record.set(name, value);
        }
    }

    let numbers = [
        ("magnetic_field_strength", tags::MAGNETIC_FIELD_STRENGTH),
        ("flip_angle", tags::FLIP_ANGLE),
        ("image_slice_thickness", tags::SLICE_THICKNESS),
    ];
    for (name, tag) in numbers {
        if let Some(value) = header.number(tag) {
            record.set(name, value);
        }
    }

    // Milliseconds in the header, seconds in the record.
    for (name, tag) in [
        ("mri_repetition_time_pd", tags::REPETITION_TIME),
        ("mri_echo_time_pd", tags::ECHO_TIME),
    ] {
        if let Some(ms) = header.number(tag) {
            record.set(name, ms / 1000.0);
        }
    }

    if let Some(date) = header.text(tags::STUDY_DATE).and_then(|d| interview_date(&d)) {
        record.set("interview_date", date);
    }
    if let Some(matrix) = header.u16_values(tags::ACQUISITION_MATRIX) {
        let joined: Vec<String> = matrix.iter().map(u16::to_string).collect();
        record.set("acquisition_matrix", joined.join(" "));
    }
}

fn fill_raster(record: &mut MetadataRecord, path: &Path) {
    match image::image_dimensions(path) {
        Ok((width, height)) => {
            record.set("image_num_dimensions", 2i64);
            record.set("image_extent1", i64::from(width));
            record.set("image_extent2", i64::from(height));
        }
        Err(e) => debug!(path = %path.display(), error = %e, "unreadable raster"),
    }
}

/// `YYYYMMDD` to `MM/DD/YYYY`.
pub fn interview_date(study_date: &str) -> Option<String> {
    NaiveDate::parse_from_str(study_date.trim(), "%Y%m%d")
        .ok()
        .map(|d| d.format("%m/%d/%Y").to_string())
}

/// Widen without exposing binary noise (`1.2f32` stays `1.2`).
fn round_f32(value: f32) -> f64 {
    (f64::from(value) * 1e6).round() / 1e6
}
