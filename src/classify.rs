//! Format classification of member files.
//!
//! [`classify`] maps one file to exactly one [`FormatCategory`]: a
//! case-sensitive suffix table is consulted first, and only when no suffix
//! matches are the four bytes at offset 128 read and compared against the
//! DICOM `DICM` marker. Nothing beyond that window is read.
//!
//! [`FileSet`] is the classified view of a whole source. AFNI assets are a
//! head/data pair (`x+orig.HEAD` + `x+orig.BRIK`); the set lists them by stem
//! once both halves exist, and demotes lone halves to `other`.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

pub const DICOM_MAGIC_OFFSET: u64 = 128;
pub const DICOM_MAGIC: &[u8; 4] = b"DICM";

pub const AFNI_HEAD_SUFFIX: &str = ".HEAD";
pub const AFNI_DATA_SUFFIX: &str = ".BRIK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FormatCategory {
    Dicom,
    Nifti,
    Minc,
    Afni,
    Nrrd,
    Png,
    Jpeg,
    Other,
}

impl FormatCategory {
    pub const ALL: [FormatCategory; 8] = [
        FormatCategory::Dicom,
        FormatCategory::Nifti,
        FormatCategory::Minc,
        FormatCategory::Afni,
        FormatCategory::Nrrd,
        FormatCategory::Png,
        FormatCategory::Jpeg,
        FormatCategory::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FormatCategory::Dicom => "DICOM",
            FormatCategory::Nifti => "NIfTI-1",
            FormatCategory::Minc => "MINC",
            FormatCategory::Afni => "AFNI",
            FormatCategory::Nrrd => "NRRD",
            FormatCategory::Png => "PNG",
            FormatCategory::Jpeg => "JPEG",
            FormatCategory::Other => "other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }
}

impl fmt::Display for FormatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordered suffix table; first match wins.
const SUFFIXES: &[(&str, FormatCategory)] = &[
    (".nii.gz", FormatCategory::Nifti),
    (".nii", FormatCategory::Nifti),
    (".png", FormatCategory::Png),
    (".jpg", FormatCategory::Jpeg),
    (".jpeg", FormatCategory::Jpeg),
    (".mnc", FormatCategory::Minc),
    (".nrrd", FormatCategory::Nrrd),
    (AFNI_HEAD_SUFFIX, FormatCategory::Afni),
    (AFNI_DATA_SUFFIX, FormatCategory::Afni),
];

/// Classify by name alone. `None` means the content must be inspected.
pub fn classify_name(name: &str) -> Option<FormatCategory> {
    SUFFIXES
        .iter()
        .find(|(suffix, _)| name.ends_with(*suffix))
        .map(|&(_, category)| category)
}

/// Classify one file. Reads at most the DICOM magic window.
pub fn classify(path: &Path) -> io::Result<FormatCategory> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    if let Some(category) = classify_name(&name) {
        return Ok(category);
    }
    if has_dicom_magic(path)? {
        Ok(FormatCategory::Dicom)
    } else {
        Ok(FormatCategory::Other)
    }
}

fn has_dicom_magic(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(DICOM_MAGIC_OFFSET))?;
    let mut window = [0u8; 4];
    match file.read_exact(&mut window) {
        Ok(()) => Ok(&window == DICOM_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

// =============================================================================
// Classified file set
// =============================================================================

/// Members of one source, grouped by category and sorted by name.
///
/// Every category is present (possibly empty). AFNI entries are stems; use
/// [`FileSet::member_names`] to get the on-disk names back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSet {
    members: BTreeMap<FormatCategory, Vec<String>>,
}

impl Default for FileSet {
    fn default() -> Self {
        Self {
            members: FormatCategory::ALL
                .into_iter()
                .map(|c| (c, Vec::new()))
                .collect(),
        }
    }
}

impl FileSet {
    /// Build the set from classified `(name, category)` pairs.
    ///
    /// AFNI halves are reconciled by stem and every list is sorted.
    pub fn from_classified<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, FormatCategory)>,
    {
        let mut set = Self::default();
        let mut afni_halves = Vec::new();
        for (name, category) in entries {
            if category == FormatCategory::Afni {
                afni_halves.push(name);
            } else {
                set.push(category, name);
            }
        }

        let (stems, lone) = reconcile_pairs(&afni_halves);
        set.members.insert(FormatCategory::Afni, stems);
        for name in lone {
            set.push(FormatCategory::Other, name);
        }
        for names in set.members.values_mut() {
            names.sort();
        }
        set
    }

    fn push(&mut self, category: FormatCategory, name: String) {
        self.members.entry(category).or_default().push(name);
    }

    pub fn get(&self, category: FormatCategory) -> &[String] {
        self.members
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first(&self, category: FormatCategory) -> Option<&str> {
        self.get(category).first().map(String::as_str)
    }

    pub fn has(&self, category: FormatCategory) -> bool {
        !self.get(category).is_empty()
    }

    /// Categories in declaration order with their member lists.
    pub fn iter(&self) -> impl Iterator<Item = (FormatCategory, &[String])> {
        self.members.iter().map(|(c, names)| (*c, names.as_slice()))
    }

    /// The category that best describes the source as a whole.
    ///
    /// Precedence follows declaration order and never picks `other`.
    pub fn dominant(&self) -> Option<FormatCategory> {
        FormatCategory::ALL
            .into_iter()
            .filter(|c| *c != FormatCategory::Other)
            .find(|c| self.has(*c))
    }

    /// Every on-disk member name, AFNI stems expanded back into both halves.
    pub fn member_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (category, members) in self.iter() {
            if category == FormatCategory::Afni {
                for stem in members {
                    names.push(format!("{stem}{AFNI_HEAD_SUFFIX}"));
                    names.push(format!("{stem}{AFNI_DATA_SUFFIX}"));
                }
            } else {
                names.extend(members.iter().cloned());
            }
        }
        names
    }

    pub fn member_count(&self) -> usize {
        self.member_names().len()
    }
}

/// Split AFNI halves into complete stems and unpaired names.
///
/// A stem is complete when both `<stem>.HEAD` and `<stem>.BRIK` are present.
/// Both outputs are sorted.
pub fn reconcile_pairs(names: &[String]) -> (Vec<String>, Vec<String>) {
    let heads: BTreeSet<&str> = names
        .iter()
        .filter_map(|n| n.strip_suffix(AFNI_HEAD_SUFFIX))
        .collect();
    let bricks: BTreeSet<&str> = names
        .iter()
        .filter_map(|n| n.strip_suffix(AFNI_DATA_SUFFIX))
        .collect();

    let stems: Vec<String> = heads
        .intersection(&bricks)
        .map(|s| s.to_string())
        .collect();

    let mut lone: Vec<String> = names
        .iter()
        .filter(|n| {
            let stem = n
                .strip_suffix(AFNI_HEAD_SUFFIX)
                .or_else(|| n.strip_suffix(AFNI_DATA_SUFFIX));
            match stem {
                Some(stem) => !(heads.contains(stem) && bricks.contains(stem)),
                None => true,
            }
        })
        .cloned()
        .collect();
    lone.sort();
    lone.dedup();

    (stems, lone)
}
