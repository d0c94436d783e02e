//! CLI output formatting.
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure.
//!
//! ## files
//!
//! ```text
//! /data/series.zip
//!     Dominant: DICOM
//! DICOM (2)
//!     series/IM1
//!     series/IM2
//! other (1)
//!     notes.txt
//! ```
//!
//! ## package
//!
//! ```text
//! Loaded 3 images, 1 rejected
//!     row 4: missing image_file
//! thumbnail
//!     001 /data/pkg/image03/t1.nii.gz → /tmp/imgbundle-x/thumbnail.png
//!     002 /data/pkg/image03/t2.nii.gz: failed: cannot derive thumbnail: ...
//! ```

use crate::classify::FileSet;
use crate::derive::{Artifact, FailureReason};
use crate::object::ImageError;
use crate::package::Package;
use crate::source::SourceLocator;
use std::path::{Path, PathBuf};

// ============================================================================
// Shared helpers
// ============================================================================

fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Render an error, unfolding dependency chains one level per line.
///
/// ```text
/// failed: cannot derive thumbnail: requires nifti_1: mri_convert failed ...
///     caused by nifti_1: mri_convert failed (see logs/mri_convert.stderr)
/// ```
pub fn format_error(error: &ImageError, depth: usize) -> Vec<String> {
    let mut lines = vec![format!("{}failed: {}", indent(depth), error)];
    if let Some(failure) = error.failure() {
        let mut reason = &failure.reason;
        while let FailureReason::Dependency {
            artifact,
            reason: inner,
        } = reason
        {
            lines.push(format!("{}caused by {}: {}", indent(depth + 1), artifact, inner));
            reason = inner;
        }
    }
    lines
}

// ============================================================================
// files
// ============================================================================

pub fn format_files(locator: &SourceLocator, files: &FileSet) -> Vec<String> {
    let mut lines = vec![locator.to_string()];
    match files.dominant() {
        Some(category) => lines.push(format!("{}Dominant: {}", indent(1), category)),
        None => lines.push(format!("{}No recognized members", indent(1))),
    }
    for (category, names) in files.iter() {
        if names.is_empty() {
            continue;
        }
        lines.push(format!("{} ({})", category, names.len()));
        lines.extend(names.iter().map(|n| format!("{}{}", indent(1), n)));
    }
    lines
}

pub fn print_files(locator: &SourceLocator, files: &FileSet) {
    for line in format_files(locator, files) {
        println!("{}", line);
    }
}

// ============================================================================
// derive
// ============================================================================

pub fn format_artifact(artifact: Artifact, path: &Path, copied: &[PathBuf]) -> Vec<String> {
    let mut lines = vec![format!("{} → {}", artifact, path.display())];
    lines.extend(
        copied
            .iter()
            .map(|c| format!("{}copied to {}", indent(1), c.display())),
    );
    lines
}

pub fn print_artifact(artifact: Artifact, path: &Path, copied: &[PathBuf]) {
    for line in format_artifact(artifact, path, copied) {
        println!("{}", line);
    }
}

// ============================================================================
// package
// ============================================================================

pub fn format_package(package: &Package) -> Vec<String> {
    let mut lines = vec![format!(
        "Loaded {} images, {} rejected",
        package.len(),
        package.rejected().len()
    )];
    let mut rejected: Vec<_> = package.rejected().iter().collect();
    rejected.sort_by_key(|e| e.row);
    lines.extend(rejected.iter().map(|e| format!("{}{}", indent(1), e)));
    lines
}

pub fn print_package(package: &Package) {
    for line in format_package(package) {
        println!("{}", line);
    }
}

pub fn format_derive_all(
    package: &Package,
    artifact: Artifact,
    results: &[Result<PathBuf, ImageError>],
) -> Vec<String> {
    let mut lines = vec![artifact.to_string()];
    for (i, (image, result)) in package.images().iter().zip(results).enumerate() {
        let prefix = format!("{}{} {}", indent(1), format_index(i + 1), image.locator());
        match result {
            Ok(path) => lines.push(format!("{} → {}", prefix, path.display())),
            Err(error) => {
                let mut error_lines = format_error(error, 2);
                lines.push(prefix);
                lines.append(&mut error_lines);
            }
        }
    }
    let failed = results.iter().filter(|r| r.is_err()).count();
    lines.push(format!("Derived {} of {}", results.len() - failed, results.len()));
    lines
}

pub fn print_derive_all(package: &Package, artifact: Artifact, results: &[Result<PathBuf, ImageError>]) {
    for line in format_derive_all(package, artifact, results) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FormatCategory;
    use crate::derive::Failure;

    fn files() -> FileSet {
        FileSet::from_classified([
            ("series/IM2".to_string(), FormatCategory::Dicom),
            ("series/IM1".to_string(), FormatCategory::Dicom),
            ("notes.txt".to_string(), FormatCategory::Other),
        ])
    }

    #[test]
    fn files_lists_non_empty_categories() {
        let locator = SourceLocator::Local("/data/series.zip".into());
        let lines = format_files(&locator, &files());
        assert_eq!(
            lines,
            vec![
                "/data/series.zip",
                "    Dominant: DICOM",
                "DICOM (2)",
                "    series/IM1",
                "    series/IM2",
                "other (1)",
                "    notes.txt",
            ]
        );
    }

    #[test]
    fn files_without_recognized_members() {
        let locator = SourceLocator::Local("/data/notes.txt".into());
        let set = FileSet::from_classified([("notes.txt".to_string(), FormatCategory::Other)]);
        let lines = format_files(&locator, &set);
        assert_eq!(lines[1], "    No recognized members");
    }

    #[test]
    fn artifact_with_copies() {
        let lines = format_artifact(
            Artifact::AfniVolume,
            Path::new("/w/image+orig"),
            &[PathBuf::from("/out/image+orig.HEAD"), PathBuf::from("/out/image+orig.BRIK")],
        );
        assert_eq!(lines[0], "afni → /w/image+orig");
        assert_eq!(lines[2], "    copied to /out/image+orig.BRIK");
    }

    #[test]
    fn error_unfolds_dependencies() {
        let error = ImageError::Derivation(Failure::new(
            Artifact::Thumbnail,
            FailureReason::Dependency {
                artifact: Artifact::CanonicalVolume,
                reason: Box::new(FailureReason::ToolFailed {
                    tool: "mri_convert".into(),
                }),
            },
        ));
        let lines = format_error(&error, 0);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("failed: cannot derive thumbnail"));
        assert_eq!(
            lines[1],
            "    caused by nifti_1: mri_convert failed (see logs/mri_convert.stderr)"
        );
    }

    #[test]
    fn not_a_volume_is_one_line() {
        let error = ImageError::Derivation(Failure::new(Artifact::Thumbnail, FailureReason::NotAVolume));
        assert_eq!(
            format_error(&error, 1),
            vec!["    failed: cannot derive thumbnail: image is not a volume"]
        );
    }
}
