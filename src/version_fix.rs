//! Rewrites `majorRelease`/`minorRelease` attributes in extracted ecoSpold
//! files so they agree with the release they were downloaded as.

use std::fs::{self, OpenOptions};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;

use crate::domain::major_minor;
use crate::error::EcoError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const MAJOR: &[u8] = b"majorRelease";
const MINOR: &[u8] = b"minorRelease";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// `fileAttributes` under the dataset's administrative information.
    DatasetFileAttributes,
    /// The document element of a master data file.
    Root,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VersionFixSummary {
    pub datasets: usize,
    pub metadata: usize,
}

pub fn fix_dataset_version(path: &Path, major: u32, minor: u32) -> Result<(), EcoError> {
    check_inputs(path, major)?;
    rewrite(path, Target::DatasetFileAttributes, major, minor)
}

pub fn fix_metadata_version(path: &Path, major: u32, minor: u32) -> Result<(), EcoError> {
    check_inputs(path, major)?;
    rewrite(path, Target::Root, major, minor)
}

/// Fixes `datasets/*.spold` and `MasterData/*.xml` below an extracted release.
pub fn fix_release_directory(dir: &Path, version: &str) -> Result<VersionFixSummary, EcoError> {
    let (major, minor) = major_minor(version)?;
    let mut summary = VersionFixSummary::default();

    let datasets = dir.join("datasets");
    if datasets.is_dir() {
        tracing::info!(dir = %datasets.display(), "fixing versions in unit process datasets");
        for path in files_with_extension(&datasets, "spold")? {
            fix_dataset_version(&path, major, minor)?;
            summary.datasets += 1;
        }
    }

    let master_data = dir.join("MasterData");
    if master_data.is_dir() {
        tracing::info!(dir = %master_data.display(), "fixing versions in master data");
        for path in files_with_extension(&master_data, "xml")? {
            fix_metadata_version(&path, major, minor)?;
            summary.metadata += 1;
        }
    }

    Ok(summary)
}

fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<std::path::PathBuf>, EcoError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| EcoError::Filesystem(err.to_string()))? {
        let path = entry
            .map_err(|err| EcoError::Filesystem(err.to_string()))?
            .path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn check_inputs(path: &Path, major: u32) -> Result<(), EcoError> {
    if !path.is_file() {
        return Err(EcoError::VersionFix(format!(
            "{} is not a file",
            path.display()
        )));
    }
    fs::File::open(path).map_err(|err| {
        EcoError::VersionFix(format!("can't read {}: {err}", path.display()))
    })?;
    OpenOptions::new().write(true).open(path).map_err(|err| {
        EcoError::VersionFix(format!("can't write {}: {err}", path.display()))
    })?;
    if major < 3 {
        return Err(EcoError::VersionFix(format!(
            "invalid major version {major}"
        )));
    }
    Ok(())
}

fn rewrite(path: &Path, target: Target, major: u32, minor: u32) -> Result<(), EcoError> {
    let raw = fs::read(path).map_err(|err| EcoError::Filesystem(err.to_string()))?;
    let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(&raw);
    let text = std::str::from_utf8(raw)
        .map_err(|err| EcoError::Xml(format!("{}: {err}", path.display())))?;

    let mut reader = Reader::from_str(text);
    let mut writer = Writer::new(Vec::with_capacity(raw.len()));
    let mut open: Vec<Vec<u8>> = Vec::new();
    let mut patched = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| EcoError::Xml(format!("{}: {err}", path.display())))?;
        let event = match event {
            Event::Eof => break,
            Event::Start(element) => {
                let name = element.local_name().as_ref().to_vec();
                let element = if !patched && is_target(target, &open, &name) {
                    patched = true;
                    with_release(&element, major, minor)?
                } else {
                    element
                };
                open.push(name);
                Event::Start(element)
            }
            Event::Empty(element) => {
                let name = element.local_name().as_ref().to_vec();
                if !patched && is_target(target, &open, &name) {
                    patched = true;
                    Event::Empty(with_release(&element, major, minor)?)
                } else {
                    Event::Empty(element)
                }
            }
            Event::End(element) => {
                open.pop();
                Event::End(element)
            }
            other => other,
        };
        writer
            .write_event(event)
            .map_err(|err| EcoError::Xml(format!("{}: {err}", path.display())))?;
    }

    if !patched {
        return Err(EcoError::VersionFix(format!(
            "no release attributes target found in {}",
            path.display()
        )));
    }

    fs::write(path, writer.into_inner()).map_err(|err| EcoError::Filesystem(err.to_string()))
}

fn is_target(target: Target, open: &[Vec<u8>], name: &[u8]) -> bool {
    match target {
        Target::Root => open.is_empty(),
        Target::DatasetFileAttributes => {
            name == b"fileAttributes"
                && open.len() == 3
                && matches!(
                    open[1].as_slice(),
                    b"activityDataset" | b"childActivityDataset"
                )
                && open[2] == b"administrativeInformation"
        }
    }
}

/// Copy of `element` with both release attributes set, keeping attribute order.
fn with_release(
    element: &BytesStart<'_>,
    major: u32,
    minor: u32,
) -> Result<BytesStart<'static>, EcoError> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let major = major.to_string();
    let minor = minor.to_string();
    let mut patched = BytesStart::new(name);
    let mut seen_major = false;
    let mut seen_minor = false;

    for attribute in element.attributes() {
        let attribute = attribute.map_err(|err| EcoError::Xml(err.to_string()))?;
        match attribute.key.as_ref() {
            MAJOR => {
                patched.push_attribute(("majorRelease", major.as_str()));
                seen_major = true;
            }
            MINOR => {
                patched.push_attribute(("minorRelease", minor.as_str()));
                seen_minor = true;
            }
            _ => patched.push_attribute(attribute),
        }
    }
    if !seen_major {
        patched.push_attribute(("majorRelease", major.as_str()));
    }
    if !seen_minor {
        patched.push_attribute(("minorRelease", minor.as_str()));
    }
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn non_spold_files_are_ignored() {
        let temp = tempfile::tempdir().unwrap();
        let datasets = temp.path().join("datasets");
        fs::create_dir_all(&datasets).unwrap();
        fs::write(datasets.join("readme.txt"), "not xml").unwrap();

        let summary = fix_release_directory(temp.path(), "3.5").unwrap();
        assert_eq!(summary, VersionFixSummary::default());
    }

    #[test]
    fn major_version_below_three_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("Companies.xml");
        fs::write(&path, "<validCompanies majorRelease=\"3\" minorRelease=\"1\"/>").unwrap();

        let err = fix_metadata_version(&path, 2, 1).unwrap_err();
        assert_matches!(err, EcoError::VersionFix(_));
        let err = fix_metadata_version(&temp.path().join("missing.xml"), 3, 1).unwrap_err();
        assert_matches!(err, EcoError::VersionFix(_));
    }
}
