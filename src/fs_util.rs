use std::fs;
use std::io;
use std::path::{Component, Path};

use zip::ZipArchive;

use crate::error::EcoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    SevenZ,
    Zip,
}

impl ArchiveFormat {
    /// Detects the format from the file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "7z" => Some(ArchiveFormat::SevenZ),
            "zip" => Some(ArchiveFormat::Zip),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::SevenZ => "7z",
            ArchiveFormat::Zip => "zip",
        }
    }
}

/// Extracts into `target_dir`, replacing whatever was there before.
///
/// The archive is unpacked into a staging directory next to the target,
/// which only replaces the target once extraction succeeded. On failure the
/// previous contents are left untouched.
pub fn extract_archive(
    format: ArchiveFormat,
    archive_path: &Path,
    target_dir: &Path,
) -> Result<(), EcoError> {
    let parent = target_dir
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| EcoError::Filesystem(err.to_string()))?;
    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(parent)
        .map_err(|err| EcoError::Filesystem(err.to_string()))?;

    match format {
        ArchiveFormat::SevenZ => extract_7z(archive_path, staging.path())?,
        ArchiveFormat::Zip => extract_zip(archive_path, staging.path())?,
    }

    if target_dir.exists() {
        fs::remove_dir_all(target_dir).map_err(|err| EcoError::Filesystem(err.to_string()))?;
    }
    fs::rename(staging.path(), target_dir).map_err(|err| EcoError::Filesystem(err.to_string()))
}

/// Accepts a remote filename only if it names a single entry inside a
/// directory: no separators, no `..`, not absolute.
pub fn check_file_name(name: &str) -> Result<(), EcoError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(EcoError::Filesystem(format!(
            "refusing unsafe remote filename {name:?}"
        ))),
    }
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), EcoError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| EcoError::Archive(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file).map_err(|err| EcoError::Archive(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| EcoError::Archive(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(EcoError::Archive(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| EcoError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| EcoError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| EcoError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| EcoError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn extract_7z(archive_path: &Path, target_dir: &Path) -> Result<(), EcoError> {
    sevenz_rust::decompress_file(archive_path, target_dir).map_err(|err| {
        EcoError::Archive(format!("extract 7z {}: {err}", archive_path.display()))
    })
}

/// Deletes a file, logging instead of failing when the OS refuses.
///
/// Returns whether the file is gone.
pub fn remove_file_or_warn(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "can't delete file automatically; please delete it manually"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in files {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn detects_format_case_insensitively() {
        assert_eq!(
            ArchiveFormat::from_path(&PathBuf::from("ecoinvent 3.5_cutoff_ecoSpold02.7Z")),
            Some(ArchiveFormat::SevenZ)
        );
        assert_eq!(
            ArchiveFormat::from_path(&PathBuf::from("report.ZIP")),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(ArchiveFormat::from_path(&PathBuf::from("doc.pdf")), None);
        assert_eq!(ArchiveFormat::from_path(&PathBuf::from("noext")), None);
    }

    #[test]
    fn extraction_replaces_previous_contents() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("bundle.zip");
        write_zip(&archive, &[("a/fresh.txt", "new")]);

        let target = temp.path().join("bundle");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.txt"), "old").unwrap();

        extract_archive(ArchiveFormat::Zip, &archive, &target).unwrap();

        assert!(!target.join("stale.txt").exists());
        assert_eq!(
            fs::read_to_string(target.join("a").join("fresh.txt")).unwrap(),
            "new"
        );
    }

    #[test]
    fn failed_extraction_keeps_previous_contents() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("bundle.zip");
        fs::write(&archive, "not a zip").unwrap();

        let target = temp.path().join("bundle");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("kept.txt"), "old").unwrap();

        let err = extract_archive(ArchiveFormat::Zip, &archive, &target).unwrap_err();
        assert!(matches!(err, EcoError::Archive(_)));
        assert_eq!(fs::read_to_string(target.join("kept.txt")).unwrap(), "old");

        let leftovers = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".extract-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn remote_file_names_must_stay_inside_directory() {
        assert!(check_file_name("ecoinvent 3.5_cutoff_ecoSpold02.7z").is_ok());
        for name in ["../escape.7z", "/etc/passwd", "nested/file.7z", "..", "", "."] {
            assert!(
                matches!(check_file_name(name), Err(EcoError::Filesystem(_))),
                "{name:?} accepted"
            );
        }
    }

    #[test]
    fn remove_missing_file_counts_as_removed() {
        let temp = tempfile::tempdir().unwrap();
        assert!(remove_file_or_warn(&temp.path().join("missing.7z")));
    }
}
