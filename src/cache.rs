//! Filename-keyed download cache on top of [`CachedStorage`].

use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use chrono::Utc;
use serde::Serialize;

use crate::domain::CacheKind;
use crate::error::EcoError;
use crate::fs_util::{ArchiveFormat, check_file_name, extract_archive, remove_file_or_warn};
use crate::listing::RemoteFileDescriptor;
use crate::store::{CacheEntry, CachedStorage};

/// One cache lookup: what is requested and what the server says about it.
#[derive(Debug, Clone)]
pub struct CacheRequest<'a> {
    pub filename: &'a str,
    pub remote: &'a RemoteFileDescriptor,
    pub kind: CacheKind,
    pub version: Option<&'a str>,
    pub system_model: Option<&'a str>,
    pub extract: bool,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheOutcome {
    /// Extracted directory, or the downloaded file.
    pub path: PathBuf,
    /// Whether this call downloaded the file.
    pub downloaded: bool,
}

impl CachedStorage {
    /// Returns the cached path when it is newer than the remote copy,
    /// otherwise calls `fetch` with the cache root, extracts archives and
    /// records the new entry.
    ///
    /// `fetch` must return the path of the downloaded file.
    pub fn resolve_or_fetch<F>(
        &self,
        request: &CacheRequest<'_>,
        fetch: F,
    ) -> Result<CacheOutcome, EcoError>
    where
        F: FnOnce(&Utf8Path) -> Result<PathBuf, EcoError>,
    {
        check_file_name(request.filename)?;
        if let Some(entry) = self.catalogue().get(request.filename)? {
            check_consistency(request, &entry)?;
            if entry.created > request.remote.modified && !request.force {
                tracing::debug!(filename = request.filename, path = %entry.path, "cache hit");
                return Ok(CacheOutcome {
                    path: PathBuf::from(entry.path),
                    downloaded: false,
                });
            }
        }

        let filepath = fetch(self.root())?;
        check_size(&filepath, request.remote.size);

        let format = ArchiveFormat::from_path(&filepath).filter(|_| request.extract);
        let (path, entry) = match format {
            Some(format) => {
                let directory = self.root().as_std_path().join(stem(request.filename));
                let extracted = extract_archive(format, &filepath, &directory);
                remove_file_or_warn(&filepath);
                extracted?;
                let entry = CacheEntry {
                    path: directory.to_string_lossy().into_owned(),
                    extracted: true,
                    created: Utc::now().naive_utc(),
                    archive: filepath
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned()),
                    system_model: request.system_model.map(str::to_string),
                    version: request.version.map(str::to_string),
                    kind: request.kind,
                };
                tracing::debug!(
                    filename = request.filename,
                    version = ?request.version,
                    kind = %request.kind,
                    directory = %directory.display(),
                    format = format.as_str(),
                    "adding extracted archive to cache"
                );
                (directory, entry)
            }
            None => {
                let entry = CacheEntry {
                    path: filepath.to_string_lossy().into_owned(),
                    extracted: false,
                    created: Utc::now().naive_utc(),
                    archive: None,
                    system_model: request.system_model.map(str::to_string),
                    version: request.version.map(str::to_string),
                    kind: request.kind,
                };
                tracing::debug!(
                    filename = request.filename,
                    version = ?request.version,
                    kind = %request.kind,
                    "adding file to cache"
                );
                (filepath, entry)
            }
        };

        self.catalogue().set(request.filename, entry)?;
        Ok(CacheOutcome {
            path,
            downloaded: true,
        })
    }
}

fn check_consistency(request: &CacheRequest<'_>, entry: &CacheEntry) -> Result<(), EcoError> {
    let consistent = entry.kind == request.kind
        && entry.system_model.as_deref() == request.system_model
        && entry.version.as_deref() == request.version;
    if consistent {
        return Ok(());
    }
    Err(EcoError::CacheConsistency {
        filename: request.filename.to_string(),
        cached_version: entry.version.clone(),
        requested_version: request.version.map(str::to_string),
        cached_system_model: entry.system_model.clone(),
        requested_system_model: request.system_model.map(str::to_string),
        cached_kind: entry.kind.to_string(),
        requested_kind: request.kind.to_string(),
    })
}

/// Transfers are trusted once complete, so a size mismatch is only logged.
fn check_size(path: &Path, expected: u64) {
    match fs::metadata(path) {
        Ok(meta) if meta.len() != expected => {
            tracing::error!(
                path = %path.display(),
                actual = meta.len(),
                expected,
                "downloaded file doesn't match expected size; proceeding anyway"
            );
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "can't read downloaded file size");
        }
    }
}

fn stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::Write;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;
    use chrono::NaiveDate;
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::listing::parse_modified;

    fn storage(temp: &tempfile::TempDir) -> CachedStorage {
        let root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
        CachedStorage::new(root).unwrap()
    }

    fn remote(size: u64) -> RemoteFileDescriptor {
        RemoteFileDescriptor {
            uuid: "a18a6292".to_string(),
            size,
            modified: NaiveDate::from_ymd_opt(2023, 4, 25)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            description: None,
        }
    }

    fn request<'a>(filename: &'a str, remote: &'a RemoteFileDescriptor) -> CacheRequest<'a> {
        CacheRequest {
            filename,
            remote,
            kind: CacheKind::Extra,
            version: Some("3.5"),
            system_model: None,
            extract: true,
            force: false,
        }
    }

    fn write_file(root: &Utf8Path, name: &str, content: &[u8]) -> Result<PathBuf, EcoError> {
        let path = root.as_std_path().join(name);
        fs::write(&path, content).map_err(|err| EcoError::Filesystem(err.to_string()))?;
        Ok(path)
    }

    fn write_zip(root: &Utf8Path, name: &str) -> Result<PathBuf, EcoError> {
        let path = root.as_std_path().join(name);
        let file = fs::File::create(&path).map_err(|err| EcoError::Filesystem(err.to_string()))?;
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("wind power.pdf", SimpleFileOptions::default())
            .map_err(|err| EcoError::Archive(err.to_string()))?;
        writer
            .write_all(b"%PDF")
            .map_err(|err| EcoError::Filesystem(err.to_string()))?;
        writer
            .finish()
            .map_err(|err| EcoError::Archive(err.to_string()))?;
        Ok(path)
    }

    #[test]
    fn second_request_is_served_from_cache() {
        let temp = tempfile::tempdir().unwrap();
        let storage = storage(&temp);
        let remote = remote(4);
        let calls = Cell::new(0);
        let name = "ecoinvent 3.5_APOS_known issues.xlsx";

        let fetch = |root: &Utf8Path| {
            calls.set(calls.get() + 1);
            write_file(root, name, b"xlsx")
        };
        let first = storage.resolve_or_fetch(&request(name, &remote), fetch).unwrap();
        let second = storage
            .resolve_or_fetch(&request(name, &remote), |root: &Utf8Path| {
                calls.set(calls.get() + 1);
                write_file(root, name, b"xlsx")
            })
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert!(first.downloaded);
        assert!(!second.downloaded);
        assert_eq!(first.path, second.path);

        let entry = storage.catalogue().get(name).unwrap().unwrap();
        assert!(!entry.extracted);
        assert_eq!(entry.archive, None);
        assert_eq!(entry.kind, CacheKind::Extra);
    }

    #[test]
    fn force_redownloads() {
        let temp = tempfile::tempdir().unwrap();
        let storage = storage(&temp);
        let remote = remote(4);
        let name = "notes.txt";
        let calls = Cell::new(0);

        for force in [false, true] {
            let mut req = request(name, &remote);
            req.force = force;
            storage
                .resolve_or_fetch(&req, |root: &Utf8Path| {
                    calls.set(calls.get() + 1);
                    write_file(root, name, b"text")
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn remote_newer_than_entry_redownloads() {
        let temp = tempfile::tempdir().unwrap();
        let storage = storage(&temp);
        let name = "notes.txt";
        let old = remote(4);
        storage
            .resolve_or_fetch(&request(name, &old), |root: &Utf8Path| {
                write_file(root, name, b"text")
            })
            .unwrap();

        let mut newer = remote(4);
        newer.modified = Utc::now().naive_utc() + chrono::Duration::days(1);
        let outcome = storage
            .resolve_or_fetch(&request(name, &newer), |root: &Utf8Path| {
                write_file(root, name, b"text")
            })
            .unwrap();
        assert!(outcome.downloaded);
    }

    #[test]
    fn mismatched_entry_is_a_consistency_error() {
        let temp = tempfile::tempdir().unwrap();
        let storage = storage(&temp);
        let remote = remote(4);
        let name = "notes.txt";
        storage
            .resolve_or_fetch(&request(name, &remote), |root: &Utf8Path| {
                write_file(root, name, b"text")
            })
            .unwrap();
        let before = fs::read_to_string(storage.catalogue().path()).unwrap();

        let mut other = request(name, &remote);
        other.version = Some("3.6");
        let err = storage
            .resolve_or_fetch(&other, |_: &Utf8Path| panic!("must not download"))
            .unwrap_err();
        assert_matches!(err, EcoError::CacheConsistency { .. });

        let mut other = request(name, &remote);
        other.kind = CacheKind::Report;
        let err = storage
            .resolve_or_fetch(&other, |_: &Utf8Path| panic!("must not download"))
            .unwrap_err();
        assert_matches!(err, EcoError::CacheConsistency { .. });

        assert_eq!(fs::read_to_string(storage.catalogue().path()).unwrap(), before);
    }

    #[test]
    fn system_model_mismatch_is_a_consistency_error() {
        let temp = tempfile::tempdir().unwrap();
        let storage = storage(&temp);
        let remote = remote(4);

        let mut cutoff = request("release.txt", &remote);
        cutoff.kind = CacheKind::Release;
        cutoff.system_model = Some("cutoff");
        storage
            .resolve_or_fetch(&cutoff, |root: &Utf8Path| write_file(root, "release.txt", b"text"))
            .unwrap();
        storage
            .resolve_or_fetch(&request("extra.txt", &remote), |root: &Utf8Path| {
                write_file(root, "extra.txt", b"text")
            })
            .unwrap();
        let before = fs::read_to_string(storage.catalogue().path()).unwrap();

        let mut apos = cutoff.clone();
        apos.system_model = Some("apos");
        let err = storage
            .resolve_or_fetch(&apos, |_: &Utf8Path| panic!("must not download"))
            .unwrap_err();
        assert_matches!(
            err,
            EcoError::CacheConsistency { ref cached_system_model, .. }
                if cached_system_model.as_deref() == Some("cutoff")
        );

        let mut unset = cutoff.clone();
        unset.system_model = None;
        assert_matches!(
            storage.resolve_or_fetch(&unset, |_: &Utf8Path| panic!("must not download")),
            Err(EcoError::CacheConsistency { .. })
        );

        let mut extra = request("extra.txt", &remote);
        extra.system_model = Some("cutoff");
        assert_matches!(
            storage.resolve_or_fetch(&extra, |_: &Utf8Path| panic!("must not download")),
            Err(EcoError::CacheConsistency { .. })
        );

        assert_eq!(fs::read_to_string(storage.catalogue().path()).unwrap(), before);
    }

    #[test]
    fn remote_modified_with_offset_is_compared_in_utc() {
        let temp = tempfile::tempdir().unwrap();
        let storage = storage(&temp);
        let name = "notes.txt";
        let calls = Cell::new(0);
        let fetch = |root: &Utf8Path| {
            calls.set(calls.get() + 1);
            write_file(root, name, b"text")
        };

        storage.resolve_or_fetch(&request(name, &remote(4)), fetch).unwrap();

        // One hour after the entry was written, stated in two zones.
        let later = Utc::now() + chrono::Duration::hours(1);
        let tokyo = chrono::FixedOffset::east_opt(9 * 3600).unwrap();
        for stamp in [later.to_rfc3339(), later.with_timezone(&tokyo).to_rfc3339()] {
            let mut newer = remote(4);
            newer.modified = parse_modified(&stamp).unwrap();
            let outcome = storage
                .resolve_or_fetch(&request(name, &newer), |root: &Utf8Path| {
                    calls.set(calls.get() + 1);
                    write_file(root, name, b"text")
                })
                .unwrap();
            assert!(outcome.downloaded, "{stamp} served from cache");
        }
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn failed_forced_extraction_keeps_previous_entry_usable() {
        let temp = tempfile::tempdir().unwrap();
        let storage = storage(&temp);
        let remote = remote(1);
        let name = "ecoinvent 3 report_Energy.zip";

        let first = storage
            .resolve_or_fetch(&request(name, &remote), |root: &Utf8Path| write_zip(root, name))
            .unwrap();

        let mut forced = request(name, &remote);
        forced.force = true;
        let err = storage
            .resolve_or_fetch(&forced, |root: &Utf8Path| write_file(root, name, b"not a zip"))
            .unwrap_err();
        assert_matches!(err, EcoError::Archive(_));
        assert!(!storage.root().as_std_path().join(name).exists());

        let again = storage
            .resolve_or_fetch(&request(name, &remote), |_: &Utf8Path| panic!("must not download"))
            .unwrap();
        assert_eq!(again.path, first.path);
        assert!(again.path.join("wind power.pdf").is_file());
    }

    #[test]
    fn unsafe_filename_is_rejected_before_fetch() {
        let temp = tempfile::tempdir().unwrap();
        let storage = storage(&temp);
        let remote = remote(1);
        let err = storage
            .resolve_or_fetch(&request("../outside.zip", &remote), |_: &Utf8Path| {
                panic!("must not download")
            })
            .unwrap_err();
        assert_matches!(err, EcoError::Filesystem(_));
        assert!(storage.catalogue().is_empty().unwrap());
    }

    #[test]
    fn zip_is_extracted_next_to_archive_and_removed() {
        let temp = tempfile::tempdir().unwrap();
        let storage = storage(&temp);
        let remote = remote(1);
        let name = "ecoinvent 3 report_Agriculture.zip";

        let outcome = storage
            .resolve_or_fetch(&request(name, &remote), |root: &Utf8Path| {
                let path = root.as_std_path().join(name);
                let file = fs::File::create(&path).unwrap();
                let mut writer = zip::ZipWriter::new(file);
                writer
                    .start_file("seed production.pdf", SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(b"%PDF").unwrap();
                writer.finish().unwrap();
                Ok(path)
            })
            .unwrap();

        let expected = storage.root().as_std_path().join("ecoinvent 3 report_Agriculture");
        assert_eq!(outcome.path, expected);
        assert!(expected.join("seed production.pdf").is_file());
        assert!(!storage.root().as_std_path().join(name).exists());

        let entry = storage.catalogue().get(name).unwrap().unwrap();
        assert!(entry.extracted);
        assert_eq!(entry.archive.as_deref(), Some(name));
    }

    #[test]
    fn archive_kept_when_extraction_disabled() {
        let temp = tempfile::tempdir().unwrap();
        let storage = storage(&temp);
        let remote = remote(3);
        let name = "bundle.zip";
        let mut req = request(name, &remote);
        req.extract = false;

        let outcome = storage
            .resolve_or_fetch(&req, |root: &Utf8Path| write_file(root, name, b"zip"))
            .unwrap();
        assert!(outcome.path.is_file());
        assert!(!storage.catalogue().get(name).unwrap().unwrap().extracted);
    }
}
