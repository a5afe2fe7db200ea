use std::fs;
use std::path::PathBuf;

use serde::Serialize;

use crate::cache::{CacheOutcome, CacheRequest};
use crate::client::EcoinventClient;
use crate::distance::closest_match;
use crate::domain::{CacheKind, ReleaseType, SystemModels, UrlNamespace};
use crate::error::EcoError;
use crate::listing::{FileIndex, RemoteFileDescriptor, resolve_filename};
use crate::version_fix::{VersionFixSummary, fix_release_directory};

const LCIA_ARCHIVE_TOLERANCE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOptions {
    pub extract: bool,
    pub force_redownload: bool,
    /// Rewrite embedded release numbers after a fresh download.
    pub fix_version: bool,
}

impl Default for ReleaseOptions {
    fn default() -> Self {
        Self {
            extract: true,
            force_redownload: false,
            fix_version: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseResult {
    pub filename: String,
    pub path: PathBuf,
    pub downloaded: bool,
    pub version_fix: Option<VersionFixSummary>,
}

impl EcoinventClient {
    /// Fetches a release archive through the cache.
    ///
    /// Version metadata is only rewritten when this call actually
    /// downloaded and extracted the archive; cache hits are returned as is.
    pub fn get_release(
        &mut self,
        version: &str,
        system_model: &str,
        release_type: ReleaseType,
        options: ReleaseOptions,
    ) -> Result<ReleaseResult, EcoError> {
        let available = self.release_file_index(version)?;
        let filename = resolve_filename(&available, version, system_model, release_type)?;
        let remote = lookup(&available, &filename, version)?;
        let system_model = SystemModels::abbreviate(system_model);

        let request = CacheRequest {
            filename: &filename,
            remote,
            kind: CacheKind::Release,
            version: Some(version),
            system_model: Some(system_model),
            extract: options.extract,
            force: options.force_redownload,
        };
        let outcome = self.cached_download(&request, UrlNamespace::Release)?;

        let version_fix = if options.fix_version
            && release_type.is_spold()
            && outcome.downloaded
            && outcome.path.is_dir()
        {
            Some(fix_release_directory(&outcome.path, version)?)
        } else {
            None
        };

        Ok(ReleaseResult {
            filename,
            path: outcome.path,
            downloaded: outcome.downloaded,
            version_fix,
        })
    }

    pub fn get_extra(
        &mut self,
        version: &str,
        filename: &str,
        options: ReleaseOptions,
    ) -> Result<CacheOutcome, EcoError> {
        let available = self.list_extra_files(version)?;
        let remote = lookup(&available, filename, version)?;
        let request = CacheRequest {
            filename,
            remote,
            kind: CacheKind::Extra,
            version: Some(version),
            system_model: None,
            extract: options.extract,
            force: options.force_redownload,
        };
        self.cached_download(&request, UrlNamespace::Extra)
    }

    pub fn get_report(
        &mut self,
        filename: &str,
        options: ReleaseOptions,
    ) -> Result<CacheOutcome, EcoError> {
        let reports = self.list_report_files()?;
        let remote = lookup(&reports, filename, "reports")?;
        let request = CacheRequest {
            filename,
            remote,
            kind: CacheKind::Report,
            version: None,
            system_model: None,
            extract: options.extract,
            force: options.force_redownload,
        };
        self.cached_download(&request, UrlNamespace::Report)
    }

    /// Locates the LCIA implementation spreadsheet of a version, whose
    /// archive and file names vary between releases.
    pub fn excel_lcia_file_for_version(&mut self, version: &str) -> Result<PathBuf, EcoError> {
        let versions = self.list_versions()?;
        if !versions.iter().any(|known| known == version) {
            return Err(EcoError::NotFound(format!(
                "invalid version {version}; known versions: {}",
                versions.join(", ")
            )));
        }

        let extras = self.list_extra_files(version)?;
        let guess = format!("ecoinvent {version}_LCIA_implementation.7z");
        let candidates = extras
            .keys()
            .map(String::as_str)
            .filter(|name| name.to_lowercase().contains("lcia") && name.contains(version));
        let archive = match closest_match(&guess, candidates) {
            Some((distance, name)) if distance <= LCIA_ARCHIVE_TOLERANCE => name.to_string(),
            Some((_, name)) => {
                return Err(EcoError::NotFound(format!(
                    "closest LCIA filename match to {guess} is {name}, but this is too different"
                )));
            }
            None => {
                return Err(EcoError::NotFound(format!(
                    "can't find LCIA file close to {guess} among {}",
                    extras.keys().cloned().collect::<Vec<_>>().join(", ")
                )));
            }
        };

        let outcome = self.get_extra(version, &archive, ReleaseOptions::default())?;
        let guess = format!("LCIA_implementation_{version}.xlsx");
        let files = if outcome.path.is_dir() {
            fs::read_dir(&outcome.path)
                .map_err(|err| EcoError::Filesystem(err.to_string()))?
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .collect::<Vec<_>>()
        } else {
            vec![outcome.path.clone()]
        };
        let names = files
            .iter()
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("xlsx"))
                    .unwrap_or(false)
            })
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .filter(|name| name.contains(version))
            .collect::<Vec<_>>();

        match closest_match(&guess, names) {
            Some((distance, name)) if distance < LCIA_ARCHIVE_TOLERANCE => {
                let dir = if outcome.path.is_dir() {
                    outcome.path.clone()
                } else {
                    outcome.path.parent().map(PathBuf::from).unwrap_or_default()
                };
                Ok(dir.join(name))
            }
            _ => Err(EcoError::NotFound(format!(
                "can't find LCIA Excel file like {guess} in {}",
                outcome.path.display()
            ))),
        }
    }

    fn cached_download(
        &mut self,
        request: &CacheRequest<'_>,
        namespace: UrlNamespace,
    ) -> Result<CacheOutcome, EcoError> {
        let storage = self.storage().clone();
        storage.resolve_or_fetch(request, |root| {
            self.download_by_uuid(
                namespace,
                &request.remote.uuid,
                root.as_std_path(),
                request.filename,
            )
        })
    }
}

fn lookup<'a>(
    available: &'a FileIndex,
    filename: &str,
    scope: &str,
) -> Result<&'a RemoteFileDescriptor, EcoError> {
    available.get(filename).ok_or_else(|| {
        EcoError::NotFound(format!(
            "{filename} not available in {scope}; available files:\n\t{}",
            available.keys().cloned().collect::<Vec<_>>().join("\n\t")
        ))
    })
}
