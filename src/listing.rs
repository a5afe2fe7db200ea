//! Remote file listing: wire types and filename resolution.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::distance::closest_match;
use crate::domain::{ReleaseType, SystemModels};
use crate::error::EcoError;

/// Largest edit distance accepted when the predicted filename is missing.
pub const FUZZY_MATCH_THRESHOLD: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteFile {
    pub name: String,
    pub uuid: String,
    pub size: u64,
    pub last_modified: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReleaseGroup {
    pub system_model_name: String,
    #[serde(default)]
    pub release_files: Vec<RemoteFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VersionListing {
    pub version_name: String,
    #[serde(default)]
    pub releases: Vec<ReleaseGroup>,
    #[serde(default)]
    pub version_files: Vec<RemoteFile>,
}

/// What the cache needs to know about a remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFileDescriptor {
    pub uuid: String,
    pub size: u64,
    pub modified: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TryFrom<&RemoteFile> for RemoteFileDescriptor {
    type Error = EcoError;

    fn try_from(file: &RemoteFile) -> Result<Self, Self::Error> {
        Ok(Self {
            uuid: file.uuid.clone(),
            size: file.size,
            modified: parse_modified(&file.last_modified)?,
            description: file
                .description
                .clone()
                .filter(|description| !description.is_empty()),
        })
    }
}

pub type FileIndex = BTreeMap<String, RemoteFileDescriptor>;

/// Accepts `2023-04-25` (midnight) as well as full ISO date-times.
///
/// The result is naive UTC: offsets are applied, values without one are
/// taken as UTC already.
pub fn parse_modified(value: &str) -> Result<NaiveDateTime, EcoError> {
    let value = value.trim();
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_utc());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(parsed);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| EcoError::Json(format!("invalid last_modified timestamp: {value}")))
}

pub fn index_files<'a, I>(files: I) -> Result<FileIndex, EcoError>
where
    I: IntoIterator<Item = &'a RemoteFile>,
{
    files
        .into_iter()
        .map(|file| Ok((file.name.clone(), RemoteFileDescriptor::try_from(file)?)))
        .collect()
}

pub fn find_version<'a>(
    listings: &'a [VersionListing],
    version: &str,
) -> Result<&'a VersionListing, EcoError> {
    listings
        .iter()
        .find(|listing| listing.version_name == version)
        .ok_or_else(|| {
            let known = listings
                .iter()
                .map(|listing| listing.version_name.as_str())
                .collect::<Vec<_>>();
            EcoError::NotFound(format!(
                "{version} not in found versions: {}",
                known.join(", ")
            ))
        })
}

impl VersionListing {
    /// Release files across every system model of this version.
    pub fn release_index(&self) -> Result<FileIndex, EcoError> {
        index_files(self.releases.iter().flat_map(|group| &group.release_files))
    }

    pub fn extra_index(&self) -> Result<FileIndex, EcoError> {
        index_files(&self.version_files)
    }

    pub fn system_models(&self, translate: bool) -> Vec<String> {
        self.releases
            .iter()
            .map(|group| {
                if translate {
                    SystemModels::abbreviate(&group.system_model_name).to_string()
                } else {
                    group.system_model_name.clone()
                }
            })
            .collect()
    }
}

/// Predicts the archive name for a release and corrects it against the
/// names the server actually publishes.
pub fn resolve_filename(
    available: &FileIndex,
    version: &str,
    system_model: &str,
    release_type: ReleaseType,
) -> Result<String, EcoError> {
    let abbr = SystemModels::abbreviate(system_model);
    let predicted = release_type.filename(version, abbr);
    if available.contains_key(&predicted) {
        return Ok(predicted);
    }

    match closest_match(&predicted, available.keys().map(String::as_str)) {
        Some((distance, name)) if distance <= FUZZY_MATCH_THRESHOLD => {
            tracing::info!(
                predicted = %predicted,
                matched = %name,
                distance,
                "using close match for predicted filename"
            );
            Ok(name.to_string())
        }
        closest => {
            let names = available.keys().cloned().collect::<Vec<_>>();
            let closest = closest
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| "none".to_string());
            Err(EcoError::NotFound(format!(
                "can't find predicted filename {predicted}; closest match is {closest}. \
                 Filenames for version {version}:\n\t{}",
                names.join("\n\t")
            )))
        }
    }
}
