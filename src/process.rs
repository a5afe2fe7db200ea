//! Single-dataset access: basic info, documentation and per-process exports.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::EcoinventClient;
use crate::domain::{ProcessFileType, SystemModels};
use crate::error::EcoError;

const MAPPING_PAUSE: Duration = Duration::from_millis(100);

/// One row of a process mapping file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub index: u64,
    pub filename: String,
    pub activity_name: String,
    pub reference_product: String,
    pub geography: String,
}

impl MappingEntry {
    fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "filename" => Some(&self.filename),
            "activity_name" => Some(&self.activity_name),
            "reference_product" => Some(&self.reference_product),
            "geography" => Some(&self.geography),
            _ => None,
        }
    }
}

/// Dataset ids of a release, keyed by filename and attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessMapping {
    entries: Vec<MappingEntry>,
}

impl ProcessMapping {
    pub fn new(entries: Vec<MappingEntry>) -> Self {
        Self { entries }
    }

    pub fn from_path(path: &Path) -> Result<Self, EcoError> {
        let text = fs::read_to_string(path).map_err(|err| EcoError::Filesystem(err.to_string()))?;
        serde_json::from_str(&text)
            .map_err(|err| EcoError::Json(format!("{}: {err}", path.display())))
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn by_filename(&self, filename: &str) -> Result<u64, EcoError> {
        self.entries
            .iter()
            .find(|entry| entry.filename == filename)
            .map(|entry| entry.index)
            .ok_or_else(|| {
                EcoError::InvalidSelection(format!("can't find filename `{filename}` in mapping data"))
            })
    }

    /// Exactly one entry must match every given attribute.
    pub fn by_attributes(&self, attributes: &BTreeMap<String, String>) -> Result<u64, EcoError> {
        if attributes.is_empty() {
            return Err(EcoError::InvalidSelection(
                "no attributes given to select a process".to_string(),
            ));
        }
        let mut wanted = Vec::with_capacity(attributes.len());
        for (key, value) in attributes {
            let canonical = canonical_attribute(key).ok_or_else(|| {
                EcoError::InvalidSelection(format!(
                    "unknown attribute `{key}`; use reference_product, activity_name, geography or filename"
                ))
            })?;
            wanted.push((canonical, value.as_str()));
        }

        let matches = self
            .entries
            .iter()
            .filter(|entry| {
                wanted
                    .iter()
                    .all(|(key, value)| entry.attribute(key) == Some(*value))
            })
            .collect::<Vec<_>>();
        match matches.as_slice() {
            [entry] => Ok(entry.index),
            [] => Err(EcoError::InvalidSelection(
                "can't find a dataset for these attributes".to_string(),
            )),
            many => Err(EcoError::InvalidSelection(format!(
                "these attributes don't uniquely identify one dataset - {} found",
                many.len()
            ))),
        }
    }
}

fn canonical_attribute(key: &str) -> Option<&'static str> {
    match key {
        "reference product" | "reference_product" => Some("reference_product"),
        "name" | "activity_name" => Some("activity_name"),
        "location" | "geography" => Some("geography"),
        "filename" => Some("filename"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessSelector {
    DatasetId(String),
    Filename(String),
    Attributes(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedRelease {
    pub version: String,
    pub system_model: String,
}

#[derive(Debug, Deserialize)]
struct ExportFile {
    name: String,
    url: String,
    #[serde(rename = "type")]
    kind: String,
}

pub struct ProcessClient {
    client: EcoinventClient,
    mapping: Option<ProcessMapping>,
    release: Option<SelectedRelease>,
    dataset_id: Option<String>,
}

impl ProcessClient {
    pub fn new(client: EcoinventClient) -> Self {
        Self {
            client,
            mapping: None,
            release: None,
            dataset_id: None,
        }
    }

    pub fn with_mapping(mut self, mapping: ProcessMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn client(&self) -> &EcoinventClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut EcoinventClient {
        &mut self.client
    }

    pub fn release(&self) -> Option<&SelectedRelease> {
        self.release.as_ref()
    }

    pub fn dataset_id(&self) -> Option<&str> {
        self.dataset_id.as_deref()
    }

    /// Selects the release; the system model may be a display name.
    pub fn set_release(&mut self, version: &str, system_model: &str) -> Result<(), EcoError> {
        let versions = self.client.list_versions()?;
        if !versions.iter().any(|known| known == version) {
            return Err(EcoError::NotFound(format!(
                "version {version} not found; known versions: {}",
                versions.join(", ")
            )));
        }

        let system_model = SystemModels::abbreviate(system_model);
        let models = self.client.list_system_models(version, true)?;
        if !models.iter().any(|known| known == system_model) {
            return Err(EcoError::NotFound(format!(
                "system model '{system_model}' not available in {version}; options: {}",
                models.join(", ")
            )));
        }

        self.release = Some(SelectedRelease {
            version: version.to_string(),
            system_model: system_model.to_string(),
        });
        self.dataset_id = None;
        Ok(())
    }

    pub fn select_process(&mut self, selector: ProcessSelector) -> Result<(), EcoError> {
        if self.release.is_none() {
            return Err(EcoError::ReleaseNotSet);
        }
        let dataset_id = match selector {
            ProcessSelector::DatasetId(id) => id,
            ProcessSelector::Filename(filename) => {
                self.mapping()?.by_filename(&filename)?.to_string()
            }
            ProcessSelector::Attributes(attributes) => {
                self.mapping()?.by_attributes(&attributes)?.to_string()
            }
        };
        tracing::debug!(dataset_id = %dataset_id, "selected process");
        self.dataset_id = Some(dataset_id);
        Ok(())
    }

    pub fn basic_info(&mut self) -> Result<Value, EcoError> {
        self.json_request("spold")
    }

    pub fn documentation(&mut self) -> Result<Value, EcoError> {
        self.json_request("spold/documentation")
    }

    /// Downloads one export of the selected dataset into `directory`.
    pub fn get_file(
        &mut self,
        file_type: ProcessFileType,
        directory: &Path,
    ) -> Result<PathBuf, EcoError> {
        let files: Vec<ExportFile> = self.json_request_as("spold/export_file_list")?;
        let Some(meta) = files.iter().find(|file| file.name == file_type.label()) else {
            return Err(EcoError::NotFound(format!(
                "can't find {file_type} in available options: {}",
                files
                    .iter()
                    .map(|file| file.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        };

        let suffix = meta.kind.to_lowercase();
        let mut headers = HeaderMap::new();
        if suffix == "xml" {
            headers.insert(ACCEPT, HeaderValue::from_static("text/plain"));
        }

        let (path, params) = split_url(&self.client.endpoints().api, &meta.url)?;
        let url = format!("{}{path}", self.client.endpoints().api.trim_end_matches('/'));
        let (release, dataset_id) = self.selection()?;
        let filename = format!(
            "ecoinvent-{}-{}-{file_type}-{dataset_id}.{suffix}",
            release.version, release.system_model
        );
        let destination = directory.join(filename);

        if file_type == ProcessFileType::Undefined {
            let signed = self.client.signed_download_url(&url, &params, &headers)?;
            return self.client.download_plain(&signed, &destination);
        }
        self.client.download_authorized(
            &url,
            &params,
            headers,
            &destination,
            file_type.is_gzipped(),
        )
    }

    /// Collects basic info for dataset ids `1..=max_id`.
    pub fn create_remote_mapping(&mut self, max_id: u64) -> Result<Vec<Value>, EcoError> {
        if self.release.is_none() {
            return Err(EcoError::ReleaseNotSet);
        }
        let mut remote = Vec::new();
        for index in 1..=max_id {
            self.dataset_id = Some(index.to_string());
            remote.push(self.basic_info()?);
            tracing::debug!(index, max_id, "fetched basic info");
            thread::sleep(MAPPING_PAUSE);
        }
        Ok(remote)
    }

    fn mapping(&self) -> Result<&ProcessMapping, EcoError> {
        self.mapping.as_ref().ok_or_else(|| {
            EcoError::InvalidSelection(
                "no process mapping loaded; select by dataset id instead".to_string(),
            )
        })
    }

    fn selection(&self) -> Result<(&SelectedRelease, &str), EcoError> {
        let release = self.release.as_ref().ok_or(EcoError::ReleaseNotSet)?;
        let dataset_id = self
            .dataset_id
            .as_deref()
            .ok_or(EcoError::ProcessNotSelected)?;
        Ok((release, dataset_id))
    }

    fn query(&self) -> Result<Vec<(String, String)>, EcoError> {
        let (release, dataset_id) = self.selection()?;
        Ok(vec![
            ("dataset_id".to_string(), dataset_id.to_string()),
            ("version".to_string(), release.version.clone()),
            ("system_model".to_string(), release.system_model.clone()),
        ])
    }

    fn json_request(&mut self, path: &str) -> Result<Value, EcoError> {
        self.json_request_as(path)
    }

    fn json_request_as<T: serde::de::DeserializeOwned>(
        &mut self,
        path: &str,
    ) -> Result<T, EcoError> {
        let params = self.query()?;
        let url = self.client.api_url(path);
        self.client.authorized_json(&url, &params)
    }
}

/// Splits an export URL, absolute or relative to `base`, into its path and
/// query pairs.
fn split_url(base: &str, url: &str) -> Result<(String, Vec<(String, String)>), EcoError> {
    let base = Url::parse(base).map_err(|err| EcoError::Http(format!("{base}: {err}")))?;
    let url = base
        .join(url)
        .map_err(|err| EcoError::Http(format!("{url}: {err}")))?;
    let params = url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    Ok((url.path().to_string(), params))
}
