use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::CacheKind;
use crate::error::EcoError;
use crate::settings::default_data_dir;

pub const CATALOGUE_FILE: &str = "catalogue.json";

/// One cached download, keyed in the catalogue by its remote filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: String,
    pub extracted: bool,
    /// UTC, comparable with remote modification times.
    pub created: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    pub system_model: Option<String>,
    pub version: Option<String>,
    pub kind: CacheKind,
}

/// Filename to [`CacheEntry`] map persisted as one JSON file.
///
/// Every operation loads the whole file and `set`/`delete` rewrite it in
/// full. There is no locking: two processes sharing a cache directory must
/// be serialised by the caller.
#[derive(Debug, Clone)]
pub struct Catalogue {
    path: Utf8PathBuf,
}

impl Catalogue {
    pub fn open(path: Utf8PathBuf) -> Result<Self, EcoError> {
        let catalogue = Self { path };
        if !catalogue.path.as_std_path().exists() {
            catalogue.write(&BTreeMap::new())?;
        }
        Ok(catalogue)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, EcoError> {
        Ok(self.load()?.remove(key))
    }

    pub fn contains(&self, key: &str) -> Result<bool, EcoError> {
        Ok(self.load()?.contains_key(key))
    }

    pub fn set(&self, key: &str, entry: CacheEntry) -> Result<(), EcoError> {
        let mut data = self.load()?;
        data.insert(key.to_string(), entry);
        self.write(&data)
    }

    /// Returns the removed entry, if any.
    pub fn delete(&self, key: &str) -> Result<Option<CacheEntry>, EcoError> {
        let mut data = self.load()?;
        let removed = data.remove(key);
        if removed.is_some() {
            self.write(&data)?;
        }
        Ok(removed)
    }

    pub fn keys(&self) -> Result<Vec<String>, EcoError> {
        Ok(self.load()?.into_keys().collect())
    }

    pub fn len(&self) -> Result<usize, EcoError> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, EcoError> {
        Ok(self.load()?.is_empty())
    }

    pub fn entries(&self) -> Result<BTreeMap<String, CacheEntry>, EcoError> {
        self.load()
    }

    fn load(&self) -> Result<BTreeMap<String, CacheEntry>, EcoError> {
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|_| EcoError::CatalogueRead(self.path.clone().into_std_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| EcoError::Json(err.to_string()))
    }

    fn write(&self, data: &BTreeMap<String, CacheEntry>) -> Result<(), EcoError> {
        let content =
            serde_json::to_vec_pretty(data).map_err(|err| EcoError::Json(err.to_string()))?;
        fs::write(self.path.as_std_path(), content)
            .map_err(|err| EcoError::Filesystem(err.to_string()))
    }
}

/// Cache root directory holding `catalogue.json` and the downloads.
#[derive(Debug, Clone)]
pub struct CachedStorage {
    root: Utf8PathBuf,
    catalogue: Catalogue,
}

impl CachedStorage {
    pub fn new(root: Utf8PathBuf) -> Result<Self, EcoError> {
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| EcoError::Filesystem(err.to_string()))?;
        let catalogue = Catalogue::open(root.join(CATALOGUE_FILE))?;
        Ok(Self { root, catalogue })
    }

    /// Uses `output_path` when given, the platform data directory otherwise.
    pub fn from_output_path(output_path: Option<&str>) -> Result<Self, EcoError> {
        match output_path {
            Some(path) => Self::new(Utf8PathBuf::from(path)),
            None => Self::new(Self::default_root()?),
        }
    }

    pub fn default_root() -> Result<Utf8PathBuf, EcoError> {
        default_data_dir()
            .and_then(|dir| Utf8PathBuf::from_path_buf(dir.join("cache")).ok())
            .ok_or_else(|| EcoError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    /// Removes every cached file and the catalogue, leaving an empty root.
    pub fn clear(&self) -> Result<(), EcoError> {
        if self.root.as_std_path().exists() {
            fs::remove_dir_all(self.root.as_std_path())
                .map_err(|err| EcoError::Filesystem(err.to_string()))?;
        }
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| EcoError::Filesystem(err.to_string()))?;
        Catalogue::open(self.catalogue.path().to_path_buf())?;
        Ok(())
    }
}
