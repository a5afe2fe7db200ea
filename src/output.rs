use std::collections::BTreeMap;
use std::io::{self, Write};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::listing::FileIndex;
use crate::store::CacheEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRow {
    pub name: String,
    pub uuid: String,
    pub size: u64,
    pub modified: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileListing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub files: Vec<FileRow>,
}

impl FileListing {
    pub fn new(version: Option<&str>, index: &FileIndex) -> Self {
        let files = index
            .iter()
            .map(|(name, remote)| FileRow {
                name: name.clone(),
                uuid: remote.uuid.clone(),
                size: remote.size,
                modified: remote.modified,
                description: remote.description.clone(),
            })
            .collect();
        Self {
            version: version.map(str::to_string),
            files,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheListing {
    pub root: String,
    pub entries: BTreeMap<String, CacheEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub root: String,
    pub removed: usize,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_files(result: &FileListing) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_cache(result: &CacheListing) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
