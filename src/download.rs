use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tempfile::NamedTempFile;

use crate::error::EcoError;
use crate::fs_util::remove_file_or_warn;

pub const CHUNK_SIZE: usize = 128 * 1024;

/// Streams response bodies to disk. No retries: a failed attempt is
/// returned to the caller as is.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Result<Self, EcoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ecoinvent-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EcoError::Http(err.to_string()))?,
        );
        // Archives run to hundreds of megabytes, so only connecting is bounded.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(60))
            .timeout(None)
            .build()
            .map_err(|err| EcoError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Writes the body of a GET to `destination` and returns the byte count.
    pub fn download(
        &self,
        url: &str,
        headers: &HeaderMap,
        params: &[(String, String)],
        destination: &Path,
    ) -> Result<u64, EcoError> {
        let mut response = self
            .client
            .get(url)
            .headers(headers.clone())
            .query(params)
            .send()
            .map_err(|err| EcoError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(EcoError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        // Partial transfers never appear under the final name.
        let parent = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut file = NamedTempFile::new_in(parent)
            .map_err(|err| EcoError::Filesystem(err.to_string()))?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| EcoError::Http(err.to_string()))?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(|err| EcoError::Filesystem(err.to_string()))?;
            written += read as u64;
        }
        file.flush()
            .map_err(|err| EcoError::Filesystem(err.to_string()))?;
        file.persist(destination)
            .map_err(|err| EcoError::Filesystem(err.to_string()))?;

        tracing::debug!(
            url,
            path = %destination.display(),
            bytes = written,
            "downloaded file"
        );
        Ok(written)
    }

    /// Downloads a gzip-wrapped text payload and stores it decompressed.
    ///
    /// The raw bytes land in `<destination>.gz` first, which is removed
    /// afterwards; a refused delete is only logged.
    pub fn download_gzipped(
        &self,
        url: &str,
        headers: &HeaderMap,
        params: &[(String, String)],
        destination: &Path,
    ) -> Result<u64, EcoError> {
        let compressed = gz_path(destination);
        self.download(url, headers, params, &compressed)?;
        decompress_gzip_text(&compressed, destination)?;
        remove_file_or_warn(&compressed);
        fs::metadata(destination)
            .map(|meta| meta.len())
            .map_err(|err| EcoError::Filesystem(err.to_string()))
    }
}

pub fn gz_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".gz");
    destination.with_file_name(name)
}

/// Decompresses gzip text into UTF-8, dropping a leading byte order mark.
pub fn decompress_gzip_text(source: &Path, destination: &Path) -> Result<(), EcoError> {
    let file = File::open(source).map_err(|err| EcoError::Filesystem(err.to_string()))?;
    let mut decoder = GzDecoder::new(file);
    let mut bytes = Vec::new();
    decoder
        .read_to_end(&mut bytes)
        .map_err(|err| EcoError::Archive(format!("gunzip {}: {err}", source.display())))?;
    let text = String::from_utf8(bytes).map_err(|err| {
        EcoError::Archive(format!("{} is not UTF-8 text: {err}", source.display()))
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    fs::write(destination, text).map_err(|err| EcoError::Filesystem(err.to_string()))
}
