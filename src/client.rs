use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::domain::UrlNamespace;
use crate::download::Downloader;
use crate::fs_util::check_file_name;
use crate::error::EcoError;
use crate::listing::{
    FileIndex, ReleaseGroup, RemoteFile, VersionListing, find_version, index_files,
};
use crate::session::{Credentials, Session, identity_headers};
use crate::settings::Settings;
use crate::store::CachedStorage;

pub const DEFAULT_TOKEN_URL: &str =
    "https://sso.ecoinvent.org/realms/ecoinvent/protocol/openid-connect/token";
pub const DEFAULT_API_URL: &str = "https://api.ecoquery.ecoinvent.org/";
pub const DEFAULT_CLIENT_ID: &str = "apiv2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Identity (token) endpoint.
    pub sso: String,
    /// API base URL, with trailing slash.
    pub api: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            sso: DEFAULT_TOKEN_URL.to_string(),
            api: DEFAULT_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoints: Endpoints,
    pub client_id: String,
    /// Sent with every request after the library headers; same-name
    /// entries replace the library values.
    pub custom_headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            custom_headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    download_url: String,
}

/// Authenticated access to the listing, indirection and download endpoints.
pub struct EcoinventClient {
    http: Client,
    downloader: Downloader,
    endpoints: Endpoints,
    session: Session,
    storage: CachedStorage,
}

impl EcoinventClient {
    pub fn new(settings: &Settings, config: ClientConfig) -> Result<Self, EcoError> {
        let storage = CachedStorage::from_output_path(settings.output_path.as_deref())?;
        Self::with_storage(settings, config, storage)
    }

    pub fn with_storage(
        settings: &Settings,
        config: ClientConfig,
        storage: CachedStorage,
    ) -> Result<Self, EcoError> {
        let username = settings
            .username
            .clone()
            .ok_or(EcoError::MissingSetting("username", "USERNAME"))?;
        let password = settings
            .password
            .clone()
            .ok_or(EcoError::MissingSetting("password", "PASSWORD"))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ecoinvent-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EcoError::Http(err.to_string()))?,
        );
        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|err| EcoError::Http(err.to_string()))?;

        let session = Session::new(
            http.clone(),
            config.endpoints.sso.clone(),
            Credentials {
                username,
                password,
                client_id: config.client_id.clone(),
            },
            identity_headers(&config.custom_headers)?,
        );

        tracing::info!(
            user = %session.username(),
            client_id = %config.client_id,
            output = %storage.root(),
            custom_headers = !config.custom_headers.is_empty(),
            "instantiated ecoinvent client"
        );

        Ok(Self {
            http,
            downloader: Downloader::new()?,
            endpoints: config.endpoints,
            session,
            storage,
        })
    }

    pub fn storage(&self) -> &CachedStorage {
        &self.storage
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn login(&mut self) -> Result<(), EcoError> {
        self.session.login()
    }

    pub fn refresh_tokens(&mut self) -> Result<(), EcoError> {
        self.session.refresh()
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.endpoints.api, path.trim_start_matches('/'))
    }

    /// Authenticated GET; the session is refreshed first when stale.
    pub fn authorized_get(
        &mut self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Response, EcoError> {
        self.authorized_get_with(url, params, &HeaderMap::new())
    }

    /// Like [`Self::authorized_get`], with `extra_headers` added on top.
    pub fn authorized_get_with(
        &mut self,
        url: &str,
        params: &[(String, String)],
        extra_headers: &HeaderMap,
    ) -> Result<Response, EcoError> {
        let mut headers = self.session.authorized_headers()?;
        for (name, value) in extra_headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        tracing::debug!(url, user = %self.session.username(), "requesting URL");
        self.http
            .get(url)
            .headers(headers)
            .query(params)
            .send()
            .map_err(|err| EcoError::Http(err.to_string()))
    }

    pub fn authorized_json<T: DeserializeOwned>(
        &mut self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<T, EcoError> {
        let response = self.authorized_get(url, params)?;
        parse_json(url, response)
    }

    pub fn all_files(&mut self) -> Result<Vec<VersionListing>, EcoError> {
        let url = self.api_url("files");
        let response = self.authorized_get(&url, &[])?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(EcoError::LicenseDenied(
                "your license doesn't permit file access".to_string(),
            ));
        }
        parse_json(&url, response)
    }

    pub fn all_reports(&mut self) -> Result<Vec<RemoteFile>, EcoError> {
        let url = self.api_url("files/reports");
        let response = self.authorized_get(&url, &[])?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(EcoError::LicenseDenied(
                "your license doesn't permit report access".to_string(),
            ));
        }
        parse_json(&url, response)
    }

    pub fn version_listing(&mut self, version: &str) -> Result<VersionListing, EcoError> {
        let listings = self.all_files()?;
        find_version(&listings, version).cloned()
    }

    pub fn list_versions(&mut self) -> Result<Vec<String>, EcoError> {
        Ok(self
            .all_files()?
            .into_iter()
            .map(|listing| listing.version_name)
            .collect())
    }

    pub fn list_system_models(
        &mut self,
        version: &str,
        translate: bool,
    ) -> Result<Vec<String>, EcoError> {
        Ok(self.version_listing(version)?.system_models(translate))
    }

    pub fn get_release_files(&mut self, version: &str) -> Result<Vec<ReleaseGroup>, EcoError> {
        Ok(self.version_listing(version)?.releases)
    }

    pub fn release_file_index(&mut self, version: &str) -> Result<FileIndex, EcoError> {
        self.version_listing(version)?.release_index()
    }

    pub fn list_extra_files(&mut self, version: &str) -> Result<FileIndex, EcoError> {
        self.version_listing(version)?.extra_index()
    }

    pub fn list_report_files(&mut self) -> Result<FileIndex, EcoError> {
        index_files(&self.all_reports()?)
    }

    /// Asks the indirection endpoint for a short-lived signed URL.
    pub fn signed_download_url(
        &mut self,
        url: &str,
        params: &[(String, String)],
        extra_headers: &HeaderMap,
    ) -> Result<String, EcoError> {
        let response = self.authorized_get_with(url, params, extra_headers)?;
        let signed: SignedUrl = parse_json(url, response)?;
        Ok(signed.download_url)
    }

    /// Resolves `files/<namespace>/<uuid>` and streams the signed URL
    /// (without credentials) to `directory/filename`.
    pub fn download_by_uuid(
        &mut self,
        namespace: UrlNamespace,
        uuid: &str,
        directory: &Path,
        filename: &str,
    ) -> Result<PathBuf, EcoError> {
        check_file_name(filename)?;
        let url = self.api_url(&format!("files/{}/{uuid}", namespace.as_str()));
        let signed = self.signed_download_url(&url, &[], &HeaderMap::new())?;
        let destination = directory.join(filename);
        self.downloader
            .download(&signed, &HeaderMap::new(), &[], &destination)?;
        Ok(destination)
    }

    /// Streams an API resource with credentials attached.
    pub fn download_authorized(
        &mut self,
        url: &str,
        params: &[(String, String)],
        extra_headers: HeaderMap,
        destination: &Path,
        gzipped: bool,
    ) -> Result<PathBuf, EcoError> {
        let mut headers = self.session.authorized_headers()?;
        for (name, value) in extra_headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if gzipped {
            self.downloader
                .download_gzipped(url, &headers, params, destination)?;
        } else {
            self.downloader.download(url, &headers, params, destination)?;
        }
        Ok(destination.to_path_buf())
    }

    /// Streams an unauthenticated URL, typically a signed one.
    pub fn download_plain(&self, url: &str, destination: &Path) -> Result<PathBuf, EcoError> {
        self.downloader
            .download(url, &HeaderMap::new(), &[], destination)?;
        Ok(destination.to_path_buf())
    }
}

fn parse_json<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, EcoError> {
    if !response.status().is_success() {
        return Err(EcoError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    response
        .json()
        .map_err(|err| EcoError::Json(format!("{url}: {err}")))
}
