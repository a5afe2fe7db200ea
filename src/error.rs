use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EcoError {
    #[error("missing {0}; set it manually, via EI_{1} or as a secret file")]
    MissingSetting(&'static str, &'static str),

    #[error("login failed with status {status}: {message}")]
    #[diagnostic(help("check username and password, or log in to ecoquery once to finish account setup"))]
    Authentication { status: u16, message: String },

    #[error("{0}")]
    LicenseDenied(String),

    #[error("{0}")]
    NotFound(String),

    #[error(
        "{filename} in cache inconsistent with request: \
         cached version {cached_version:?} vs requested {requested_version:?}, \
         cached system model {cached_system_model:?} vs requested {requested_system_model:?}, \
         cached kind {cached_kind} vs requested {requested_kind}"
    )]
    #[diagnostic(help("clear the cache or remove the entry from catalogue.json"))]
    CacheConsistency {
        filename: String,
        cached_version: Option<String>,
        requested_version: Option<String>,
        cached_system_model: Option<String>,
        requested_system_model: Option<String>,
        cached_kind: String,
        requested_kind: String,
    },

    #[error("request failed: {0}")]
    Http(String),

    #[error("URL '{url}' returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read catalogue at {0}")]
    CatalogueRead(PathBuf),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("failed to parse JSON: {0}")]
    Json(String),

    #[error("invalid version string: {0}")]
    InvalidVersion(String),

    #[error("cannot fix version metadata: {0}")]
    VersionFix(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("must call set_release() before selecting or querying a process")]
    ReleaseNotSet,

    #[error("must call select_process() first")]
    ProcessNotSelected,

    #[error("{0}")]
    InvalidSelection(String),
}
