use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::EcoError;

const ENV_PREFIX: &str = "EI_";

/// User settings; `None` means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    Username,
    Password,
    OutputPath,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::Username,
        SettingKey::Password,
        SettingKey::OutputPath,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SettingKey::Username => "username",
            SettingKey::Password => "password",
            SettingKey::OutputPath => "output_path",
        }
    }

    pub fn env_var(self) -> String {
        format!("{ENV_PREFIX}{}", self.name().to_uppercase())
    }

    pub fn secret_file(self) -> String {
        format!("{ENV_PREFIX}{}", self.name())
    }

    pub fn parse(value: &str) -> Result<Self, EcoError> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == value.trim())
            .ok_or_else(|| {
                EcoError::NotFound(format!(
                    "unknown setting {value}; expected username, password or output_path"
                ))
            })
    }
}

impl Settings {
    pub fn get(&self, key: SettingKey) -> Option<&str> {
        match key {
            SettingKey::Username => self.username.as_deref(),
            SettingKey::Password => self.password.as_deref(),
            SettingKey::OutputPath => self.output_path.as_deref(),
        }
    }

    fn set(&mut self, key: SettingKey, value: Option<String>) {
        match key {
            SettingKey::Username => self.username = value,
            SettingKey::Password => self.password = value,
            SettingKey::OutputPath => self.output_path = value,
        }
    }
}

/// Resolves settings: manual > environment > secret file > unset.
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    secrets_dir: Option<PathBuf>,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self {
            secrets_dir: default_data_dir().map(|dir| dir.join("secrets")),
        }
    }

    pub fn with_secrets_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            secrets_dir: Some(dir.into()),
        }
    }

    pub fn secrets_dir(&self) -> Option<&Path> {
        self.secrets_dir.as_deref()
    }

    pub fn resolve(&self, manual: Settings) -> Settings {
        self.resolve_with(manual, |name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(&self, manual: Settings, env_lookup: F) -> Settings
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut resolved = Settings::default();
        for key in SettingKey::ALL {
            let value = non_empty(manual.get(key).map(str::to_string))
                .or_else(|| non_empty(env_lookup(&key.env_var())))
                .or_else(|| non_empty(self.read_secret(key)));
            resolved.set(key, value);
        }
        resolved
    }

    /// Stores `value` as a secret file so later runs pick it up.
    pub fn write_secret(&self, key: SettingKey, value: &str) -> Result<PathBuf, EcoError> {
        let dir = self.secrets_dir.as_ref().ok_or_else(|| {
            EcoError::Filesystem("unable to resolve secrets directory".to_string())
        })?;
        fs::create_dir_all(dir).map_err(|err| EcoError::Filesystem(err.to_string()))?;
        let path = dir.join(key.secret_file());
        fs::write(&path, value.trim()).map_err(|err| EcoError::Filesystem(err.to_string()))?;
        Ok(path)
    }

    fn read_secret(&self, key: SettingKey) -> Option<String> {
        let path = self.secrets_dir.as_ref()?.join(key.secret_file());
        fs::read_to_string(path).ok()
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform application-data directory shared by settings and cache.
pub fn default_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "pylca", "EcoinventInterface")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
