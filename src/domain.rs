use std::fmt;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EcoError;

/// Archive kinds published for each release and system model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    Ecospold,
    Matrix,
    Lci,
    Lcia,
    CumulativeLci,
    CumulativeLcia,
}

impl ReleaseType {
    pub const ALL: [ReleaseType; 6] = [
        ReleaseType::Ecospold,
        ReleaseType::Matrix,
        ReleaseType::Lci,
        ReleaseType::Lcia,
        ReleaseType::CumulativeLci,
        ReleaseType::CumulativeLcia,
    ];

    /// Filename template with `{version}` and `{system_model_abbr}` placeholders.
    pub fn template(self) -> &'static str {
        match self {
            ReleaseType::Ecospold => "ecoinvent {version}_{system_model_abbr}_ecoSpold02.7z",
            ReleaseType::Matrix => "universal_matrix_export_{version}_{system_model_abbr}.7z",
            ReleaseType::Lci => "ecoinvent {version}_{system_model_abbr}_lci_ecoSpold02.7z",
            ReleaseType::Lcia => "ecoinvent {version}_{system_model_abbr}_lcia_ecoSpold02.7z",
            ReleaseType::CumulativeLci => {
                "ecoinvent {version}_{system_model_abbr}_cumulative_lci_xlsx.7z"
            }
            ReleaseType::CumulativeLcia => {
                "ecoinvent {version}_{system_model_abbr}_cumulative_lcia_xlsx.7z"
            }
        }
    }

    pub fn filename(self, version: &str, system_model_abbr: &str) -> String {
        self.template()
            .replace("{version}", version)
            .replace("{system_model_abbr}", system_model_abbr)
    }

    /// Releases made of ecoSpold datasets, whose embedded version gets rewritten.
    pub fn is_spold(self) -> bool {
        matches!(
            self,
            ReleaseType::Ecospold | ReleaseType::Lci | ReleaseType::Lcia
        )
    }
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseType::Ecospold => write!(f, "ecospold"),
            ReleaseType::Matrix => write!(f, "matrix"),
            ReleaseType::Lci => write!(f, "lci"),
            ReleaseType::Lcia => write!(f, "lcia"),
            ReleaseType::CumulativeLci => write!(f, "cumulative_lci"),
            ReleaseType::CumulativeLcia => write!(f, "cumulative_lcia"),
        }
    }
}

/// Display name to abbreviation table for system models.
pub struct SystemModels;

impl SystemModels {
    const TABLE: [(&'static str, &'static str); 4] = [
        ("Allocation cut-off by classification", "cutoff"),
        ("Substitution, consequential, long-term", "consequential"),
        ("Allocation at the Point of Substitution", "apos"),
        ("Allocation, cut-off, EN15804", "EN15804"),
    ];

    /// Unknown names are returned unchanged.
    pub fn abbreviate(name: &str) -> &str {
        Self::TABLE
            .iter()
            .find(|(display, _)| *display == name)
            .map(|(_, abbr)| *abbr)
            .unwrap_or(name)
    }

    pub fn display_name(abbr: &str) -> &str {
        Self::TABLE
            .iter()
            .find(|(_, short)| *short == abbr)
            .map(|(display, _)| *display)
            .unwrap_or(abbr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Report,
    Extra,
    Release,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKind::Report => write!(f, "report"),
            CacheKind::Extra => write!(f, "extra"),
            CacheKind::Release => write!(f, "release"),
        }
    }
}

/// Path segment of the download indirection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlNamespace {
    Release,
    Extra,
    Report,
}

impl UrlNamespace {
    pub fn as_str(self) -> &'static str {
        match self {
            UrlNamespace::Release => "r",
            UrlNamespace::Extra => "v",
            UrlNamespace::Report => "report",
        }
    }
}

/// Major and minor release numbers of a version string such as `3.9.1`.
pub fn major_minor(version: &str) -> Result<(u32, u32), EcoError> {
    let pattern = Regex::new(r"^(\d+)\.(\d+)(?:\.\d+)*$")
        .map_err(|err| EcoError::InvalidVersion(err.to_string()))?;
    let captures = pattern
        .captures(version.trim())
        .ok_or_else(|| EcoError::InvalidVersion(version.to_string()))?;
    let major = captures[1]
        .parse()
        .map_err(|_| EcoError::InvalidVersion(version.to_string()))?;
    let minor = captures[2]
        .parse()
        .map_err(|_| EcoError::InvalidVersion(version.to_string()))?;
    Ok((major, minor))
}

/// Per-dataset export formats offered by the process endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProcessFileType {
    Upr,
    Lci,
    Lcia,
    Pdf,
    Undefined,
}

impl ProcessFileType {
    /// Label used by the remote export file list.
    pub fn label(self) -> &'static str {
        match self {
            ProcessFileType::Upr => "Unit Process",
            ProcessFileType::Lci => "Life Cycle Inventory",
            ProcessFileType::Lcia => "Life Cycle Impact Assessment",
            ProcessFileType::Pdf => "Dataset Report",
            ProcessFileType::Undefined => {
                "Undefined (unlinked and multi-output) Dataset Report"
            }
        }
    }

    pub fn is_gzipped(self) -> bool {
        matches!(
            self,
            ProcessFileType::Upr | ProcessFileType::Lci | ProcessFileType::Lcia
        )
    }
}

impl fmt::Display for ProcessFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessFileType::Upr => write!(f, "upr"),
            ProcessFileType::Lci => write!(f, "lci"),
            ProcessFileType::Lcia => write!(f, "lcia"),
            ProcessFileType::Pdf => write!(f, "pdf"),
            ProcessFileType::Undefined => write!(f, "undefined"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn release_filename_from_template() {
        assert_eq!(
            ReleaseType::Ecospold.filename("3.5", "cutoff"),
            "ecoinvent 3.5_cutoff_ecoSpold02.7z"
        );
        assert_eq!(
            ReleaseType::Matrix.filename("3.9.1", "apos"),
            "universal_matrix_export_3.9.1_apos.7z"
        );
        assert_eq!(
            ReleaseType::CumulativeLcia.filename("3.10", "consequential"),
            "ecoinvent 3.10_consequential_cumulative_lcia_xlsx.7z"
        );
    }

    #[test]
    fn system_model_table_falls_back_to_input() {
        assert_eq!(
            SystemModels::abbreviate("Allocation cut-off by classification"),
            "cutoff"
        );
        assert_eq!(SystemModels::abbreviate("cutoff"), "cutoff");
        assert_eq!(
            SystemModels::display_name("apos"),
            "Allocation at the Point of Substitution"
        );
        assert_eq!(SystemModels::display_name("undefined"), "undefined");
    }

    #[test]
    fn parse_major_minor() {
        assert_eq!(major_minor("3.9.1").unwrap(), (3, 9));
        assert_eq!(major_minor("3.9").unwrap(), (3, 9));
        assert_eq!(major_minor("3.10").unwrap(), (3, 10));
        assert_matches!(major_minor("3"), Err(EcoError::InvalidVersion(_)));
        assert_matches!(major_minor("v3.x"), Err(EcoError::InvalidVersion(_)));
    }

    #[test]
    fn spold_release_types() {
        let spold = ReleaseType::ALL
            .iter()
            .filter(|kind| kind.is_spold())
            .count();
        assert_eq!(spold, 3);
        assert!(!ReleaseType::Matrix.is_spold());
    }
}
