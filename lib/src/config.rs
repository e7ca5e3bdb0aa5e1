//! Settings for loading the registry and building the dashboard.
//!
//! Read from a toml file (by default `../data/registry.toml`). Every key is optional:
//!
//! ```toml
//! [source]
//! path = "../data/registry.xlsx"
//! sheet = "patients"
//! numeric-columns = ["height", "weight"]
//!
//! [cohort]
//! terms = ["thyroid"]
//! years-to-primary = "any-slot"   # or "matching-slot"
//!
//! [dashboard]
//! default-feature = "gender"
//! default-patient = 58
//! bin-width = 1
//! missing-label = "NS"
//! ```
use crate::{cohort::Criteria, data_path, util, PatientId, PrimaryRule, Result};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Where the config file lives if none is given.
pub const DEFAULT_CONFIG: &str = "registry.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub source: SourceConfig,
    pub cohort: CohortConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SourceConfig {
    /// The registry extract (`.xlsx`, `.xlsm` or `.csv`).
    pub path: Option<PathBuf>,
    /// Worksheet name. The first sheet is used if unset.
    pub sheet: Option<String>,
    /// Columns coerced to numbers; values that aren't numbers become missing.
    pub numeric_columns: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            path: None,
            sheet: None,
            numeric_columns: vec!["height".into(), "weight".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CohortConfig {
    /// A record is in the cohort if any diagnosis label contains one of these.
    pub terms: Vec<String>,
    pub years_to_primary: PrimaryRule,
}

impl Default for CohortConfig {
    fn default() -> Self {
        CohortConfig {
            terms: vec!["thyroid".into()],
            years_to_primary: PrimaryRule::default(),
        }
    }
}

impl CohortConfig {
    pub fn criteria(&self) -> Result<Criteria> {
        Criteria::new(self.terms.iter().map(|term| term.as_str()), self.years_to_primary)
            .context("invalid `cohort.terms`")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct DashboardConfig {
    /// Feature preselected on a new chart.
    pub default_feature: Option<String>,
    /// Patient preselected on a new chart.
    pub default_patient: Option<PatientId>,
    /// Histogram bin width, in years.
    pub bin_width: u32,
    /// Shown in place of a missing feature value.
    pub missing_label: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            default_feature: Some("gender".into()),
            default_patient: Some(58),
            bin_width: 1,
            missing_label: "NS".into(),
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<Config> {
            let text = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&text)?;
            config.validate()?;
            Ok(config)
        }
        let path = path.as_ref();
        inner(path).with_context(|| format!("loading config \"{}\"", path.display()))
    }

    /// Load the given config file, or the default one if it exists, or fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let path = data_path(Path::new(DEFAULT_CONFIG));
        if util::path_exists(&path)? {
            Self::load(&path)
        } else {
            event!(
                Level::DEBUG,
                "no config at \"{}\", using defaults",
                path.display()
            );
            Ok(Config::default())
        }
    }

    /// Override the source with values given on the command line.
    pub fn with_source(mut self, path: Option<PathBuf>, sheet: Option<String>) -> Self {
        if path.is_some() {
            self.source.path = path;
        }
        if sheet.is_some() {
            self.source.sheet = sheet;
        }
        self
    }

    pub fn validate(&self) -> Result {
        self.cohort.criteria()?;
        ensure!(
            self.dashboard.bin_width > 0,
            "`dashboard.bin-width` must be at least 1"
        );
        Ok(())
    }
}
