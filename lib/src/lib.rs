//! Exploring the thyroid cancer cohort of a PTEN hamartoma tumour syndrome registry.
//!
//! The registry extract is a spreadsheet with one row per patient. [`loader`] reads it,
//! [`cohort`] derives ages and years to primary diagnosis and narrows it to the cohort, and
//! [`dashboard`] builds the distribution views shown to clinicians.
pub mod cohort;
pub mod config;
pub mod dashboard;
mod html;
pub mod loader;
mod range;
mod util;
mod value;

pub use anyhow::{Context, Error};
use chrono::{NaiveDate, Utc};
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use crate::{
    cohort::{transform, Cohort, Criteria, Diagnosis, Exclusions, PatientRecord, PrimaryRule},
    config::Config,
    dashboard::{Dashboard, DistributionView},
    loader::{LoadError, RawTable},
    range::{Range, RangeSet, RangeSetCounts, RangeSetCountsWithMissing},
    util::header,
    value::Value,
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
pub type PatientId = u64;

/// The date ages are calculated at.
pub fn today() -> NaiveDate {
    Utc::now().naive_utc().date()
}

/// Load a registry extract and derive the cohort from it, using the given configuration.
pub fn load_cohort(config: &Config) -> Result<Cohort> {
    let path = config
        .source
        .path
        .as_deref()
        .context("no registry extract given (pass a path or set `source.path`)")?;
    let raw = loader::load(
        path,
        config.source.sheet.as_deref(),
        &config.source.numeric_columns[..],
    )?;
    let criteria = config.cohort.criteria()?;
    Ok(transform(&raw, &criteria, today()))
}

/// Load data into memory.
fn load_from<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    fn inner<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let reader = io::BufReader::new(fs::File::open(path)?);
        bincode::deserialize_from(reader).map_err(Into::into)
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;

    inner(path).with_context(|| format!("unable to load data from \"{}\"", path.display()))
}

/// Save data to disk.
fn save_to<T: Serialize>(contents: &T, path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(contents: &T, path: &Path) -> Result {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        if util::path_exists(path)? {
            event!(
                Level::WARN,
                "overwriting existing file at \"{}\"",
                path.display()
            );
        }
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        bincode::serialize_into(&mut out, contents)?;
        Ok(())
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;

    inner(contents, path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Note: No protection from escaping the root directory.
pub fn output_path(input: &Path) -> PathBuf {
    Path::new("../data/output").join(input)
}

/// Note: No protection from escaping the root directory.
pub fn data_path(input: &Path) -> PathBuf {
    Path::new("../data").join(input)
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;

    #[test]
    fn extensions() {
        assert!(check_extension(Path::new("cohort.bin"), "bin").is_ok());
        assert!(check_extension(Path::new("cohort.json"), "bin").is_err());
        assert!(check_extension(Path::new("cohort"), "bin").is_err());
    }

    #[test]
    fn snapshot_round_trip() {
        let raw = RawTable::new(["dateOfBirth", "cancer1", "cancer1Year", "gender"])
            .with_row([
                Value::from(1980),
                Value::text("Thyroid"),
                Value::from(2005),
                Value::text("Female"),
            ])
            .with_row([
                Value::from(1975),
                Value::text("Thyroid"),
                Value::from(1990),
                Value::Missing,
            ]);
        let cohort = transform(
            &raw,
            &Criteria::thyroid(),
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
        );
        let path = std::env::temp_dir().join(format!("pten-registry-{}.bin", std::process::id()));
        save_to(&cohort, &path).unwrap();
        let mut loaded: Cohort = load_from(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(&*loaded, &*cohort);
        assert_eq!(loaded.exclusions(), cohort.exclusions());

        // the id index isn't stored
        assert!(loaded.find_by_id(1).is_none());
        loaded.rebuild_index();
        assert_eq!(loaded.find_by_id(1).unwrap().years_to_primary, 15);
    }

    #[test]
    fn load_cohort_needs_a_path() {
        let err = load_cohort(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("no registry extract"));
    }
}
