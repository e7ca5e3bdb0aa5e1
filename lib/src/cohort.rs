//! Deriving the analysis cohort from raw registry rows.
//!
//! Each patient record carries up to a few parallel diagnosis *slots*: a `cancer{N}` label column
//! and a `cancer{N}Year` column. The transform
//!
//! 1. drops records without a birth year,
//! 2. computes the patient's current age,
//! 3. computes, for each slot, the age at diagnosis (defined only when positive),
//! 4. keeps records where any slot label matches the cohort terms (by default "thyroid",
//!    case-insensitively),
//! 5. computes years to primary diagnosis from the slot ages, dropping records where there is
//!    none (see [`PrimaryRule`]),
//! 6. numbers the surviving records 0, 1, 2, ... in source order.
//!
//! Missing or invalid values never cause an error: they just make a record ineligible, and the
//! reason is counted in [`Exclusions`].
use crate::{
    load_from, loader::RawTable, output_path, save_to, value::MISSING, ArcStr, PatientId, Result,
    Value,
};
use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use chrono::{Datelike, NaiveDate};
use itertools::Itertools;
use once_cell::sync::Lazy;
use qu::ick_use::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, ops::Deref, path::Path, sync::Arc};

pub const DATE_OF_BIRTH: &str = "dateOfBirth";
pub const AGE: &str = "age";
pub const YEARS_TO_PRIMARY: &str = "yearsToPrimary";
pub const PATIENT_ID: &str = "patientId";

static SLOT_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^cancer(\d+)Year$").unwrap());
static SLOT_AGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^cancer(\d+)Age$").unwrap());

/// The columns making up one diagnosis slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// The `N` in `cancer{N}`.
    pub number: u8,
    /// Index of the `cancer{N}` column.
    pub label: usize,
    /// Index of the `cancer{N}Year` column.
    pub year: usize,
}

impl Slot {
    pub fn label_column(&self) -> String {
        format!("cancer{}", self.number)
    }

    pub fn year_column(&self) -> String {
        format!("cancer{}Year", self.number)
    }

    pub fn age_column(&self) -> String {
        format!("cancer{}Age", self.number)
    }
}

/// Find all `cancer{N}Year` columns with a matching `cancer{N}` column, ordered by `N`.
///
/// If two year columns give the same `N` (`cancer1Year`, `cancer01Year`) only the first is used.
pub fn discover_slots(columns: &[ArcStr]) -> Vec<Slot> {
    let mut slots = vec![];
    for (year, name) in columns.iter().enumerate() {
        let Some(caps) = SLOT_YEAR.captures(name) else {
            continue
        };
        let Ok(number) = caps[1].parse::<u8>() else {
            event!(Level::WARN, "ignoring diagnosis column `{}`", name);
            continue
        };
        if slots.iter().any(|slot: &Slot| slot.number == number) {
            event!(
                Level::WARN,
                "`{}` repeats diagnosis slot {}, ignoring it",
                name,
                number
            );
            continue;
        }
        let label_name = format!("cancer{}", number);
        match columns.iter().position(|col| **col == *label_name) {
            Some(label) => slots.push(Slot {
                number,
                label,
                year,
            }),
            None => event!(
                Level::WARN,
                "found `{}` but no `{}` column, ignoring it",
                name,
                label_name
            ),
        }
    }
    slots.sort_by_key(|slot| slot.number);
    slots
}

/// How years to primary diagnosis is chosen when a record has several diagnoses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrimaryRule {
    /// The earliest diagnosis in any slot, whatever its label.
    #[default]
    AnySlot,
    /// The earliest diagnosis in a slot whose label matches the cohort terms.
    ///
    /// Records whose matching slots all lack a valid year are excluded, even if another slot has
    /// one.
    MatchingSlot,
}

impl fmt::Display for PrimaryRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            PrimaryRule::AnySlot => "any-slot",
            PrimaryRule::MatchingSlot => "matching-slot",
        })
    }
}

/// Which records belong to the cohort.
#[derive(Debug, Clone)]
pub struct Criteria {
    terms: Vec<ArcStr>,
    matcher: AhoCorasick,
    rule: PrimaryRule,
}

impl Criteria {
    /// Records with a diagnosis label containing any of `terms` (ignoring ASCII case).
    pub fn new(terms: impl IntoIterator<Item = impl Into<ArcStr>>, rule: PrimaryRule) -> Result<Self> {
        let terms: Vec<ArcStr> = terms.into_iter().map(Into::into).collect();
        ensure!(!terms.is_empty(), "at least one cohort term is required");
        ensure!(
            terms.iter().all(|term| !term.trim().is_empty()),
            "cohort terms must not be blank"
        );
        let matcher = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(terms.iter().map(|term| term.as_bytes()));
        Ok(Criteria {
            terms,
            matcher,
            rule,
        })
    }

    /// The thyroid cancer cohort.
    pub fn thyroid() -> Self {
        let terms: Vec<ArcStr> = vec!["thyroid".into()];
        let matcher = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(["thyroid"]);
        Criteria {
            terms,
            matcher,
            rule: PrimaryRule::default(),
        }
    }

    pub fn with_rule(mut self, rule: PrimaryRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn terms(&self) -> &[ArcStr] {
        &self.terms
    }

    pub fn rule(&self) -> PrimaryRule {
        self.rule
    }

    /// Whether a diagnosis label puts a patient in the cohort.
    pub fn matches(&self, label: &str) -> bool {
        self.matcher.is_match(label)
    }

    fn matches_diagnosis(&self, diagnosis: &Diagnosis) -> bool {
        matches!(&diagnosis.label, Some(label) if self.matches(label))
    }

    /// Years from birth to the primary diagnosis, according to the rule.
    pub fn years_to_primary(&self, diagnoses: &[Diagnosis]) -> Option<u32> {
        diagnoses
            .iter()
            .filter(|diagnosis| match self.rule {
                PrimaryRule::AnySlot => true,
                PrimaryRule::MatchingSlot => self.matches_diagnosis(diagnosis),
            })
            .filter_map(|diagnosis| diagnosis.age)
            .min()
    }
}

/// One filled-in diagnosis slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub slot: u8,
    pub label: Option<ArcStr>,
    pub year: Option<i32>,
    /// Years from birth to diagnosis. `None` unless strictly positive.
    pub age: Option<u32>,
}

impl Diagnosis {
    fn read(slot: &Slot, row: &[Value], birth_year: i32) -> Self {
        let label = match row.get(slot.label).unwrap_or(&MISSING) {
            Value::Missing => None,
            Value::Text(text) => Some(text.clone()),
            other => Some(other.to_string().into()),
        };
        let year = row.get(slot.year).and_then(Value::as_year);
        Diagnosis {
            slot: slot.number,
            label,
            year,
            age: year.and_then(|year| age_between(birth_year, year)),
        }
    }
}

/// Whole years from the start of `birth_year` to the start of `year`, if positive.
fn age_between(birth_year: i32, year: i32) -> Option<u32> {
    u32::try_from(year - birth_year).ok().filter(|age| *age > 0)
}

/// Whole years from the start of `birth_year` (birth dates only have year precision) to `today`.
///
/// A birth year in the future gives 0.
pub fn age_on(birth_year: i32, today: NaiveDate) -> u32 {
    u32::try_from(today.year() - birth_year).unwrap_or(0)
}

/// A row in the cohort table.
///
/// `patient_id` is the position of the record in the cohort, so it is *not* stable between
/// loads of different extracts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: PatientId,
    pub birth_year: i32,
    pub age: u32,
    pub years_to_primary: u32,
    pub diagnoses: Vec<Diagnosis>,
    /// All source cells, in the order of `Cohort::source_columns`.
    pub attributes: Vec<Value>,
}

impl PatientRecord {
    pub fn diagnosis(&self, slot: u8) -> Option<&Diagnosis> {
        self.diagnoses.iter().find(|diagnosis| diagnosis.slot == slot)
    }
}

/// Counts of records dropped at each step of the transform.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusions {
    pub rows_read: usize,
    pub missing_birth_year: usize,
    pub not_in_cohort: usize,
    pub no_diagnosis_age: usize,
    pub kept: usize,
}

impl Exclusions {
    pub fn term_table(&self) -> term_data_table::Table {
        use term_data_table::{Cell, Row, Table};
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from("Step"))
                .with_cell(Cell::from("Records")),
        );
        for (label, count) in [
            ("read from source", self.rows_read),
            ("no birth year", self.missing_birth_year),
            ("no matching diagnosis", self.not_in_cohort),
            ("no diagnosis after birth year", self.no_diagnosis_age),
            ("kept", self.kept),
        ] {
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(label))
                    .with_cell(Cell::from(count.to_string())),
            );
        }
        table
    }
}

/// Build the cohort table from the raw registry rows.
pub fn transform(raw: &RawTable, criteria: &Criteria, today: NaiveDate) -> Cohort {
    let slots = discover_slots(raw.columns());
    let birth_idx = raw.column_index(DATE_OF_BIRTH);
    if birth_idx.is_none() {
        event!(
            Level::WARN,
            "no `{}` column; every record will be excluded",
            DATE_OF_BIRTH
        );
    }
    if slots.is_empty() {
        event!(
            Level::WARN,
            "no `cancerNYear` columns; every record will be excluded"
        );
    } else {
        event!(
            Level::DEBUG,
            "diagnosis slots: {}",
            slots.iter().map(|slot| slot.number).join(", ")
        );
    }

    let mut exclusions = Exclusions {
        rows_read: raw.len(),
        ..Exclusions::default()
    };
    let mut els = Vec::new();
    for row in raw.rows() {
        let birth_year = birth_idx.and_then(|idx| row.get(idx)).and_then(Value::as_year);
        let Some(birth_year) = birth_year else {
            exclusions.missing_birth_year += 1;
            continue
        };
        let diagnoses: Vec<Diagnosis> = slots
            .iter()
            .map(|slot| Diagnosis::read(slot, row, birth_year))
            .collect();
        if !diagnoses.iter().any(|d| criteria.matches_diagnosis(d)) {
            exclusions.not_in_cohort += 1;
            continue;
        }
        let Some(years_to_primary) = criteria.years_to_primary(&diagnoses) else {
            exclusions.no_diagnosis_age += 1;
            continue
        };
        els.push(PatientRecord {
            patient_id: els.len() as PatientId,
            birth_year,
            age: age_on(birth_year, today),
            years_to_primary,
            diagnoses,
            attributes: row.clone(),
        });
    }
    exclusions.kept = els.len();
    event!(
        Level::INFO,
        "cohort has {} of {} records ({} without birth year, {} not matching [{}], {} without a \
         diagnosis age)",
        exclusions.kept,
        exclusions.rows_read,
        exclusions.missing_birth_year,
        exclusions.not_in_cohort,
        criteria.terms().iter().join(", "),
        exclusions.no_diagnosis_age,
    );

    Cohort::new(raw.columns().to_vec(), slots, els, exclusions)
}

/// The cohort table, with a pre-built index for the `patient_id` field.
///
/// Read-only once built; `filter` produces a new table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cohort {
    source_columns: Vec<ArcStr>,
    slots: Vec<Slot>,
    els: Arc<Vec<PatientRecord>>,
    exclusions: Exclusions,
    #[serde(skip)]
    id_idx: BTreeMap<PatientId, usize>,
}

impl Cohort {
    fn new(
        source_columns: Vec<ArcStr>,
        slots: Vec<Slot>,
        els: Vec<PatientRecord>,
        exclusions: Exclusions,
    ) -> Self {
        let mut this = Cohort {
            source_columns,
            slots,
            els: Arc::new(els),
            exclusions,
            id_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    /// Load a cohort saved with `save`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut this: Cohort = load_from(output_path(path.as_ref()))?;
        this.rebuild_index();
        Ok(this)
    }

    /// Snapshot the cohort into the output directory.
    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save_to(self, output_path(path.as_ref()))
    }

    /// The source columns followed by the derived `age`, `yearsToPrimary` and `patientId`.
    pub fn columns(&self) -> Vec<ArcStr> {
        let mut columns = self.source_columns.clone();
        for derived in [AGE, YEARS_TO_PRIMARY, PATIENT_ID] {
            if !columns.iter().any(|col| &**col == derived) {
                columns.push(derived.into());
            }
        }
        columns
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn exclusions(&self) -> &Exclusions {
        &self.exclusions
    }

    pub fn find_by_id(&self, id: PatientId) -> Option<&PatientRecord> {
        let idx = self.id_idx.get(&id)?;
        self.els.get(*idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatientRecord> + '_ {
        self.els.iter()
    }

    /// Patient IDs in ascending order.
    pub fn patient_ids(&self) -> impl Iterator<Item = PatientId> + '_ {
        self.id_idx.keys().copied()
    }

    /// A new cohort with only the matching records. Patient IDs are kept.
    pub fn filter(&self, f: impl Fn(&PatientRecord) -> bool) -> Self {
        let els = self.iter().filter(|rec| f(rec)).cloned().collect();
        Cohort::new(
            self.source_columns.clone(),
            self.slots.clone(),
            els,
            self.exclusions,
        )
    }

    /// Whether `column` names a source or derived column.
    pub fn has_column(&self, column: &str) -> bool {
        self.source_index(column).is_some() || self.derived_value(None, column).is_some()
    }

    /// Look up a cell by column name. `None` if there is no such column.
    ///
    /// Derived columns (`age`, `yearsToPrimary`, `patientId`, `cancer{N}Age`) shadow source
    /// columns of the same name.
    pub fn value(&self, record: &PatientRecord, column: &str) -> Option<Value> {
        if let Some(value) = self.derived_value(Some(record), column) {
            return Some(value);
        }
        let idx = self.source_index(column)?;
        Some(record.attributes.get(idx).cloned().unwrap_or(Value::Missing))
    }

    /// `None` if `column` isn't derived. Without a record, derived columns give `Missing`.
    fn derived_value(&self, record: Option<&PatientRecord>, column: &str) -> Option<Value> {
        let value = |f: fn(&PatientRecord) -> Value| Some(record.map(f).unwrap_or(Value::Missing));
        match column {
            AGE => value(|rec| rec.age.into()),
            YEARS_TO_PRIMARY => value(|rec| rec.years_to_primary.into()),
            PATIENT_ID => value(|rec| rec.patient_id.into()),
            _ => {
                let caps = SLOT_AGE.captures(column)?;
                let number = caps[1].parse::<u8>().ok()?;
                self.slots.iter().find(|slot| slot.number == number)?;
                Some(
                    record
                        .and_then(|rec| rec.diagnosis(number))
                        .and_then(|diagnosis| diagnosis.age)
                        .into(),
                )
            }
        }
    }

    fn source_index(&self, column: &str) -> Option<usize> {
        self.source_columns.iter().position(|col| &**col == column)
    }

    /// The cohort as an array of JSON objects, one per record, keyed by `columns()`.
    pub fn to_json(&self) -> serde_json::Value {
        let columns = self.columns();
        self.iter()
            .map(|rec| {
                columns
                    .iter()
                    .map(|col| {
                        let value = self.value(rec, col).unwrap_or(Value::Missing);
                        (col.to_string(), value.to_json())
                    })
                    .collect::<serde_json::Map<_, _>>()
                    .into()
            })
            .collect::<Vec<serde_json::Value>>()
            .into()
    }

    /// Write the cohort as CSV with a header row of `columns()`.
    pub fn write_csv(&self, out: impl std::io::Write) -> Result {
        let columns = self.columns();
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(columns.iter().map(|col| col.as_bytes()))?;
        for rec in self.iter() {
            writer.write_record(columns.iter().map(|col| {
                self.value(rec, col)
                    .map(|value| value.to_string())
                    .unwrap_or_default()
            }))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// A preview of the derived fields for display in the terminal.
    pub fn term_table(&self) -> term_data_table::Table {
        use term_data_table::{Cell, Row, Table};
        let mut header = Row::new()
            .with_cell(Cell::from(PATIENT_ID))
            .with_cell(Cell::from("birth year"))
            .with_cell(Cell::from(AGE))
            .with_cell(Cell::from(YEARS_TO_PRIMARY));
        for slot in self.slots.iter() {
            header.add_cell(Cell::from(slot.label_column()));
            header.add_cell(Cell::from(slot.age_column()));
        }
        let mut table = Table::new().with_row(header);
        for rec in self.iter() {
            let mut row = Row::new()
                .with_cell(Cell::from(rec.patient_id.to_string()))
                .with_cell(Cell::from(rec.birth_year.to_string()))
                .with_cell(Cell::from(rec.age.to_string()))
                .with_cell(Cell::from(rec.years_to_primary.to_string()));
            for slot in self.slots.iter() {
                let diagnosis = rec.diagnosis(slot.number);
                let label = diagnosis
                    .and_then(|d| d.label.as_ref())
                    .map(|l| l.to_string())
                    .unwrap_or_default();
                let age = diagnosis
                    .and_then(|d| d.age)
                    .map(|a| a.to_string())
                    .unwrap_or_default();
                row.add_cell(Cell::from(label));
                row.add_cell(Cell::from(age));
            }
            table.add_row(row);
        }
        table
    }

    pub(crate) fn rebuild_index(&mut self) {
        self.id_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.id_idx.insert(el.patient_id, idx);
        }
    }
}

impl Deref for Cohort {
    type Target = [PatientRecord];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl<'a> IntoIterator for &'a Cohort {
    type IntoIter = std::slice::Iter<'a, PatientRecord>;
    type Item = &'a PatientRecord;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}
