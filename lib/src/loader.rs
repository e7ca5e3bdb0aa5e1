//! Reading a registry extract into an untyped in-memory table.
//!
//! Excel workbooks (`.xlsx`, `.xlsm`) are read with calamine, CSV files with the csv crate. Both
//! produce a [`RawTable`]: a header row of column names and one row of [`Value`]s per patient.
//! Typed columns are coerced afterwards with [`RawTable::coerce`], and any value that does not
//! fit its column becomes `Missing` rather than an error.
use crate::{cohort, value::MISSING, ArcStr, Value};
use calamine::{DataType, Reader, Xlsx};
use qu::ick_use::*;
use std::path::{Path, PathBuf};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reasons a registry extract could not be loaded at all.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("could not open \"{}\"", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("no sheet named \"{sheet}\" in \"{}\" (found: {})", .path.display(), .available.join(", "))]
    SheetNotFound {
        path: PathBuf,
        sheet: String,
        available: Vec<String>,
    },
    #[error("don't know how to read \"{}\" (expected .xlsx, .xlsm or .csv)", .path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("\"{}\" is malformed: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl LoadError {
    fn unavailable(path: &Path, source: impl Into<BoxError>) -> Self {
        LoadError::SourceUnavailable {
            path: path.to_owned(),
            source: source.into(),
        }
    }

    fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        LoadError::Malformed {
            path: path.to_owned(),
            reason: reason.into(),
        }
    }
}

/// A table of cells with named columns. Every row has exactly one cell per column.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    columns: Vec<ArcStr>,
    rows: Vec<Vec<Value>>,
}

impl RawTable {
    /// Create an empty table.
    ///
    /// Blank column names are replaced with `column{N}` (1-based), as are names that have already
    /// been used.
    pub fn new(columns: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let mut names: Vec<ArcStr> = vec![];
        for (idx, name) in columns.into_iter().enumerate() {
            let name = name.as_ref().trim();
            let name: ArcStr = if name.is_empty() || names.iter().any(|n| &**n == name) {
                format!("column{}", idx + 1).into()
            } else {
                name.into()
            };
            names.push(name);
        }
        RawTable {
            columns: names,
            rows: vec![],
        }
    }

    /// Add a row. Short rows are padded with `Missing`, extra cells are dropped.
    pub fn push_row(&mut self, cells: impl IntoIterator<Item = Value>) {
        let mut row: Vec<Value> = cells.into_iter().take(self.columns.len()).collect();
        row.resize(self.columns.len(), Value::Missing);
        self.rows.push(row);
    }

    /// Builder-style `push_row`.
    pub fn with_row(mut self, cells: impl IntoIterator<Item = Value>) -> Self {
        self.push_row(cells);
        self
    }

    pub fn columns(&self) -> &[ArcStr] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| &**col == name)
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get a cell. Out-of-range lookups give `Missing`.
    pub fn get(&self, row: usize, col: usize) -> &Value {
        self.rows
            .get(row)
            .and_then(|row| row.get(col))
            .unwrap_or(&MISSING)
    }

    /// Apply `f` to every cell in the named column. Returns `false` if there is no such column.
    pub fn map_column(&mut self, name: &str, f: impl Fn(Value) -> Value) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false
        };
        for row in self.rows.iter_mut() {
            let cell = std::mem::replace(&mut row[idx], Value::Missing);
            row[idx] = f(cell);
        }
        true
    }

    /// Coerce typed columns.
    ///
    /// The birth date and every cancer diagnosis year become year numbers, and each column in
    /// `numeric_columns` becomes a number. Anything that can't be coerced becomes `Missing`.
    pub fn coerce(&mut self, numeric_columns: &[impl AsRef<str>]) {
        let year_columns: Vec<ArcStr> = cohort::discover_slots(&self.columns)
            .iter()
            .map(|slot| self.columns[slot.year].clone())
            .chain(std::iter::once(ArcStr::from(cohort::DATE_OF_BIRTH)))
            .collect();
        for name in year_columns.iter() {
            let before = self.count_present(name);
            if self.map_column(name, Value::into_year) {
                self.log_coerced(name, before);
            }
        }
        for name in numeric_columns {
            let name = name.as_ref();
            let before = self.count_present(name);
            if self.map_column(name, Value::into_number) {
                self.log_coerced(name, before);
            } else {
                event!(Level::DEBUG, "numeric column `{}` not present", name);
            }
        }
    }

    fn count_present(&self, name: &str) -> usize {
        match self.column_index(name) {
            Some(idx) => self.rows.iter().filter(|row| !row[idx].is_missing()).count(),
            None => 0,
        }
    }

    fn log_coerced(&self, name: &str, before: usize) {
        let lost = before.saturating_sub(self.count_present(name));
        if lost > 0 {
            event!(
                Level::DEBUG,
                "{} value(s) in `{}` could not be coerced and are treated as missing",
                lost,
                name
            );
        }
    }
}

/// Load the given sheet of a registry extract, coercing typed columns.
///
/// `sheet` is ignored for CSV files. For workbooks, `None` means the first sheet.
pub fn load(
    path: impl AsRef<Path>,
    sheet: Option<&str>,
    numeric_columns: &[impl AsRef<str>],
) -> Result<RawTable, LoadError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let mut table = match extension.as_deref() {
        Some("xlsx" | "xlsm") => read_workbook(path, sheet)?,
        Some("csv") => read_csv(path)?,
        _ => {
            return Err(LoadError::UnsupportedFormat {
                path: path.to_owned(),
            })
        }
    };
    event!(
        Level::INFO,
        "read {} rows and {} columns from \"{}\"",
        table.len(),
        table.columns().len(),
        path.display()
    );
    table.coerce(numeric_columns);
    Ok(table)
}

fn read_workbook(path: &Path, sheet: Option<&str>) -> Result<RawTable, LoadError> {
    let mut workbook: Xlsx<_> =
        calamine::open_workbook(path).map_err(|e| LoadError::unavailable(path, e))?;
    let available = workbook.sheet_names().to_owned();
    let sheet = match sheet {
        Some(sheet) => sheet.to_owned(),
        None => {
            let first = available
                .first()
                .cloned()
                .ok_or_else(|| LoadError::malformed(path, "workbook has no sheets"))?;
            event!(Level::INFO, "no sheet given, using \"{}\"", first);
            first
        }
    };
    let range = match workbook.worksheet_range(&sheet) {
        Some(range) => range.map_err(|e| LoadError::unavailable(path, e))?,
        None => {
            return Err(LoadError::SheetNotFound {
                path: path.to_owned(),
                sheet,
                available,
            })
        }
    };

    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| LoadError::malformed(path, format!("sheet \"{}\" is empty", sheet)))?;
    let mut table = RawTable::new(header.iter().map(|cell| match cell {
        DataType::Empty => String::new(),
        other => other.to_string(),
    }));
    for row in rows {
        table.push_row(row.iter().map(cell_value));
    }
    Ok(table)
}

fn cell_value(cell: &DataType) -> Value {
    match cell {
        DataType::Int(v) => Value::number(*v as f64),
        DataType::Float(v) => Value::number(*v),
        DataType::String(s) => Value::text(s),
        DataType::Bool(b) => Value::Bool(*b),
        DataType::DateTime(_) => cell.as_date().map(Value::Date).unwrap_or(Value::Missing),
        // empty and error cells
        _ => Value::Missing,
    }
}

fn read_csv(path: &Path) -> Result<RawTable, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| LoadError::unavailable(path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| LoadError::unavailable(path, e))?
        .clone();
    if headers.is_empty() {
        return Err(LoadError::malformed(path, "no header row"));
    }
    let mut table = RawTable::new(headers.iter());
    for record in reader.records() {
        let record = record.map_err(|e| LoadError::unavailable(path, e))?;
        table.push_row(record.iter().map(Value::infer));
    }
    Ok(table)
}

#[cfg(test)]
mod test {
    use super::{cell_value, load, LoadError, RawTable};
    use crate::{transform, Criteria, Value};
    use calamine::DataType;
    use chrono::NaiveDate;
    use std::{fs, path::PathBuf};

    /// Sheets `patients` (first) and `notes`.
    const WORKBOOK: &str = "../data/sample_registry.xlsx";
    const NO_NUMERIC: &[&str] = &[];

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("pten-registry-{}-{}", std::process::id(), name));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn column_names() {
        let table = RawTable::new(["userID", "", "gender", "gender"]);
        assert_eq!(
            table.columns().iter().map(|c| &**c).collect::<Vec<_>>(),
            ["userID", "column2", "gender", "column4"]
        );
    }

    #[test]
    fn ragged_rows() {
        let table = RawTable::new(["a", "b"])
            .with_row([Value::from(1)])
            .with_row([Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(table.rows()[0], vec![Value::from(1), Value::Missing]);
        assert_eq!(table.rows()[1], vec![Value::from(1), Value::from(2)]);
        assert_eq!(table.get(5, 0), &Value::Missing);
    }

    #[test]
    fn coerce_typed_columns() {
        let mut table = RawTable::new([
            "dateOfBirth",
            "cancer1",
            "cancer1Year",
            "height",
            "countryOfBirth",
        ])
        .with_row([
            Value::text("1980"),
            Value::text("Thyroid"),
            Value::text("unknown"),
            Value::text("tall"),
            Value::text("1980"),
        ]);
        table.coerce(&["height", "weight"]);
        assert_eq!(
            table.rows()[0],
            vec![
                Value::from(1980),
                Value::text("Thyroid"),
                Value::Missing,
                Value::Missing,
                // untyped columns are passed through
                Value::text("1980"),
            ]
        );
    }

    #[test]
    fn csv_source() {
        let path = temp_file(
            "registry.csv",
            "userID,dateOfBirth,gender,cancer1,cancer1Year,height\n\
             1,1980,Female,Thyroid,2005,165.5\n\
             2,NA,Male,,,\n",
        );
        let table = load(&path, Some("ignored"), &["height"]).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, 1), &Value::from(1980));
        assert_eq!(table.get(0, 3), &Value::text("Thyroid"));
        assert_eq!(table.get(0, 5), &Value::number(165.5));
        assert_eq!(table.get(1, 1), &Value::Missing);
        assert_eq!(table.get(1, 4), &Value::Missing);
    }

    #[test]
    fn workbook_sheets() {
        match load(WORKBOOK, Some("nope"), NO_NUMERIC).unwrap_err() {
            LoadError::SheetNotFound {
                sheet, available, ..
            } => {
                assert_eq!(sheet, "nope");
                assert_eq!(available, ["patients", "notes"]);
            }
            other => panic!("unexpected error {:?}", other),
        }

        let notes = load(WORKBOOK, Some("notes"), NO_NUMERIC).unwrap();
        assert_eq!(notes.column_index("notes"), Some(0));
        assert_eq!(notes.len(), 1);

        // no sheet means the first one
        let first = load(WORKBOOK, None, NO_NUMERIC).unwrap();
        assert_eq!(first.column_index("dateOfBirth"), Some(1));
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn workbook_cells() {
        let table = load(WORKBOOK, None, NO_NUMERIC).unwrap();
        assert_eq!(table.get(0, 1), &Value::from(1980));
        // date-formatted birth date
        assert_eq!(table.get(1, 1), &Value::from(1980));
        assert_eq!(table.get(2, 1), &Value::Missing);
        assert_eq!(table.get(1, 2), &Value::text("Male"));
        assert_eq!(table.get(1, 4), &Value::from(2001));

        let cohort = transform(
            &table,
            &Criteria::thyroid(),
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
        );
        assert_eq!(cohort.exclusions().kept, 2);
        assert_eq!(cohort.exclusions().missing_birth_year, 1);
        assert_eq!(cohort.find_by_id(1).unwrap().years_to_primary, 21);
    }

    #[test]
    fn date_cells() {
        assert_eq!(
            cell_value(&DataType::DateTime(29221.)),
            Value::Date(NaiveDate::from_ymd_opt(1980, 1, 1).unwrap())
        );
        assert_eq!(cell_value(&DataType::Int(7)), Value::from(7));
        assert_eq!(cell_value(&DataType::Empty), Value::Missing);
    }

    #[test]
    fn missing_workbook() {
        let err = load("../data/does-not-exist.xlsx", Some("Sheet1"), &[] as &[&str]).unwrap_err();
        assert!(matches!(err, LoadError::SourceUnavailable { .. }), "{:?}", err);
    }

    #[test]
    fn missing_csv() {
        let err = load("../data/does-not-exist.csv", None, &[] as &[&str]).unwrap_err();
        assert!(matches!(err, LoadError::SourceUnavailable { .. }), "{:?}", err);
    }

    #[test]
    fn unsupported_extension() {
        let err = load("registry.parquet", None, &[] as &[&str]).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat { .. }));
    }
}
