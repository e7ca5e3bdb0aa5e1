//! The distribution views behind the dashboard.
//!
//! A dashboard is a list of chart panels. Each panel has a selected patient and a selected
//! feature column, and shows the distribution of years to primary diagnosis across the cohort,
//! split by the feature, with a marker at the selected patient's value. Building a view is a pure
//! function of the cohort and the two selections, so panels never affect one another.
use crate::{
    cohort::YEARS_TO_PRIMARY, config::DashboardConfig, html::HtmlTable, range::RangeSet, ArcStr,
    Cohort, PatientId, Range, Result, Value,
};
use qu::ick_use::*;
use serde::Serialize;
use statrs::statistics::{Data, OrderStatistics, Statistics};
use std::collections::BTreeMap;

/// The values offered in the patient dropdown, ascending.
pub fn patient_options(cohort: &Cohort) -> Vec<PatientId> {
    cohort.patient_ids().collect()
}

/// The values offered in the feature dropdown.
pub fn feature_options(cohort: &Cohort) -> Vec<ArcStr> {
    cohort.columns()
}

/// One chart and its selections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Panel {
    pub index: usize,
    pub patient: Option<PatientId>,
    pub feature: Option<ArcStr>,
}

/// A set of chart panels over one cohort.
pub struct Dashboard<'a> {
    cohort: &'a Cohort,
    settings: DashboardConfig,
    panels: Vec<Panel>,
}

impl<'a> Dashboard<'a> {
    pub fn new(cohort: &'a Cohort, settings: DashboardConfig) -> Self {
        Dashboard {
            cohort,
            settings,
            panels: vec![],
        }
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    /// Add a chart with the default selections, returning its index.
    ///
    /// Defaults that don't exist in this cohort are left unselected.
    pub fn add_chart(&mut self) -> usize {
        let index = self.panels.len();
        let patient = self.settings.default_patient.filter(|id| {
            let found = self.cohort.find_by_id(*id).is_some();
            if !found {
                event!(Level::WARN, "default patient {} is not in the cohort", id);
            }
            found
        });
        let feature = self
            .settings
            .default_feature
            .as_deref()
            .filter(|feature| {
                let found = self.cohort.has_column(feature);
                if !found {
                    event!(Level::WARN, "default feature `{}` is not a column", feature);
                }
                found
            })
            .map(ArcStr::from);
        self.panels.push(Panel {
            index,
            patient,
            feature,
        });
        index
    }

    pub fn select_patient(&mut self, index: usize, patient: Option<PatientId>) -> Result {
        if let Some(id) = patient {
            ensure!(
                self.cohort.find_by_id(id).is_some(),
                "no patient with ID {}",
                id
            );
        }
        self.panel_mut(index)?.patient = patient;
        Ok(())
    }

    pub fn select_feature(&mut self, index: usize, feature: Option<&str>) -> Result {
        if let Some(feature) = feature {
            ensure!(
                self.cohort.has_column(feature),
                "unknown feature column `{}`",
                feature
            );
        }
        self.panel_mut(index)?.feature = feature.map(ArcStr::from);
        Ok(())
    }

    /// The view for a panel, or `None` if it has no feature selected yet.
    pub fn render(&self, index: usize) -> Result<Option<DistributionView>> {
        let panel = self
            .panels
            .get(index)
            .with_context(|| format!("no chart with index {}", index))?;
        let Some(feature) = &panel.feature else {
            return Ok(None)
        };
        DistributionView::build(self.cohort, feature, panel.patient, &self.settings).map(Some)
    }

    fn panel_mut(&mut self, index: usize) -> Result<&mut Panel> {
        self.panels
            .get_mut(index)
            .with_context(|| format!("no chart with index {}", index))
    }
}

/// A vertical line at one patient's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Marker {
    pub patient_id: PatientId,
    pub value: u32,
    /// The bin containing `value`.
    pub bin: Option<usize>,
}

/// Descriptive statistics for one group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; needs at least two values.
    pub std_dev: Option<f64>,
    pub min: u32,
    pub max: u32,
}

impl Summary {
    /// `None` for an empty group.
    fn of(values: &[u32]) -> Option<Self> {
        let min = *values.iter().min()?;
        let max = *values.iter().max()?;
        let floats: Vec<f64> = values.iter().map(|v| f64::from(*v)).collect();
        let std_dev = Statistics::std_dev(floats.iter());
        Some(Summary {
            count: values.len(),
            mean: Statistics::mean(floats.iter()),
            std_dev: (values.len() > 1 && std_dev.is_finite()).then(|| std_dev),
            median: Data::new(floats).median(),
            min,
            max,
        })
    }
}

/// Years to primary for the records sharing one feature value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub key: String,
    /// Count per bin, aligned with `DistributionView::bins`.
    pub counts: Vec<usize>,
    /// Every value, ascending.
    pub rug: Vec<u32>,
    pub summary: Option<Summary>,
}

/// A histogram of years to primary diagnosis, split by a feature column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionView {
    pub title: String,
    pub x: ArcStr,
    pub feature: ArcStr,
    pub marker: Option<Marker>,
    pub bins: Vec<Range<u32>>,
    pub groups: Vec<Group>,
}

impl DistributionView {
    /// Build the view for one feature, optionally highlighting a patient.
    ///
    /// Missing feature values are grouped under `settings.missing_label`.
    pub fn build(
        cohort: &Cohort,
        feature: &str,
        patient: Option<PatientId>,
        settings: &DashboardConfig,
    ) -> Result<Self> {
        ensure!(
            cohort.has_column(feature),
            "unknown feature column `{}`",
            feature
        );
        ensure!(settings.bin_width > 0, "bin width must be at least 1");

        let max = cohort
            .iter()
            .map(|rec| rec.years_to_primary)
            .max()
            .unwrap_or(0);
        let bins = RangeSet::uniform(settings.bin_width, max);

        let marker = match patient {
            Some(id) => {
                let rec = cohort
                    .find_by_id(id)
                    .with_context(|| format!("no patient with ID {}", id))?;
                Some(Marker {
                    patient_id: id,
                    value: rec.years_to_primary,
                    bin: bins.position(&rec.years_to_primary),
                })
            }
            None => None,
        };

        let mut grouped: BTreeMap<Value, Vec<u32>> = BTreeMap::new();
        for rec in cohort.iter() {
            let key = cohort
                .value(rec, feature)
                .unwrap_or(Value::Missing)
                .or_label(&settings.missing_label);
            grouped.entry(key).or_default().push(rec.years_to_primary);
        }
        let groups = grouped
            .into_iter()
            .map(|(key, mut rug)| {
                rug.sort_unstable();
                let counts = bins.clone().bucket_values(rug.iter().copied());
                Group {
                    key: key.to_string(),
                    counts: counts.counts().to_vec(),
                    summary: Summary::of(&rug),
                    rug,
                }
            })
            .collect();

        let title = match patient {
            Some(id) => format!("{} vs. {} (Patient ID: {})", YEARS_TO_PRIMARY, feature, id),
            None => format!("{} vs. {}", YEARS_TO_PRIMARY, feature),
        };

        Ok(DistributionView {
            title,
            x: YEARS_TO_PRIMARY.into(),
            feature: feature.into(),
            marker,
            bins: bins.iter().copied().collect(),
            groups,
        })
    }

    /// Total count per bin across all groups.
    pub fn totals(&self) -> Vec<usize> {
        (0..self.bins.len())
            .map(|idx| self.groups.iter().map(|group| group.counts[idx]).sum())
            .collect()
    }

    fn marker_label(&self, bin: usize) -> String {
        match self.marker {
            Some(marker) if marker.bin == Some(bin) => {
                format!("<- patient {} ({})", marker.patient_id, marker.value)
            }
            _ => String::new(),
        }
    }

    /// Bins as rows, groups as columns.
    pub fn term_table(&self) -> term_data_table::Table {
        use term_data_table::{Cell, Row, Table};
        let header = self
            .groups
            .iter()
            .fold(Row::new().with_cell(Cell::from(self.x.to_string())), |row, group| {
                row.with_cell(Cell::from(group.key.clone()))
            })
            .with_cell(Cell::from(""));
        let mut table = Table::new().with_row(header);
        for (idx, bin) in self.bins.iter().enumerate() {
            let row = self
                .groups
                .iter()
                .fold(Row::new().with_cell(Cell::from(bin.to_string())), |row, group| {
                    row.with_cell(Cell::from(group.counts[idx].to_string()))
                })
                .with_cell(Cell::from(self.marker_label(idx)));
            table.add_row(row);
        }
        table
    }

    /// Per-group statistics.
    pub fn summary_table(&self) -> term_data_table::Table {
        use term_data_table::{Cell, Row, Table};
        let mut table = Table::new().with_row(
            SUMMARY_HEADERS
                .iter()
                .fold(Row::new(), |row, h| row.with_cell(Cell::from(*h))),
        );
        for cells in self.summary_rows() {
            table.add_row(
                cells
                    .into_iter()
                    .fold(Row::new(), |row, cell| row.with_cell(Cell::from(cell))),
            );
        }
        table
    }

    fn summary_rows(&self) -> Vec<Vec<String>> {
        let feature = &self.feature;
        self.groups
            .iter()
            .filter_map(|group| {
                let s = group.summary?;
                Some(vec![
                    format!("{} = {}", feature, group.key),
                    s.count.to_string(),
                    format!("{:.1}", s.mean),
                    format!("{:.1}", s.median),
                    s.std_dev.map(|sd| format!("{:.1}", sd)).unwrap_or_default(),
                    s.min.to_string(),
                    s.max.to_string(),
                ])
            })
            .collect()
    }

    /// A standalone HTML fragment with the histogram and the statistics.
    pub fn to_html(&self) -> String {
        let mut histogram = HtmlTable::new(
            std::iter::once(self.x.to_string())
                .chain(self.groups.iter().map(|group| group.key.clone()))
                .chain(std::iter::once(String::new())),
        )
        .with_title(self.title.clone());
        for (idx, bin) in self.bins.iter().enumerate() {
            let marked = matches!(self.marker, Some(m) if m.bin == Some(idx));
            histogram.row(
                marked.then(|| "marker"),
                std::iter::once(bin.to_string())
                    .chain(self.groups.iter().map(|group| group.counts[idx].to_string()))
                    .chain(std::iter::once(self.marker_label(idx))),
            );
        }

        let mut summary = HtmlTable::new(SUMMARY_HEADERS);
        for cells in self.summary_rows() {
            summary.row(None, cells);
        }

        let mut out = histogram.finish();
        out.push_str(&summary.finish());
        out
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing view")
    }
}

const SUMMARY_HEADERS: [&str; 7] = ["group", "n", "mean", "median", "sd", "min", "max"];

#[cfg(test)]
mod test {
    use super::*;
    use crate::{transform, Criteria, RawTable};
    use chrono::NaiveDate;

    fn cohort() -> Cohort {
        let mut raw = RawTable::new(["dateOfBirth", "gender", "cancer1", "cancer1Year", "height"]);
        for (birth, gender, year, height) in [
            (1980, "Female", 2005, "160"),
            (1970, "Male", 2001, "180"),
            (1975, "", 1999, "x"),
            (1990, "Female", 2012, "170"),
        ] {
            raw.push_row([
                Value::from(birth),
                Value::text(gender),
                Value::text("Thyroid"),
                Value::from(year),
                Value::text(height),
            ]);
        }
        raw.coerce(&["height"]);
        transform(
            &raw,
            &Criteria::thyroid(),
            NaiveDate::from_ymd_opt(2021, 6, 1).unwrap(),
        )
    }

    fn settings(bin_width: u32) -> DashboardConfig {
        DashboardConfig {
            bin_width,
            ..DashboardConfig::default()
        }
    }

    #[test]
    fn options() {
        let cohort = cohort();
        assert_eq!(patient_options(&cohort), [0, 1, 2, 3]);
        let features = feature_options(&cohort);
        assert!(features.iter().any(|f| &**f == "gender"));
        assert!(features.iter().any(|f| &**f == "yearsToPrimary"));
        assert!(features.iter().any(|f| &**f == "patientId"));
    }

    #[test]
    fn grouped_histogram() {
        let cohort = cohort();
        // years to primary: 25, 31, 24, 22
        let view = DistributionView::build(&cohort, "gender", Some(1), &settings(5)).unwrap();
        assert_eq!(view.title, "yearsToPrimary vs. gender (Patient ID: 1)");
        assert_eq!(view.bins.len(), 7);
        assert_eq!(view.bins[6], Range::new(30, Some(35)));
        let keys: Vec<_> = view.groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, ["Female", "Male", "NS"]);
        assert_eq!(view.groups[0].rug, [22, 25]);
        assert_eq!(view.groups[0].counts, [0, 0, 0, 0, 1, 1, 0]);
        assert_eq!(view.groups[2].counts, [0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(
            view.marker,
            Some(Marker {
                patient_id: 1,
                value: 31,
                bin: Some(6)
            })
        );
        assert_eq!(view.totals(), [0, 0, 0, 0, 2, 1, 1]);

        let female = view.groups[0].summary.unwrap();
        assert_eq!(female.count, 2);
        assert!((female.mean - 23.5).abs() < 1e-9);
        assert!((female.median - 23.5).abs() < 1e-9);
        assert_eq!((female.min, female.max), (22, 25));
        assert!(female.std_dev.is_some());
        assert_eq!(view.groups[1].summary.unwrap().std_dev, None);
    }

    #[test]
    fn numeric_and_derived_features() {
        let cohort = cohort();
        let view = DistributionView::build(&cohort, "height", None, &settings(1)).unwrap();
        assert_eq!(view.title, "yearsToPrimary vs. height");
        assert_eq!(view.marker, None);
        let keys: Vec<_> = view.groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, ["160", "170", "180", "NS"]);

        let view = DistributionView::build(&cohort, "cancer1Age", None, &settings(1)).unwrap();
        assert_eq!(view.groups.len(), 4);
    }

    #[test]
    fn bad_selections() {
        let cohort = cohort();
        assert!(DistributionView::build(&cohort, "nope", None, &settings(1)).is_err());
        assert!(DistributionView::build(&cohort, "gender", Some(99), &settings(1)).is_err());
        assert!(DistributionView::build(&cohort, "gender", None, &settings(0)).is_err());
    }

    #[test]
    fn panels() {
        let cohort = cohort();
        let mut dashboard = Dashboard::new(
            &cohort,
            DashboardConfig {
                default_patient: Some(2),
                ..DashboardConfig::default()
            },
        );
        assert_eq!(dashboard.add_chart(), 0);
        assert_eq!(dashboard.add_chart(), 1);
        assert_eq!(
            dashboard.panels()[0],
            Panel {
                index: 0,
                patient: Some(2),
                feature: Some("gender".into())
            }
        );

        dashboard.select_feature(1, None).unwrap();
        assert_eq!(dashboard.render(1).unwrap(), None);

        dashboard.select_patient(1, Some(3)).unwrap();
        dashboard.select_feature(1, Some("height")).unwrap();
        let view = dashboard.render(1).unwrap().unwrap();
        assert_eq!(view.title, "yearsToPrimary vs. height (Patient ID: 3)");
        // the other panel is untouched
        let view = dashboard.render(0).unwrap().unwrap();
        assert_eq!(view.title, "yearsToPrimary vs. gender (Patient ID: 2)");

        assert!(dashboard.select_patient(0, Some(42)).is_err());
        assert!(dashboard.select_feature(0, Some("nope")).is_err());
        assert!(dashboard.render(7).is_err());
    }

    #[test]
    fn missing_defaults_are_dropped() {
        let cohort = cohort();
        let mut dashboard = Dashboard::new(&cohort, DashboardConfig::default());
        dashboard.add_chart();
        // patient 58 doesn't exist in a 4 patient cohort
        assert_eq!(dashboard.panels()[0].patient, None);
        assert_eq!(dashboard.panels()[0].feature.as_deref(), Some("gender"));
    }

    #[test]
    fn rendering() {
        let cohort = cohort();
        let view = DistributionView::build(&cohort, "gender", Some(0), &settings(10)).unwrap();
        let html = view.to_html();
        assert!(html.starts_with("<h3>yearsToPrimary vs. gender (Patient ID: 0)</h3>"));
        assert!(html.contains(r#"<tr class="marker"><td>20 - 30</td>"#));
        assert!(html.contains("<td>gender = NS</td>"));

        let json: serde_json::Value = serde_json::from_str(&view.to_json().unwrap()).unwrap();
        assert_eq!(json["marker"]["value"], serde_json::json!(25));
        assert_eq!(json["groups"][0]["key"], serde_json::json!("Female"));

        let text = view.term_table().to_string();
        assert!(text.contains("<- patient 0 (25)"));
        assert!(view.summary_table().to_string().contains("gender = Male"));
    }
}
