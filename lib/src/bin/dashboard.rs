//! Render the years-to-primary distribution charts for the cohort.
//!
//! Each `--chart` adds a panel, like pressing "Add Chart", then applies its selections.
use clap::Parser;
use itertools::Itertools;
use pten_registry::{
    dashboard::{feature_options, patient_options},
    header, load_cohort, Cohort, Config, Dashboard, Error, PatientId,
};
use qu::ick_use::*;
use std::{fs, path::PathBuf, str::FromStr};

#[derive(Parser)]
struct Opt {
    /// The registry extract. Overrides `source.path`.
    path: Option<PathBuf>,
    /// The worksheet to read. Overrides `source.sheet`.
    sheet: Option<String>,
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// Use a snapshot written by `import_registry` instead of reading the extract.
    #[clap(long, short)]
    snapshot: Option<PathBuf>,
    /// A chart as `patient:feature`. Either side may be left empty to keep the default.
    ///
    /// One chart with the default selections is shown if none are given.
    #[clap(long = "chart")]
    charts: Vec<ChartSpec>,
    /// Write the charts as an HTML page here.
    #[clap(long)]
    html: Option<PathBuf>,
    /// Write the chart data as json here.
    #[clap(long)]
    json: Option<PathBuf>,
    /// List the patient and feature choices.
    #[clap(long)]
    options: bool,
}

#[derive(Debug, Clone)]
struct ChartSpec {
    patient: Option<PatientId>,
    feature: Option<String>,
}

impl FromStr for ChartSpec {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let (patient, feature) = match s.split_once(':') {
            Some((patient, feature)) => (patient.trim(), feature.trim()),
            None => ("", s.trim()),
        };
        let patient = match patient {
            "" => None,
            id => Some(
                id.parse::<PatientId>()
                    .with_context(|| format!("patient ID `{}` is not a number", id))?,
            ),
        };
        let feature = (!feature.is_empty()).then(|| feature.to_owned());
        Ok(ChartSpec { patient, feature })
    }
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = Config::load_or_default(opt.config.as_deref())?.with_source(opt.path, opt.sheet);
    let cohort = match &opt.snapshot {
        Some(path) => Cohort::load(path)?,
        None => load_cohort(&config)?,
    };

    if opt.options {
        header("Patients");
        println!("{}", patient_options(&cohort).iter().join(", "));
        header("Features");
        println!("{}", feature_options(&cohort).iter().join(", "));
    }

    let mut dashboard = Dashboard::new(&cohort, config.dashboard.clone());
    let charts = match opt.charts.is_empty() {
        true => vec![ChartSpec {
            patient: None,
            feature: None,
        }],
        false => opt.charts,
    };
    for chart in charts {
        let idx = dashboard.add_chart();
        if chart.patient.is_some() {
            dashboard.select_patient(idx, chart.patient)?;
        }
        if let Some(feature) = &chart.feature {
            dashboard.select_feature(idx, Some(feature.as_str()))?;
        }
    }

    let mut views = vec![];
    for panel in dashboard.panels() {
        match dashboard.render(panel.index)? {
            Some(view) => {
                header(&view.title);
                println!("{}", view.term_table());
                println!("{}", view.summary_table());
                views.push(view);
            }
            None => {
                event!(Level::WARN, "chart {} has no feature selected", panel.index);
            }
        }
    }

    if let Some(path) = &opt.html {
        let mut page = String::from(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>PTEN registry</title>\
             <style>tr.marker { background: #fdd; }</style></head><body>",
        );
        for view in views.iter() {
            page.push_str(&view.to_html());
        }
        page.push_str("</body></html>");
        fs::write(path, page).with_context(|| format!("writing \"{}\"", path.display()))?;
        event!(Level::INFO, "wrote html to \"{}\"", path.display());
    }
    if let Some(path) = &opt.json {
        let json = serde_json::to_string_pretty(&views)?;
        fs::write(path, json).with_context(|| format!("writing \"{}\"", path.display()))?;
        event!(Level::INFO, "wrote json to \"{}\"", path.display());
    }
    Ok(())
}
