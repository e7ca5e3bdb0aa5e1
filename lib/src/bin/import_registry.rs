//! Load a registry extract, derive the cohort and snapshot it for the other tools.
use clap::Parser;
use pten_registry::{header, load_cohort, Config};
use qu::ick_use::*;
use std::{fs, io, path::PathBuf};

#[derive(Parser)]
struct Opt {
    /// The registry extract (`.xlsx`, `.xlsm` or `.csv`). Overrides `source.path`.
    path: Option<PathBuf>,
    /// The worksheet to read. Overrides `source.sheet`.
    sheet: Option<String>,
    /// Config file to use instead of `../data/registry.toml`.
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// Name of the snapshot in the output directory.
    #[clap(long, short, default_value = "cohort.bin")]
    out: PathBuf,
    /// Also write the cohort table as csv here.
    #[clap(long)]
    csv: Option<PathBuf>,
    /// Also write the cohort table as json here.
    #[clap(long)]
    json: Option<PathBuf>,
    /// Number of records to preview.
    #[clap(long, default_value = "10")]
    preview: usize,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = Config::load_or_default(opt.config.as_deref())?.with_source(opt.path, opt.sheet);
    let cohort = load_cohort(&config)?;

    header("Records");
    println!("{}", cohort.exclusions().term_table());

    header("Diagnosis slots");
    for slot in cohort.slots() {
        println!("{}", slot.label_column());
    }

    if opt.preview > 0 {
        header("Preview");
        let preview = cohort.filter(|rec| rec.patient_id < opt.preview as u64);
        println!("{}", preview.term_table());
    }

    if let Some(path) = &opt.csv {
        let out = io::BufWriter::new(fs::File::create(path)?);
        cohort
            .write_csv(out)
            .with_context(|| format!("writing \"{}\"", path.display()))?;
        event!(Level::INFO, "wrote csv to \"{}\"", path.display());
    }
    if let Some(path) = &opt.json {
        let json = serde_json::to_string_pretty(&cohort.to_json())?;
        fs::write(path, json).with_context(|| format!("writing \"{}\"", path.display()))?;
        event!(Level::INFO, "wrote json to \"{}\"", path.display());
    }

    cohort.save(&opt.out)?;
    Ok(())
}
