use clap::Parser;
use pten_registry::{header, Cohort, Range, RangeSet, Value};
use qu::ick_use::*;
use std::{collections::BTreeMap, fmt, path::PathBuf};
use term_data_table::{Cell, Row, Table};

#[derive(Parser)]
struct Opt {
    /// Snapshot written by `import_registry`.
    #[clap(long, short, default_value = "cohort.bin")]
    snapshot: PathBuf,
    /// Columns to count values of.
    #[clap(long, short, default_value = "gender")]
    feature: Vec<String>,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let cohort = Cohort::load(&opt.snapshot)?;
    let total = cohort.len();

    header("Cohort");
    println!("{}", cohort.exclusions().term_table());
    ensure!(total > 0, "the cohort is empty");

    let age_buckets = RangeSet::new(vec![
        Range::new(0, Some(18)),
        Range::new(18, Some(35)),
        Range::new(35, Some(50)),
        Range::new(50, Some(65)),
        Range::new(65, Some(80)),
        Range::new(80, None),
    ]);

    header("Ages");
    let counts = age_buckets
        .clone()
        .bucket_values(cohort.iter().map(|rec| rec.age));
    println!(
        "{}",
        count_table(
            "Age range",
            counts.iter().map(|(l, c)| (l as &dyn fmt::Display, c)),
            total
        )
    );

    header("Years to primary diagnosis");
    let max = cohort
        .iter()
        .map(|rec| rec.years_to_primary)
        .max()
        .unwrap_or(0);
    let counts =
        RangeSet::uniform(10, max).bucket_values(cohort.iter().map(|rec| rec.years_to_primary));
    println!(
        "{}",
        count_table(
            "Years",
            counts.iter().map(|(l, c)| (l as &dyn fmt::Display, c)),
            total
        )
    );

    for slot in cohort.slots() {
        header(&format!("Age at {} diagnosis", slot.label_column()));
        let counts = age_buckets.clone().bucket_values_with_missing(
            cohort
                .iter()
                .map(|rec| rec.diagnosis(slot.number).and_then(|d| d.age)),
        );
        println!("{}", count_table("Age range", counts.for_display(), total));
    }

    for feature in opt.feature.iter() {
        header(feature);
        if !cohort.has_column(feature) {
            event!(Level::WARN, "no column `{}`", feature);
            continue;
        }
        let mut counts: BTreeMap<Value, usize> = BTreeMap::new();
        for rec in cohort.iter() {
            let value = cohort
                .value(rec, feature)
                .unwrap_or(Value::Missing)
                .or_label("missing data");
            *counts.entry(value).or_default() += 1;
        }
        println!(
            "{}",
            count_table(
                feature,
                counts.iter().map(|(v, c)| (v as &dyn fmt::Display, *c)),
                total
            )
        );
    }
    Ok(())
}

fn count_table<'a>(
    label: &str,
    counts: impl Iterator<Item = (&'a dyn fmt::Display, usize)>,
    total: usize,
) -> Table<'static> {
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from(label.to_string()))
            .with_cell(Cell::from("Count"))
            .with_cell(Cell::from("Percentage")),
    );
    for (label, count) in counts {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(label.to_string()))
                .with_cell(Cell::from(count.to_string()))
                .with_cell(Cell::from(format!(
                    "{:.1}%",
                    count as f64 / total as f64 * 100.
                ))),
        );
    }
    table
}
