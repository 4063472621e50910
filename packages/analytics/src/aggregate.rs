//! Roll-up of derived rows to coarser hierarchy levels, and gap filling.
//!
//! Additive columns (counts and deltas) are summed per `(value, day)`.
//! Population comes from the geographic reference, and lethality and
//! per-capita rates are recomputed from the sums rather than averaged.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use coronadata_analytics_models::AggregatedRecord;
use coronadata_geography_models::{GeoReference, HierarchyLevel};

use crate::AnalyticsError;
use crate::derive::{PopulationRates, lethality_rate};

#[derive(Debug, Default, Clone, Copy)]
struct Sums {
    confirmed: i64,
    deaths: i64,
    recovered: i64,
    active: i64,
    confirmed_delta: i64,
    recovered_delta: i64,
    deaths_delta: i64,
}

impl Sums {
    const fn add(&mut self, row: &AggregatedRecord) {
        self.confirmed += row.confirmed;
        self.deaths += row.deaths;
        self.recovered += row.recovered;
        self.active += row.active;
        self.confirmed_delta += row.confirmed_delta;
        self.recovered_delta += row.recovered_delta;
        self.deaths_delta += row.deaths_delta;
    }
}

/// Aggregates `rows` to `level`.
///
/// Rows whose name has no mapping to `level` in `reference` are skipped
/// with a warning. Output is sorted by `(name, report_day)`.
///
/// # Errors
///
/// Returns [`AnalyticsError::Configuration`] if any row's level cannot be
/// rolled up to `level`.
pub fn aggregate(
    rows: &[AggregatedRecord],
    level: HierarchyLevel,
    reference: &GeoReference,
) -> Result<Vec<AggregatedRecord>, AnalyticsError> {
    if let Some(row) = rows.iter().find(|r| !r.level.can_aggregate_to(level)) {
        return Err(AnalyticsError::Configuration {
            from: row.level,
            to: level,
        });
    }

    let mut groups: BTreeMap<(&str, NaiveDate, u32), Sums> = BTreeMap::new();
    let mut unmapped: BTreeSet<&str> = BTreeSet::new();

    for row in rows {
        let key = if row.level == level {
            Some(row.name.as_str())
        } else {
            reference.parent_key(row.level, &row.name, level)
        };

        let Some(key) = key else {
            unmapped.insert(row.name.as_str());
            continue;
        };

        groups
            .entry((key, row.date, row.report_day))
            .or_default()
            .add(row);
    }

    if !unmapped.is_empty() {
        log::warn!(
            "Skipped {} values with no {level} mapping: {:?}",
            unmapped.len(),
            unmapped
        );
    }

    let populations = reference.populations(level);

    Ok(groups
        .into_iter()
        .map(|((name, date, report_day), sums)| {
            let population = populations.get(name).copied().unwrap_or_default();
            from_sums(level, name, population, date, report_day, sums)
                .with_attributes(reference.attributes(level, name))
        })
        .collect())
}

fn from_sums(
    level: HierarchyLevel,
    name: &str,
    population: u64,
    date: NaiveDate,
    report_day: u32,
    sums: Sums,
) -> AggregatedRecord {
    let rates = PopulationRates::compute(
        sums.confirmed,
        sums.deaths,
        sums.recovered,
        sums.active,
        population,
    );

    AggregatedRecord {
        level,
        name: name.to_string(),
        country: None,
        iso_code: None,
        sub_region: None,
        world_bank_region: None,
        continent: None,
        population,
        date,
        report_day,
        confirmed: sums.confirmed,
        deaths: sums.deaths,
        recovered: sums.recovered,
        active: sums.active,
        confirmed_delta: sums.confirmed_delta,
        recovered_delta: sums.recovered_delta,
        deaths_delta: sums.deaths_delta,
        lethality_rate: lethality_rate(sums.deaths, sums.recovered),
        percent_of_population: rates.percent_of_population,
        confirmed_per_10k: rates.confirmed_per_10k,
        deaths_per_10k: rates.deaths_per_10k,
        recovered_per_10k: rates.recovered_per_10k,
        active_per_10k: rates.active_per_10k,
    }
}

/// Distinct `(date, report_day)` pairs present in `rows`, sorted.
#[must_use]
pub fn report_days(rows: &[AggregatedRecord]) -> Vec<(NaiveDate, u32)> {
    rows.iter()
        .map(|r| (r.date, r.report_day))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Adds a zero row for every `(entity, day)` pair missing from `rows`.
///
/// Entities are every value of `level` in `reference`; zero rows carry the
/// entity's population and hierarchy columns. Output is sorted by
/// `(name, report_day)`.
#[must_use]
pub fn fill_entities(
    rows: Vec<AggregatedRecord>,
    level: HierarchyLevel,
    reference: &GeoReference,
    days: &[(NaiveDate, u32)],
) -> Vec<AggregatedRecord> {
    let present: BTreeSet<(String, u32)> = rows
        .iter()
        .map(|r| (r.name.clone(), r.report_day))
        .collect();
    let populations = reference.populations(level);

    let mut filled = rows;
    let before = filled.len();

    for (name, population) in &populations {
        for &(date, report_day) in days {
            if !present.contains(&((*name).to_string(), report_day)) {
                filled.push(
                    AggregatedRecord::zero(level, *name, *population, date, report_day)
                        .with_attributes(reference.attributes(level, name)),
                );
            }
        }
    }

    log::debug!("Filled {} missing {level} rows", filled.len() - before);

    filled.sort_by(|a, b| (&a.name, a.report_day).cmp(&(&b.name, b.report_day)));
    filled
}

/// Completes a single location's series with zero rows for every day in
/// `days` it has no report for.
///
/// Zero rows copy the level, name, hierarchy columns and population of the
/// first row. When a report day appears more than once, the first row is
/// kept. Output is sorted by report day.
#[must_use]
pub fn fill_days(rows: Vec<AggregatedRecord>, days: &[(NaiveDate, u32)]) -> Vec<AggregatedRecord> {
    let Some(template) = rows.first().cloned() else {
        return rows;
    };

    let mut by_day: BTreeMap<u32, AggregatedRecord> = BTreeMap::new();
    for row in rows {
        by_day.entry(row.report_day).or_insert(row);
    }

    for &(date, report_day) in days {
        by_day.entry(report_day).or_insert_with(|| {
            AggregatedRecord::zero(
                template.level,
                template.name.clone(),
                template.population,
                date,
                report_day,
            )
            .with_attributes(template.attributes())
        });
    }

    by_day.into_values().collect()
}
