//! Derivation stages: report days, recovery estimate, daily deltas, rates.
//!
//! Every stage takes a table and returns a new one. The lagged self-joins
//! use keyed lookups on `(group, report_day)`, so input order does not
//! matter and gaps in the date range behave like missing rows.

use std::collections::HashMap;

use chrono::NaiveDate;
use coronadata_analytics_models::{
    AggregatedRecord, DEFAULT_RECOVERY_TIME, DerivedRecord, GroupedCases, RecoveryClamp,
};
use coronadata_geography_models::{HierarchyAttributes, HierarchyLevel};

/// Parameters of the recovery estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationConfig {
    /// Days between confirmation and recovery.
    pub recovery_time: u32,
    /// Negative-estimate policy.
    pub clamp: RecoveryClamp,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self {
            recovery_time: DEFAULT_RECOVERY_TIME,
            clamp: RecoveryClamp::default(),
        }
    }
}

/// Runs every stage on grouped counts.
#[must_use]
pub fn derive(cases: &[GroupedCases], config: DerivationConfig) -> Vec<DerivedRecord> {
    rederive(&assign_report_days(cases), config)
}

/// Recomputes recovery, deltas and lethality from the confirmed/deaths
/// columns of an already-derived table.
#[must_use]
pub fn rederive(rows: &[DerivedRecord], config: DerivationConfig) -> Vec<DerivedRecord> {
    let recovered = estimate_recovery(rows, config.recovery_time, config.clamp);
    let deltas = daily_deltas(&recovered);
    with_lethality(&deltas)
}

/// Report day of `date` relative to `first` (`first` is day 1).
#[must_use]
pub fn report_day(date: NaiveDate, first: NaiveDate) -> u32 {
    let days = (date - first).num_days() + 1;
    u32::try_from(days).unwrap_or(0)
}

/// Assigns report days over the full date range and sorts by
/// `(group, report_day)`. Derived columns start at zero.
#[must_use]
pub fn assign_report_days(cases: &[GroupedCases]) -> Vec<DerivedRecord> {
    let Some(first) = cases.iter().map(|c| c.date).min() else {
        return Vec::new();
    };

    let mut rows: Vec<DerivedRecord> = cases
        .iter()
        .map(|c| DerivedRecord {
            group: c.group.clone(),
            date: c.date,
            report_day: report_day(c.date, first),
            confirmed: c.confirmed,
            deaths: c.deaths,
            recovered: 0,
            active: c.confirmed - c.deaths,
            confirmed_delta: 0,
            deaths_delta: 0,
            recovered_delta: 0,
            lethality_rate: 0.0,
        })
        .collect();

    rows.sort_by(|a, b| (&a.group, a.report_day).cmp(&(&b.group, b.report_day)));
    rows
}

/// Estimates recoveries with a lagged self-join.
///
/// `recovered = confirmed[day - recovery_time] - deaths[day]` for the same
/// group; 0 when the lagged row does not exist. `active` is recomputed from
/// the final `recovered`.
#[must_use]
pub fn estimate_recovery(
    rows: &[DerivedRecord],
    recovery_time: u32,
    clamp: RecoveryClamp,
) -> Vec<DerivedRecord> {
    let confirmed: HashMap<(&str, u32), i64> = rows
        .iter()
        .map(|r| ((r.group.as_str(), r.report_day), r.confirmed))
        .collect();

    rows.iter()
        .map(|row| {
            let lagged = row
                .report_day
                .checked_sub(recovery_time)
                .and_then(|day| confirmed.get(&(row.group.as_str(), day)));

            let mut recovered = lagged.map_or(0, |c| c - row.deaths);
            if clamp == RecoveryClamp::Clamp {
                recovered = recovered.max(0);
            }

            DerivedRecord {
                recovered,
                active: row.confirmed - row.deaths - recovered,
                ..row.clone()
            }
        })
        .collect()
}

/// Computes day-over-day deltas with a one-day lagged self-join.
///
/// A missing previous day counts as zero, so the first day of a group
/// has deltas equal to its values.
#[must_use]
pub fn daily_deltas(rows: &[DerivedRecord]) -> Vec<DerivedRecord> {
    let previous: HashMap<(&str, u32), (i64, i64, i64)> = rows
        .iter()
        .map(|r| {
            (
                (r.group.as_str(), r.report_day),
                (r.confirmed, r.deaths, r.recovered),
            )
        })
        .collect();

    rows.iter()
        .map(|row| {
            let (confirmed, deaths, recovered) = row
                .report_day
                .checked_sub(1)
                .and_then(|day| previous.get(&(row.group.as_str(), day)))
                .copied()
                .unwrap_or_default();

            DerivedRecord {
                confirmed_delta: row.confirmed - confirmed,
                deaths_delta: row.deaths - deaths,
                recovered_delta: row.recovered - recovered,
                ..row.clone()
            }
        })
        .collect()
}

/// Fills the lethality rate column.
#[must_use]
pub fn with_lethality(rows: &[DerivedRecord]) -> Vec<DerivedRecord> {
    rows.iter()
        .map(|row| DerivedRecord {
            lethality_rate: lethality_rate(row.deaths, row.recovered),
            ..row.clone()
        })
        .collect()
}

/// `deaths / (deaths + recovered)`, or 0 when the denominator is 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn lethality_rate(deaths: i64, recovered: i64) -> f64 {
    let denominator = deaths + recovered;
    if denominator == 0 {
        0.0
    } else {
        deaths as f64 / denominator as f64
    }
}

/// Population-relative rates of one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopulationRates {
    /// `(confirmed + deaths + recovered) / population`.
    pub percent_of_population: f64,
    /// Confirmed per 10,000 inhabitants.
    pub confirmed_per_10k: f64,
    /// Deaths per 10,000 inhabitants.
    pub deaths_per_10k: f64,
    /// Recovered per 10,000 inhabitants.
    pub recovered_per_10k: f64,
    /// Active per 10,000 inhabitants.
    pub active_per_10k: f64,
}

impl PopulationRates {
    /// Computes the rates. A zero population yields zero rates.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(confirmed: i64, deaths: i64, recovered: i64, active: i64, population: u64) -> Self {
        if population == 0 {
            return Self {
                percent_of_population: 0.0,
                confirmed_per_10k: 0.0,
                deaths_per_10k: 0.0,
                recovered_per_10k: 0.0,
                active_per_10k: 0.0,
            };
        }

        let population = population as f64;
        let per_10k = |value: i64| value as f64 * 10_000.0 / population;

        Self {
            percent_of_population: (confirmed + deaths + recovered) as f64 / population,
            confirmed_per_10k: per_10k(confirmed),
            deaths_per_10k: per_10k(deaths),
            recovered_per_10k: per_10k(recovered),
            active_per_10k: per_10k(active),
        }
    }
}

/// Joins a derived row with its population and hierarchy columns and
/// computes the rates.
#[must_use]
pub fn with_population(
    row: &DerivedRecord,
    level: HierarchyLevel,
    population: u64,
    attributes: HierarchyAttributes,
) -> AggregatedRecord {
    let rates = PopulationRates::compute(
        row.confirmed,
        row.deaths,
        row.recovered,
        row.active,
        population,
    );

    AggregatedRecord {
        level,
        name: row.group.clone(),
        country: attributes.country,
        iso_code: attributes.iso_code,
        sub_region: attributes.sub_region,
        world_bank_region: attributes.world_bank_region,
        continent: attributes.continent,
        population,
        date: row.date,
        report_day: row.report_day,
        confirmed: row.confirmed,
        deaths: row.deaths,
        recovered: row.recovered,
        active: row.active,
        confirmed_delta: row.confirmed_delta,
        recovered_delta: row.recovered_delta,
        deaths_delta: row.deaths_delta,
        lethality_rate: lethality_rate(row.deaths, row.recovered),
        percent_of_population: rates.percent_of_population,
        confirmed_per_10k: rates.confirmed_per_10k,
        deaths_per_10k: rates.deaths_per_10k,
        recovered_per_10k: rates.recovered_per_10k,
        active_per_10k: rates.active_per_10k,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, day).unwrap()
    }

    fn cases(group: &str, start: u32, counts: &[(i64, i64)]) -> Vec<GroupedCases> {
        counts
            .iter()
            .zip(start..)
            .map(|(&(confirmed, deaths), day)| GroupedCases {
                group: group.to_string(),
                date: date(day),
                confirmed,
                deaths,
            })
            .collect()
    }

    fn config(recovery_time: u32, clamp: RecoveryClamp) -> DerivationConfig {
        DerivationConfig {
            recovery_time,
            clamp,
        }
    }

    #[test]
    fn report_days_start_at_one_from_global_minimum() {
        let mut input = cases("B", 5, &[(1, 0), (2, 0)]);
        input.extend(cases("A", 3, &[(1, 0)]));

        let rows = assign_report_days(&input);
        let days: Vec<(&str, u32)> = rows.iter().map(|r| (r.group.as_str(), r.report_day)).collect();
        assert_eq!(days, vec![("A", 1), ("B", 3), ("B", 4)]);
    }

    #[test]
    fn no_lag_match_means_no_recoveries() {
        let mut input = cases("A", 1, &[(10, 1), (15, 1)]);
        input.extend(cases("B", 1, &[(5, 0), (5, 0)]));

        let rows = derive(&input, DerivationConfig::default());
        for row in &rows {
            assert_eq!(row.recovered, 0, "{row:?}");
            assert_eq!(row.active, row.confirmed - row.deaths);
        }
    }

    #[test]
    fn one_day_recovery_uses_previous_confirmed() {
        let input = cases("A", 1, &[(10, 0), (15, 2)]);
        let rows = derive(&input, config(1, RecoveryClamp::Preserve));

        assert_eq!(rows[0].recovered, 0);
        assert_eq!(rows[1].recovered, 8);
        assert_eq!(rows[1].active, 5);
    }

    #[test]
    fn negative_estimates_are_preserved_or_clamped() {
        let input = cases("A", 1, &[(1, 0), (2, 3)]);

        let preserved = derive(&input, config(1, RecoveryClamp::Preserve));
        assert_eq!(preserved[1].recovered, -2);
        assert_eq!(preserved[1].active, 2 - 3 + 2);

        let clamped = derive(&input, config(1, RecoveryClamp::Clamp));
        assert_eq!(clamped[1].recovered, 0);
        assert_eq!(clamped[1].active, -1);
    }

    #[test]
    fn lag_join_does_not_cross_groups() {
        let mut input = cases("A", 1, &[(100, 0)]);
        input.extend(cases("B", 2, &[(5, 1)]));

        let rows = derive(&input, config(1, RecoveryClamp::Preserve));
        let b = rows.iter().find(|r| r.group == "B").unwrap();
        assert_eq!(b.recovered, 0);
    }

    #[test]
    fn deltas_subtract_previous_day_and_start_from_zero() {
        let input = cases("A", 1, &[(10, 0), (15, 2), (21, 3)]);
        let rows = derive(&input, config(1, RecoveryClamp::Preserve));

        let deltas: Vec<(i64, i64, i64)> = rows
            .iter()
            .map(|r| (r.confirmed_delta, r.deaths_delta, r.recovered_delta))
            .collect();
        // recovered: 0, 10 - 2 = 8, 15 - 3 = 12
        assert_eq!(deltas, vec![(10, 0, 0), (5, 2, 8), (6, 1, 4)]);
    }

    #[test]
    fn missing_previous_day_counts_as_zero() {
        let mut input = cases("A", 1, &[(10, 0)]);
        input.extend(cases("A", 3, &[(12, 1)]));

        let rows = derive(&input, DerivationConfig::default());
        assert_eq!(rows[1].report_day, 3);
        assert_eq!(rows[1].confirmed_delta, 12);
        assert_eq!(rows[1].deaths_delta, 1);
    }

    #[test]
    fn active_identity_and_lethality_bounds_hold() {
        let mut input = cases("A", 1, &[(10, 0), (20, 1), (30, 4), (35, 6), (36, 9)]);
        input.extend(cases("B", 2, &[(3, 3), (3, 3), (8, 3)]));

        for clamp in [RecoveryClamp::Preserve, RecoveryClamp::Clamp] {
            for rtime in 0..4 {
                for row in derive(&input, config(rtime, clamp)) {
                    assert_eq!(row.active, row.confirmed - row.deaths - row.recovered);
                    if row.deaths + row.recovered == 0 {
                        assert!(row.lethality_rate.abs() < f64::EPSILON);
                    }
                    if clamp == RecoveryClamp::Clamp {
                        assert!(row.recovered >= 0);
                        assert!((0.0..=1.0).contains(&row.lethality_rate), "{row:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn rederive_matches_fresh_derivation() {
        let input = cases("A", 1, &[(10, 0), (15, 2), (21, 3)]);
        let first = derive(&input, DerivationConfig::default());
        let again = rederive(&first, config(1, RecoveryClamp::Preserve));
        assert_eq!(again, derive(&input, config(1, RecoveryClamp::Preserve)));
    }

    #[test]
    fn lethality_is_zero_without_outcomes() {
        assert!(lethality_rate(0, 0).abs() < f64::EPSILON);
        assert!((lethality_rate(1, 3) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn population_rates() {
        let rates = PopulationRates::compute(100, 10, 40, 50, 20_000);
        assert!((rates.percent_of_population - 0.0075).abs() < 1e-12);
        assert!((rates.confirmed_per_10k - 50.0).abs() < 1e-12);
        assert!((rates.deaths_per_10k - 5.0).abs() < 1e-12);
        assert!((rates.recovered_per_10k - 20.0).abs() < 1e-12);
        assert!((rates.active_per_10k - 25.0).abs() < 1e-12);

        let empty = PopulationRates::compute(100, 10, 40, 50, 0);
        assert!(empty.confirmed_per_10k.abs() < f64::EPSILON);
    }

    #[test]
    fn joins_population() {
        let rows = derive(&cases("A", 1, &[(10, 0), (15, 2)]), config(1, RecoveryClamp::Preserve));
        let attributes = HierarchyAttributes {
            country: Some("A".to_string()),
            continent: Some("North".to_string()),
            ..HierarchyAttributes::default()
        };
        let joined = with_population(&rows[1], HierarchyLevel::Country, 1_000, attributes);
        assert_eq!(joined.name, "A");
        assert_eq!(joined.continent.as_deref(), Some("North"));
        assert_eq!(joined.recovered, 8);
        assert!((joined.active_per_10k - 50.0).abs() < 1e-12);
        assert_eq!(joined.to_derived(), rows[1]);
    }
}
