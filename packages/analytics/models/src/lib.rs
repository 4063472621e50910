#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Derived and aggregated case-table row types.
//!
//! [`GroupedCases`] is the input of the derivation stages, [`DerivedRecord`]
//! their output, and [`AggregatedRecord`] a derived row joined with
//! population and hierarchy columns for one hierarchy value. The persisted
//! table is a list of country-level [`AggregatedRecord`]s.

use std::fmt;

use chrono::NaiveDate;
use coronadata_geography_models::{HierarchyAttributes, HierarchyLevel};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Default number of days between confirmation and recovery.
pub const DEFAULT_RECOVERY_TIME: u32 = 14;

/// What to do with negative recovery estimates.
///
/// The estimate `confirmed[day - rtime] - deaths[day]` goes negative when
/// deaths outgrow the lagged confirmed count (typically early in an
/// outbreak).
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RecoveryClamp {
    /// Keep negative estimates as computed.
    #[default]
    Preserve,
    /// Floor estimates at zero.
    Clamp,
}

/// Selects a day either by calendar date or by report day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DaySelector {
    /// Calendar date.
    Date(NaiveDate),
    /// 1-based report day.
    Report(u32),
}

impl DaySelector {
    /// Whether a row with this date and report day matches.
    #[must_use]
    pub fn matches(self, date: NaiveDate, report_day: u32) -> bool {
        match self {
            Self::Date(d) => d == date,
            Self::Report(r) => r == report_day,
        }
    }
}

impl fmt::Display for DaySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(date) => write!(f, "{date}"),
            Self::Report(day) => write!(f, "report day {day}"),
        }
    }
}

/// Summed confirmed/deaths counts for one group on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedCases {
    /// Group key (a country name for the geo-joined table).
    pub group: String,
    /// Reporting date.
    pub date: NaiveDate,
    /// Cumulative confirmed cases.
    pub confirmed: i64,
    /// Cumulative deaths.
    pub deaths: i64,
}

/// A grouped row with recovery, active, delta and lethality columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedRecord {
    /// Group key.
    pub group: String,
    /// Reporting date.
    pub date: NaiveDate,
    /// 1-based day index from the earliest date in the table.
    pub report_day: u32,
    /// Cumulative confirmed cases.
    pub confirmed: i64,
    /// Cumulative deaths.
    pub deaths: i64,
    /// Estimated cumulative recoveries.
    pub recovered: i64,
    /// `confirmed - deaths - recovered`.
    pub active: i64,
    /// Confirmed minus the previous report day's confirmed.
    pub confirmed_delta: i64,
    /// Deaths minus the previous report day's deaths.
    pub deaths_delta: i64,
    /// Recovered minus the previous report day's recovered.
    pub recovered_delta: i64,
    /// `deaths / (deaths + recovered)`, 0 when the denominator is 0.
    pub lethality_rate: f64,
}

/// Derived counts for one hierarchy value on one day, with population and
/// population-relative rates.
///
/// Field order is the column order of the persisted CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedRecord {
    /// Hierarchy level `name` belongs to.
    pub level: HierarchyLevel,
    /// Value at `level` (country name, continent name, ...).
    pub name: String,
    /// Country name, for country-grained rows.
    pub country: Option<String>,
    /// Three-letter code, for country-grained and ISO rows.
    pub iso_code: Option<String>,
    /// Subregion, for country-grained and subregion rows.
    pub sub_region: Option<String>,
    /// World Bank region, for country-grained and World Bank region rows.
    pub world_bank_region: Option<String>,
    /// Continent, for country-grained and continent rows.
    pub continent: Option<String>,
    /// Summed population of every entity with this value.
    pub population: u64,
    /// Reporting date.
    pub date: NaiveDate,
    /// 1-based report day.
    pub report_day: u32,
    /// Cumulative confirmed cases.
    pub confirmed: i64,
    /// Cumulative deaths.
    pub deaths: i64,
    /// Estimated cumulative recoveries.
    pub recovered: i64,
    /// Active cases.
    pub active: i64,
    /// Daily confirmed delta.
    pub confirmed_delta: i64,
    /// Daily recovered delta.
    pub recovered_delta: i64,
    /// Daily deaths delta.
    pub deaths_delta: i64,
    /// `deaths / (deaths + recovered)`.
    pub lethality_rate: f64,
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

impl AggregatedRecord {
    /// A row with every case count and rate at zero.
    ///
    /// Only the hierarchy column of `level` is set; see
    /// [`Self::with_attributes`].
    #[must_use]
    pub fn zero(
        level: HierarchyLevel,
        name: impl Into<String>,
        population: u64,
        date: NaiveDate,
        report_day: u32,
    ) -> Self {
        let name = name.into();
        let attributes = HierarchyAttributes::of_level(level, &name);

        Self {
            level,
            name,
            country: attributes.country,
            iso_code: attributes.iso_code,
            sub_region: attributes.sub_region,
            world_bank_region: attributes.world_bank_region,
            continent: attributes.continent,
            population,
            date,
            report_day,
            confirmed: 0,
            deaths: 0,
            recovered: 0,
            active: 0,
            confirmed_delta: 0,
            recovered_delta: 0,
            deaths_delta: 0,
            lethality_rate: 0.0,
            percent_of_population: 0.0,
            confirmed_per_10k: 0.0,
            deaths_per_10k: 0.0,
            recovered_per_10k: 0.0,
            active_per_10k: 0.0,
        }
    }

    /// Replaces the hierarchy columns.
    #[must_use]
    pub fn with_attributes(self, attributes: HierarchyAttributes) -> Self {
        Self {
            country: attributes.country,
            iso_code: attributes.iso_code,
            sub_region: attributes.sub_region,
            world_bank_region: attributes.world_bank_region,
            continent: attributes.continent,
            ..self
        }
    }

    /// The hierarchy columns.
    #[must_use]
    pub fn attributes(&self) -> HierarchyAttributes {
        HierarchyAttributes {
            country: self.country.clone(),
            iso_code: self.iso_code.clone(),
            sub_region: self.sub_region.clone(),
            world_bank_region: self.world_bank_region.clone(),
            continent: self.continent.clone(),
        }
    }

    /// Drops population columns, keeping the derived counts.
    #[must_use]
    pub fn to_derived(&self) -> DerivedRecord {
        DerivedRecord {
            group: self.name.clone(),
            date: self.date,
            report_day: self.report_day,
            confirmed: self.confirmed,
            deaths: self.deaths,
            recovered: self.recovered,
            active: self.active,
            confirmed_delta: self.confirmed_delta,
            deaths_delta: self.deaths_delta,
            recovered_delta: self.recovered_delta,
            lethality_rate: self.lethality_rate,
        }
    }
}
