#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Case-count feed definitions and raw time-series record types.
//!
//! Every configured feed is a wide table with one column per reporting
//! day. Loading a feed produces [`LongRecord`]s; merging the confirmed and
//! deaths feeds produces one [`CaseRecord`] per location per day.

use std::str::FromStr as _;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Global confirmed-cases time series.
pub const CONFIRMED_GLOBAL_URL: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series/time_series_covid19_confirmed_global.csv";

/// Global deaths time series.
pub const DEATHS_GLOBAL_URL: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series/time_series_covid19_deaths_global.csv";

/// A cumulative count carried by a feed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "title_case", ascii_case_insensitive)]
pub enum Metric {
    /// Cumulative confirmed cases
    Confirmed,
    /// Cumulative deaths
    Deaths,
}

impl Metric {
    /// Infers the metric from a feed file name of the form
    /// `time_series_covid19_<metric>_<scope>.csv`.
    #[must_use]
    pub fn from_feed_url(url: &str) -> Option<Self> {
        let file_name = url.rsplit('/').next()?;
        let token = file_name.split('_').nth(3)?;
        Self::from_str(token).ok()
    }
}

/// A configured feed: which metric it carries and where to fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Feed {
    /// Metric stored in the feed's cells. When absent it is inferred from
    /// the file name of `url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    /// URL (or file name, for local sources) of the wide CSV.
    pub url: String,
}

impl Feed {
    /// Creates a feed definition.
    #[must_use]
    pub fn new(metric: Metric, url: impl Into<String>) -> Self {
        Self {
            metric: Some(metric),
            url: url.into(),
        }
    }

    /// Creates a feed whose metric is inferred from its file name.
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            metric: None,
            url: url.into(),
        }
    }

    /// The configured metric, falling back to [`Metric::from_feed_url`].
    #[must_use]
    pub fn resolved_metric(&self) -> Option<Metric> {
        self.metric.or_else(|| Metric::from_feed_url(&self.url))
    }

    /// The two global feeds (confirmed, deaths).
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(Metric::Confirmed, CONFIRMED_GLOBAL_URL),
            Self::new(Metric::Deaths, DEATHS_GLOBAL_URL),
        ]
    }
}

/// The four leading key columns of a feed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// `Province/State`, absent for country-level rows.
    pub province: Option<String>,
    /// `Country/Region` as spelled by the feed.
    pub country: String,
    /// `Lat`, absent when the feed leaves it blank.
    pub latitude: Option<f64>,
    /// `Long`, absent when the feed leaves it blank.
    pub longitude: Option<f64>,
}

impl Location {
    /// Hashable join key. Coordinates compare by bit pattern, which is
    /// exact for values parsed from identical text.
    #[must_use]
    pub fn key(&self) -> LocationKey {
        LocationKey {
            province: self.province.clone(),
            country: self.country.clone(),
            latitude: self.latitude.map(f64::to_bits),
            longitude: self.longitude.map(f64::to_bits),
        }
    }

    /// `(longitude, latitude)` when both are present.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.longitude?, self.latitude?))
    }
}

/// A key column of the raw feeds, usable to group rows without geometry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FeedColumn {
    /// `Province/State`
    #[strum(to_string = "province_state", serialize = "province/state", serialize = "province")]
    ProvinceState,
    /// `Country/Region`
    #[strum(to_string = "country_region", serialize = "country/region", serialize = "country")]
    CountryRegion,
    /// `Lat`
    #[strum(to_string = "lat", serialize = "latitude")]
    Lat,
    /// `Long`
    #[strum(to_string = "long", serialize = "longitude")]
    Long,
}

impl FeedColumn {
    /// Value of this column in `location`, empty when the cell was blank.
    #[must_use]
    pub fn value(self, location: &Location) -> String {
        match self {
            Self::ProvinceState => location.province.clone().unwrap_or_default(),
            Self::CountryRegion => location.country.clone(),
            Self::Lat => location.latitude.map(|v| v.to_string()).unwrap_or_default(),
            Self::Long => location.longitude.map(|v| v.to_string()).unwrap_or_default(),
        }
    }
}

/// Equality/ordering key for a [`Location`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocationKey {
    /// Province, if any.
    pub province: Option<String>,
    /// Country as spelled by the feed.
    pub country: String,
    /// Latitude bits.
    pub latitude: Option<u64>,
    /// Longitude bits.
    pub longitude: Option<u64>,
}

/// One cell of a wide feed after reshaping to long form.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRecord {
    /// Row key columns.
    pub location: Location,
    /// Reporting date (the column header).
    pub date: NaiveDate,
    /// Metric of the feed the cell came from.
    pub metric: Metric,
    /// Cumulative value.
    pub value: i64,
}

/// All cells of one feed in long form.
#[derive(Debug, Clone, PartialEq)]
pub struct LongFeed {
    /// Metric carried by every record.
    pub metric: Metric,
    /// Records in row-major order.
    pub records: Vec<LongRecord>,
}

/// Confirmed and deaths counts for one location on one day.
///
/// Raw unit of the pipeline; never mutated after the merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    /// Row key columns.
    pub location: Location,
    /// Reporting date.
    pub date: NaiveDate,
    /// Cumulative confirmed cases.
    pub confirmed: i64,
    /// Cumulative deaths.
    pub deaths: i64,
}
