#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Queryable COVID-19 case dataset.
//!
//! [`Dataset::load`] runs the whole pipeline: fetch and merge the feeds,
//! attribute rows to reference countries, derive recovery/delta/rate
//! columns and join populations. The resulting country-level table is
//! owned by the dataset and replaced wholesale on recompute. Queries
//! aggregate it on demand to any [`HierarchyLevel`].
//!
//! [`PersistentDataset`] adds a CSV cache with a staleness window, and
//! [`export`] writes query results as `GeoJSON`. [`CaseData`] groups the
//! merged feeds by their own key columns when no geometry is wanted.

pub mod cases;
pub mod config;
pub mod export;
pub mod persist;
pub mod resolve;
pub mod watcher;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use coronadata_analytics::derive::with_population;
use coronadata_analytics::{
    AnalyticsError, DerivationConfig, aggregate, derive, fill_days, fill_entities, rederive,
    report_days,
};
use coronadata_analytics_models::{AggregatedRecord, DaySelector};
use coronadata_geography_models::{GeoReference, HierarchyAttributes, HierarchyLevel};
use coronadata_source::{FeedSource, SourceError, load_feed, merge_feeds};
use coronadata_spatial::{GeometryStore, SpatialError};
use thiserror::Error;

pub use cases::CaseData;
pub use config::DatasetConfig;
pub use persist::PersistentDataset;
pub use resolve::ResolutionReport;
pub use watcher::StalenessWatcher;

/// Errors that can occur while building or querying a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Invalid configuration or query parameters.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of what is wrong.
        message: String,
    },

    /// A case feed could not be fetched or parsed.
    #[error("Fetch error: {0}")]
    Fetch(#[from] SourceError),

    /// Geometry could not be loaded.
    #[error("Geometry error: {0}")]
    Geometry(#[from] SpatialError),

    /// Aggregation failed.
    #[error(transparent)]
    Analytics(#[from] AnalyticsError),

    /// No row matches the requested day.
    #[error("Nothing found for {day}")]
    NotFound {
        /// The requested day.
        day: DaySelector,
    },

    /// The table has no rows.
    #[error("The dataset is empty")]
    EmptyTable,

    /// Reading or writing the persisted table failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A derived country-level case table and the geometry it was resolved
/// against.
#[derive(Debug)]
pub struct Dataset {
    store: Arc<GeometryStore>,
    config: DatasetConfig,
    table: Vec<AggregatedRecord>,
    report: ResolutionReport,
}

impl Dataset {
    /// Fetches the configured feeds and builds the table.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] if a feed cannot be fetched or merged, or
    /// the country polygons cannot be built. Unresolved locations are not
    /// errors; see [`Self::resolution_report`].
    pub fn load(
        feeds: &dyn FeedSource,
        store: Arc<GeometryStore>,
        config: DatasetConfig,
    ) -> Result<Self, DatasetError> {
        let (table, report) = build_table(feeds, &store, &config)?;
        Ok(Self {
            store,
            config,
            table,
            report,
        })
    }

    /// Wraps an already-derived country-level table.
    #[must_use]
    pub fn from_table(
        store: Arc<GeometryStore>,
        config: DatasetConfig,
        table: Vec<AggregatedRecord>,
    ) -> Self {
        Self {
            store,
            config,
            table,
            report: ResolutionReport::default(),
        }
    }

    /// Re-runs the whole pipeline and replaces the table.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] on fetch or geometry failures, in which
    /// case the current table is kept.
    pub fn reload(&mut self, feeds: &dyn FeedSource) -> Result<(), DatasetError> {
        log::info!("Recomputing dataset from {} feeds", self.config.feeds.len());
        let (table, report) = build_table(feeds, &self.store, &self.config)?;
        self.table = table;
        self.report = report;
        Ok(())
    }

    /// The country-level table, sorted by country then report day.
    #[must_use]
    pub fn table(&self) -> &[AggregatedRecord] {
        &self.table
    }

    /// Configuration the dataset was built with.
    #[must_use]
    pub const fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Geometry store shared with other datasets.
    #[must_use]
    pub const fn store(&self) -> &Arc<GeometryStore> {
        &self.store
    }

    /// Locations dropped during the last load.
    #[must_use]
    pub const fn resolution_report(&self) -> &ResolutionReport {
        &self.report
    }

    /// Recomputes recovery, delta and rate columns with a new recovery
    /// time, keeping the confirmed and deaths counts.
    pub fn set_recovery_time(&mut self, recovery_time: u32) {
        self.set_derivation(DerivationConfig {
            recovery_time,
            ..self.config.derivation()
        });
    }

    /// Recomputes recovery, delta and rate columns with new recovery
    /// parameters, keeping the confirmed and deaths counts.
    pub fn set_derivation(&mut self, derivation: DerivationConfig) {
        log::info!(
            "Recomputing with recovery time {} days ({})",
            derivation.recovery_time,
            derivation.clamp
        );
        self.config.recovery_time = derivation.recovery_time;
        self.config.recovery_clamp = derivation.clamp;

        let derived: Vec<_> = self.table.iter().map(AggregatedRecord::to_derived).collect();
        let rederived = rederive(&derived, derivation);

        let joins: HashMap<&str, &AggregatedRecord> =
            self.table.iter().map(|r| (r.name.as_str(), r)).collect();

        let table = rederived
            .iter()
            .map(|row| {
                let (population, attributes) = joins.get(row.group.as_str()).map_or_else(
                    || (0, HierarchyAttributes::of_level(HierarchyLevel::Country, &row.group)),
                    |r| (r.population, r.attributes()),
                );
                with_population(row, HierarchyLevel::Country, population, attributes)
            })
            .collect();

        self.table = table;
    }

    /// Distinct `(date, report_day)` pairs, sorted.
    #[must_use]
    pub fn days(&self) -> Vec<(NaiveDate, u32)> {
        report_days(&self.table)
    }

    /// Earliest day in the table.
    #[must_use]
    pub fn first_day(&self) -> Option<(NaiveDate, u32)> {
        self.table.iter().map(|r| (r.date, r.report_day)).min()
    }

    /// Latest day in the table.
    #[must_use]
    pub fn last_day(&self) -> Option<(NaiveDate, u32)> {
        self.table.iter().map(|r| (r.date, r.report_day)).max()
    }

    /// Distinct values of `level` among the table's countries, sorted.
    #[must_use]
    pub fn unique(&self, level: HierarchyLevel) -> Vec<String> {
        let reference = self.store.reference();
        self.table
            .iter()
            .filter_map(|r| country_key(&reference, &r.name, level))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Rows for one day, aggregated to `level`.
    ///
    /// `day` defaults to the latest date. With `fill`, every `level` value
    /// of the reference data appears, with zero counts when it has no
    /// report that day.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::NotFound`] if no row matches the day, or
    /// [`DatasetError::EmptyTable`] if `day` is `None` and the table is
    /// empty.
    pub fn data_for_day(
        &self,
        day: Option<DaySelector>,
        level: HierarchyLevel,
        fill: bool,
    ) -> Result<Vec<AggregatedRecord>, DatasetError> {
        let day = match day {
            Some(day) => day,
            None => DaySelector::Date(self.last_day().ok_or(DatasetError::EmptyTable)?.0),
        };

        let rows: Vec<AggregatedRecord> = self
            .table
            .iter()
            .filter(|r| day.matches(r.date, r.report_day))
            .cloned()
            .collect();

        let Some(first) = rows.first() else {
            return Err(DatasetError::NotFound { day });
        };
        let days = [(first.date, first.report_day)];

        let reference = self.store.reference();
        let aggregated = aggregate(&rows, level, &reference)?;

        Ok(if fill {
            fill_entities(aggregated, level, &reference, &days)
        } else {
            aggregated
        })
    }

    /// Time series of one `level` value, aggregated to that level.
    ///
    /// Returns an empty list when no country has `value` at `level`. With
    /// `fill`, days of the dataset missing from the series get zero rows.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Analytics`] if the table cannot be
    /// aggregated to `level`.
    pub fn data_for_location(
        &self,
        value: &str,
        level: HierarchyLevel,
        fill: bool,
    ) -> Result<Vec<AggregatedRecord>, DatasetError> {
        let reference = self.store.reference();

        let rows: Vec<AggregatedRecord> = self
            .table
            .iter()
            .filter(|r| country_key(&reference, &r.name, level) == Some(value))
            .cloned()
            .collect();

        if rows.is_empty() {
            log::info!("No rows for {level} '{value}'");
            return Ok(Vec::new());
        }

        let aggregated = aggregate(&rows, level, &reference)?;

        Ok(if fill {
            fill_days(aggregated, &self.days())
        } else {
            aggregated
        })
    }
}

fn country_key<'a>(
    reference: &'a GeoReference,
    country: &'a str,
    level: HierarchyLevel,
) -> Option<&'a str> {
    if level == HierarchyLevel::Country {
        return Some(country);
    }
    reference.parent_key(HierarchyLevel::Country, country, level)
}

fn build_table(
    feeds: &dyn FeedSource,
    store: &GeometryStore,
    config: &DatasetConfig,
) -> Result<(Vec<AggregatedRecord>, ResolutionReport), DatasetError> {
    let long = config
        .feeds
        .iter()
        .map(|feed| load_feed(feeds, feed))
        .collect::<Result<Vec<_>, _>>()?;
    let records = merge_feeds(long)?;

    let polygons = store.table(HierarchyLevel::Country, None)?;
    let reference = store.reference();

    let (cases, report) = resolve::resolve_countries(&records, &reference, &polygons);
    report.log();

    let derived = derive(&cases, config.derivation());

    let mut table: Vec<AggregatedRecord> = derived
        .iter()
        .map(|row| {
            let population = reference.entity(&row.group).map_or(0, |e| e.population);
            let attributes = reference.attributes(HierarchyLevel::Country, &row.group);
            with_population(row, HierarchyLevel::Country, population, attributes)
        })
        .collect();

    if config.row_limit > 0 && table.len() > config.row_limit {
        log::debug!("Keeping the first {} of {} rows", config.row_limit, table.len());
        table.truncate(config.row_limit);
    }

    log::info!(
        "Built table with {} rows for {} countries",
        table.len(),
        table.iter().map(|r| r.name.as_str()).collect::<BTreeSet<_>>().len()
    );

    Ok((table, report))
}

#[cfg(test)]
pub(crate) mod tests {
    use coronadata_analytics_models::RecoveryClamp;
    use coronadata_geography_models::GeoEntity;
    use coronadata_source::StaticFeedSource;
    use coronadata_source_models::{Feed, Metric};
    use coronadata_spatial::{GeoFeature, GeometrySource, StaticGeometryProvider};
    use geo::{MultiPolygon, Rect};

    use super::*;

    const CONFIRMED: &str = "\
Province/State,Country/Region,Lat,Long,3/1/20,3/2/20,3/3/20
,Alpha,5,5,10,15,21
Islands,Alpha,2,2,0,1,1
,Betaland,5,15,5,5,8
,Gamma,-5,5,0,0,2
,Atlantis,50,50,3,3,3
Recovered,Alpha,0,0,9,9,9
";

    const DEATHS: &str = "\
Province/State,Country/Region,Lat,Long,3/1/20,3/2/20,3/3/20
,Alpha,5,5,0,2,3
Islands,Alpha,2,2,0,0,0
,Betaland,5,15,0,0,1
,Gamma,-5,5,0,0,0
,Atlantis,50,50,0,0,0
Recovered,Alpha,0,0,0,0,0
";

    fn square(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![Rect::new((min_x, min_y), (max_x, max_y)).to_polygon()])
    }

    fn feature(
        name: &str,
        continent: &str,
        subregion: &str,
        population: u64,
        geometry: MultiPolygon<f64>,
    ) -> GeoFeature {
        GeoFeature {
            entity: GeoEntity {
                name: name.to_string(),
                iso_code: name[..3].to_uppercase(),
                continent: continent.to_string(),
                subregion: subregion.to_string(),
                worldbank_region: format!("{continent} WB"),
                population,
            },
            geometry,
        }
    }

    pub fn features() -> Vec<GeoFeature> {
        vec![
            feature("Alpha", "North", "North West", 10_000, square(0.0, 0.0, 10.0, 10.0)),
            feature("Beta", "North", "North East", 20_000, square(10.0, 0.0, 20.0, 10.0)),
            feature("Gamma", "South", "South West", 5_000, square(0.0, -10.0, 10.0, 0.0)),
            feature("Delta", "South", "South East", 1_000, MultiPolygon(vec![])),
        ]
    }

    pub fn reference() -> GeoReference {
        GeoReference::new(features().into_iter().map(|f| f.entity).collect())
    }

    pub fn store() -> Arc<GeometryStore> {
        let provider = StaticGeometryProvider::new(features());
        Arc::new(GeometryStore::load(Box::new(provider), GeometrySource::Bundled).unwrap())
    }

    pub fn feed_source() -> StaticFeedSource {
        StaticFeedSource::new()
            .with_feed("confirmed.csv", CONFIRMED)
            .with_feed("deaths.csv", DEATHS)
    }

    pub fn config() -> DatasetConfig {
        DatasetConfig {
            recovery_time: 1,
            recovery_clamp: RecoveryClamp::Preserve,
            feeds: vec![
                Feed::new(Metric::Confirmed, "confirmed.csv"),
                Feed::new(Metric::Deaths, "deaths.csv"),
            ],
            ..DatasetConfig::default()
        }
    }

    pub fn dataset() -> Dataset {
        Dataset::load(&feed_source(), store(), config()).unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, day).unwrap()
    }

    fn counts(rows: &[AggregatedRecord]) -> Vec<(&str, u32, i64, i64, i64)> {
        rows.iter()
            .map(|r| (r.name.as_str(), r.report_day, r.confirmed, r.deaths, r.recovered))
            .collect()
    }

    #[test]
    fn load_resolves_merges_and_derives() {
        let dataset = dataset();

        assert_eq!(
            counts(dataset.table()),
            vec![
                ("Alpha", 1, 10, 0, 0),
                ("Alpha", 2, 16, 2, 8),
                ("Alpha", 3, 22, 3, 13),
                ("Beta", 1, 5, 0, 0),
                ("Beta", 2, 5, 0, 5),
                ("Beta", 3, 8, 1, 4),
                ("Gamma", 3, 2, 0, 0),
            ]
        );

        let alpha = &dataset.table()[1];
        assert_eq!(alpha.population, 10_000);
        assert_eq!(alpha.country.as_deref(), Some("Alpha"));
        assert_eq!(alpha.iso_code.as_deref(), Some("ALP"));
        assert_eq!(alpha.sub_region.as_deref(), Some("North West"));
        assert_eq!(alpha.world_bank_region.as_deref(), Some("North WB"));
        assert_eq!(alpha.continent.as_deref(), Some("North"));
        assert_eq!(alpha.active, 6);
        assert_eq!(alpha.confirmed_delta, 6);
        assert!((alpha.confirmed_per_10k - 16.0).abs() < 1e-12);

        let report = dataset.resolution_report();
        assert_eq!(report.dropped_rows, 3);
        assert!(report.unresolved.contains("Atlantis"));
    }

    #[test]
    fn missing_feed_fails_the_load() {
        let feeds = StaticFeedSource::new().with_feed("confirmed.csv", CONFIRMED);
        let err = Dataset::load(&feeds, store(), config()).unwrap_err();
        assert!(matches!(err, DatasetError::Fetch(_)), "got {err}");
    }

    #[test]
    fn day_helpers() {
        let dataset = dataset();
        assert_eq!(dataset.days(), vec![(date(1), 1), (date(2), 2), (date(3), 3)]);
        assert_eq!(dataset.first_day(), Some((date(1), 1)));
        assert_eq!(dataset.last_day(), Some((date(3), 3)));
        assert_eq!(dataset.unique(HierarchyLevel::Country), vec!["Alpha", "Beta", "Gamma"]);
        assert_eq!(dataset.unique(HierarchyLevel::Continent), vec!["North", "South"]);
    }

    #[test]
    fn day_query_defaults_to_latest_date() {
        let rows = dataset().data_for_day(None, HierarchyLevel::Country, false).unwrap();
        assert_eq!(
            rows.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["Alpha", "Beta", "Gamma"]
        );
        assert!(rows.iter().all(|r| r.date == date(3)));
    }

    #[test]
    fn day_query_by_report_day() {
        let rows = dataset()
            .data_for_day(Some(DaySelector::Report(2)), HierarchyLevel::Country, false)
            .unwrap();
        assert_eq!(counts(&rows), vec![("Alpha", 2, 16, 2, 8), ("Beta", 2, 5, 0, 5)]);
    }

    #[test]
    fn day_query_fills_every_entity() {
        let rows = dataset()
            .data_for_day(Some(DaySelector::Date(date(2))), HierarchyLevel::Country, true)
            .unwrap();
        assert_eq!(rows.len(), 4);

        let delta = rows.iter().find(|r| r.name == "Delta").unwrap();
        assert_eq!(delta.confirmed, 0);
        assert_eq!(delta.sub_region.as_deref(), Some("South East"));
        assert_eq!(delta.population, 1_000);
        assert_eq!(delta.date, date(2));
        assert_eq!(delta.report_day, 2);
    }

    #[test]
    fn day_query_aggregates_to_continents() {
        let rows = dataset()
            .data_for_day(None, HierarchyLevel::Continent, true)
            .unwrap();
        let summary: Vec<(&str, i64, u64)> = rows
            .iter()
            .map(|r| (r.name.as_str(), r.confirmed, r.population))
            .collect();
        assert_eq!(summary, vec![("North", 30, 30_000), ("South", 2, 6_000)]);
    }

    #[test]
    fn absent_day_is_not_found() {
        let err = dataset()
            .data_for_day(Some(DaySelector::Date(date(20))), HierarchyLevel::Country, false)
            .unwrap_err();
        assert!(matches!(err, DatasetError::NotFound { .. }), "got {err}");
    }

    #[test]
    fn location_query_returns_series() {
        let rows = dataset()
            .data_for_location("North", HierarchyLevel::Continent, false)
            .unwrap();
        assert_eq!(
            counts(&rows),
            vec![
                ("North", 1, 15, 0, 0),
                ("North", 2, 21, 2, 13),
                ("North", 3, 30, 4, 17),
            ]
        );
        assert!(rows.iter().all(|r| r.population == 30_000));
    }

    #[test]
    fn location_query_fills_missing_days() {
        let rows = dataset()
            .data_for_location("Gamma", HierarchyLevel::Country, true)
            .unwrap();
        assert_eq!(
            counts(&rows),
            vec![("Gamma", 1, 0, 0, 0), ("Gamma", 2, 0, 0, 0), ("Gamma", 3, 2, 0, 0)]
        );
        assert!(rows.iter().all(|r| r.population == 5_000));
    }

    #[test]
    fn absent_location_is_empty() {
        let rows = dataset()
            .data_for_location("Atlantis", HierarchyLevel::Country, true)
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn recovery_time_change_recomputes() {
        let mut dataset = dataset();
        dataset.set_recovery_time(14);

        assert_eq!(dataset.config().recovery_time, 14);
        for row in dataset.table() {
            assert_eq!(row.recovered, 0);
            assert_eq!(row.active, row.confirmed - row.deaths);
        }
        assert_eq!(dataset.table()[2].population, 10_000);
        assert_eq!(dataset.table()[2].continent.as_deref(), Some("North"));

        dataset.set_recovery_time(1);
        assert_eq!(counts(dataset.table()), counts(self::dataset().table()));
    }

    #[test]
    fn derivation_change_applies_the_clamp() {
        let feeds = StaticFeedSource::new()
            .with_feed(
                "confirmed.csv",
                "Province/State,Country/Region,Lat,Long,3/1/20,3/2/20\n,Alpha,5,5,1,2\n",
            )
            .with_feed(
                "deaths.csv",
                "Province/State,Country/Region,Lat,Long,3/1/20,3/2/20\n,Alpha,5,5,0,3\n",
            );
        let mut dataset = Dataset::load(&feeds, store(), config()).unwrap();
        assert_eq!(dataset.table()[1].recovered, -2);

        dataset.set_derivation(DerivationConfig {
            recovery_time: 1,
            clamp: RecoveryClamp::Clamp,
        });
        assert_eq!(dataset.config().recovery_clamp, RecoveryClamp::Clamp);
        assert_eq!(dataset.table()[1].recovered, 0);
        assert_eq!(dataset.table()[1].active, -1);
        assert_eq!(dataset.table()[1].population, 10_000);
    }

    #[test]
    fn row_limit_truncates() {
        let config = DatasetConfig {
            row_limit: 2,
            ..config()
        };
        let dataset = Dataset::load(&feed_source(), store(), config).unwrap();
        assert_eq!(dataset.table().len(), 2);
    }

    #[test]
    fn reload_replaces_the_table() {
        let mut dataset = Dataset::from_table(store(), config(), Vec::new());
        assert!(matches!(
            dataset.data_for_day(None, HierarchyLevel::Country, false),
            Err(DatasetError::EmptyTable)
        ));

        dataset.reload(&feed_source()).unwrap();
        assert_eq!(dataset.table().len(), 7);
    }
}
