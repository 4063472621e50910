//! Attribution of feed rows to reference countries.
//!
//! Feed country names only partly match the reference names, so each
//! distinct `(longitude, latitude, raw name)` triple is resolved once: an
//! exact name match wins, otherwise the coordinate is located in the
//! country polygons with the raw name as a hint. Rows that resolve to no
//! country are dropped and summarized in a [`ResolutionReport`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use coronadata_analytics_models::GroupedCases;
use coronadata_geography_models::GeoReference;
use coronadata_source_models::CaseRecord;
use coronadata_spatial::PolygonTable;

/// Number of unresolved names included in the warning.
const REPORT_SAMPLE: usize = 10;

/// Rows dropped because their location matched no country.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Number of dropped rows.
    pub dropped_rows: usize,
    /// Raw country names of the dropped rows.
    pub unresolved: BTreeSet<String>,
}

impl ResolutionReport {
    /// Whether every row was attributed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.dropped_rows == 0
    }

    /// Logs a single warning summarizing the dropped rows.
    pub fn log(&self) {
        if self.is_complete() {
            return;
        }

        let sample: Vec<&str> = self
            .unresolved
            .iter()
            .take(REPORT_SAMPLE)
            .map(String::as_str)
            .collect();

        log::warn!(
            "Ignoring {} rows from {} locations not found in the geographic data: {sample:?}",
            self.dropped_rows,
            self.unresolved.len()
        );
    }
}

type TripleKey = (Option<u64>, Option<u64>, String);

/// Resolves every record to a country and sums counts per
/// `(country, date)`.
///
/// Output is sorted by country, then date.
#[must_use]
pub fn resolve_countries(
    records: &[CaseRecord],
    reference: &GeoReference,
    polygons: &PolygonTable,
) -> (Vec<GroupedCases>, ResolutionReport) {
    let mut resolved: HashMap<TripleKey, Option<String>> = HashMap::new();
    let mut groups: BTreeMap<(String, NaiveDate), (i64, i64)> = BTreeMap::new();
    let mut report = ResolutionReport::default();

    for record in records {
        let location = &record.location;
        let key = (
            location.longitude.map(f64::to_bits),
            location.latitude.map(f64::to_bits),
            location.country.clone(),
        );

        let country = resolved.entry(key).or_insert_with(|| {
            resolve_location(
                &location.country,
                location.coordinates(),
                reference,
                polygons,
            )
        });

        let Some(country) = country else {
            report.dropped_rows += 1;
            report.unresolved.insert(location.country.clone());
            continue;
        };

        let entry = groups.entry((country.clone(), record.date)).or_default();
        entry.0 += record.confirmed;
        entry.1 += record.deaths;
    }

    log::debug!(
        "Resolved {} distinct locations into {} country-days",
        resolved.len(),
        groups.len()
    );

    let cases = groups
        .into_iter()
        .map(|((group, date), (confirmed, deaths))| GroupedCases {
            group,
            date,
            confirmed,
            deaths,
        })
        .collect();

    (cases, report)
}

fn resolve_location(
    raw_name: &str,
    coordinates: Option<(f64, f64)>,
    reference: &GeoReference,
    polygons: &PolygonTable,
) -> Option<String> {
    if reference.contains(raw_name) {
        return Some(raw_name.to_string());
    }

    let (longitude, latitude) = coordinates?;
    polygons
        .resolve(longitude, latitude, Some(raw_name))
        .map(str::to_string)
}
