//! Joining long-form feeds into one row per location per day.
//!
//! The join is an inner join on `(location, date)`: a key missing from any
//! feed is dropped. Two data-source artifacts are then removed: rows whose
//! province is the `"Recovered"` sentinel, and rows where every metric is
//! zero.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use coronadata_source_models::{CaseRecord, LocationKey, LongFeed, Metric};

use crate::SourceError;

/// Province value some feeds use for a recovered-cases pseudo-location.
pub const RECOVERED_SENTINEL: &str = "Recovered";

type CellKey = (LocationKey, NaiveDate);

/// Inner-joins `feeds` and applies the manual corrections.
///
/// Output order follows the first feed.
///
/// # Errors
///
/// Returns [`SourceError::MissingMetric`] if no feed provides confirmed
/// or deaths counts, or [`SourceError::DuplicateMetric`] if two feeds
/// provide the same metric.
pub fn merge_feeds(feeds: Vec<LongFeed>) -> Result<Vec<CaseRecord>, SourceError> {
    let mut by_metric: BTreeMap<Metric, LongFeed> = BTreeMap::new();
    let mut order = Vec::with_capacity(feeds.len());

    for feed in feeds {
        let metric = feed.metric;
        if by_metric.insert(metric, feed).is_some() {
            return Err(SourceError::DuplicateMetric(metric));
        }
        order.push(metric);
    }

    for metric in [Metric::Confirmed, Metric::Deaths] {
        if !by_metric.contains_key(&metric) {
            return Err(SourceError::MissingMetric(metric));
        }
    }

    let lookups: BTreeMap<Metric, HashMap<CellKey, i64>> = by_metric
        .iter()
        .map(|(metric, feed)| {
            let cells = feed
                .records
                .iter()
                .map(|r| ((r.location.key(), r.date), r.value))
                .collect();
            (*metric, cells)
        })
        .collect();

    let Some(driver) = by_metric.remove(&order[0]) else {
        return Err(SourceError::MissingMetric(order[0]));
    };
    let driver_len = driver.records.len();

    let mut joined = Vec::with_capacity(driver_len);

    for record in driver.records {
        let key = (record.location.key(), record.date);
        let values: Option<BTreeMap<Metric, i64>> = lookups
            .iter()
            .map(|(metric, cells)| cells.get(&key).map(|v| (*metric, *v)))
            .collect();

        let Some(values) = values else {
            continue;
        };

        joined.push(CaseRecord {
            location: record.location,
            date: record.date,
            confirmed: values.get(&Metric::Confirmed).copied().unwrap_or_default(),
            deaths: values.get(&Metric::Deaths).copied().unwrap_or_default(),
        });
    }

    log::debug!(
        "Joined {} of {driver_len} rows across {} feeds",
        joined.len(),
        order.len()
    );

    let corrected = drop_sentinel_rows(joined);
    let cleaned = drop_empty_rows(corrected);

    log::info!("Merged feeds into {} case records", cleaned.len());
    Ok(cleaned)
}

/// Removes rows whose province is [`RECOVERED_SENTINEL`].
#[must_use]
pub fn drop_sentinel_rows(records: Vec<CaseRecord>) -> Vec<CaseRecord> {
    let before = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| r.location.province.as_deref() != Some(RECOVERED_SENTINEL))
        .collect();

    if kept.len() != before {
        log::debug!(
            "Dropped {} '{RECOVERED_SENTINEL}' sentinel rows",
            before - kept.len()
        );
    }
    kept
}

/// Removes rows where confirmed and deaths sum to zero.
#[must_use]
pub fn drop_empty_rows(records: Vec<CaseRecord>) -> Vec<CaseRecord> {
    records
        .into_iter()
        .filter(|r| r.confirmed + r.deaths != 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use coronadata_source_models::LongRecord;

    use super::*;
    use crate::load::parse_wide_csv;

    const CONFIRMED: &str = "\
Province/State,Country/Region,Lat,Long,1/22/20,1/23/20
,France,46.2276,2.2137,0,3
Recovered,Canada,0,0,4,5
,Italy,41.8719,12.5674,1,2
";

    const DEATHS: &str = "\
Province/State,Country/Region,Lat,Long,1/22/20,1/23/20,1/24/20
,France,46.2276,2.2137,0,1,1
Recovered,Canada,0,0,0,0,0
,Spain,40.4637,-3.7492,0,0,0
,Italy,41.8719,12.5674,0,0,0
";

    fn feeds() -> Vec<LongFeed> {
        vec![
            parse_wide_csv(CONFIRMED, Metric::Confirmed, "confirmed").unwrap(),
            parse_wide_csv(DEATHS, Metric::Deaths, "deaths").unwrap(),
        ]
    }

    #[test]
    fn inner_joins_and_cleans() {
        let merged = merge_feeds(feeds()).unwrap();

        // France day 1 is all zero, Canada is the sentinel, Spain and
        // 1/24/20 only exist in one feed.
        let summary: Vec<(&str, u32, i64, i64)> = merged
            .iter()
            .map(|r| {
                (
                    r.location.country.as_str(),
                    chrono::Datelike::day(&r.date),
                    r.confirmed,
                    r.deaths,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("France", 23, 3, 1),
                ("Italy", 22, 1, 0),
                ("Italy", 23, 2, 0),
            ]
        );
    }

    #[test]
    fn join_is_independent_of_feed_order() {
        let mut reversed = feeds();
        reversed.reverse();
        let mut a = merge_feeds(feeds()).unwrap();
        let mut b = merge_feeds(reversed).unwrap();
        let sort_key = |r: &CaseRecord| (r.location.country.clone(), r.date);
        a.sort_by_key(sort_key);
        b.sort_by_key(sort_key);
        assert_eq!(a, b);
    }

    #[test]
    fn requires_both_metrics() {
        let only_confirmed = vec![parse_wide_csv(CONFIRMED, Metric::Confirmed, "c").unwrap()];
        assert!(matches!(
            merge_feeds(only_confirmed),
            Err(SourceError::MissingMetric(Metric::Deaths))
        ));
    }

    #[test]
    fn rejects_duplicate_metrics() {
        let mut duplicated = feeds();
        duplicated.push(parse_wide_csv(CONFIRMED, Metric::Confirmed, "c2").unwrap());
        assert!(matches!(
            merge_feeds(duplicated),
            Err(SourceError::DuplicateMetric(Metric::Confirmed))
        ));
    }

    #[test]
    fn coordinates_are_part_of_the_join_key() {
        let shifted = DEATHS.replace("46.2276", "46.0");
        let merged = merge_feeds(vec![
            parse_wide_csv(CONFIRMED, Metric::Confirmed, "c").unwrap(),
            parse_wide_csv(&shifted, Metric::Deaths, "d").unwrap(),
        ])
        .unwrap();
        assert!(merged.iter().all(|r| r.location.country != "France"));
    }

    #[test]
    fn sentinel_filter_keeps_other_provinces() {
        let record = |province: Option<&str>| CaseRecord {
            location: coronadata_source_models::Location {
                province: province.map(str::to_string),
                country: "Canada".to_string(),
                latitude: None,
                longitude: None,
            },
            date: NaiveDate::from_ymd_opt(2020, 4, 1).unwrap(),
            confirmed: 1,
            deaths: 0,
        };

        let kept = drop_sentinel_rows(vec![
            record(Some("Ontario")),
            record(Some(RECOVERED_SENTINEL)),
            record(None),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn single_deaths_feed_is_rejected() {
        let feed = LongFeed {
            metric: Metric::Deaths,
            records: vec![LongRecord {
                location: coronadata_source_models::Location {
                    province: None,
                    country: "X".to_string(),
                    latitude: Some(0.0),
                    longitude: Some(0.0),
                },
                date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                metric: Metric::Deaths,
                value: 1,
            }],
        };
        assert!(matches!(
            merge_feeds(vec![feed]),
            Err(SourceError::MissingMetric(Metric::Confirmed))
        ));
    }
}
