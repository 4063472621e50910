//! Wide-to-long reshaping of a single feed.
//!
//! A feed has four key columns (`Province/State`, `Country/Region`, `Lat`,
//! `Long`) followed by one cumulative-count column per reporting day
//! (`1/22/20`, `1/23/20`, ...). Headers are normalized to title case so
//! the key columns match across feeds regardless of their original
//! spelling.

use chrono::NaiveDate;
use coronadata_source_models::{Feed, Location, LongFeed, LongRecord, Metric};

use crate::{FeedSource, SourceError};

/// Leading key columns, after title-casing.
pub const KEY_COLUMNS: [&str; 4] = ["Province/State", "Country/Region", "Lat", "Long"];

/// Date header formats accepted, tried in order.
const DATE_FORMATS: &[&str] = &["%m/%d/%y", "%m/%d/%Y", "%Y-%m-%d"];

/// Fetches `feed` from `source` and reshapes it into long form.
///
/// A feed without a configured metric takes the one named by its file
/// name (see [`Metric::from_feed_url`]).
///
/// # Errors
///
/// Returns [`SourceError`] if the metric cannot be determined, the fetch
/// fails or the feed is malformed.
pub fn load_feed(source: &dyn FeedSource, feed: &Feed) -> Result<LongFeed, SourceError> {
    let metric = feed
        .resolved_metric()
        .ok_or_else(|| SourceError::UnknownMetric {
            feed: feed.url.clone(),
        })?;

    if feed.metric.is_none() {
        log::debug!("Inferred {metric} metric for {}", feed.url);
    }

    let text = source.fetch(feed)?;
    let long = parse_wide_csv(&text, metric, &feed.url)?;

    log::info!(
        "Loaded {} {} records from {}",
        long.records.len(),
        metric,
        feed.url
    );
    Ok(long)
}

/// Reshapes wide CSV text into one [`LongRecord`] per (row, date column).
///
/// Blank province and coordinate cells become `None`. A blank count cell
/// counts as 0 and is reported once per feed with a warning; any other
/// non-integer count is an error.
///
/// # Errors
///
/// Returns [`SourceError`] if the key columns are missing, a date header
/// does not parse, or a cell is not a number.
pub fn parse_wide_csv(text: &str, metric: Metric, feed: &str) -> Result<LongFeed, SourceError> {
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| title_case(h.trim()))
        .collect();

    if headers.len() < KEY_COLUMNS.len()
        || headers.iter().zip(KEY_COLUMNS).any(|(found, expected)| found != expected)
    {
        return Err(SourceError::MissingColumns {
            feed: feed.to_string(),
            expected: KEY_COLUMNS.iter().map(ToString::to_string).collect(),
            found: headers.iter().take(KEY_COLUMNS.len()).cloned().collect(),
        });
    }

    let dates = headers[KEY_COLUMNS.len()..]
        .iter()
        .map(|header| {
            parse_date(header).ok_or_else(|| SourceError::InvalidDate {
                feed: feed.to_string(),
                header: header.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::new();
    let mut blank_cells = 0_usize;

    for (row_idx, result) in reader.records().enumerate() {
        let row = result?;
        let row_number = row_idx + 1;

        let invalid = |column: usize, value: &str| SourceError::InvalidValue {
            feed: feed.to_string(),
            row: row_number,
            column: headers[column].clone(),
            value: value.to_string(),
        };

        let province = non_empty(row.get(0));
        let country = non_empty(row.get(1)).unwrap_or_default();
        let latitude = parse_coordinate(row.get(2)).map_err(|v| invalid(2, &v))?;
        let longitude = parse_coordinate(row.get(3)).map_err(|v| invalid(3, &v))?;

        let location = Location {
            province,
            country,
            latitude,
            longitude,
        };

        for (offset, date) in dates.iter().enumerate() {
            let column = KEY_COLUMNS.len() + offset;
            let cell = row.get(column).unwrap_or("").trim();
            let value = if cell.is_empty() {
                blank_cells += 1;
                0
            } else {
                cell.parse::<i64>().map_err(|_| invalid(column, cell))?
            };

            records.push(LongRecord {
                location: location.clone(),
                date: *date,
                metric,
                value,
            });
        }
    }

    if blank_cells > 0 {
        log::warn!("Feed {feed} has {blank_cells} blank count cells, treated as 0");
    }

    Ok(LongFeed { metric, records })
}

/// Title-cases a header: the first letter of every alphabetic run is
/// upper-cased and the rest lower-cased (`"country/region"` becomes
/// `"Country/Region"`).
#[must_use]
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_alpha = false;

    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_is_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_alpha = true;
        } else {
            out.push(c);
            prev_is_alpha = false;
        }
    }

    out
}

fn parse_date(header: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(header, format).ok())
}

fn non_empty(cell: Option<&str>) -> Option<String> {
    cell.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_coordinate(cell: Option<&str>) -> Result<Option<f64>, String> {
    match cell.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text.parse::<f64>().map(Some).map_err(|_| text.to_string()),
    }
}
