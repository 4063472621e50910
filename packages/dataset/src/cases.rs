//! Case data grouped by raw feed columns, without geometry.
//!
//! [`CaseData`] skips country resolution entirely: merged feed rows are
//! summed per chosen [`FeedColumn`] values and date, then run through the
//! same derivation as the country table. There is no population join, so
//! rows are [`DerivedRecord`]s.
//!
//! A group's key joins its column values with [`GROUP_SEPARATOR`] in
//! grouping order. Blank cells are kept as empty values.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use coronadata_analytics::{DerivationConfig, derive, rederive};
use coronadata_analytics_models::{DaySelector, DerivedRecord, GroupedCases};
use coronadata_source::{FeedSource, load_feed, merge_feeds};
use coronadata_source_models::{CaseRecord, FeedColumn};

use crate::{DatasetConfig, DatasetError};

/// Joins the column values of a group key.
pub const GROUP_SEPARATOR: &str = " / ";

/// Derived case table keyed by raw feed columns.
#[derive(Debug, Clone)]
pub struct CaseData {
    grouping: Vec<FeedColumn>,
    derivation: DerivationConfig,
    table: Vec<DerivedRecord>,
    groups: BTreeMap<String, Vec<String>>,
}

impl CaseData {
    /// Fetches and merges the configured feeds and groups them by
    /// `grouping`.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Configuration`] if `grouping` is empty or
    /// repeats a column, or [`DatasetError::Fetch`] if a feed cannot be
    /// fetched or merged.
    pub fn load(
        feeds: &dyn FeedSource,
        config: &DatasetConfig,
        grouping: Vec<FeedColumn>,
    ) -> Result<Self, DatasetError> {
        check_grouping(&grouping)?;

        let long = config
            .feeds
            .iter()
            .map(|feed| load_feed(feeds, feed))
            .collect::<Result<Vec<_>, _>>()?;
        let records = merge_feeds(long)?;

        let mut data = Self::from_records(&records, grouping, config.derivation())?;

        if config.row_limit > 0 && data.table.len() > config.row_limit {
            log::debug!(
                "Keeping the first {} of {} rows",
                config.row_limit,
                data.table.len()
            );
            data.table.truncate(config.row_limit);
        }

        Ok(data)
    }

    /// Groups already-merged records.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Configuration`] if `grouping` is empty or
    /// repeats a column.
    pub fn from_records(
        records: &[CaseRecord],
        grouping: Vec<FeedColumn>,
        derivation: DerivationConfig,
    ) -> Result<Self, DatasetError> {
        check_grouping(&grouping)?;

        let (cases, groups) = group_records(records, &grouping);
        let table = derive(&cases, derivation);

        log::info!(
            "Built case table with {} rows for {} groups by {}",
            table.len(),
            groups.len(),
            grouping
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        );

        Ok(Self {
            grouping,
            derivation,
            table,
            groups,
        })
    }

    /// The derived table, sorted by group then report day.
    #[must_use]
    pub fn table(&self) -> &[DerivedRecord] {
        &self.table
    }

    /// Columns the rows are grouped by.
    #[must_use]
    pub fn grouping(&self) -> &[FeedColumn] {
        &self.grouping
    }

    /// Recovery parameters the table was derived with.
    #[must_use]
    pub const fn derivation(&self) -> DerivationConfig {
        self.derivation
    }

    /// Recomputes recovery, delta and rate columns with a new recovery
    /// time.
    pub fn set_recovery_time(&mut self, recovery_time: u32) {
        log::info!("Recomputing case table with recovery time {recovery_time} days");
        self.derivation.recovery_time = recovery_time;
        self.table = rederive(&self.table, self.derivation);
    }

    /// Distinct `(date, report_day)` pairs, sorted.
    #[must_use]
    pub fn days(&self) -> Vec<(NaiveDate, u32)> {
        self.table
            .iter()
            .map(|r| (r.date, r.report_day))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
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

    /// Distinct values of a grouping column, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Configuration`] if the table is not grouped
    /// by `column`.
    pub fn unique(&self, column: FeedColumn) -> Result<Vec<String>, DatasetError> {
        let idx = self.column_index(column)?;
        Ok(self
            .groups
            .values()
            .map(|values| values[idx].clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// Rows for one day, defaulting to the latest date.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::NotFound`] if no row matches the day, or
    /// [`DatasetError::EmptyTable`] if `day` is `None` and the table is
    /// empty.
    pub fn data_for_day(&self, day: Option<DaySelector>) -> Result<Vec<DerivedRecord>, DatasetError> {
        let day = match day {
            Some(day) => day,
            None => DaySelector::Date(self.last_day().ok_or(DatasetError::EmptyTable)?.0),
        };

        let rows: Vec<DerivedRecord> = self
            .table
            .iter()
            .filter(|r| day.matches(r.date, r.report_day))
            .cloned()
            .collect();

        if rows.is_empty() {
            return Err(DatasetError::NotFound { day });
        }
        Ok(rows)
    }

    /// Rows of every group whose `column` equals `value`. Empty when none
    /// does.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Configuration`] if the table is not grouped
    /// by `column`.
    pub fn data_for_location(
        &self,
        column: FeedColumn,
        value: &str,
    ) -> Result<Vec<DerivedRecord>, DatasetError> {
        let idx = self.column_index(column)?;

        let rows: Vec<DerivedRecord> = self
            .table
            .iter()
            .filter(|r| {
                self.groups
                    .get(&r.group)
                    .is_some_and(|values| values[idx] == value)
            })
            .cloned()
            .collect();

        if rows.is_empty() {
            log::info!("No rows for {column} '{value}'");
        }
        Ok(rows)
    }

    fn column_index(&self, column: FeedColumn) -> Result<usize, DatasetError> {
        self.grouping
            .iter()
            .position(|c| *c == column)
            .ok_or_else(|| DatasetError::Configuration {
                message: format!("Case table is not grouped by {column}"),
            })
    }
}

fn check_grouping(grouping: &[FeedColumn]) -> Result<(), DatasetError> {
    if grouping.is_empty() {
        return Err(DatasetError::Configuration {
            message: "Grouping needs at least one feed column".to_string(),
        });
    }

    let distinct: BTreeSet<_> = grouping.iter().collect();
    if distinct.len() != grouping.len() {
        return Err(DatasetError::Configuration {
            message: format!("Grouping repeats a column: {grouping:?}"),
        });
    }

    Ok(())
}

/// Sums counts per `(group key, date)`. Output is sorted by key, then
/// date.
fn group_records(
    records: &[CaseRecord],
    grouping: &[FeedColumn],
) -> (Vec<GroupedCases>, BTreeMap<String, Vec<String>>) {
    let mut sums: BTreeMap<(String, NaiveDate), (i64, i64)> = BTreeMap::new();
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for record in records {
        let values: Vec<String> = grouping
            .iter()
            .map(|column| column.value(&record.location))
            .collect();
        let key = values.join(GROUP_SEPARATOR);

        let entry = sums.entry((key.clone(), record.date)).or_default();
        entry.0 += record.confirmed;
        entry.1 += record.deaths;

        groups.entry(key).or_insert(values);
    }

    let cases = sums
        .into_iter()
        .map(|((group, date), (confirmed, deaths))| GroupedCases {
            group,
            date,
            confirmed,
            deaths,
        })
        .collect();

    (cases, groups)
}
