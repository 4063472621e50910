//! CSV persistence of the derived table.
//!
//! A [`PersistentDataset`] reads its table back from the cache file when
//! the file exists and is younger than the staleness window, and otherwise
//! recomputes it from the feeds and overwrites the file. Without a
//! configured path the table goes to a temporary file that is never read
//! back and is removed on drop.
//!
//! The recovery parameters a cached table was derived with are kept in a
//! TOML sidecar (`<cache>.meta.toml`). A cache read back under different
//! parameters is re-derived from its confirmed and deaths counts.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use coronadata_analytics::DerivationConfig;
use coronadata_analytics_models::{AggregatedRecord, RecoveryClamp};
use coronadata_source::FeedSource;
use coronadata_spatial::GeometryStore;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;

use crate::{Dataset, DatasetConfig, DatasetError, StalenessWatcher};

/// Reads a table written by [`write_table`].
///
/// # Errors
///
/// Returns [`DatasetError`] if the file cannot be read or a row does not
/// deserialize.
pub fn read_table(path: &Path) -> Result<Vec<AggregatedRecord>, DatasetError> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<AggregatedRecord>, _>>()?;
    Ok(rows)
}

/// Writes `rows` as CSV to `path`, replacing its contents.
///
/// # Errors
///
/// Returns [`DatasetError`] if the file cannot be written.
pub fn write_table(path: &Path, rows: &[AggregatedRecord]) -> Result<(), DatasetError> {
    let file = std::fs::File::create(path)?;
    write_csv(file, rows)
}

/// Writes `rows` as CSV, header first.
///
/// # Errors
///
/// Returns [`DatasetError`] if writing fails.
pub fn write_csv<W: Write, T: Serialize>(writer: W, rows: &[T]) -> Result<(), DatasetError> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Recovery parameters stored next to a cached table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Days between confirmation and recovery.
    pub recovery_time: u32,
    /// Negative recovery estimate policy.
    pub recovery_clamp: RecoveryClamp,
}

impl CacheMetadata {
    /// Parameters of `derivation`.
    #[must_use]
    pub const fn new(derivation: DerivationConfig) -> Self {
        Self {
            recovery_time: derivation.recovery_time,
            recovery_clamp: derivation.clamp,
        }
    }

    /// Derivation parameters.
    #[must_use]
    pub const fn derivation(self) -> DerivationConfig {
        DerivationConfig {
            recovery_time: self.recovery_time,
            clamp: self.recovery_clamp,
        }
    }
}

/// Sidecar location of the metadata of the table cached at `path`.
#[must_use]
pub fn metadata_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".meta.toml");
    PathBuf::from(name)
}

/// Reads the metadata of the table cached at `path`.
///
/// # Errors
///
/// Returns [`DatasetError`] if the sidecar cannot be read or parsed.
pub fn read_metadata(path: &Path) -> Result<CacheMetadata, DatasetError> {
    let text = std::fs::read_to_string(metadata_path(path))?;
    toml::from_str(&text).map_err(|e| DatasetError::Configuration {
        message: format!("Invalid cache metadata for {}: {e}", path.display()),
    })
}

/// Writes the metadata of the table cached at `path`.
///
/// # Errors
///
/// Returns [`DatasetError`] if the sidecar cannot be written.
pub fn write_metadata(path: &Path, metadata: CacheMetadata) -> Result<(), DatasetError> {
    let text = toml::to_string(&metadata).map_err(|e| DatasetError::Configuration {
        message: format!("Cannot encode cache metadata: {e}"),
    })?;
    std::fs::write(metadata_path(path), text)?;
    Ok(())
}

/// A [`Dataset`] backed by a CSV cache file.
#[derive(Debug)]
pub struct PersistentDataset {
    dataset: Dataset,
    path: PathBuf,
    temp: Option<TempPath>,
    watcher: StalenessWatcher,
}

impl PersistentDataset {
    /// Opens the dataset, reading the cache when it is fresh.
    ///
    /// An unreadable cache is recomputed rather than reported.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] if the table has to be recomputed and the
    /// pipeline fails, or the new table cannot be saved.
    pub fn open(
        feeds: &dyn FeedSource,
        store: Arc<GeometryStore>,
        config: DatasetConfig,
    ) -> Result<Self, DatasetError> {
        let (path, temp) = match &config.cache_path {
            Some(path) => (path.clone(), None),
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("coronadata-")
                    .suffix(".csv")
                    .tempfile()?
                    .into_temp_path();
                log::info!(
                    "No cache path configured, using temporary file {}",
                    temp.display()
                );
                (temp.to_path_buf(), Some(temp))
            }
        };

        let watcher = StalenessWatcher::new(&path, config.staleness());

        let cached = if temp.is_none() && path.is_file() && !watcher.check_update(false) {
            match read_table(&path) {
                Ok(table) => {
                    log::info!("Loaded {} rows from {}", table.len(), path.display());
                    Some(table)
                }
                Err(e) => {
                    log::warn!("Failed to read cache {}, recomputing: {e}", path.display());
                    None
                }
            }
        } else {
            None
        };

        let persistent = if let Some(table) = cached {
            let wanted = config.derivation();
            let mut persistent = Self {
                dataset: Dataset::from_table(store, config, table),
                path,
                temp,
                watcher,
            };

            match read_metadata(&persistent.path) {
                Ok(metadata) if metadata.derivation() == wanted => {}
                Ok(metadata) => {
                    log::info!(
                        "Cache was derived with recovery time {} ({}), re-deriving",
                        metadata.recovery_time,
                        metadata.recovery_clamp
                    );
                    persistent.dataset.set_derivation(wanted);
                    persistent.save()?;
                }
                Err(e) => {
                    log::warn!("No usable cache metadata, re-deriving: {e}");
                    persistent.dataset.set_derivation(wanted);
                    persistent.save()?;
                }
            }
            persistent
        } else {
            let persistent = Self {
                dataset: Dataset::load(feeds, store, config)?,
                path,
                temp,
                watcher,
            };
            persistent.save()?;
            persistent
        };

        Ok(persistent)
    }

    /// The wrapped dataset.
    #[must_use]
    pub const fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Mutable access to the wrapped dataset (e.g. to change the recovery
    /// time). Changes are not saved until [`Self::save`].
    pub const fn dataset_mut(&mut self) -> &mut Dataset {
        &mut self.dataset
    }

    /// Cache file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the cache is a temporary file.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Staleness watcher of the cache file.
    #[must_use]
    pub const fn watcher(&self) -> &StalenessWatcher {
        &self.watcher
    }

    /// Writes the current table to the cache file, and its recovery
    /// parameters to the metadata sidecar unless the cache is temporary.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] if a file cannot be written.
    pub fn save(&self) -> Result<(), DatasetError> {
        log::debug!("Saving {} rows to {}", self.dataset.table().len(), self.path.display());
        write_table(&self.path, self.dataset.table())?;

        if self.temp.is_none() {
            write_metadata(&self.path, CacheMetadata::new(self.dataset.config().derivation()))?;
        }
        Ok(())
    }

    /// Recomputes and saves the table if the cache is stale or missing.
    /// Returns whether it did.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] if the recompute or save fails.
    pub fn update(&mut self, feeds: &dyn FeedSource) -> Result<bool, DatasetError> {
        if !self.watcher.check_update(true) {
            return Ok(false);
        }
        self.update_now(feeds)?;
        Ok(true)
    }

    /// Recomputes and saves the table unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] if the recompute or save fails.
    pub fn update_now(&mut self, feeds: &dyn FeedSource) -> Result<(), DatasetError> {
        log::info!("Updating dataset cached at {}", self.path.display());
        self.dataset.reload(feeds)?;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    use coronadata_analytics_models::RecoveryClamp;
    use coronadata_source::StaticFeedSource;

    use super::*;
    use crate::tests::{config, dataset, feed_source, store};

    fn cached_config(path: &Path) -> DatasetConfig {
        DatasetConfig {
            cache_path: Some(path.to_path_buf()),
            ..config()
        }
    }

    fn backdate(path: &Path, by: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn table_round_trips_through_csv() {
        let dataset = dataset();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");

        write_table(&path, dataset.table()).unwrap();
        assert_eq!(read_table(&path).unwrap(), dataset.table());
    }

    #[test]
    fn header_follows_the_column_order() {
        let mut out = Vec::new();
        write_csv(&mut out, &dataset().table()[..1]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let header = text.lines().next().unwrap();
        assert!(
            header.starts_with(
                "level,name,country,isoCode,subRegion,worldBankRegion,continent,\
                 population,date,reportDay,confirmed,deaths,recovered,active"
            ),
            "{header}"
        );
        assert!(header.ends_with("activePer10k"), "{header}");
    }

    #[test]
    fn fresh_cache_is_read_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");

        let first = PersistentDataset::open(&feed_source(), store(), cached_config(&path)).unwrap();
        assert!(path.is_file());
        assert!(!first.is_temporary());

        // No feeds registered: any fetch would fail.
        let second =
            PersistentDataset::open(&StaticFeedSource::new(), store(), cached_config(&path)).unwrap();
        assert_eq!(second.dataset().table(), first.dataset().table());
    }

    #[test]
    fn hierarchy_columns_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        let table = dataset().table().to_vec();
        write_table(&path, &table).unwrap();

        let read = read_table(&path).unwrap();
        assert_eq!(read[0].continent.as_deref(), Some("North"));
        assert_eq!(read[0].iso_code.as_deref(), Some("ALP"));
        assert_eq!(read, table);
    }

    #[test]
    fn saving_records_recovery_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        PersistentDataset::open(&feed_source(), store(), cached_config(&path)).unwrap();

        let metadata = read_metadata(&path).unwrap();
        assert_eq!(metadata.recovery_time, 1);
        assert_eq!(metadata.recovery_clamp, RecoveryClamp::Preserve);
        assert!(metadata_path(&path).ends_with("table.csv.meta.toml"));
    }

    #[test]
    fn fresh_cache_is_rederived_under_new_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        PersistentDataset::open(&feed_source(), store(), cached_config(&path)).unwrap();

        let config = DatasetConfig {
            recovery_time: 14,
            ..cached_config(&path)
        };
        let reopened = PersistentDataset::open(&StaticFeedSource::new(), store(), config).unwrap();

        assert_eq!(reopened.dataset().config().recovery_time, 14);
        for row in reopened.dataset().table() {
            assert_eq!(row.recovered, 0, "{row:?}");
            assert_eq!(row.active, row.confirmed - row.deaths);
        }
        assert_eq!(read_metadata(&path).unwrap().recovery_time, 14);
        assert!(read_table(&path).unwrap().iter().all(|r| r.recovered == 0));
    }

    #[test]
    fn cache_without_metadata_is_rederived() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        let mut built = dataset();
        built.set_recovery_time(14);
        write_table(&path, built.table()).unwrap();

        let persistent =
            PersistentDataset::open(&StaticFeedSource::new(), store(), cached_config(&path)).unwrap();
        assert_eq!(persistent.dataset().table(), dataset().table());
        assert!(metadata_path(&path).is_file());
    }

    #[test]
    fn temporary_cache_has_no_metadata() {
        let persistent = PersistentDataset::open(&feed_source(), store(), config()).unwrap();
        assert!(!metadata_path(persistent.path()).exists());
    }

    #[test]
    fn stale_cache_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        write_table(&path, &[]).unwrap();
        backdate(&path, Duration::from_secs(600));

        let persistent =
            PersistentDataset::open(&feed_source(), store(), cached_config(&path)).unwrap();
        assert_eq!(persistent.dataset().table().len(), 7);
        assert_eq!(read_table(&path).unwrap().len(), 7);
    }

    #[test]
    fn corrupt_cache_falls_back_to_recompute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        std::fs::write(&path, "level,name\ncountry\n").unwrap();

        let persistent =
            PersistentDataset::open(&feed_source(), store(), cached_config(&path)).unwrap();
        assert_eq!(persistent.dataset().table().len(), 7);
    }

    #[test]
    fn temporary_cache_is_removed_on_drop() {
        let persistent = PersistentDataset::open(&feed_source(), store(), config()).unwrap();
        assert!(persistent.is_temporary());

        let path = persistent.path().to_path_buf();
        assert_eq!(read_table(&path).unwrap().len(), 7);

        drop(persistent);
        assert!(!path.exists());
    }

    #[test]
    fn update_runs_only_when_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");

        let mut persistent =
            PersistentDataset::open(&feed_source(), store(), cached_config(&path)).unwrap();
        assert!(!persistent.update(&feed_source()).unwrap());

        backdate(&path, Duration::from_secs(600));
        assert!(persistent.update(&feed_source()).unwrap());
        assert!(persistent.watcher().age().unwrap() < Duration::from_secs(600));
    }

    #[test]
    fn update_now_propagates_fetch_errors() {
        let mut persistent = PersistentDataset::open(&feed_source(), store(), config()).unwrap();
        let err = persistent.update_now(&StaticFeedSource::new()).unwrap_err();
        assert!(matches!(err, DatasetError::Fetch(_)), "got {err}");
        assert_eq!(persistent.dataset().table().len(), 7);
    }
}
