//! Dataset configuration, loadable from TOML.
//!
//! ```toml
//! recovery_time = 14
//! recovery_clamp = "preserve"
//! level = "continent"
//! staleness_secs = 3600
//! cache_path = "/var/cache/coronadata/table.csv"
//!
//! [[feeds]]
//! metric = "confirmed"
//! url = "https://example.org/time_series_covid19_confirmed_global.csv"
//!
//! [[feeds]]
//! # metric inferred from the file name
//! url = "https://example.org/time_series_covid19_deaths_global.csv"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use coronadata_analytics::DerivationConfig;
use coronadata_analytics_models::{DEFAULT_RECOVERY_TIME, RecoveryClamp};
use coronadata_geography_models::HierarchyLevel;
use coronadata_source_models::Feed;
use coronadata_spatial::GeometrySource;
use serde::{Deserialize, Serialize};

use crate::DatasetError;

/// Default cache staleness window.
pub const DEFAULT_STALENESS_SECS: u64 = 60;

/// Every tunable of a dataset. Missing TOML keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    /// Days between confirmation and recovery.
    pub recovery_time: u32,
    /// Negative recovery estimate policy.
    pub recovery_clamp: RecoveryClamp,
    /// Default level for queries and exports.
    pub level: HierarchyLevel,
    /// Age after which the persisted table is refreshed.
    pub staleness_secs: u64,
    /// Keep only this many rows of the derived table (0 keeps all).
    pub row_limit: usize,
    /// Custom geometry file; the bundled countries file when unset.
    pub geometry: Option<PathBuf>,
    /// Case-count feeds to merge.
    pub feeds: Vec<Feed>,
    /// Persisted table location; a temporary file when unset.
    pub cache_path: Option<PathBuf>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            recovery_time: DEFAULT_RECOVERY_TIME,
            recovery_clamp: RecoveryClamp::default(),
            level: HierarchyLevel::Country,
            staleness_secs: DEFAULT_STALENESS_SECS,
            row_limit: 0,
            geometry: None,
            feeds: Feed::defaults(),
            cache_path: None,
        }
    }
}

impl DatasetConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Configuration`] if the document is not a
    /// valid configuration.
    pub fn from_toml_str(text: &str) -> Result<Self, DatasetError> {
        toml::from_str(text).map_err(|e| DatasetError::Configuration {
            message: e.to_string(),
        })
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] if the file cannot be read or parsed.
    pub fn from_toml_path(path: &Path) -> Result<Self, DatasetError> {
        let text = std::fs::read_to_string(path)?;
        log::debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Staleness window as a [`Duration`].
    #[must_use]
    pub const fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    /// Geometry source selected by [`Self::geometry`].
    #[must_use]
    pub fn geometry_source(&self) -> GeometrySource {
        self.geometry
            .clone()
            .map_or(GeometrySource::Bundled, GeometrySource::Custom)
    }

    /// Recovery parameters for the derivation stages.
    #[must_use]
    pub const fn derivation(&self) -> DerivationConfig {
        DerivationConfig {
            recovery_time: self.recovery_time,
            clamp: self.recovery_clamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use coronadata_source_models::Metric;

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = DatasetConfig::from_toml_str("").unwrap();
        assert_eq!(config, DatasetConfig::default());
        assert_eq!(config.recovery_time, 14);
        assert_eq!(config.staleness(), Duration::from_secs(60));
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.geometry_source(), GeometrySource::Bundled);
    }

    #[test]
    fn parses_every_field() {
        let config = DatasetConfig::from_toml_str(
            r#"
recovery_time = 10
recovery_clamp = "clamp"
level = "sub_region"
staleness_secs = 3600
row_limit = 50
geometry = "/data/countries.zip"
cache_path = "/tmp/table.csv"

[[feeds]]
metric = "confirmed"
url = "confirmed.csv"

[[feeds]]
metric = "deaths"
url = "deaths.csv"
"#,
        )
        .unwrap();

        assert_eq!(config.recovery_time, 10);
        assert_eq!(config.recovery_clamp, RecoveryClamp::Clamp);
        assert_eq!(config.level, HierarchyLevel::SubRegion);
        assert_eq!(config.row_limit, 50);
        assert_eq!(
            config.geometry_source(),
            GeometrySource::Custom(PathBuf::from("/data/countries.zip"))
        );
        assert_eq!(config.feeds[1], Feed::new(Metric::Deaths, "deaths.csv"));
        assert_eq!(config.derivation().recovery_time, 10);
    }

    #[test]
    fn feed_metric_is_optional() {
        let config = DatasetConfig::from_toml_str(
            r#"
[[feeds]]
url = "time_series_covid19_confirmed_global.csv"
"#,
        )
        .unwrap();

        assert_eq!(config.feeds[0].metric, None);
        assert_eq!(config.feeds[0].resolved_metric(), Some(Metric::Confirmed));
    }

    #[test]
    fn rejects_unknown_levels_and_keys() {
        assert!(matches!(
            DatasetConfig::from_toml_str("level = \"province\""),
            Err(DatasetError::Configuration { .. })
        ));
        assert!(matches!(
            DatasetConfig::from_toml_str("recovery = 3"),
            Err(DatasetError::Configuration { .. })
        ));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coronadata.toml");
        std::fs::write(&path, "row_limit = 3\n").unwrap();
        assert_eq!(DatasetConfig::from_toml_path(&path).unwrap().row_limit, 3);
    }
}
