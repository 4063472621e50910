#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for building and querying the COVID-19 case dataset.
//!
//! Every command except `cases` opens the persisted dataset (recomputing it
//! when the cache is missing or stale) and prints its result as CSV on
//! stdout. `cases` groups the feeds by their own key columns and needs no
//! geometry.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use coronadata_analytics_models::{DaySelector, RecoveryClamp};
use coronadata_dataset::persist::write_csv;
use coronadata_dataset::{CaseData, DatasetConfig, PersistentDataset};
use coronadata_geography_models::HierarchyLevel;
use coronadata_source::{FeedSource, HttpFeedSource, LocalFeedSource};
use coronadata_source_models::FeedColumn;
use coronadata_spatial::{FileGeometryProvider, GeometrySource, GeometryStore};

#[derive(Parser)]
#[command(name = "coronadata", about = "COVID-19 case dataset tool")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Persisted table location (overrides `cache_path`)
    #[arg(long, global = true)]
    cache: Option<PathBuf>,
    /// Custom geometry file, `GeoJSON` or zipped `GeoJSON` (overrides `geometry`)
    #[arg(long, global = true)]
    geometry: Option<PathBuf>,
    /// Read feeds from this directory instead of downloading them
    #[arg(long, global = true)]
    feeds_dir: Option<PathBuf>,
    /// Days between confirmation and recovery (overrides `recovery_time`)
    #[arg(long, global = true)]
    recovery_time: Option<u32>,
    /// Floor negative recovery estimates at zero
    #[arg(long, global = true)]
    clamp: bool,
    /// Cache staleness window in seconds (overrides `staleness_secs`)
    #[arg(long, global = true)]
    staleness_secs: Option<u64>,
    /// Keep only the first N rows of the table (for debugging)
    #[arg(long, global = true)]
    row_limit: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute the table if the cache is stale
    Refresh {
        /// Recompute even if the cache is fresh
        #[arg(long)]
        force: bool,
    },
    /// List the days in the table
    Days {
        /// Print report days instead of dates
        #[arg(long)]
        report: bool,
    },
    /// Print one day, aggregated to a hierarchy level
    Day {
        #[command(flatten)]
        day: DayArgs,
        /// Hierarchy level (country, continent, sub_region, world_bank_region, iso_code)
        #[arg(long)]
        level: Option<HierarchyLevel>,
        /// Include entities with no reports as zero rows
        #[arg(long)]
        fill: bool,
    },
    /// Print the time series of one location
    Location {
        /// Value at the chosen level (e.g. "France", "Europe")
        value: String,
        /// Hierarchy level of `value`
        #[arg(long)]
        level: Option<HierarchyLevel>,
        /// Include days with no reports as zero rows
        #[arg(long)]
        fill: bool,
    },
    /// Write one day as `GeoJSON`
    Export {
        /// Output file
        output: PathBuf,
        #[command(flatten)]
        day: DayArgs,
        /// Hierarchy level
        #[arg(long)]
        level: Option<HierarchyLevel>,
        /// Include entities with no reports as zero rows
        #[arg(long)]
        fill: bool,
        /// Geometry file for the exported polygons (e.g. a coarser one)
        #[arg(long)]
        export_geometry: Option<PathBuf>,
    },
    /// Print case rows grouped by raw feed columns, without geometry
    Cases {
        /// Feed columns to group by (`province_state`, `country_region`, lat, long)
        #[arg(long, value_delimiter = ',', default_value = "country_region")]
        group_by: Vec<FeedColumn>,
        #[command(flatten)]
        day: DayArgs,
        /// Print the time series of the groups whose `location_column` equals this value
        #[arg(long)]
        location: Option<String>,
        /// Grouping column `location` is matched against
        #[arg(long, default_value = "country_region")]
        location_column: FeedColumn,
    },
}

#[derive(Args)]
struct DayArgs {
    /// Date (YYYY-MM-DD); the latest date when neither selector is given
    #[arg(long, conflicts_with = "report_day")]
    date: Option<NaiveDate>,
    /// 1-based report day
    #[arg(long)]
    report_day: Option<u32>,
}

impl DayArgs {
    fn selector(&self) -> Option<DaySelector> {
        self.date
            .map(DaySelector::Date)
            .or_else(|| self.report_day.map(DaySelector::Report))
    }
}

impl Cli {
    fn dataset_config(&self) -> Result<DatasetConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => DatasetConfig::from_toml_path(path)?,
            None => DatasetConfig::default(),
        };

        if let Some(cache) = &self.cache {
            config.cache_path = Some(cache.clone());
        }
        if let Some(geometry) = &self.geometry {
            config.geometry = Some(geometry.clone());
        }
        if let Some(recovery_time) = self.recovery_time {
            config.recovery_time = recovery_time;
        }
        if self.clamp {
            config.recovery_clamp = RecoveryClamp::Clamp;
        }
        if let Some(staleness_secs) = self.staleness_secs {
            config.staleness_secs = staleness_secs;
        }
        if let Some(row_limit) = self.row_limit {
            config.row_limit = row_limit;
        }

        Ok(config)
    }

    fn feed_source(&self) -> Result<Box<dyn FeedSource>, Box<dyn std::error::Error>> {
        let source: Box<dyn FeedSource> = match &self.feeds_dir {
            Some(dir) => Box::new(LocalFeedSource::new(dir)),
            None => Box::new(HttpFeedSource::new()?),
        };
        Ok(source)
    }
}

fn open_dataset(
    feeds: &dyn FeedSource,
    config: DatasetConfig,
) -> Result<PersistentDataset, Box<dyn std::error::Error>> {
    let store = Arc::new(GeometryStore::load(
        Box::new(FileGeometryProvider::default()),
        config.geometry_source(),
    )?);
    log::debug!("Loaded geometry: {store:?}");

    Ok(PersistentDataset::open(feeds, store, config)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let config = cli.dataset_config()?;
    let feeds = cli.feed_source()?;
    let default_level = config.level;

    match cli.command {
        Commands::Cases {
            group_by,
            day,
            location,
            location_column,
        } => {
            let cases = CaseData::load(feeds.as_ref(), &config, group_by)?;
            let rows = match location {
                Some(value) => cases.data_for_location(location_column, &value)?,
                None => cases.data_for_day(day.selector())?,
            };
            write_csv(std::io::stdout().lock(), &rows)?;
        }
        Commands::Refresh { force } => {
            let mut persistent = open_dataset(feeds.as_ref(), config)?;
            let updated = if force {
                persistent.update_now(feeds.as_ref())?;
                true
            } else {
                persistent.update(feeds.as_ref())?
            };

            let dataset = persistent.dataset();
            if updated {
                log::info!("Refreshed {}", persistent.path().display());
            } else if let Some(remaining) = persistent.watcher().time_until_refresh() {
                log::info!("Cache is fresh, next refresh in {}s", remaining.as_secs());
            }
            println!(
                "{} rows, {} countries, {} dropped rows",
                dataset.table().len(),
                dataset.unique(HierarchyLevel::Country).len(),
                dataset.resolution_report().dropped_rows
            );
        }
        Commands::Days { report } => {
            let persistent = open_dataset(feeds.as_ref(), config)?;
            for (date, report_day) in persistent.dataset().days() {
                if report {
                    println!("{report_day}");
                } else {
                    println!("{date}");
                }
            }
        }
        Commands::Day { day, level, fill } => {
            let persistent = open_dataset(feeds.as_ref(), config)?;
            let rows = persistent.dataset().data_for_day(
                day.selector(),
                level.unwrap_or(default_level),
                fill,
            )?;
            write_csv(std::io::stdout().lock(), &rows)?;
        }
        Commands::Location { value, level, fill } => {
            let persistent = open_dataset(feeds.as_ref(), config)?;
            let rows = persistent.dataset().data_for_location(
                &value,
                level.unwrap_or(default_level),
                fill,
            )?;
            write_csv(std::io::stdout().lock(), &rows)?;
        }
        Commands::Export {
            output,
            day,
            level,
            fill,
            export_geometry,
        } => {
            let persistent = open_dataset(feeds.as_ref(), config)?;
            let dataset = persistent.dataset();
            let rows = dataset.data_for_day(day.selector(), level.unwrap_or(default_level), fill)?;
            let source = export_geometry.map(GeometrySource::Custom);
            let written = dataset.export_geojson(&output, &rows, source.as_ref())?;
            println!("Wrote {written} features to {}", output.display());
        }
    }

    Ok(())
}
