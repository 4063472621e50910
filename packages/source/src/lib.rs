#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Case-count feed fetching, reshaping and merging.
//!
//! A [`FeedSource`] supplies the raw text of each configured feed. The
//! [`load`] module reshapes one wide feed into long form and the [`merge`]
//! module joins the feeds into one [`CaseRecord`] per location per day.
//!
//! [`CaseRecord`]: coronadata_source_models::CaseRecord

pub mod load;
pub mod merge;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use coronadata_source_models::{Feed, Metric};

pub use load::load_feed;
pub use merge::merge_feeds;

/// User-Agent sent with feed requests.
const USER_AGENT: &str = concat!("coronadata/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout for feed downloads.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors that can occur while fetching or parsing feeds.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error (local feed files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The feed does not start with the expected key columns.
    #[error("Feed {feed} is missing key columns: expected {expected:?}, found {found:?}")]
    MissingColumns {
        /// Feed URL or name.
        feed: String,
        /// Expected leading columns.
        expected: Vec<String>,
        /// Leading columns actually present.
        found: Vec<String>,
    },

    /// A date column header could not be parsed.
    #[error("Feed {feed} has an invalid date column '{header}'")]
    InvalidDate {
        /// Feed URL or name.
        feed: String,
        /// Offending header.
        header: String,
    },

    /// A cell could not be parsed.
    #[error("Feed {feed} has an invalid value '{value}' at row {row}, column '{column}'")]
    InvalidValue {
        /// Feed URL or name.
        feed: String,
        /// 1-based data row.
        row: usize,
        /// Column header.
        column: String,
        /// Raw cell text.
        value: String,
    },

    /// A metric required by the merge has no feed.
    #[error("No feed provides the {0} metric")]
    MissingMetric(Metric),

    /// Two feeds provide the same metric.
    #[error("More than one feed provides the {0} metric")]
    DuplicateMetric(Metric),

    /// A feed has no configured metric and its file name names none.
    #[error("Feed {feed} has no metric and none can be inferred from its file name")]
    UnknownMetric {
        /// Feed URL or name.
        feed: String,
    },
}

/// Supplies the raw CSV text of a feed.
pub trait FeedSource {
    /// Returns the full text of `feed`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the feed is unreachable.
    fn fetch(&self, feed: &Feed) -> Result<String, SourceError>;
}

/// Downloads feeds over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::blocking::Client,
}

impl HttpFeedSource {
    /// Builds a source with a blocking `reqwest` client.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the client cannot be built.
    pub fn new() -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }
}

impl FeedSource for HttpFeedSource {
    fn fetch(&self, feed: &Feed) -> Result<String, SourceError> {
        log::info!("Fetching feed from {}", feed.url);

        let body = self
            .client
            .get(&feed.url)
            .send()?
            .error_for_status()?
            .text()?;

        log::debug!("Downloaded {} bytes from {}", body.len(), feed.url);
        Ok(body)
    }
}

/// Reads feeds from a local directory, using the file name of each feed
/// URL.
#[derive(Debug, Clone)]
pub struct LocalFeedSource {
    dir: PathBuf,
}

impl LocalFeedSource {
    /// Creates a source reading from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path the feed is read from.
    #[must_use]
    pub fn path_for(&self, feed: &Feed) -> PathBuf {
        let file_name = Path::new(&feed.url)
            .file_name()
            .map_or_else(|| PathBuf::from(&feed.url), PathBuf::from);
        self.dir.join(file_name)
    }
}

impl FeedSource for LocalFeedSource {
    fn fetch(&self, feed: &Feed) -> Result<String, SourceError> {
        let path = self.path_for(feed);
        log::info!("Reading feed from {}", path.display());
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Serves feeds held in memory, keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct StaticFeedSource {
    feeds: BTreeMap<String, String>,
}

impl StaticFeedSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the text served for `url`.
    #[must_use]
    pub fn with_feed(mut self, url: impl Into<String>, contents: impl Into<String>) -> Self {
        self.feeds.insert(url.into(), contents.into());
        self
    }
}

impl FeedSource for StaticFeedSource {
    fn fetch(&self, feed: &Feed) -> Result<String, SourceError> {
        self.feeds.get(&feed.url).cloned().ok_or_else(|| {
            SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no feed registered for {}", feed.url),
            ))
        })
    }
}
