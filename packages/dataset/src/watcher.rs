//! File-age based refresh decisions for the persisted table.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};

/// Reports whether a file is older than a staleness window.
///
/// Polled by callers; nothing runs in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessWatcher {
    path: PathBuf,
    window: Duration,
}

impl StalenessWatcher {
    /// Watches `path` with the given staleness window.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, window: Duration) -> Self {
        Self {
            path: path.into(),
            window,
        }
    }

    /// Watched file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Staleness window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Time since the file was last modified, `None` if it does not exist.
    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()?;

        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    /// Whether the file is due for a refresh.
    ///
    /// A missing file returns `missing_allowed`.
    #[must_use]
    pub fn check_update(&self, missing_allowed: bool) -> bool {
        let Some(age) = self.age() else {
            log::warn!(
                "File not found: {} (allow update: {missing_allowed})",
                self.path.display()
            );
            return missing_allowed;
        };

        let now = Local::now();
        let modified = now - chrono::Duration::from_std(age).unwrap_or_default();
        let stale = age > self.window;

        log::info!(
            "Checking {}: now {}, last modified {}, age {}s, window {}s, allow update: {stale}",
            self.path.display(),
            format_time(now),
            format_time(modified),
            age.as_secs(),
            self.window.as_secs()
        );

        stale
    }

    /// Time left before the window elapses, zero when already stale and
    /// `None` when the file does not exist.
    #[must_use]
    pub fn time_until_refresh(&self) -> Option<Duration> {
        let Some(age) = self.age() else {
            log::warn!("File not found: {}", self.path.display());
            return None;
        };

        Some(self.window.saturating_sub(age))
    }
}

fn format_time(time: DateTime<Local>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}
