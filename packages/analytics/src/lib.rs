#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Derivation and aggregation of daily case tables.
//!
//! [`derive`] turns grouped confirmed/deaths counts into a table with
//! recovery estimates, daily deltas and rates. [`aggregate`] rolls such a
//! table up to a coarser [`HierarchyLevel`] and fills in entities or days
//! with no reports.
//!
//! [`HierarchyLevel`]: coronadata_geography_models::HierarchyLevel

pub mod aggregate;
pub mod derive;

use coronadata_geography_models::HierarchyLevel;
use thiserror::Error;

pub use aggregate::{aggregate, fill_days, fill_entities, report_days};
pub use derive::{DerivationConfig, derive, rederive};

/// Errors that can occur during analytics operations.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Rows at one level cannot be rolled up to the requested level.
    #[error("Cannot aggregate {from} rows to {to}")]
    Configuration {
        /// Level of the input rows.
        from: HierarchyLevel,
        /// Requested level.
        to: HierarchyLevel,
    },
}
