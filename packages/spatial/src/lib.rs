#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Country polygons and point-in-polygon lookups.
//!
//! Case feeds name countries inconsistently, so rows are attributed to a
//! country by testing their coordinate against the reference polygons.
//! This crate loads those polygons (`GeoJSON`, optionally zip-packed),
//! builds R-tree backed [`PolygonTable`]s per hierarchy level (merging
//! country shapes into continents, subregions, ...), and memoizes the
//! tables in a small LRU keyed by `(level, source)`.

pub mod cache;
pub mod merge;
pub mod provider;
pub mod resolver;

use std::fmt;
use std::path::PathBuf;

use coronadata_geography_models::GeoEntity;
use geo::MultiPolygon;
use thiserror::Error;

pub use cache::{GEOMETRY_CACHE_CAPACITY, GeometryStore, LruCache};
pub use provider::{FileGeometryProvider, GeometryProvider, StaticGeometryProvider};
pub use resolver::PolygonTable;

/// Errors that can occur while loading or indexing geometry.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// Reading the geometry file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid `GeoJSON`.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[source] Box<geojson::Error>),

    /// The zip archive could not be read.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A feature is missing one of the required properties.
    #[error("Feature {index} is missing required property '{property}'")]
    MissingProperty {
        /// Position of the feature in the collection.
        index: usize,
        /// Name of the missing property.
        property: &'static str,
    },

    /// The file is not a `GeoJSON` feature collection.
    #[error("Unsupported geometry file: {}", path.display())]
    UnsupportedFormat {
        /// Offending path.
        path: PathBuf,
    },

    /// The provider has no data for this source.
    #[error("Unknown geometry source: {requested}")]
    UnknownSource {
        /// The source that was requested.
        requested: GeometrySource,
    },
}

impl From<geojson::Error> for SpatialError {
    fn from(value: geojson::Error) -> Self {
        Self::GeoJson(Box::new(value))
    }
}

/// Where a set of country polygons comes from.
///
/// Compared by value, so two requests for the same custom path share a
/// cache entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum GeometrySource {
    /// The default countries file shipped under `data/geodata/`.
    #[default]
    Bundled,
    /// A user-supplied `GeoJSON` (or zipped `GeoJSON`) file.
    Custom(PathBuf),
}

impl fmt::Display for GeometrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundled => f.write_str("bundled"),
            Self::Custom(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A country with its attributes and outline.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFeature {
    /// Country attributes (names, hierarchy values, population).
    pub entity: GeoEntity,
    /// Country outline. Empty when the source feature had no geometry.
    pub geometry: MultiPolygon<f64>,
}
