//! Geometry providers.
//!
//! A provider turns a [`GeometrySource`] into country features. The file
//! provider reads Natural Earth style `GeoJSON` (plain or zip-packed); the
//! static provider serves features held in memory.

use std::collections::BTreeMap;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use coronadata_geography_models::GeoEntity;
use geo::MultiPolygon;
use geojson::GeoJson;

use crate::{GeoFeature, GeometrySource, SpatialError};

/// File name of the default countries file under `data/geodata/`.
pub const BUNDLED_GEOMETRY_FILE: &str = "ne_10m_admin_0_countries.geojson";

const PROP_NAME: &str = "ADMIN";
const PROP_ISO: &str = "ADM0_A3";
const PROP_POPULATION: &str = "POP_EST";
const PROP_CONTINENT: &str = "CONTINENT";
const PROP_SUBREGION: &str = "SUBREGION";
const PROP_WORLDBANK: &str = "REGION_WB";

/// Loads country features for a geometry source.
pub trait GeometryProvider: Send + Sync {
    /// Loads every feature of `source`, in source order.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the source cannot be read or a feature
    /// lacks a required property.
    fn load(&self, source: &GeometrySource) -> Result<Vec<GeoFeature>, SpatialError>;
}

/// Reads `GeoJSON` files from disk.
#[derive(Debug, Clone)]
pub struct FileGeometryProvider {
    bundled: PathBuf,
}

impl FileGeometryProvider {
    /// Creates a provider whose [`GeometrySource::Bundled`] resolves to
    /// `bundled`.
    #[must_use]
    pub const fn new(bundled: PathBuf) -> Self {
        Self { bundled }
    }

    /// Returns the default bundled geometry path
    /// (`<workspace>/data/geodata/ne_10m_admin_0_countries.geojson`).
    #[must_use]
    pub fn default_bundled_path() -> PathBuf {
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest
            .ancestors()
            .nth(2)
            .unwrap_or(manifest)
            .join("data")
            .join("geodata")
            .join(BUNDLED_GEOMETRY_FILE)
    }

    fn path_for<'a>(&'a self, source: &'a GeometrySource) -> &'a Path {
        match source {
            GeometrySource::Bundled => &self.bundled,
            GeometrySource::Custom(path) => path,
        }
    }
}

impl Default for FileGeometryProvider {
    fn default() -> Self {
        Self::new(Self::default_bundled_path())
    }
}

impl GeometryProvider for FileGeometryProvider {
    fn load(&self, source: &GeometrySource) -> Result<Vec<GeoFeature>, SpatialError> {
        let path = self.path_for(source);
        log::info!("Loading geometry from {}", path.display());

        let contents = read_geometry_file(path)?;
        let features = parse_features(&contents)?;

        log::info!("Loaded {} country features from {source}", features.len());
        Ok(features)
    }
}

/// Serves features that are already in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticGeometryProvider {
    sources: BTreeMap<GeometrySource, Vec<GeoFeature>>,
}

impl StaticGeometryProvider {
    /// Creates a provider serving `features` as the bundled source.
    #[must_use]
    pub fn new(features: Vec<GeoFeature>) -> Self {
        Self::default().with_source(GeometrySource::Bundled, features)
    }

    /// Registers `features` under `source`.
    #[must_use]
    pub fn with_source(mut self, source: GeometrySource, features: Vec<GeoFeature>) -> Self {
        self.sources.insert(source, features);
        self
    }
}

impl GeometryProvider for StaticGeometryProvider {
    fn load(&self, source: &GeometrySource) -> Result<Vec<GeoFeature>, SpatialError> {
        self.sources
            .get(source)
            .cloned()
            .ok_or_else(|| SpatialError::UnknownSource {
                requested: source.clone(),
            })
    }
}

/// Reads a geometry file, unpacking the first `.geojson`/`.json` entry of a
/// `.zip` archive.
///
/// # Errors
///
/// Returns [`SpatialError`] if the file cannot be read, is a shapefile, or
/// the archive contains no `GeoJSON` entry.
pub fn read_geometry_file(path: &Path) -> Result<String, SpatialError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("zip") => {
            let file = std::fs::File::open(path)?;
            let mut archive = zip::ZipArchive::new(file)?;

            for i in 0..archive.len() {
                let mut entry = archive.by_index(i)?;
                let name = entry.name().to_ascii_lowercase();
                if name.ends_with(".geojson") || name.ends_with(".json") {
                    log::debug!("Reading {name} from {}", path.display());
                    let mut contents = String::new();
                    entry.read_to_string(&mut contents)?;
                    return Ok(contents);
                }
            }

            Err(SpatialError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
        }
        Some("shp") => Err(SpatialError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
        _ => Ok(std::fs::read_to_string(path)?),
    }
}

/// Parses a `GeoJSON` feature collection into country features.
///
/// Features whose geometry is missing or not polygonal are kept with an
/// empty outline so their population still counts.
///
/// # Errors
///
/// Returns [`SpatialError`] if the text is not a feature collection or a
/// feature lacks one of the required properties.
pub fn parse_features(geojson_str: &str) -> Result<Vec<GeoFeature>, SpatialError> {
    let GeoJson::FeatureCollection(collection) = geojson_str.parse::<GeoJson>()? else {
        return Err(SpatialError::UnsupportedFormat {
            path: PathBuf::from("<geojson>"),
        });
    };

    collection
        .features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| {
            let empty = serde_json::Map::new();
            let props = feature.properties.as_ref().unwrap_or(&empty);

            let entity = GeoEntity {
                name: string_prop(props, index, PROP_NAME)?,
                iso_code: string_prop(props, index, PROP_ISO)?,
                continent: string_prop(props, index, PROP_CONTINENT)?,
                subregion: string_prop(props, index, PROP_SUBREGION)?,
                worldbank_region: string_prop(props, index, PROP_WORLDBANK)?,
                population: population_prop(props, index)?,
            };

            let geometry = feature
                .geometry
                .and_then(|geom| to_multipolygon(geom, &entity.name))
                .unwrap_or_else(|| MultiPolygon(vec![]));

            Ok(GeoFeature { entity, geometry })
        })
        .collect()
}

fn string_prop(
    props: &serde_json::Map<String, serde_json::Value>,
    index: usize,
    property: &'static str,
) -> Result<String, SpatialError> {
    props
        .get(property)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or(SpatialError::MissingProperty { index, property })
}

/// Natural Earth stores `-99` for unknown populations; those count as 0.
fn population_prop(
    props: &serde_json::Map<String, serde_json::Value>,
    index: usize,
) -> Result<u64, SpatialError> {
    let value = props
        .get(PROP_POPULATION)
        .and_then(serde_json::Value::as_f64)
        .ok_or(SpatialError::MissingProperty {
            index,
            property: PROP_POPULATION,
        })?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(value.max(0.0).round() as u64)
}

fn to_multipolygon(geometry: geojson::Geometry, name: &str) -> Option<MultiPolygon<f64>> {
    let Ok(geo_geom) = geo::Geometry::<f64>::try_from(geometry) else {
        log::warn!("Failed to convert geometry for {name}");
        return None;
    };

    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => {
            log::warn!("Ignoring non-polygonal geometry for {name}");
            None
        }
    }
}
