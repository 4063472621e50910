//! `GeoJSON` export of query results.
//!
//! Each row becomes a feature whose properties are the row's columns and
//! whose geometry is the polygon of the row's hierarchy value. Values with
//! no polygon get a null geometry.

use std::io::{BufWriter, Write as _};
use std::path::Path;

use coronadata_analytics_models::AggregatedRecord;
use coronadata_spatial::{GeometrySource, PolygonTable};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};

use crate::{Dataset, DatasetError};

/// Builds a feature collection from `rows`, taking geometry from
/// `polygons`.
///
/// # Errors
///
/// Returns [`DatasetError::Json`] if a row cannot be converted to
/// properties.
pub fn to_feature_collection(
    rows: &[AggregatedRecord],
    polygons: &PolygonTable,
) -> Result<FeatureCollection, DatasetError> {
    let features = rows
        .iter()
        .map(|row| {
            let properties = match serde_json::to_value(row)? {
                serde_json::Value::Object(map) => map,
                _ => JsonObject::new(),
            };

            let geometry = polygons
                .geometry(&row.name)
                .filter(|polygon| !polygon.0.is_empty())
                .map(|polygon| Geometry::new(geojson::Value::from(polygon)));

            Ok::<_, DatasetError>(Feature {
                bbox: None,
                geometry,
                id: None,
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

impl Dataset {
    /// Writes `rows` to `path` as a `GeoJSON` feature collection and
    /// returns the number of features.
    ///
    /// All rows must share one hierarchy level. Geometry comes from
    /// `source`, or the dataset's own geometry when `None` (pass a coarser
    /// file for a lighter export).
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Configuration`] if rows mix levels, or
    /// [`DatasetError`] if the geometry or the file cannot be written.
    pub fn export_geojson(
        &self,
        path: &Path,
        rows: &[AggregatedRecord],
        source: Option<&GeometrySource>,
    ) -> Result<usize, DatasetError> {
        let level = rows.first().map_or(self.config().level, |r| r.level);
        if let Some(other) = rows.iter().find(|r| r.level != level) {
            return Err(DatasetError::Configuration {
                message: format!(
                    "Cannot export rows of different levels ({level} and {}) together",
                    other.level
                ),
            });
        }

        let polygons = self.store().table(level, source)?;
        let collection = to_feature_collection(rows, &polygons)?;

        log::info!(
            "Saving {} {level} features to {}",
            collection.features.len(),
            path.display()
        );

        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer(&mut writer, &collection)?;
        writer.flush()?;

        Ok(collection.features.len())
    }
}
