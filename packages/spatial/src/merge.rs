//! Polygon repair and per-level unions.

use std::collections::BTreeMap;

use coronadata_geography_models::HierarchyLevel;
use geo::{BooleanOps as _, MultiPolygon, Validation as _};

use crate::GeoFeature;

/// Repairs an invalid polygon by re-noding it through a union with the
/// empty polygon.
///
/// Self-intersecting rings are split at their crossings, so every lobe
/// keeps its area. Valid input is returned untouched.
#[must_use]
pub fn repair(polygon: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    if polygon.is_valid() {
        return polygon.clone();
    }

    let repaired = polygon.union(&MultiPolygon(vec![]));
    log::debug!("Repaired invalid polygon into {} parts", repaired.0.len());
    repaired
}

/// Unions the polygons of all features that share a value at `level`.
///
/// Returns one `(value, polygon)` pair per distinct value, sorted by value.
/// Every input polygon is repaired before the union.
#[must_use]
pub fn merge_by_level(
    features: &[GeoFeature],
    level: HierarchyLevel,
) -> Vec<(String, MultiPolygon<f64>)> {
    let mut groups: BTreeMap<&str, Vec<MultiPolygon<f64>>> = BTreeMap::new();

    for feature in features {
        groups
            .entry(feature.entity.key(level))
            .or_default()
            .push(repair(&feature.geometry));
    }

    groups
        .into_iter()
        .map(|(key, polygons)| (key.to_string(), union_all(polygons)))
        .collect()
}

/// Unions a set of polygons into one.
#[must_use]
pub fn union_all(polygons: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    let mut iter = polygons.into_iter();
    let Some(first) = iter.next() else {
        return MultiPolygon(vec![]);
    };

    iter.fold(first, |acc, next| acc.union(&next))
}
