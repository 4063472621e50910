//! Point-in-polygon resolution against a named polygon table.
//!
//! Polygons are indexed in an R-tree by bounding box; the tree only narrows
//! candidates. Containment ties are broken by insertion order, so when
//! polygons overlap the one inserted first wins.

use std::collections::BTreeMap;

use coronadata_geography_models::HierarchyLevel;
use geo::{BoundingRect as _, Contains as _, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};

use crate::GeoFeature;
use crate::merge::merge_by_level;

/// A named polygon stored in insertion order.
#[derive(Debug)]
struct BoundaryEntry {
    name: String,
    polygon: MultiPolygon<f64>,
}

/// Bounding box of one [`BoundaryEntry`], pointing back at its position.
#[derive(Debug)]
struct IndexedEnvelope {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Named polygons with an R-tree for containment lookups.
#[derive(Debug)]
pub struct PolygonTable {
    entries: Vec<BoundaryEntry>,
    index: RTree<IndexedEnvelope>,
    by_name: BTreeMap<String, usize>,
}

impl PolygonTable {
    /// Builds a table from `(name, polygon)` pairs in priority order.
    ///
    /// Duplicate names keep the first polygon for name lookups; both stay
    /// candidates for containment.
    #[must_use]
    pub fn new(polygons: Vec<(String, MultiPolygon<f64>)>) -> Self {
        let mut by_name = BTreeMap::new();
        let mut envelopes = Vec::with_capacity(polygons.len());
        let mut entries = Vec::with_capacity(polygons.len());

        for (index, (name, polygon)) in polygons.into_iter().enumerate() {
            by_name.entry(name.clone()).or_insert(index);
            if let Some(envelope) = compute_envelope(&polygon) {
                envelopes.push(IndexedEnvelope { index, envelope });
            }
            entries.push(BoundaryEntry { name, polygon });
        }

        Self {
            entries,
            index: RTree::bulk_load(envelopes),
            by_name,
        }
    }

    /// Builds the table for a hierarchy level.
    ///
    /// Country-grained levels keep one polygon per feature. Coarser levels
    /// union every feature sharing a value into one polygon.
    #[must_use]
    pub fn for_level(features: &[GeoFeature], level: HierarchyLevel) -> Self {
        if level.is_country_grained() {
            return Self::new(
                features
                    .iter()
                    .map(|f| (f.entity.key(level).to_string(), f.geometry.clone()))
                    .collect(),
            );
        }

        let merged = merge_by_level(features, level);
        log::debug!("Merged {} features into {} {level} polygons", features.len(), merged.len());
        Self::new(merged)
    }

    /// Returns the name of the polygon containing `(longitude, latitude)`.
    ///
    /// `preferred` is tested first. Otherwise the first polygon in
    /// insertion order that contains the point wins. Returns `None` when no
    /// polygon contains the point or the coordinate is not finite.
    #[must_use]
    pub fn resolve(&self, longitude: f64, latitude: f64, preferred: Option<&str>) -> Option<&str> {
        if !longitude.is_finite() || !latitude.is_finite() {
            return None;
        }

        let point = geo::Point::new(longitude, latitude);

        if let Some(entry) = preferred
            .and_then(|name| self.by_name.get(name))
            .map(|&idx| &self.entries[idx])
            && entry.polygon.contains(&point)
        {
            return Some(&entry.name);
        }

        let query_env = AABB::from_point([longitude, latitude]);

        self.index
            .locate_in_envelope_intersecting(&query_env)
            .filter(|candidate| self.entries[candidate.index].polygon.contains(&point))
            .map(|candidate| candidate.index)
            .min()
            .map(|idx| self.entries[idx].name.as_str())
    }

    /// Returns the polygon registered under `name`.
    #[must_use]
    pub fn geometry(&self, name: &str) -> Option<&MultiPolygon<f64>> {
        self.by_name.get(name).map(|&idx| &self.entries[idx].polygon)
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Number of polygons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no polygons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    mp.bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}
