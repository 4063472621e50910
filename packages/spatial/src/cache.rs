//! Bounded memoization of polygon tables.
//!
//! Building a continent or subregion table unions hundreds of country
//! outlines, so tables are memoized per `(level, source)` in a small LRU.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use coronadata_geography_models::{GeoReference, HierarchyLevel};

use crate::{GeoFeature, GeometryProvider, GeometrySource, PolygonTable, SpatialError};

/// Number of polygon tables kept by a [`GeometryStore`].
pub const GEOMETRY_CACHE_CAPACITY: usize = 10;

/// Fixed-capacity least-recently-used cache keyed by value equality.
///
/// Entries are kept most-recent first; inserting beyond capacity drops the
/// entry at the back.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: VecDeque<(K, V)>,
}

impl<K: PartialEq, V> LruCache<K, V> {
    /// Creates an empty cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns the value for `key`, marking it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(pos)?;
        self.entries.push_front(entry);
        self.entries.front().map(|(_, v)| v)
    }

    /// Inserts `value` as the most recently used entry, evicting the least
    /// recently used one if the cache is full. Returns the evicted key.
    pub fn insert(&mut self, key: K, value: V) -> Option<K> {
        if let Some(pos) = self.entries.iter().position(|(k, _)| *k == key) {
            self.entries.remove(pos);
        }

        if self.capacity == 0 {
            return Some(key);
        }

        self.entries.push_front((key, value));

        if self.entries.len() > self.capacity {
            self.entries.pop_back().map(|(k, _)| k)
        } else {
            None
        }
    }

    /// Whether `key` is cached, without touching its recency.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type TableKey = (HierarchyLevel, GeometrySource);

/// Reference data for one geometry source, plus memoized polygon tables.
///
/// The primary source's features and [`GeoReference`] are loaded once and
/// shared read-only. Tables for other sources are built from the provider
/// on demand and only live in the LRU.
pub struct GeometryStore {
    provider: Box<dyn GeometryProvider>,
    source: GeometrySource,
    features: Arc<Vec<GeoFeature>>,
    reference: Arc<GeoReference>,
    tables: Mutex<LruCache<TableKey, Arc<PolygonTable>>>,
}

impl GeometryStore {
    /// Loads the primary `source` through `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the provider fails to load the source.
    pub fn load(
        provider: Box<dyn GeometryProvider>,
        source: GeometrySource,
    ) -> Result<Self, SpatialError> {
        let features = provider.load(&source)?;
        let reference = GeoReference::new(features.iter().map(|f| f.entity.clone()).collect());

        Ok(Self {
            provider,
            source,
            features: Arc::new(features),
            reference: Arc::new(reference),
            tables: Mutex::new(LruCache::new(GEOMETRY_CACHE_CAPACITY)),
        })
    }

    /// The primary geometry source.
    #[must_use]
    pub const fn source(&self) -> &GeometrySource {
        &self.source
    }

    /// Country attributes of the primary source.
    #[must_use]
    pub fn reference(&self) -> Arc<GeoReference> {
        Arc::clone(&self.reference)
    }

    /// Features of the primary source.
    #[must_use]
    pub fn features(&self) -> &[GeoFeature] {
        &self.features
    }

    /// Returns the polygon table for `level`, built from `source` (the
    /// primary source when `None`).
    ///
    /// Repeated requests for the same pair return the same table until it
    /// is evicted.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if a non-primary source fails to load.
    pub fn table(
        &self,
        level: HierarchyLevel,
        source: Option<&GeometrySource>,
    ) -> Result<Arc<PolygonTable>, SpatialError> {
        let source = source.unwrap_or(&self.source);
        let key = (level, source.clone());

        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = tables.get(&key) {
            return Ok(Arc::clone(table));
        }

        log::debug!("Building {level} polygon table from {source}");
        let table = if *source == self.source {
            PolygonTable::for_level(&self.features, level)
        } else {
            PolygonTable::for_level(&self.provider.load(source)?, level)
        };
        let table = Arc::new(table);

        if let Some((evicted_level, evicted_source)) = tables.insert(key, Arc::clone(&table)) {
            log::debug!("Evicted {evicted_level} polygon table for {evicted_source}");
        }

        Ok(table)
    }

    /// Number of memoized tables.
    #[must_use]
    pub fn cached_tables(&self) -> usize {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for GeometryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryStore")
            .field("source", &self.source)
            .field("features", &self.features.len())
            .field("cached_tables", &self.cached_tables())
            .finish_non_exhaustive()
    }
}
