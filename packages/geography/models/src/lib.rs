#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Country reference data and geographic hierarchy levels.
//!
//! These types describe the countries that case counts are attributed to
//! and the coarser groupings (continent, subregion, World Bank region) they
//! can be rolled up into. They carry attributes only; polygon geometry
//! lives in `coronadata_spatial`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A geographic grouping granularity usable for aggregation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum HierarchyLevel {
    /// Individual country (`ADMIN` in Natural Earth data)
    #[strum(to_string = "country", serialize = "admin")]
    Country,
    /// Continent (`CONTINENT`)
    Continent,
    /// United Nations subregion (`SUBREGION`)
    #[strum(to_string = "sub_region", serialize = "subregion")]
    SubRegion,
    /// World Bank region (`REGION_WB`)
    #[strum(to_string = "world_bank_region", serialize = "region_wb")]
    WorldBankRegion,
    /// Three-letter ISO-like country code (`ADM0_A3`)
    #[strum(to_string = "iso_code", serialize = "adm0_a3")]
    IsoCode,
}

impl HierarchyLevel {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Country,
            Self::Continent,
            Self::SubRegion,
            Self::WorldBankRegion,
            Self::IsoCode,
        ]
    }

    /// Whether this level identifies exactly one country per value.
    #[must_use]
    pub const fn is_country_grained(self) -> bool {
        matches!(self, Self::Country | Self::IsoCode)
    }

    /// Whether a table keyed at `self` can be rolled up to `target`.
    ///
    /// Country-grained tables can reach every level. Subregions nest inside
    /// continents; continents and World Bank regions only map onto
    /// themselves.
    #[must_use]
    pub const fn can_aggregate_to(self, target: Self) -> bool {
        if self.is_country_grained() {
            return true;
        }

        matches!(
            (self, target),
            (Self::SubRegion, Self::SubRegion | Self::Continent)
                | (Self::Continent, Self::Continent)
                | (Self::WorldBankRegion, Self::WorldBankRegion)
        )
    }
}

/// A country known to the geographic reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoEntity {
    /// Administrative country name (e.g. "France").
    pub name: String,
    /// Three-letter code (e.g. "FRA").
    pub iso_code: String,
    /// Continent name (e.g. "Europe").
    pub continent: String,
    /// Subregion name (e.g. "Western Europe").
    pub subregion: String,
    /// World Bank region (e.g. "Europe & Central Asia").
    pub worldbank_region: String,
    /// Estimated population.
    pub population: u64,
}

impl GeoEntity {
    /// Returns this entity's value for the given hierarchy level.
    #[must_use]
    pub fn key(&self, level: HierarchyLevel) -> &str {
        match level {
            HierarchyLevel::Country => &self.name,
            HierarchyLevel::Continent => &self.continent,
            HierarchyLevel::SubRegion => &self.subregion,
            HierarchyLevel::WorldBankRegion => &self.worldbank_region,
            HierarchyLevel::IsoCode => &self.iso_code,
        }
    }
}

/// Hierarchy columns joined onto a row.
///
/// Rows at a country-grained level carry every column of their country.
/// Coarser rows carry only the column of their own level, since the finer
/// columns are not determined by it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyAttributes {
    /// Country name.
    pub country: Option<String>,
    /// Three-letter code.
    pub iso_code: Option<String>,
    /// Subregion name.
    pub sub_region: Option<String>,
    /// World Bank region.
    pub world_bank_region: Option<String>,
    /// Continent name.
    pub continent: Option<String>,
}

impl HierarchyAttributes {
    /// Every column of `entity`.
    #[must_use]
    pub fn of_entity(entity: &GeoEntity) -> Self {
        Self {
            country: Some(entity.name.clone()),
            iso_code: Some(entity.iso_code.clone()),
            sub_region: Some(entity.subregion.clone()),
            world_bank_region: Some(entity.worldbank_region.clone()),
            continent: Some(entity.continent.clone()),
        }
    }

    /// Only the column of `level`, set to `value`.
    #[must_use]
    pub fn of_level(level: HierarchyLevel, value: &str) -> Self {
        let mut attributes = Self::default();
        let slot = match level {
            HierarchyLevel::Country => &mut attributes.country,
            HierarchyLevel::Continent => &mut attributes.continent,
            HierarchyLevel::SubRegion => &mut attributes.sub_region,
            HierarchyLevel::WorldBankRegion => &mut attributes.world_bank_region,
            HierarchyLevel::IsoCode => &mut attributes.iso_code,
        };
        *slot = Some(value.to_string());
        attributes
    }
}

/// Read-only set of [`GeoEntity`] records, indexed by country name.
///
/// Loaded once per geometry source and shared between datasets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoReference {
    entities: Vec<GeoEntity>,
    by_name: BTreeMap<String, usize>,
}

impl GeoReference {
    /// Builds a reference from entities in source order.
    ///
    /// When two entities share a name, the first one is kept for
    /// name lookups.
    #[must_use]
    pub fn new(entities: Vec<GeoEntity>) -> Self {
        let mut by_name = BTreeMap::new();
        for (idx, entity) in entities.iter().enumerate() {
            by_name.entry(entity.name.clone()).or_insert(idx);
        }

        Self { entities, by_name }
    }

    /// All entities in source order.
    #[must_use]
    pub fn entities(&self) -> &[GeoEntity] {
        &self.entities
    }

    /// Looks up an entity by exact country name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&GeoEntity> {
        self.by_name.get(name).map(|&idx| &self.entities[idx])
    }

    /// Whether a country with this exact name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Distinct values of a hierarchy level, sorted.
    #[must_use]
    pub fn keys(&self, level: HierarchyLevel) -> Vec<&str> {
        self.entities
            .iter()
            .map(|e| e.key(level))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Summed population per value of a hierarchy level.
    #[must_use]
    pub fn populations(&self, level: HierarchyLevel) -> BTreeMap<&str, u64> {
        let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
        for entity in &self.entities {
            *totals.entry(entity.key(level)).or_default() += entity.population;
        }
        totals
    }

    /// Summed population of every entity whose `level` value is `key`.
    #[must_use]
    pub fn population(&self, level: HierarchyLevel, key: &str) -> u64 {
        self.entities
            .iter()
            .filter(|e| e.key(level) == key)
            .map(|e| e.population)
            .sum()
    }

    /// Hierarchy columns of the `level` value `key`.
    ///
    /// Country-grained values unknown to the reference get only their own
    /// column.
    #[must_use]
    pub fn attributes(&self, level: HierarchyLevel, key: &str) -> HierarchyAttributes {
        let entity = match level {
            HierarchyLevel::Country => self.entity(key),
            HierarchyLevel::IsoCode => self.entities.iter().find(|e| e.iso_code == key),
            _ => None,
        };

        entity.map_or_else(
            || HierarchyAttributes::of_level(level, key),
            HierarchyAttributes::of_entity,
        )
    }

    /// Maps a value at level `from` to the value at level `to`, using the
    /// first entity that carries `name` at `from`.
    #[must_use]
    pub fn parent_key(&self, from: HierarchyLevel, name: &str, to: HierarchyLevel) -> Option<&str> {
        if from == HierarchyLevel::Country {
            return self.entity(name).map(|e| e.key(to));
        }

        self.entities
            .iter()
            .find(|e| e.key(from) == name)
            .map(|e| e.key(to))
    }
}
