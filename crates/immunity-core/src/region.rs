//! Ordered deploy targets and their policy flags.
//!
//! Regions belong to an application and are visited in ascending ordinal
//! order. Duplicate ordinals within an application, or duplicate region names
//! anywhere, are rejected when the registry is built so lookups never have to
//! break ties.

use crate::config::Config;
use crate::error::{ImmunityError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionPolicy {
    pub requires_manual_approval: bool,
    pub requires_monitoring: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub application: String,
    pub ordinal: u32,
    pub requires_manual_approval: bool,
    pub requires_monitoring: bool,
}

impl Region {
    pub fn policy(&self) -> RegionPolicy {
        RegionPolicy {
            requires_manual_approval: self.requires_manual_approval,
            requires_monitoring: self.requires_monitoring,
        }
    }
}

// ---------------------------------------------------------------------------
// RegionRegistry
// ---------------------------------------------------------------------------

/// All regions, sorted by `(application, ordinal)`.
#[derive(Debug, Clone, Default)]
pub struct RegionRegistry {
    regions: Vec<Region>,
}

impl RegionRegistry {
    pub fn new(mut regions: Vec<Region>) -> Result<Self> {
        let mut names = HashSet::new();
        let mut ordinals = HashSet::new();
        for region in &regions {
            crate::paths::validate_name(&region.name)?;
            if !names.insert(region.name.as_str()) {
                return Err(ImmunityError::InvalidRegionConfig(format!(
                    "region '{}' is defined more than once",
                    region.name
                )));
            }
            if !ordinals.insert((region.application.as_str(), region.ordinal)) {
                return Err(ImmunityError::InvalidRegionConfig(format!(
                    "ordinal {} is used twice in application '{}'",
                    region.ordinal, region.application
                )));
            }
        }
        regions.sort_by(|a, b| {
            a.application
                .cmp(&b.application)
                .then(a.ordinal.cmp(&b.ordinal))
        });
        Ok(Self { regions })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let regions = config
            .applications
            .iter()
            .flat_map(|app| {
                app.regions.iter().map(move |r| Region {
                    name: r.name.clone(),
                    application: app.name.clone(),
                    ordinal: r.ordinal,
                    requires_manual_approval: r.requires_manual_approval,
                    requires_monitoring: r.requires_monitoring,
                })
            })
            .collect();
        Self::new(regions)
    }

    pub fn all(&self) -> &[Region] {
        &self.regions
    }

    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&Region> {
        self.get(name)
            .ok_or_else(|| ImmunityError::RegionNotFound(name.to_string()))
    }

    pub fn regions_for(&self, application: &str) -> Vec<&Region> {
        self.regions
            .iter()
            .filter(|r| r.application == application)
            .collect()
    }

    pub fn first_region(&self, application: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.application == application)
    }

    /// The region of the same application with the smallest ordinal strictly
    /// greater than `current`'s. `None` when `current` is the last region.
    pub fn next_region(&self, current: &str) -> Result<Option<&Region>> {
        let current = self.require(current)?;
        Ok(self
            .regions
            .iter()
            .filter(|r| r.application == current.application && r.ordinal > current.ordinal)
            .min_by_key(|r| r.ordinal))
    }

    pub fn policy(&self, region: &str) -> Result<RegionPolicy> {
        self.require(region).map(Region::policy)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
