use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::record::{is_prunable, DISCRIMINATOR};

/// A named cleanup profile.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Keys removed wherever they appear.
    #[serde(default)]
    pub stop_keys: HashSet<String>,
    /// Record kinds (`_` values) dropped entirely.
    #[serde(default)]
    pub stop_objects: HashSet<String>,
}

impl Profile {
    /// Recursively prune a record. Returns `None` when nothing is left.
    pub fn clean(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Object(map) => {
                let kind = map.get(DISCRIMINATOR).and_then(Value::as_str);
                if kind.is_some_and(|k| self.stop_objects.contains(k)) {
                    return None;
                }

                let cleaned: Map<String, Value> = map
                    .iter()
                    .filter(|(key, _)| !self.stop_keys.contains(key.as_str()))
                    .filter_map(|(key, v)| {
                        self.clean(v)
                            .filter(|c| !is_prunable(c))
                            .map(|c| (key.clone(), c))
                    })
                    .collect();

                (!cleaned.is_empty()).then_some(Value::Object(cleaned))
            }
            // Empty sequences survive here; the parent mapping decides.
            Value::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .filter_map(|item| self.clean(item))
                    .filter(|c| !is_prunable(c))
                    .collect(),
            )),
            scalar => Some(scalar.clone()),
        }
    }
}

/// Immutable profile registry, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    profiles: HashMap<String, Profile>,
    empty: Profile,
}

impl ProfileSet {
    pub fn new(profiles: HashMap<String, Profile>) -> Self {
        Self {
            profiles,
            empty: Profile::default(),
        }
    }

    /// Parse a JSON document mapping profile names to profiles.
    pub fn from_json(content: &str) -> Result<Self> {
        let profiles: HashMap<String, Profile> =
            serde_json::from_str(content).context("Failed to parse profiles JSON")?;
        Ok(Self::new(profiles))
    }

    /// Load profiles from disk. A missing or malformed file yields an empty set.
    pub fn load(path: &Path) -> Self {
        let result = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profiles file: {}", path.display()))
            .and_then(|content| Self::from_json(&content));

        match result {
            Ok(set) => {
                info!(
                    "Loaded {} filtering profile(s) from {}",
                    set.len(),
                    path.display()
                );
                set
            }
            Err(e) => {
                warn!("Could not load profiles: {:#}. Using default empty filters.", e);
                Self::default()
            }
        }
    }

    /// Look up a profile; unknown names resolve to the empty profile.
    pub fn get(&self, name: &str) -> &Profile {
        self.profiles.get(name).unwrap_or(&self.empty)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Clean a record with the named profile.
    pub fn clean(&self, value: &Value, profile_name: &str) -> Option<Value> {
        self.get(profile_name).clean(value)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
