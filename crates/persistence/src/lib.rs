#![deny(warnings)]

//! Completed-goal persistence.
//!
//! Keys are opaque strings; nothing here looks inside them.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encode(e.to_string())
    }
}

/// Set of goal keys the user marked as done.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletedGoals(BTreeSet<String>);

impl CompletedGoals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    /// Flip one key; returns whether it is completed afterwards.
    pub fn toggle(&mut self, key: &str) -> bool {
        if self.0.remove(key) {
            false
        } else {
            self.0.insert(key.to_string());
            true
        }
    }

    /// Bulk toggle for the goals of one event: if any of `keys` is unfinished
    /// all of them become completed, otherwise all are cleared. Returns the
    /// new state.
    pub fn set_all<'a, I>(&mut self, keys: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
        I::IntoIter: Clone,
    {
        let keys = keys.into_iter();
        let complete = keys.clone().any(|k| !self.contains(k));
        for key in keys {
            if complete {
                self.0.insert(key.to_string());
            } else {
                self.0.remove(key);
            }
        }
        complete
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for CompletedGoals {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        CompletedGoals(iter.into_iter().map(Into::into).collect())
    }
}

/// Where completed goals live between runs.
pub trait GoalStore {
    /// Read the stored set. Unreadable data yields an empty set.
    fn load(&self) -> CompletedGoals;
    fn save(&self, goals: &CompletedGoals) -> Result<(), StoreError>;
}

impl<S: GoalStore + ?Sized> GoalStore for Arc<S> {
    fn load(&self) -> CompletedGoals {
        (**self).load()
    }

    fn save(&self, goals: &CompletedGoals) -> Result<(), StoreError> {
        (**self).save(goals)
    }
}

/// Store backed by a JSON array on disk.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GoalStore for JsonFileStore {
    fn load(&self) -> CompletedGoals {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no completed-goal store yet");
                return CompletedGoals::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read completed goals");
                return CompletedGoals::new();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(
                path = %self.path.display(),
                error = %e,
                "discarding corrupt completed-goal store"
            );
            CompletedGoals::new()
        })
    }

    fn save(&self, goals: &CompletedGoals) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(goals)?)?;
        debug!(path = %self.path.display(), count = goals.len(), "saved completed goals");
        Ok(())
    }
}

/// In-memory store for tests and runs without a store path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    goals: Mutex<CompletedGoals>,
}

impl GoalStore for MemoryStore {
    fn load(&self) -> CompletedGoals {
        self.goals.lock().map(|g| g.clone()).unwrap_or_default()
    }

    fn save(&self, goals: &CompletedGoals) -> Result<(), StoreError> {
        if let Ok(mut stored) = self.goals.lock() {
            *stored = goals.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn toggle_flips_membership() {
        let mut goals = CompletedGoals::new();
        assert!(goals.toggle("a|b|goal|0||"));
        assert!(goals.contains("a|b|goal|0||"));
        assert!(!goals.toggle("a|b|goal|0||"));
        assert!(goals.is_empty());
    }

    #[test]
    fn set_all_completes_when_any_unfinished() {
        let mut goals: CompletedGoals = ["k0"].into_iter().collect();
        assert!(goals.set_all(["k0", "k1"]));
        assert!(goals.contains("k0") && goals.contains("k1"));
        assert!(!goals.set_all(["k0", "k1"]));
        assert!(goals.is_empty());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("completed.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed.json");
        fs::write(&path, "{not json").unwrap();
        assert!(JsonFileStore::new(&path).load().is_empty());
    }

    #[test]
    fn save_then_load_keeps_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/completed.json"));
        let goals: CompletedGoals = ["中萨纳兰|乌合之众|goal|0|扬沙|夜晚", "x|y|goal|1||"]
            .into_iter()
            .collect();
        store.save(&goals).unwrap();
        assert_eq!(store.load(), goals);
        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.trim_start().starts_with('['));
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::default();
        let goals: CompletedGoals = ["k"].into_iter().collect();
        store.save(&goals).unwrap();
        assert_eq!(store.load(), goals);
    }

    proptest! {
        #[test]
        fn double_toggle_is_identity(
            keys in prop::collection::vec("[a-z|0-9]{1,12}", 0..8),
            key in "[a-z|]{1,8}",
        ) {
            let mut goals: CompletedGoals = keys.into_iter().collect();
            let before = goals.clone();
            goals.toggle(&key);
            goals.toggle(&key);
            prop_assert_eq!(goals, before);
        }
    }
}
