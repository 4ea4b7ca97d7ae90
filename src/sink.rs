//! Live value publication.
//!
//! Read maps publish decoded engineering values through [`ValueSink`]. The
//! host's persisted store implements the trait; [`LiveValues`] is the
//! in-memory implementation used by the demo and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

/// Destination for published signal values.
pub trait ValueSink: Send + Sync {
    /// Publish the latest value of a signal.
    fn set_value(&self, name: &str, value: f64);

    /// Disabled channels are skipped by the read maps.
    fn is_channel_enabled(&self, _name: &str) -> bool {
        true
    }
}

impl<S: ValueSink + ?Sized> ValueSink for Arc<S> {
    fn set_value(&self, name: &str, value: f64) {
        (**self).set_value(name, value)
    }

    fn is_channel_enabled(&self, name: &str) -> bool {
        (**self).is_channel_enabled(name)
    }
}

/// A published value and its timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveValue {
    pub value: f64,
    pub updated_at: DateTime<Utc>,
}

/// In-memory value store.
#[derive(Debug, Default)]
pub struct LiveValues {
    values: RwLock<HashMap<String, LiveValue>>,
    disabled: RwLock<HashSet<String>>,
}

impl LiveValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entry(name).map(|entry| entry.value)
    }

    pub fn entry(&self, name: &str) -> Option<LiveValue> {
        self.values
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .copied()
    }

    /// Sorted copy of every published value.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.values
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(name, entry)| (name.clone(), entry.value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn disable_channel(&self, name: &str) {
        self.disabled
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string());
    }

    pub fn enable_channel(&self, name: &str) {
        self.disabled
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(name);
    }
}

impl ValueSink for LiveValues {
    fn set_value(&self, name: &str, value: f64) {
        let entry = LiveValue {
            value,
            updated_at: Utc::now(),
        };
        self.values
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string(), entry);
    }

    fn is_channel_enabled(&self, name: &str) -> bool {
        !self
            .disabled
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains(name)
    }
}
