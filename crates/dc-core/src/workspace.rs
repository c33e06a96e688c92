//! Model-level store of interpolated (morphed) shapes.

use std::collections::BTreeMap;

use crate::traits::InterpolatedShape;

/// Named collection of interpolated shapes, looked up by card assembly.
#[derive(Debug, Default)]
pub struct Workspace {
    name: String,
    entries: BTreeMap<String, Box<dyn InterpolatedShape>>,
}

impl Workspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), entries: BTreeMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record `shape` under `key`, replacing any previous entry.
    pub fn insert(&mut self, key: impl Into<String>, shape: Box<dyn InterpolatedShape>) {
        self.entries.insert(key.into(), shape);
    }

    pub fn get(&self, key: &str) -> Option<&dyn InterpolatedShape> {
        self.entries.get(key).map(|b| b.as_ref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn InterpolatedShape)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}
