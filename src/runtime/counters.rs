//! Dynamic counters incremented by executed counter instructions

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CounterKey {
    pub group: String,
    pub name: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterEntry {
    #[serde(flatten)]
    pub key: CounterKey,
    pub value: i64,
}

/// Concurrent counter table shared by every machine of a VM
#[derive(Debug, Default)]
pub struct DynamicCounters {
    values: DashMap<CounterKey, i64>,
}

impl DynamicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, group: &str, name: &str, context: Option<&str>, delta: i64) {
        let key = CounterKey {
            group: group.to_string(),
            name: name.to_string(),
            context: context.map(str::to_string),
        };
        *self.values.entry(key).or_insert(0) += delta;
    }

    /// Sum over every context
    pub fn get(&self, group: &str, name: &str) -> i64 {
        self.values
            .iter()
            .filter(|entry| entry.key().group == group && entry.key().name == name)
            .map(|entry| *entry.value())
            .sum()
    }

    pub fn get_in(&self, group: &str, name: &str, context: &str) -> i64 {
        self.values
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.group == group && key.name == name && key.context.as_deref() == Some(context)
            })
            .map(|entry| *entry.value())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&self) {
        self.values.clear();
    }

    /// Sorted copy of all counters
    pub fn snapshot(&self) -> Vec<CounterEntry> {
        let mut entries: Vec<CounterEntry> = self
            .values
            .iter()
            .map(|entry| CounterEntry {
                key: entry.key().clone(),
                value: *entry.value(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}
