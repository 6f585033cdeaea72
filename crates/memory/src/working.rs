//! Working memory: scratch state for the current session.

use serde_json::{Map, Value};

/// Key-value scratch data. Persisted under the `working` key on save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingMemory {
    data: Map<String, Value>,
}

pub const WORKING_KEY: &str = "working";

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(data: Map<String, Value>) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn extend(&mut self, data: Map<String, Value>) {
        self.data.extend(data);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }
}
