// MIT License - Copyright (c) 2026 Peter Wright
// Per-device property store with change detection

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Properties whose value changed in one update, keyed by name.
pub type ChangeSet = BTreeMap<String, Value>;

/// Last-known property values of one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStateStore {
    props: BTreeMap<String, Value>,
}

impl DeviceStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the properties of a JSON object. Non-objects yield an empty store.
    pub fn with_initial(initial: Value) -> Self {
        let mut store = Self::new();
        if let Value::Object(map) = initial {
            store.props.extend(map);
        }
        store
    }

    /// Merge `partial` into the store and return what changed.
    ///
    /// Values are compared by JSON equality; unchanged entries are left out.
    pub fn update<I>(&mut self, partial: I) -> ChangeSet
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut changes = ChangeSet::new();
        for (name, value) in partial {
            if self.props.get(&name) == Some(&value) {
                continue;
            }
            self.props.insert(name.clone(), value.clone());
            changes.insert(name, value);
        }
        changes
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    /// Full current mapping as a JSON object.
    pub fn snapshot(&self) -> Value {
        Value::Object(
            self.props
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}
