//! Named collections of settings.

use crate::setting::Setting;
use crate::trigger::PersistenceTrigger;
use crate::value::write_quoted;
use parking_lot::RwLock;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// What a key in a [`ConfigMap`] points at.
#[derive(Debug, Clone)]
pub enum Entry {
    Setting(Arc<Setting>),
    Section(Arc<ConfigMap>),
}

impl Entry {
    pub fn as_setting(&self) -> Option<&Arc<Setting>> {
        match self {
            Entry::Setting(setting) => Some(setting),
            Entry::Section(_) => None,
        }
    }

    pub fn as_section(&self) -> Option<&Arc<ConfigMap>> {
        match self {
            Entry::Section(section) => Some(section),
            Entry::Setting(_) => None,
        }
    }

    fn bind(&self, trigger: &PersistenceTrigger) {
        match self {
            Entry::Setting(setting) => setting.bind(trigger),
            Entry::Section(section) => section.bind(trigger),
        }
    }

    fn write_rendered(&self, out: &mut String) {
        match self {
            Entry::Setting(setting) => setting.write_rendered(out),
            Entry::Section(section) => section.write_rendered(out),
        }
    }

    fn to_json(&self) -> Json {
        match self {
            Entry::Setting(setting) => setting.get().to_json(),
            Entry::Section(section) => section.to_json(),
        }
    }
}

impl From<Setting> for Entry {
    fn from(setting: Setting) -> Self {
        Entry::Setting(Arc::new(setting))
    }
}

impl From<ConfigMap> for Entry {
    fn from(section: ConfigMap) -> Self {
        Entry::Section(Arc::new(section))
    }
}

#[derive(Debug, Default)]
struct MapState {
    version: String,
    entries: HashMap<String, Entry>,
}

/// The settings of one program (`is_main`) or of one named subsection.
///
/// Key order is not significant anywhere, including in [`ConfigMap::render`].
#[derive(Debug)]
pub struct ConfigMap {
    name: String,
    is_main: bool,
    state: RwLock<MapState>,
    trigger: OnceLock<PersistenceTrigger>,
}

impl ConfigMap {
    pub fn new(name: impl Into<String>, is_main: bool) -> Self {
        Self {
            name: name.into(),
            is_main,
            state: RwLock::new(MapState::default()),
            trigger: OnceLock::new(),
        }
    }

    /// A subsection named `name`.
    pub fn section(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_main(&self) -> bool {
        self.is_main
    }

    pub fn version(&self) -> String {
        self.state.read().version.clone()
    }

    pub fn get(&self, key: &str) -> Option<Entry> {
        self.state.read().entries.get(key).cloned()
    }

    /// Convenience lookup for a key holding a plain setting.
    pub fn setting(&self, key: &str) -> Option<Arc<Setting>> {
        self.get(key).and_then(|e| e.as_setting().cloned())
    }

    pub fn subsection(&self, key: &str) -> Option<Arc<ConfigMap>> {
        self.get(key).and_then(|e| e.as_section().cloned())
    }

    /// Insert or replace the entry under `key`.
    pub fn set(&self, key: impl Into<String>, entry: impl Into<Entry>) {
        let entry = entry.into();
        let trigger = self.trigger.get();
        if let Some(trigger) = trigger {
            entry.bind(trigger);
        }
        self.state.write().entries.insert(key.into(), entry);
        if let Some(trigger) = trigger {
            trigger.arm();
        }
    }

    pub fn set_version(&self, version: impl Into<String>) -> &Self {
        self.state.write().version = version.into();
        if let Some(trigger) = self.trigger.get() {
            trigger.arm();
        }
        self
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.read().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// All entries, for walking the tree.
    pub fn entries(&self) -> Vec<(String, Entry)> {
        self.state
            .read()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// `{"key": rendering, ...}` in unspecified key order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write_rendered(&mut out);
        out
    }

    fn write_rendered(&self, out: &mut String) {
        let state = self.state.read();
        out.push('{');
        for (i, (key, entry)) in state.entries.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_quoted(out, key);
            out.push_str(": ");
            entry.write_rendered(out);
        }
        out.push('}');
    }

    pub fn to_json(&self) -> Json {
        let state = self.state.read();
        Json::Object(
            state
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Attach a trigger to this map and everything below it.
    pub(crate) fn bind(&self, trigger: &PersistenceTrigger) {
        let _ = self.trigger.set(trigger.clone());
        for entry in self.state.read().entries.values() {
            entry.bind(trigger);
        }
    }
}
