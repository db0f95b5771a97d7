//! Wire shapes of configuration maps.

use cfgstore_core::{ConfigMap, Kind, Revision, Setting, UserId, Value, ValueError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use thiserror::Error;

/// A map to register, as sent by `config.add`.
///
/// ```json
/// {
///   "version": "1.0",
///   "entries": {
///     "port": {"kind": "uint32", "value": 707, "help": {"en": "Port"}},
///     "db": {"section": {"entries": {"host": {"kind": "string", "value": "h"}}}}
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPayload {
    /// Map name. Defaults to the program path, or to the key for a section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub entries: BTreeMap<String, PayloadEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadEntry {
    Section {
        section: ConfigPayload,
    },
    Value {
        kind: Kind,
        value: Json,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        help: BTreeMap<String, String>,
    },
}

#[derive(Debug, Error)]
#[error("invalid entry {key:?}: {source}")]
pub struct PayloadError {
    pub key: String,
    #[source]
    pub source: ValueError,
}

impl ConfigPayload {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            name: None,
            version: version.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Add a value entry; its kind is the value's own.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.entries.insert(
            key.into(),
            PayloadEntry::Value {
                kind: value.kind(),
                value: value.to_json(),
                help: BTreeMap::new(),
            },
        );
        self
    }

    /// Attach help text to an existing value entry.
    pub fn with_help(
        mut self,
        key: &str,
        lang: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        if let Some(PayloadEntry::Value { help, .. }) = self.entries.get_mut(key) {
            help.insert(lang.into(), text.into());
        }
        self
    }

    pub fn with_section(mut self, key: impl Into<String>, section: ConfigPayload) -> Self {
        self.entries
            .insert(key.into(), PayloadEntry::Section { section });
        self
    }

    /// Build the map this payload describes. Every value is authored by
    /// `author`.
    pub fn into_map(
        self,
        default_name: &str,
        is_main: bool,
        author: UserId,
    ) -> Result<ConfigMap, PayloadError> {
        let map = ConfigMap::new(self.name.as_deref().unwrap_or(default_name), is_main);
        map.set_version(self.version);
        for (key, entry) in self.entries {
            match entry {
                PayloadEntry::Section { section } => {
                    let section = section.into_map(&key, false, author)?;
                    map.set(key, section);
                }
                PayloadEntry::Value { kind, value, help } => {
                    let value = Value::from_json(kind, &value).map_err(|source| PayloadError {
                        key: key.clone(),
                        source,
                    })?;
                    let setting = Setting::with_value(value, author);
                    for (lang, text) in help {
                        setting.set_help(lang, text);
                    }
                    map.set(key, setting);
                }
            }
        }
        Ok(map)
    }
}

/// Result of `config.get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigView {
    pub name: String,
    pub is_main: bool,
    pub version: String,
    pub values: Json,
}

impl ConfigView {
    pub fn of(map: &ConfigMap) -> Self {
        Self {
            name: map.name().to_string(),
            is_main: map.is_main(),
            version: map.version(),
            values: map.to_json(),
        }
    }
}

/// One entry of `config.history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionView {
    pub value: Json,
    pub author: UserId,
    pub changed_at: DateTime<Utc>,
}

impl From<&Revision> for RevisionView {
    fn from(rev: &Revision) -> Self {
        Self {
            value: rev.value.to_json(),
            author: rev.author,
            changed_at: rev.changed_at,
        }
    }
}
