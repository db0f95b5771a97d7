//! A single typed setting with its audit trail and localized help.

use crate::accounts::UserId;
use crate::error::{PersistError, ValueError};
use crate::trigger::PersistenceTrigger;
use crate::value::{Kind, Value};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// A value displaced by a later `set`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub value: Value,
    pub author: UserId,
    pub changed_at: DateTime<Utc>,
}

/// Who last wrote the current value, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub author: UserId,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct SettingState {
    current: Value,
    stamp: Option<Stamp>,
    history: Vec<Revision>,
    help: HashMap<String, String>,
}

/// One setting: current value, history of previous values and help texts.
///
/// The kind is fixed at construction. History only ever holds displaced
/// values; the first `set` archives nothing because the unset sentinel is
/// never recorded.
#[derive(Debug)]
pub struct Setting {
    kind: Kind,
    state: RwLock<SettingState>,
    trigger: OnceLock<PersistenceTrigger>,
}

impl Setting {
    /// Create an unset setting of the given kind.
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            state: RwLock::new(SettingState {
                current: Value::zero(kind),
                stamp: None,
                history: Vec::new(),
                help: HashMap::new(),
            }),
            trigger: OnceLock::new(),
        }
    }

    /// Create a setting and give it its first value.
    pub fn with_value(value: Value, author: UserId) -> Self {
        let setting = Self::new(value.kind());
        setting.write(value, author);
        setting
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn get(&self) -> Value {
        self.state.read().current.clone()
    }

    pub fn is_set(&self) -> bool {
        self.state.read().stamp.is_some()
    }

    pub fn stamp(&self) -> Option<Stamp> {
        self.state.read().stamp
    }

    pub fn author(&self) -> Option<UserId> {
        self.stamp().map(|s| s.author)
    }

    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        self.stamp().map(|s| s.at)
    }

    /// Replace the current value, archiving the previous one if there was one.
    pub fn set(&self, value: Value, author: UserId) -> Result<(), ValueError> {
        if value.kind() != self.kind {
            return Err(ValueError::KindMismatch {
                expected: self.kind,
                actual: value.kind(),
            });
        }
        self.write(value, author);
        if let Some(trigger) = self.trigger.get() {
            trigger.arm();
        }
        Ok(())
    }

    fn write(&self, value: Value, author: UserId) {
        let mut state = self.state.write();
        if let Some(stamp) = state.stamp {
            let previous = std::mem::replace(&mut state.current, value);
            state.history.push(Revision {
                value: previous,
                author: stamp.author,
                changed_at: stamp.at,
            });
        } else {
            state.current = value;
        }
        state.stamp = Some(Stamp {
            author,
            at: Utc::now(),
        });
    }

    pub fn history(&self) -> Vec<Revision> {
        self.state.read().history.clone()
    }

    pub fn history_len(&self) -> usize {
        self.state.read().history.len()
    }

    pub fn set_help(&self, lang: impl Into<String>, text: impl Into<String>) {
        self.state.write().help.insert(lang.into(), text.into());
        if let Some(trigger) = self.trigger.get() {
            trigger.arm();
        }
    }

    /// Help text for `lang`, falling back to `default_lang`, then to "".
    pub fn help(&self, lang: &str, default_lang: &str) -> String {
        let state = self.state.read();
        if !lang.is_empty() {
            if let Some(text) = state.help.get(lang) {
                return text.clone();
            }
        }
        state.help.get(default_lang).cloned().unwrap_or_default()
    }

    pub fn render(&self) -> String {
        self.state.read().current.render()
    }

    pub(crate) fn write_rendered(&self, out: &mut String) {
        self.state.read().current.write_rendered(out);
    }

    /// Attach the trigger armed by later `set` calls. Only the first binding
    /// takes effect.
    pub(crate) fn bind(&self, trigger: &PersistenceTrigger) {
        let _ = self.trigger.set(trigger.clone());
    }

    pub fn snapshot(&self) -> SettingSnapshot {
        let state = self.state.read();
        SettingSnapshot {
            kind: self.kind,
            current: state.current.clone(),
            stamp: state.stamp,
            history: state.history.clone(),
            help: state
                .help
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: SettingSnapshot) -> Result<Self, PersistError> {
        let consistent = snapshot.current.kind() == snapshot.kind
            && snapshot
                .history
                .iter()
                .all(|rev| rev.value.kind() == snapshot.kind);
        if !consistent {
            return Err(PersistError::Corrupt(format!(
                "setting of kind {} holds values of another kind",
                snapshot.kind
            )));
        }
        Ok(Self {
            kind: snapshot.kind,
            state: RwLock::new(SettingState {
                current: snapshot.current,
                stamp: snapshot.stamp,
                history: snapshot.history,
                help: snapshot.help.into_iter().collect(),
            }),
            trigger: OnceLock::new(),
        })
    }
}

/// Serializable copy of a setting's full state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingSnapshot {
    pub kind: Kind,
    pub current: Value,
    pub stamp: Option<Stamp>,
    pub history: Vec<Revision>,
    pub help: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::List;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_first_set_archives_nothing() {
        let setting = Setting::new(Kind::Bool);
        assert!(!setting.is_set());
        assert_eq!(setting.get(), Value::Bool(false));

        setting.set(Value::Bool(true), UserId(0)).unwrap();
        assert_eq!(setting.get(), Value::Bool(true));
        assert_eq!(setting.history_len(), 0);
        assert_eq!(setting.stamp().map(|s| s.author), Some(UserId(0)));
        assert_eq!(setting.render(), "true");
    }

    #[test]
    fn test_history_records_displaced_values() {
        let setting = Setting::new(Kind::Int32);
        setting.set(Value::Int32(1), UserId(10)).unwrap();
        setting.set(Value::Int32(2), UserId(11)).unwrap();
        setting.set(Value::Int32(3), UserId(12)).unwrap();

        let history = setting.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, Value::Int32(1));
        assert_eq!(history[0].author, UserId(10));
        assert_eq!(history[1].value, Value::Int32(2));
        assert_eq!(history[1].author, UserId(11));
        assert!(history[0].changed_at <= history[1].changed_at);
        assert_eq!(setting.get(), Value::Int32(3));
    }

    #[test]
    fn test_kind_mismatch_changes_nothing() {
        let setting = Setting::with_value(Value::from("foo"), UserId(0));
        let err = setting.set(Value::Int64(1), UserId(0)).unwrap_err();
        assert_eq!(
            err,
            ValueError::KindMismatch {
                expected: Kind::String,
                actual: Kind::Int64
            }
        );
        assert_eq!(setting.get(), Value::from("foo"));
        assert_eq!(setting.history_len(), 0);
    }

    #[test]
    fn test_help_fallback() {
        let setting = Setting::new(Kind::String);
        assert_eq!(setting.help("en", "en"), "");

        setting.set_help("en", "The name");
        setting.set_help("es", "El nombre");
        assert_eq!(setting.help("es", "en"), "El nombre");
        assert_eq!(setting.help("fr", "en"), "The name");
        assert_eq!(setting.help("", "en"), "The name");
        assert_eq!(setting.help("fr", "de"), "");
        assert!(!setting.is_set());
    }

    #[test]
    fn test_concurrent_sets_keep_history_intact() {
        const WRITERS: i64 = 32;
        let setting = Arc::new(Setting::new(Kind::Int64));

        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let setting = setting.clone();
                std::thread::spawn(move || setting.set(Value::Int64(i), UserId(i)).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = setting.history();
        assert_eq!(history.len(), (WRITERS - 1) as usize);

        let mut seen: HashSet<i64> = history
            .iter()
            .map(|rev| match (&rev.value, rev.author) {
                (Value::Int64(n), UserId(author)) => {
                    assert_eq!(*n, author);
                    *n
                }
                other => panic!("unexpected revision {:?}", other),
            })
            .collect();
        assert_eq!(seen.len(), history.len());

        let Value::Int64(current) = setting.get() else {
            panic!("current value changed kind");
        };
        assert!(seen.insert(current));
        assert_eq!(seen, (0..WRITERS).collect());
    }

    #[test]
    fn test_snapshot_restores_state() {
        let setting = Setting::new(Kind::StringList);
        setting
            .set(Value::List(List::String(vec!["a".into()])), UserId(1))
            .unwrap();
        setting
            .set(Value::List(List::String(vec!["b".into()])), UserId(2))
            .unwrap();
        setting.set_help("en", "Tags");

        let restored = Setting::from_snapshot(setting.snapshot()).unwrap();
        assert_eq!(restored.get(), setting.get());
        assert_eq!(restored.history(), setting.history());
        assert_eq!(restored.stamp(), setting.stamp());
        assert_eq!(restored.help("en", "en"), "Tags");
    }

    #[test]
    fn test_inconsistent_snapshot_rejected() {
        let mut snapshot = Setting::with_value(Value::Int32(1), UserId(0)).snapshot();
        snapshot.kind = Kind::Bool;
        assert!(matches!(
            Setting::from_snapshot(snapshot),
            Err(PersistError::Corrupt(_))
        ));
    }
}
