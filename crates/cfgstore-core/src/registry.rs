//! The per-process configuration store.
//!
//! Maps a user id to that user's programs, and each program path to its
//! [`ConfigMap`]. Locks are always taken outside-in: registry, then map, then
//! setting.

use crate::accounts::UserId;
use crate::error::{PersistError, RegistryError};
use crate::map::{ConfigMap, Entry};
use crate::setting::Setting;
use crate::snapshot::{MapRecord, RegistrySnapshot, SettingRecord, SnapshotStore};
use crate::trigger::PersistenceTrigger;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

type Programs = HashMap<String, Arc<ConfigMap>>;

/// Registry of every (user, program) configuration.
///
/// A pair is registered at most once; there is no removal.
pub struct ConfigRegistry {
    users: RwLock<HashMap<UserId, Programs>>,
    trigger: PersistenceTrigger,
    default_lang: String,
}

impl std::fmt::Debug for ConfigRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRegistry")
            .field("users", &self.users.read().len())
            .field("trigger", &self.trigger)
            .field("default_lang", &self.default_lang)
            .finish()
    }
}

impl ConfigRegistry {
    /// Create an empty registry.
    ///
    /// # Arguments
    /// * `trigger` - Armed by every mutation of a registered map
    /// * `default_lang` - Help language used when a request names none
    pub fn new(trigger: PersistenceTrigger, default_lang: impl Into<String>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            trigger,
            default_lang: default_lang.into(),
        }
    }

    pub fn trigger(&self) -> &PersistenceTrigger {
        &self.trigger
    }

    pub fn default_lang(&self) -> &str {
        &self.default_lang
    }

    /// Register `map` as the configuration of `program` for `user`.
    ///
    /// An existing registration is never replaced.
    pub fn add(
        &self,
        user: UserId,
        program: impl Into<String>,
        map: ConfigMap,
    ) -> Result<Arc<ConfigMap>, RegistryError> {
        let program = program.into();
        let map = {
            let mut users = self.users.write();
            let programs = users.entry(user).or_default();
            if programs.contains_key(&program) {
                warn!(%user, program = %program, "Rejected duplicate registration");
                return Err(RegistryError::AlreadyRegistered { user, program });
            }
            map.bind(&self.trigger);
            let map = Arc::new(map);
            programs.insert(program.clone(), map.clone());
            map
        };
        info!(%user, program = %program, keys = map.len(), "Configuration registered");
        self.trigger.arm();
        Ok(map)
    }

    /// Look up a registration. The returned map is shared, not a copy.
    pub fn get(&self, user: UserId, program: &str) -> Result<Arc<ConfigMap>, RegistryError> {
        self.users
            .read()
            .get(&user)
            .and_then(|programs| programs.get(program))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownConfig {
                user,
                program: program.to_string(),
            })
    }

    pub fn ping(&self) -> &'static str {
        "pong"
    }

    /// Request a delayed, coalesced flush.
    pub fn save(&self) {
        debug!("Save requested");
        self.trigger.arm();
    }

    /// Program paths registered for `user`, sorted.
    pub fn programs(&self, user: UserId) -> Vec<String> {
        let mut programs: Vec<String> = self
            .users
            .read()
            .get(&user)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        programs.sort();
        programs
    }

    /// Capture every map and setting under the registry read lock.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let users = self.users.read();
        let mut snapshot = RegistrySnapshot::default();
        let mut sorted: Vec<(&UserId, &Programs)> = users.iter().collect();
        sorted.sort_by_key(|(user, _)| **user);
        for (user, programs) in sorted {
            let programs: BTreeMap<&String, &Arc<ConfigMap>> = programs.iter().collect();
            for (program, map) in programs {
                collect(&mut snapshot, *user, program, &mut Vec::new(), map);
            }
        }
        snapshot
    }

    /// Rebuild the registry from a snapshot, replacing its contents.
    ///
    /// Restoring does not arm the trigger.
    pub fn restore(&self, snapshot: RegistrySnapshot) -> Result<(), PersistError> {
        type MapKey = (UserId, String, Vec<String>);

        let mut maps: Vec<MapRecord> = snapshot.maps;
        maps.sort_by_key(|record| record.path.len());

        let mut built: HashMap<MapKey, Arc<ConfigMap>> = HashMap::new();
        let mut restored: HashMap<UserId, Programs> = HashMap::new();
        for record in maps {
            let map = Arc::new(ConfigMap::new(record.name, record.is_main));
            map.set_version(record.version);
            match record.path.split_last() {
                None => {
                    let programs = restored.entry(record.user).or_default();
                    if programs.insert(record.program.clone(), map.clone()).is_some() {
                        return Err(PersistError::Corrupt(format!(
                            "{} registered twice for {}",
                            record.program, record.user
                        )));
                    }
                }
                Some((key, parent)) => {
                    let parent_key = (record.user, record.program.clone(), parent.to_vec());
                    let parent = built.get(&parent_key).ok_or_else(|| {
                        PersistError::Corrupt(format!(
                            "section {} of {} has no parent",
                            record.path.join("."),
                            record.program
                        ))
                    })?;
                    parent.set(key.clone(), Entry::Section(map.clone()));
                }
            }
            built.insert((record.user, record.program, record.path), map);
        }

        let mut count = 0usize;
        for record in snapshot.settings {
            let Some((key, parent)) = record.path.split_last() else {
                return Err(PersistError::Corrupt(format!(
                    "setting of {} has an empty key",
                    record.program
                )));
            };
            let parent_key = (record.user, record.program.clone(), parent.to_vec());
            let parent = built.get(&parent_key).ok_or_else(|| {
                PersistError::Corrupt(format!(
                    "setting {} of {} has no map",
                    record.path.join("."),
                    record.program
                ))
            })?;
            parent.set(key.clone(), Setting::from_snapshot(record.state)?);
            count += 1;
        }

        for programs in restored.values() {
            for map in programs.values() {
                map.bind(&self.trigger);
            }
        }
        let programs: usize = restored.values().map(HashMap::len).sum();
        *self.users.write() = restored;
        info!(programs, settings = count, "Registry restored from snapshot");
        Ok(())
    }

    /// Make the trigger write snapshots of this registry to `store`.
    ///
    /// The flush action holds a weak reference, so dropping the registry
    /// turns later flushes into no-ops.
    pub fn enable_persistence(self: &Arc<Self>, store: SnapshotStore) {
        let registry = Arc::downgrade(self);
        let store = Arc::new(store);
        self.trigger.set_flush(move || {
            let registry = registry.clone();
            let store = store.clone();
            async move {
                let Some(registry) = registry.upgrade() else {
                    return Ok(());
                };
                let snapshot = registry.snapshot();
                store.save(&snapshot).await
            }
        });
    }
}

fn collect(
    snapshot: &mut RegistrySnapshot,
    user: UserId,
    program: &str,
    path: &mut Vec<String>,
    map: &ConfigMap,
) {
    snapshot.maps.push(MapRecord {
        user,
        program: program.to_string(),
        path: path.clone(),
        name: map.name().to_string(),
        is_main: map.is_main(),
        version: map.version(),
    });
    let mut entries = map.entries();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, entry) in entries {
        path.push(key);
        match entry {
            Entry::Setting(setting) => snapshot.settings.push(SettingRecord {
                user,
                program: program.to_string(),
                path: path.clone(),
                state: setting.snapshot(),
            }),
            Entry::Section(section) => collect(snapshot, user, program, path, &section),
        }
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerState;
    use crate::value::{Kind, Value};
    use std::time::Duration;

    const DELAY: Duration = Duration::from_secs(30);

    fn registry() -> ConfigRegistry {
        ConfigRegistry::new(PersistenceTrigger::new(DELAY), "en")
    }

    fn program_map(value: &str) -> ConfigMap {
        let map = ConfigMap::new("editor", true);
        map.set("theme", Setting::with_value(Value::from(value), UserId(0)));
        map
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_add_keeps_first_map() {
        let registry = registry();
        registry.add(UserId(1000), "/usr/bin/editor", program_map("dark")).unwrap();

        let err = registry
            .add(UserId(1000), "/usr/bin/editor", program_map("light"))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyRegistered {
                user: UserId(1000),
                program: "/usr/bin/editor".into()
            }
        );

        let stored = registry.get(UserId(1000), "/usr/bin/editor").unwrap();
        assert_eq!(stored.setting("theme").unwrap().get(), Value::from("dark"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_program_keeps_first() {
        let registry = registry();
        registry.add(UserId(7), "/bin/a", program_map("a")).unwrap();
        registry.add(UserId(7), "/bin/b", program_map("b")).unwrap();

        assert!(registry.get(UserId(7), "/bin/a").is_ok());
        assert!(registry.get(UserId(7), "/bin/b").is_ok());
        assert_eq!(registry.programs(UserId(7)), vec!["/bin/a", "/bin/b"]);
        assert!(registry.programs(UserId(8)).is_empty());
    }

    #[test]
    fn test_unknown_lookup_fails() {
        let registry = registry();
        let err = registry.get(UserId::ALL_USERS, "/bin/none").unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnknownConfig {
                user: UserId::ALL_USERS,
                program: "/bin/none".into()
            }
        );
        assert_eq!(registry.ping(), "pong");
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_and_set_arm_trigger() {
        let registry = registry();
        assert_eq!(registry.trigger().state(), TriggerState::Idle);

        let map = registry.add(UserId(1), "/bin/x", program_map("a")).unwrap();
        assert_eq!(registry.trigger().state(), TriggerState::Armed);

        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(registry.trigger().state(), TriggerState::Idle);

        map.setting("theme")
            .unwrap()
            .set(Value::from("b"), UserId(1))
            .unwrap();
        assert_eq!(registry.trigger().state(), TriggerState::Armed);
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(registry.trigger().flush_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_save_flushes_once() {
        let registry = registry();
        for _ in 0..10 {
            registry.save();
        }
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(registry.trigger().flush_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_restore_preserves_tree() {
        let source = registry();
        let map = program_map("dark");
        map.set_version("3.1");
        let section = ConfigMap::section("keys");
        section.set("save", Setting::with_value(Value::from("C-s"), UserId(2)));
        map.set("bindings", section);
        let added = source.add(UserId(2), "/usr/bin/editor", map).unwrap();
        added
            .setting("theme")
            .unwrap()
            .set(Value::from("light"), UserId(3))
            .unwrap();
        added.setting("theme").unwrap().set_help("en", "Colour theme");

        let target = registry();
        target.restore(source.snapshot()).unwrap();
        assert_eq!(target.trigger().state(), TriggerState::Idle);

        let restored = target.get(UserId(2), "/usr/bin/editor").unwrap();
        assert_eq!(restored.version(), "3.1");
        assert_eq!(restored.to_json(), added.to_json());
        let theme = restored.setting("theme").unwrap();
        assert_eq!(theme.kind(), Kind::String);
        assert_eq!(theme.history().len(), 1);
        assert_eq!(theme.author(), Some(UserId(3)));
        assert_eq!(theme.help("", target.default_lang()), "Colour theme");

        let bindings = restored.subsection("bindings").unwrap();
        assert_eq!(bindings.name(), "keys");

        // Restored maps are bound to the new registry's trigger.
        bindings
            .setting("save")
            .unwrap()
            .set(Value::from("C-x C-s"), UserId(2))
            .unwrap();
        assert_eq!(target.trigger().state(), TriggerState::Armed);
    }

    #[test]
    fn test_restore_rejects_orphan_setting() {
        let registry = registry();
        let snapshot = RegistrySnapshot {
            maps: vec![],
            settings: vec![SettingRecord {
                user: UserId(0),
                program: "/bin/x".into(),
                path: vec!["k".into()],
                state: Setting::with_value(Value::Bool(true), UserId(0)).snapshot(),
            }],
        };
        assert!(matches!(
            registry.restore(snapshot),
            Err(PersistError::Corrupt(_))
        ));
    }

    #[test]
    fn test_concurrent_adds_register_each_pair_once() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry
                        .add(UserId(i % 4), "/bin/shared", ConfigMap::new("shared", true))
                        .is_ok()
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 4);
    }
}
