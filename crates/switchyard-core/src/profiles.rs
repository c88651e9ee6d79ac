//! Named agent subsets that constrain routing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use switchyard_storage::{keys, KvStore};
use tracing::warn;

/// Profiles registered by the host, with the active profile id persisted
/// under `profiles.active`.
pub struct ProfileRegistry {
    sets: RwLock<HashMap<String, Vec<String>>>,
    active: RwLock<Option<String>>,
    kv: Option<Arc<dyn KvStore>>,
}

impl ProfileRegistry {
    pub fn new(kv: Option<Arc<dyn KvStore>>) -> Self {
        let registry = Self {
            sets: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
            kv,
        };
        registry.load();
        registry
    }

    pub fn define(&self, name: impl Into<String>, agent_ids: Vec<String>) {
        self.sets.write().insert(name.into(), agent_ids);
    }

    pub fn remove(&self, name: &str) -> bool {
        let removed = self.sets.write().remove(name).is_some();
        if removed && self.active.read().as_deref() == Some(name) {
            self.deactivate();
        }
        removed
    }

    pub fn activate(&self, name: &str) -> bool {
        if !self.sets.read().contains_key(name) {
            return false;
        }
        *self.active.write() = Some(name.to_string());
        self.persist_active();
        true
    }

    pub fn deactivate(&self) {
        *self.active.write() = None;
        if let Some(kv) = &self.kv {
            if let Err(error) = kv.remove(keys::ACTIVE_PROFILE) {
                warn!(error = %error, "failed to clear active profile");
            }
        }
    }

    pub fn active_id(&self) -> Option<String> {
        self.active.read().clone()
    }

    /// Agent ids of the active profile, if one is active and defined.
    pub fn active_agents(&self) -> Option<Vec<String>> {
        let active = self.active.read().clone()?;
        self.sets.read().get(&active).cloned()
    }

    fn load(&self) {
        let Some(kv) = &self.kv else { return };
        match kv.get(keys::ACTIVE_PROFILE) {
            Ok(Some(active)) => *self.active.write() = Some(active),
            Ok(None) => {}
            Err(error) => warn!(error = %error, "failed to read active profile"),
        }
    }

    fn persist_active(&self) {
        let Some(kv) = &self.kv else { return };
        if let Some(active) = self.active.read().as_deref() {
            if let Err(error) = kv.set(keys::ACTIVE_PROFILE, active) {
                warn!(error = %error, "failed to persist active profile");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_storage::MemoryKvStore;

    #[test]
    fn test_activate_requires_known_profile() {
        let profiles = ProfileRegistry::new(None);
        assert!(!profiles.activate("backend"));

        profiles.define("backend", vec!["code".to_string(), "tests".to_string()]);
        assert!(profiles.activate("backend"));
        assert_eq!(profiles.active_id().as_deref(), Some("backend"));
        assert_eq!(
            profiles.active_agents(),
            Some(vec!["code".to_string(), "tests".to_string()])
        );
    }

    #[test]
    fn test_removing_active_profile_deactivates() {
        let profiles = ProfileRegistry::new(None);
        profiles.define("backend", vec!["code".to_string()]);
        profiles.activate("backend");

        assert!(profiles.remove("backend"));
        assert!(profiles.active_id().is_none());
        assert!(profiles.active_agents().is_none());
    }

    #[test]
    fn test_active_id_survives_restart() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        {
            let profiles = ProfileRegistry::new(Some(kv.clone()));
            profiles.define("backend", vec!["code".to_string()]);
            profiles.activate("backend");
        }

        let revived = ProfileRegistry::new(Some(kv));
        assert_eq!(revived.active_id().as_deref(), Some("backend"));
        // Sets are re-registered by the host; until then there is no
        // agent list.
        assert!(revived.active_agents().is_none());
    }
}
