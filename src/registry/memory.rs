// src/registry/memory.rs

//! In-process registry.
//!
//! Behaves like a single client session of a coordination service: ephemeral
//! keys are dropped on [`InMemoryRegistry::disconnect`], and every call fails
//! with `Unavailable` while the session is suspended or disconnected.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::errors::RegistryError;
use crate::registry::{ConnectionListener, ConnectionState, Registry};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ephemeral: bool,
}

#[derive(Default)]
pub struct InMemoryRegistry {
    entries: Mutex<BTreeMap<String, Entry>>,
    unavailable: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn ConnectionListener>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a suspended (`false`) or restored (`true`) connection.
    pub fn set_available(&self, available: bool) {
        let was_unavailable = self.unavailable.swap(!available, Ordering::SeqCst);
        match (was_unavailable, available) {
            (false, false) => self.notify(ConnectionState::Suspended),
            (true, true) => self.notify(ConnectionState::Reconnected),
            _ => {}
        }
    }

    /// Lose the session: ephemeral keys are removed and calls fail until
    /// [`InMemoryRegistry::reconnect`].
    pub fn disconnect(&self) {
        let removed = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|_, e| !e.ephemeral);
            before - entries.len()
        };
        self.unavailable.store(true, Ordering::SeqCst);
        info!(removed, "registry session lost; ephemeral keys dropped");
        self.notify(ConnectionState::Disconnected);
    }

    pub fn reconnect(&self) {
        self.unavailable.store(false, Ordering::SeqCst);
        self.notify(ConnectionState::Reconnected);
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RegistryError::Unavailable("in-memory registry offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn notify(&self, state: ConnectionState) {
        let listeners: Vec<Arc<dyn ConnectionListener>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        debug!(?state, listeners = listeners.len(), "registry connection state change");
        for listener in listeners {
            listener.on_state_change(state);
        }
    }
}

impl Registry for InMemoryRegistry {
    fn put(&self, key: &str, value: &str, ephemeral: bool) -> Result<(), RegistryError> {
        self.check()?;
        self.entries().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                ephemeral,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        self.check()?;
        Ok(self.entries().get(key).map(|e| e.value.clone()))
    }

    fn exists(&self, key: &str) -> Result<bool, RegistryError> {
        self.check()?;
        Ok(self.entries().contains_key(key))
    }

    fn children(&self, key: &str) -> Result<Vec<String>, RegistryError> {
        self.check()?;
        let prefix = format!("{}/", key.trim_end_matches('/'));
        let mut names: Vec<String> = self
            .entries()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn delete(&self, key: &str) -> Result<(), RegistryError> {
        self.check()?;
        self.entries().remove(key);
        Ok(())
    }

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ConnectionState>>);

    impl ConnectionListener for Recorder {
        fn on_state_change(&self, state: ConnectionState) {
            self.0.lock().unwrap().push(state);
        }
    }

    #[test]
    fn children_lists_direct_descendants_only() {
        let reg = InMemoryRegistry::new();
        reg.put("/nodes/worker/default/a:1", "x", true).unwrap();
        reg.put("/nodes/worker/default/b:1", "x", true).unwrap();
        reg.put("/nodes/worker/gpu/c:1", "x", true).unwrap();

        assert_eq!(reg.children("/nodes/worker").unwrap(), vec!["default", "gpu"]);
        assert_eq!(
            reg.children("/nodes/worker/default").unwrap(),
            vec!["a:1", "b:1"]
        );
        assert!(reg.children("/nodes/master").unwrap().is_empty());
    }

    #[test]
    fn disconnect_drops_ephemeral_keys_and_notifies() {
        let reg = InMemoryRegistry::new();
        let recorder = Arc::new(Recorder::default());
        reg.add_connection_listener(recorder.clone());

        reg.put("/persistent", "1", false).unwrap();
        reg.put("/ephemeral", "1", true).unwrap();

        reg.disconnect();
        assert!(reg.exists("/persistent").is_err());

        reg.reconnect();
        assert!(reg.exists("/persistent").unwrap());
        assert!(!reg.exists("/ephemeral").unwrap());

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![ConnectionState::Disconnected, ConnectionState::Reconnected]
        );
    }
}
