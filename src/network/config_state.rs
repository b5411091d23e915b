//! Process-wide hashing switches
//!
//! The runtime record lives in an external store. It is read once at
//! startup (a default is written back when nothing is stored) and
//! re-read whenever the store reports a new version.

use log::{debug, info, warn};

use crate::config::{ConfigError, HashingConfig, HashingMode, StoredConfig};

/// Raw record as held by a store, with its version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub bytes: Vec<u8>,
    pub version: u32,
}

/// Persisted configuration storage
pub trait ConfigStore {
    /// Current record, `None` when nothing has been stored yet
    fn retrieve(&self) -> Result<Option<StoreEntry>, ConfigError>;

    fn save(&mut self, record: &StoredConfig) -> Result<(), ConfigError>;
}

/// In-process store, bumping the version on every write
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entry: Option<StoreEntry>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored bytes as an external writer would
    pub fn set_raw(&mut self, bytes: &[u8]) {
        let version = self.entry.as_ref().map_or(1, |e| e.version.wrapping_add(1));
        self.entry = Some(StoreEntry {
            bytes: bytes.to_vec(),
            version,
        });
    }
}

impl ConfigStore for MemoryConfigStore {
    fn retrieve(&self) -> Result<Option<StoreEntry>, ConfigError> {
        Ok(self.entry.clone())
    }

    fn save(&mut self, record: &StoredConfig) -> Result<(), ConfigError> {
        let bytes = record.to_bytes()?;
        self.set_raw(&bytes);
        Ok(())
    }
}

/// Enablement flag and mode currently in force
#[derive(Debug, Clone)]
pub struct ConfigState {
    current: HashingConfig,
    /// Store version `current` was read from
    version: Option<u32>,
}

impl ConfigState {
    /// State that never came from a store
    pub fn new(current: HashingConfig) -> Self {
        Self {
            current,
            version: None,
        }
    }

    /// Read the persisted record, persisting the default when absent
    ///
    /// An unreadable record is not overwritten: the default is used in
    /// memory until a valid record shows up.
    pub fn load<S: ConfigStore>(store: &mut S) -> Result<Self, ConfigError> {
        let Some(entry) = store.retrieve()? else {
            let default = StoredConfig::default();
            store.save(&default)?;
            info!(
                "No stored configuration, persisted default (enabled={}, mode={})",
                default.config.enabled, default.config.mode
            );
            let version = store.retrieve()?.map(|e| e.version);
            return Ok(Self {
                current: default.config,
                version,
            });
        };

        let current = match StoredConfig::from_bytes(&entry.bytes) {
            Ok(stored) => stored.config,
            Err(e) => {
                warn!("Stored configuration unusable, using defaults: {}", e);
                HashingConfig::default()
            }
        };
        debug!("hashing ? {} (mode={})", current.enabled, current.mode);

        Ok(Self {
            current,
            version: Some(entry.version),
        })
    }

    /// Apply a store change, if any
    ///
    /// Returns the new configuration when the store holds a version not
    /// seen before. A record that fails to parse is skipped (its version
    /// is remembered so it is reported once) and the current
    /// configuration stays in force.
    pub fn refresh<S: ConfigStore>(
        &mut self,
        store: &S,
    ) -> Result<Option<HashingConfig>, ConfigError> {
        let Some(entry) = store.retrieve()? else {
            return Ok(None);
        };
        if self.version == Some(entry.version) {
            return Ok(None);
        }
        self.version = Some(entry.version);

        let stored = StoredConfig::from_bytes(&entry.bytes)?;
        self.on_change(stored.config);
        Ok(Some(stored.config))
    }

    /// Replace flag and mode together
    pub fn on_change(&mut self, new: HashingConfig) {
        self.current = new;
        debug!("hashing ? {} (mode={})", new.enabled, new.mode);
    }

    pub fn enabled(&self) -> bool {
        self.current.enabled
    }

    pub fn mode(&self) -> HashingMode {
        self.current.mode
    }

    pub fn current(&self) -> HashingConfig {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_persists_default() {
        let mut store = MemoryConfigStore::new();
        let state = ConfigState::load(&mut store).unwrap();

        assert!(!state.enabled());
        assert_eq!(state.mode(), HashingMode::Most);

        let entry = store.retrieve().unwrap().expect("default written back");
        assert_eq!(
            StoredConfig::from_bytes(&entry.bytes).unwrap(),
            StoredConfig::default()
        );
    }

    #[test]
    fn test_load_existing() {
        let mut store = MemoryConfigStore::new();
        store.set_raw(br#"{"config": {"enabled": true, "mode": "all"}}"#);

        let state = ConfigState::load(&mut store).unwrap();
        assert!(state.enabled());
        assert_eq!(state.mode(), HashingMode::All);
    }

    #[test]
    fn test_load_invalid_is_not_overwritten() {
        let mut store = MemoryConfigStore::new();
        store.set_raw(b"garbage");

        let state = ConfigState::load(&mut store).unwrap();
        assert_eq!(state.current(), HashingConfig::default());
        assert_eq!(store.retrieve().unwrap().unwrap().bytes, b"garbage");
    }

    #[test]
    fn test_refresh_only_on_new_version() {
        let mut store = MemoryConfigStore::new();
        let mut state = ConfigState::load(&mut store).unwrap();

        assert_eq!(state.refresh(&store).unwrap(), None);

        store.set_raw(br#"{"config": {"enabled": true, "mode": "strict"}}"#);
        let changed = state.refresh(&store).unwrap().expect("new version");
        assert!(changed.enabled);
        assert_eq!(state.mode(), HashingMode::Strict);

        assert_eq!(state.refresh(&store).unwrap(), None);
    }

    #[test]
    fn test_refresh_invalid_keeps_current() {
        let mut store = MemoryConfigStore::new();
        store.set_raw(br#"{"config": {"enabled": true, "mode": "most"}}"#);
        let mut state = ConfigState::load(&mut store).unwrap();

        store.set_raw(br#"{"config": {"enabled": false}}"#);
        assert!(state.refresh(&store).is_err());
        assert!(state.enabled());

        // Reported once
        assert_eq!(state.refresh(&store).unwrap(), None);
    }
}
