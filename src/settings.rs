//! Process-wide bot settings.
//!
//! The settings document is loaded once at startup and kept in memory; every
//! update is written to the store first and only then becomes visible.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::Param, store::Store};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub admin_broadcast_enabled: bool,
    pub channel_broadcast_enabled: bool,
    pub broadcast_chats: Vec<i64>,
    pub admin_password: String,
}

/// The settings document as found in the store. Keys may be missing in
/// documents written by older versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSettings {
    pub admin_broadcast_enabled: Option<bool>,
    pub channel_broadcast_enabled: Option<bool>,
    pub broadcast_chats: Option<Vec<i64>>,
    pub admin_password: Option<String>,
}

impl From<Settings> for StoredSettings {
    fn from(s: Settings) -> Self {
        Self {
            admin_broadcast_enabled: Some(s.admin_broadcast_enabled),
            channel_broadcast_enabled: Some(s.channel_broadcast_enabled),
            broadcast_chats: Some(s.broadcast_chats),
            admin_password: Some(s.admin_password),
        }
    }
}

impl StoredSettings {
    /// Fill missing keys from `defaults`, returning the names of the keys
    /// that were missing.
    pub fn merge(self, defaults: &Settings) -> (Settings, Vec<&'static str>) {
        let mut missing = Vec::new();
        macro_rules! take_or_default {
            ($field: ident) => {
                match self.$field {
                    Some(v) => v,
                    None => {
                        missing.push(stringify!($field));
                        defaults.$field.clone()
                    }
                }
            };
        }

        let settings = Settings {
            admin_broadcast_enabled: take_or_default!(admin_broadcast_enabled),
            channel_broadcast_enabled: take_or_default!(channel_broadcast_enabled),
            broadcast_chats: take_or_default!(broadcast_chats),
            admin_password: take_or_default!(admin_password),
        };
        (settings, missing)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("wrong admin password")]
pub struct AuthError;

pub struct SettingsService {
    current: RwLock<Settings>,
    store: Arc<dyn Store>,
}

impl SettingsService {
    /// Load the settings document, inserting `defaults` when there is none and
    /// back-filling keys the stored document lacks.
    pub async fn load<C: Param<Settings>>(store: Arc<dyn Store>, cfg: &C) -> anyhow::Result<Self> {
        let defaults: Settings = cfg.param();
        let settings = match store.find_settings().await? {
            None => {
                store.save_settings(&defaults).await?;
                tracing::info!("Inserted new global configuration");
                defaults
            }
            Some(stored) => {
                let (settings, missing) = stored.merge(&defaults);
                if !missing.is_empty() {
                    for key in missing.iter() {
                        tracing::warn!("Config missing key '{key}', filled with default");
                    }
                    store.save_settings(&settings).await?;
                    tracing::info!("Updated existing global configuration with missing keys");
                }
                settings
            }
        };
        Ok(Self {
            current: RwLock::new(settings),
            store,
        })
    }

    #[inline]
    pub fn snapshot(&self) -> Settings {
        self.current.read().clone()
    }

    /// Apply `f` to a copy of the settings, persist it, then publish it.
    pub async fn update<F>(&self, f: F) -> anyhow::Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut next = self.snapshot();
        f(&mut next);
        self.store.save_settings(&next).await?;
        *self.current.write() = next.clone();
        Ok(next)
    }

    pub async fn toggle_admin_broadcast(&self) -> anyhow::Result<bool> {
        let settings = self
            .update(|s| s.admin_broadcast_enabled = !s.admin_broadcast_enabled)
            .await?;
        Ok(settings.admin_broadcast_enabled)
    }

    pub async fn toggle_channel_broadcast(&self) -> anyhow::Result<bool> {
        let settings = self
            .update(|s| s.channel_broadcast_enabled = !s.channel_broadcast_enabled)
            .await?;
        Ok(settings.channel_broadcast_enabled)
    }

    pub async fn set_broadcast_chats(&self, chats: Vec<i64>) -> anyhow::Result<()> {
        self.update(|s| s.broadcast_chats = chats).await?;
        Ok(())
    }

    /// Plain comparison with the stored shared secret. An empty stored
    /// password never matches.
    pub fn authenticate(&self, password: &str) -> Result<(), AuthError> {
        let current = self.current.read();
        if current.admin_password.is_empty() || current.admin_password != password {
            return Err(AuthError);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::store::memory::MemoryStore;

    fn defaults() -> Settings {
        Settings {
            admin_broadcast_enabled: false,
            channel_broadcast_enabled: false,
            broadcast_chats: vec![-1002780909369],
            admin_password: "11223344".to_string(),
        }
    }

    #[tokio::test]
    async fn test_load_inserts_defaults() {
        let store = Arc::new(MemoryStore::default());
        let service = SettingsService::load(store.clone(), &defaults()).await.unwrap();
        assert_eq!(service.snapshot(), defaults());
        assert_eq!(*store.settings.lock(), Some(defaults().into()));
    }

    #[tokio::test]
    async fn test_load_backfills_missing_keys() {
        let store = Arc::new(MemoryStore::default());
        *store.settings.lock() = Some(StoredSettings {
            admin_broadcast_enabled: Some(true),
            broadcast_chats: Some(vec![1, 2]),
            ..Default::default()
        });

        let service = SettingsService::load(store.clone(), &defaults()).await.unwrap();
        let settings = service.snapshot();
        assert!(settings.admin_broadcast_enabled);
        assert!(!settings.channel_broadcast_enabled);
        assert_eq!(settings.broadcast_chats, vec![1, 2]);
        assert_eq!(settings.admin_password, "11223344");

        let stored = store.settings.lock().clone().unwrap();
        assert_eq!(stored.admin_password.as_deref(), Some("11223344"));
        assert_eq!(stored.channel_broadcast_enabled, Some(false));
    }

    #[tokio::test]
    async fn test_updates_write_through() {
        let store = Arc::new(MemoryStore::default());
        let service = SettingsService::load(store.clone(), &defaults()).await.unwrap();

        assert!(service.toggle_admin_broadcast().await.unwrap());
        assert!(service.toggle_channel_broadcast().await.unwrap());
        service.set_broadcast_chats(vec![-1, -2]).await.unwrap();

        let stored = store.settings.lock().clone().unwrap();
        assert_eq!(stored.admin_broadcast_enabled, Some(true));
        assert_eq!(stored.channel_broadcast_enabled, Some(true));
        assert_eq!(stored.broadcast_chats, Some(vec![-1, -2]));
        assert_eq!(service.snapshot().broadcast_chats, vec![-1, -2]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_memory_unchanged() {
        let store = Arc::new(MemoryStore::default());
        let service = SettingsService::load(store.clone(), &defaults()).await.unwrap();

        store.fail_writes.store(true, Ordering::Release);
        assert!(service.toggle_admin_broadcast().await.is_err());
        assert!(!service.snapshot().admin_broadcast_enabled);
    }

    #[tokio::test]
    async fn test_authenticate() {
        let store = Arc::new(MemoryStore::default());
        let service = SettingsService::load(store, &defaults()).await.unwrap();
        assert!(service.authenticate("11223344").is_ok());
        assert_eq!(service.authenticate("wrong"), Err(AuthError));

        let store = Arc::new(MemoryStore::default());
        let service = SettingsService::load(store, &Settings::default()).await.unwrap();
        assert_eq!(service.authenticate(""), Err(AuthError));
    }
}
