//! Persistent documents: the settings singleton, admins and broadcast dedupe
//! records.

use async_trait::async_trait;
use mongodb::{
    bson::{doc, to_document, DateTime, Document},
    options::{IndexOptions, ReturnDocument},
    Client, Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::{MongoConfig, Param},
    constants::{ADMINS_COLLECTION, BROADCASTED_COLLECTION, CONFIG_COLLECTION, SETTINGS_DOC_ID},
    settings::{Settings, StoredSettings},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminRecord {
    pub user_id: i64,
    pub username: Option<String>,
    pub full_name: String,
    pub added_at: DateTime,
}

/// Marks a file as already broadcast, together with the chats it reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub name: String,
    #[serde(default)]
    pub chats: Vec<i64>,
    pub updated_at: DateTime,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Raw settings document, with whatever keys it currently has.
    async fn find_settings(&self) -> anyhow::Result<Option<StoredSettings>>;
    async fn save_settings(&self, settings: &Settings) -> anyhow::Result<()>;

    async fn is_admin(&self, user_id: i64) -> anyhow::Result<bool>;
    async fn add_admin(&self, admin: AdminRecord) -> anyhow::Result<()>;

    /// Atomically create the record of `name`. Returns `false` when it
    /// already existed, i.e. the file was (or is being) broadcast.
    async fn claim_broadcast(&self, name: &str) -> anyhow::Result<bool>;
    /// Drop a claim that reached no chat, so the file can be broadcast later.
    async fn release_broadcast(&self, name: &str) -> anyhow::Result<()>;
    /// Set-add `chat_id` to the record of `name`, creating it when absent.
    async fn record_broadcast(&self, name: &str, chat_id: i64) -> anyhow::Result<()>;
}

pub struct MongoStore {
    config: Collection<StoredSettings>,
    admins: Collection<AdminRecord>,
    broadcasted: Collection<BroadcastRecord>,
}

impl MongoStore {
    pub async fn connect<C: Param<MongoConfig>>(cfg: &C) -> anyhow::Result<Self> {
        let mongo_config = cfg.param();
        let client = Client::with_uri_str(&mongo_config.uri).await?;
        let db = client.database(&mongo_config.database);
        // fail fast on a wrong uri instead of at the first message
        db.run_command(doc! { "ping": 1 }).await?;
        let store = Self::with_database(&db);
        // concurrent claim upserts rely on it
        store
            .broadcasted
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "name": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        Ok(store)
    }

    pub fn with_database(db: &Database) -> Self {
        Self {
            config: db.collection(CONFIG_COLLECTION),
            admins: db.collection(ADMINS_COLLECTION),
            broadcasted: db.collection(BROADCASTED_COLLECTION),
        }
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn find_settings(&self) -> anyhow::Result<Option<StoredSettings>> {
        Ok(self.config.find_one(doc! { "_id": SETTINGS_DOC_ID }).await?)
    }

    async fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        self.config
            .update_one(
                doc! { "_id": SETTINGS_DOC_ID },
                doc! { "$set": to_document(settings)? },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    // counted, not decoded: older admin documents have other field types
    async fn is_admin(&self, user_id: i64) -> anyhow::Result<bool> {
        let count = self
            .admins
            .count_documents(doc! { "user_id": user_id })
            .limit(1)
            .await?;
        Ok(count > 0)
    }

    async fn add_admin(&self, admin: AdminRecord) -> anyhow::Result<()> {
        self.admins
            .update_one(
                doc! { "user_id": admin.user_id },
                doc! { "$set": to_document(&admin)? },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn claim_broadcast(&self, name: &str) -> anyhow::Result<bool> {
        let previous = self
            .broadcasted
            .clone_with_type::<Document>()
            .find_one_and_update(
                doc! { "name": name },
                doc! {
                    "$setOnInsert": { "chats": [], "updated_at": DateTime::now() },
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .await?;
        Ok(previous.is_none())
    }

    async fn release_broadcast(&self, name: &str) -> anyhow::Result<()> {
        self.broadcasted
            .delete_one(doc! { "name": name, "chats": { "$size": 0 } })
            .await?;
        Ok(())
    }

    async fn record_broadcast(&self, name: &str, chat_id: i64) -> anyhow::Result<()> {
        self.broadcasted
            .update_one(
                doc! { "name": name },
                doc! {
                    "$addToSet": { "chats": chat_id },
                    "$set": { "updated_at": DateTime::now() },
                },
            )
            .upsert(true)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod memory {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicBool, Ordering},
    };

    use parking_lot::Mutex;

    use super::*;

    /// In-process store used by tests.
    #[derive(Default)]
    pub struct MemoryStore {
        pub settings: Mutex<Option<StoredSettings>>,
        pub admins: Mutex<HashMap<i64, AdminRecord>>,
        pub broadcasted: Mutex<HashMap<String, BroadcastRecord>>,
        pub fail_writes: AtomicBool,
    }

    impl MemoryStore {
        pub fn with_admin(self, user_id: i64) -> Self {
            self.admins.lock().insert(
                user_id,
                AdminRecord {
                    user_id,
                    username: None,
                    full_name: "admin".to_string(),
                    added_at: DateTime::now(),
                },
            );
            self
        }

        fn check_writable(&self) -> anyhow::Result<()> {
            if self.fail_writes.load(Ordering::Acquire) {
                anyhow::bail!("store is read-only");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Store for MemoryStore {
        async fn find_settings(&self) -> anyhow::Result<Option<StoredSettings>> {
            Ok(self.settings.lock().clone())
        }

        async fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
            self.check_writable()?;
            *self.settings.lock() = Some(settings.clone().into());
            Ok(())
        }

        async fn is_admin(&self, user_id: i64) -> anyhow::Result<bool> {
            Ok(self.admins.lock().contains_key(&user_id))
        }

        async fn add_admin(&self, admin: AdminRecord) -> anyhow::Result<()> {
            self.check_writable()?;
            self.admins.lock().insert(admin.user_id, admin);
            Ok(())
        }

        async fn claim_broadcast(&self, name: &str) -> anyhow::Result<bool> {
            self.check_writable()?;
            let mut broadcasted = self.broadcasted.lock();
            if broadcasted.contains_key(name) {
                return Ok(false);
            }
            broadcasted.insert(
                name.to_string(),
                BroadcastRecord {
                    name: name.to_string(),
                    chats: Vec::new(),
                    updated_at: DateTime::now(),
                },
            );
            Ok(true)
        }

        async fn release_broadcast(&self, name: &str) -> anyhow::Result<()> {
            self.check_writable()?;
            let mut broadcasted = self.broadcasted.lock();
            if broadcasted.get(name).is_some_and(|r| r.chats.is_empty()) {
                broadcasted.remove(name);
            }
            Ok(())
        }

        async fn record_broadcast(&self, name: &str, chat_id: i64) -> anyhow::Result<()> {
            self.check_writable()?;
            let mut broadcasted = self.broadcasted.lock();
            let record = broadcasted
                .entry(name.to_string())
                .or_insert_with(|| BroadcastRecord {
                    name: name.to_string(),
                    chats: Vec::new(),
                    updated_at: DateTime::now(),
                });
            if !record.chats.contains(&chat_id) {
                record.chats.push(chat_id);
            }
            record.updated_at = DateTime::now();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_record_broadcast_is_set_add() {
        let store = MemoryStore::default();
        store.record_broadcast("x.mp4", -100).await.unwrap();
        store.record_broadcast("x.mp4", -100).await.unwrap();
        store.record_broadcast("x.mp4", -200).await.unwrap();
        let record = store.broadcasted.lock().get("x.mp4").cloned().unwrap();
        assert_eq!(record.chats, vec![-100, -200]);
    }

    #[tokio::test]
    async fn test_claim_broadcast_once() {
        let store = MemoryStore::default();
        assert!(store.claim_broadcast("x.mp4").await.unwrap());
        assert!(!store.claim_broadcast("x.mp4").await.unwrap());

        // an empty claim can be released, a delivered one stays
        store.release_broadcast("x.mp4").await.unwrap();
        assert!(store.claim_broadcast("x.mp4").await.unwrap());
        store.record_broadcast("x.mp4", -100).await.unwrap();
        store.release_broadcast("x.mp4").await.unwrap();
        assert!(!store.claim_broadcast("x.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn test_admin_lookup() {
        let store = MemoryStore::default().with_admin(7);
        assert!(store.is_admin(7).await.unwrap());
        assert!(!store.is_admin(8).await.unwrap());
    }
}
