use std::sync::Arc;

use parking_lot::Mutex;
use teloxide::Bot;

use crate::{
    broadcast::Broadcaster,
    config::{DownloadConfig, MongoConfig, Param, ResolverConfig},
    constants::{PENDING_INPUT_EXPIRE, PENDING_LRU_SIZE},
    fetch::HttpFetcher,
    pipeline::Pipeline,
    resolver::ResolverClient,
    settings::{Settings, SettingsService},
    store::{MongoStore, Store},
    surface::{ChatSurface, TelegramSurface},
    utils::ExpiringLru,
};

/// Free-text input the bot expects next from a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingInput {
    AwaitingPassword,
    AwaitingBroadcastChats,
}

pub struct State {
    pub settings: Arc<SettingsService>,
    pub store: Arc<dyn Store>,
    pub pipeline: Arc<Pipeline>,

    // user id -> expected input
    pending: Mutex<ExpiringLru<u64, PendingInput>>,
}

impl State {
    pub async fn new<C>(cfg: &C, bot: Bot) -> anyhow::Result<Self>
    where
        C: Param<MongoConfig>
            + Param<ResolverConfig>
            + Param<DownloadConfig>
            + Param<Settings>,
    {
        let store: Arc<dyn Store> = Arc::new(MongoStore::connect(cfg).await?);
        let settings = Arc::new(SettingsService::load(store.clone(), cfg).await?);
        let surface: Arc<dyn ChatSurface> = Arc::new(TelegramSurface::new(bot));
        let broadcaster = Arc::new(Broadcaster::new(
            settings.clone(),
            store.clone(),
            surface.clone(),
        ));
        let pipeline = Arc::new(Pipeline::new(
            cfg,
            Arc::new(ResolverClient::new(cfg)?),
            Arc::new(HttpFetcher::new(cfg)?),
            surface,
            broadcaster,
            settings.clone(),
        ));
        Ok(Self::with_parts(settings, store, pipeline))
    }

    pub fn with_parts(
        settings: Arc<SettingsService>,
        store: Arc<dyn Store>,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            settings,
            store,
            pipeline,
            pending: Mutex::new(ExpiringLru::new(PENDING_LRU_SIZE, PENDING_INPUT_EXPIRE)),
        }
    }

    /// Admin lookup. A store failure counts as "not an admin".
    pub async fn is_admin(&self, user_id: u64) -> bool {
        match self.store.is_admin(user_id as i64).await {
            Ok(admin) => admin,
            Err(e) => {
                tracing::error!(user = user_id, "Failed to check admin: {e}");
                false
            }
        }
    }

    #[inline]
    pub fn expect_input(&self, user_id: u64, input: PendingInput) {
        self.pending.lock().insert(user_id, input);
    }

    /// Take the pending input for `user_id`, clearing it.
    #[inline]
    pub fn take_pending(&self, user_id: u64) -> Option<PendingInput> {
        self.pending.lock().remove(&user_id)
    }
}
