//! Fan-out of finished videos to the configured broadcast chats.

use std::sync::Arc;

use teloxide::types::ChatId;
use tokio::task::JoinHandle;

use crate::{
    job::{DownloadedVideo, OriginKind},
    settings::{Settings, SettingsService},
    store::Store,
    surface::ChatSurface,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Disabled,
    Duplicate,
    NoTargets,
    Sent { delivered: usize, total: usize },
}

/// Whether a video from `kind` goes out to the broadcast chats.
pub fn eligible(settings: &Settings, kind: OriginKind) -> bool {
    match kind {
        OriginKind::Admin => settings.admin_broadcast_enabled,
        OriginKind::Channel => settings.channel_broadcast_enabled,
        OriginKind::User => false,
    }
}

pub struct Broadcaster {
    settings: Arc<SettingsService>,
    store: Arc<dyn Store>,
    surface: Arc<dyn ChatSurface>,
}

impl Broadcaster {
    pub fn new(
        settings: Arc<SettingsService>,
        store: Arc<dyn Store>,
        surface: Arc<dyn ChatSurface>,
    ) -> Self {
        Self {
            settings,
            store,
            surface,
        }
    }

    /// Run [`Broadcaster::broadcast`] in the background when `kind` is
    /// eligible. The video file is kept alive until the task ends.
    pub fn spawn(
        self: &Arc<Self>,
        video: DownloadedVideo,
        kind: OriginKind,
    ) -> Option<JoinHandle<BroadcastOutcome>> {
        if !eligible(&self.settings.snapshot(), kind) {
            tracing::info!(file = %video.filename, %kind, "Broadcast disabled, skipping");
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move { this.broadcast(&video, kind).await }))
    }

    pub async fn broadcast(&self, video: &DownloadedVideo, kind: OriginKind) -> BroadcastOutcome {
        let settings = self.settings.snapshot();
        if !eligible(&settings, kind) {
            return BroadcastOutcome::Disabled;
        }

        let name = video.filename.as_str();
        let total = settings.broadcast_chats.len();
        if total == 0 {
            tracing::warn!("No broadcast chats configured");
            return BroadcastOutcome::NoTargets;
        }

        // Claim first: concurrent jobs of the same file must not both send.
        match self.store.claim_broadcast(name).await {
            Ok(true) => (),
            Ok(false) => {
                tracing::info!(file = name, "Duplicate broadcast skipped");
                return BroadcastOutcome::Duplicate;
            }
            Err(e) => {
                // unknown dedupe state, sending could duplicate
                tracing::error!(file = name, "Failed to claim broadcast record: {e}");
                return BroadcastOutcome::Duplicate;
            }
        }

        let mut delivered = 0;
        for &chat in settings.broadcast_chats.iter() {
            if let Err(e) = self
                .surface
                .send_video(ChatId(chat), video.path(), name, None, None)
                .await
            {
                tracing::error!(file = name, chat, "Broadcast failed: {e}");
                continue;
            }
            delivered += 1;
            tracing::info!(file = name, chat, "Broadcasted");
            if let Err(e) = self.store.record_broadcast(name, chat).await {
                tracing::error!(file = name, chat, "Failed to record broadcast: {e}");
            }
        }
        if delivered == 0 {
            if let Err(e) = self.store.release_broadcast(name).await {
                tracing::error!(file = name, "Failed to release broadcast record: {e}");
            }
        }
        tracing::info!(file = name, "Broadcast complete: {delivered}/{total} chats");
        BroadcastOutcome::Sent { delivered, total }
    }
}
