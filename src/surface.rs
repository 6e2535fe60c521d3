//! Outbound chat operations used by the job pipeline and broadcaster.

use std::path::Path;

use async_trait::async_trait;
use teloxide::{
    payloads::{EditMessageTextSetters, SendMessageSetters, SendVideoSetters},
    prelude::*,
    types::{InputFile, MessageId, ParseMode, ReplyParameters},
    ApiError, RequestError,
};

#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Send a status or error notice, optionally as a reply.
    async fn send_text(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        text: String,
    ) -> anyhow::Result<MessageId>;

    async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: String)
        -> anyhow::Result<()>;

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> anyhow::Result<()>;

    async fn send_video(
        &self,
        chat_id: ChatId,
        path: &Path,
        filename: &str,
        caption: Option<String>,
        reply_to: Option<MessageId>,
    ) -> anyhow::Result<()>;
}

pub struct TelegramSurface {
    bot: Bot,
}

impl TelegramSurface {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatSurface for TelegramSurface {
    async fn send_text(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        text: String,
    ) -> anyhow::Result<MessageId> {
        let mut req = self.bot.send_message(chat_id, text).parse_mode(ParseMode::Html);
        if let Some(reply_to) = reply_to {
            req = req.reply_parameters(ReplyParameters::new(reply_to).allow_sending_without_reply());
        }
        Ok(req.await?.id)
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    ) -> anyhow::Result<()> {
        match self
            .bot
            .edit_message_text(chat_id, message_id, text)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> anyhow::Result<()> {
        self.bot.delete_message(chat_id, message_id).await?;
        Ok(())
    }

    async fn send_video(
        &self,
        chat_id: ChatId,
        path: &Path,
        filename: &str,
        caption: Option<String>,
        reply_to: Option<MessageId>,
    ) -> anyhow::Result<()> {
        let file = InputFile::file(path).file_name(filename.to_string());
        let mut req = self.bot.send_video(chat_id, file).supports_streaming(true);
        if let Some(caption) = caption {
            req = req.caption(caption);
        }
        if let Some(reply_to) = reply_to {
            req = req.reply_parameters(ReplyParameters::new(reply_to).allow_sending_without_reply());
        }
        req.await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod recording {
    use std::{
        collections::HashSet,
        path::PathBuf,
        sync::atomic::{AtomicI32, Ordering},
        time::Duration,
    };

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Text {
            chat_id: ChatId,
            reply_to: Option<MessageId>,
            text: String,
        },
        Edit {
            chat_id: ChatId,
            message_id: MessageId,
            text: String,
        },
        Delete {
            chat_id: ChatId,
            message_id: MessageId,
        },
        Video {
            chat_id: ChatId,
            path: PathBuf,
            filename: String,
            reply_to: Option<MessageId>,
            existed: bool,
        },
    }

    /// Records every outbound call. Chats in `unreachable` reject videos,
    /// and every video upload takes `upload_delay`.
    #[derive(Default)]
    pub struct RecordingSurface {
        pub sent: Mutex<Vec<Sent>>,
        pub unreachable: Mutex<HashSet<ChatId>>,
        pub upload_delay: Mutex<Duration>,
        next_id: AtomicI32,
    }

    impl RecordingSurface {
        pub fn videos_to(&self, chat_id: ChatId) -> usize {
            self.sent
                .lock()
                .iter()
                .filter(|s| matches!(s, Sent::Video { chat_id: c, .. } if *c == chat_id))
                .count()
        }

        pub fn video_count(&self) -> usize {
            self.sent
                .lock()
                .iter()
                .filter(|s| matches!(s, Sent::Video { .. }))
                .count()
        }

        pub fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter_map(|s| match s {
                    Sent::Text { text, .. } | Sent::Edit { text, .. } => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ChatSurface for RecordingSurface {
        async fn send_text(
            &self,
            chat_id: ChatId,
            reply_to: Option<MessageId>,
            text: String,
        ) -> anyhow::Result<MessageId> {
            self.sent.lock().push(Sent::Text {
                chat_id,
                reply_to,
                text,
            });
            Ok(MessageId(1000 + self.next_id.fetch_add(1, Ordering::AcqRel)))
        }

        async fn edit_text(
            &self,
            chat_id: ChatId,
            message_id: MessageId,
            text: String,
        ) -> anyhow::Result<()> {
            self.sent.lock().push(Sent::Edit {
                chat_id,
                message_id,
                text,
            });
            Ok(())
        }

        async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> anyhow::Result<()> {
            self.sent.lock().push(Sent::Delete {
                chat_id,
                message_id,
            });
            Ok(())
        }

        async fn send_video(
            &self,
            chat_id: ChatId,
            path: &Path,
            filename: &str,
            _caption: Option<String>,
            reply_to: Option<MessageId>,
        ) -> anyhow::Result<()> {
            let delay = *self.upload_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.unreachable.lock().contains(&chat_id) {
                anyhow::bail!("Forbidden: bot was blocked by the user");
            }
            self.sent.lock().push(Sent::Video {
                chat_id,
                path: path.to_path_buf(),
                filename: filename.to_string(),
                reply_to,
                existed: path.exists(),
            });
            Ok(())
        }
    }
}
