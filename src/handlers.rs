//! Message, channel post and callback handlers for the Telegram bot.

use std::str::FromStr;
use std::sync::Arc;

use mongodb::bson::DateTime;
use teloxide::{
    payloads::{
        AnswerCallbackQuerySetters, EditMessageTextSetters, SendMessageSetters,
        SetMyCommandsSetters,
    },
    prelude::*,
    types::{BotCommandScope, MaybeInaccessibleMessage, Me, MessageId, ParseMode, Recipient, User},
    utils::command::BotCommands,
    ApiError, Bot, RequestError,
};

use crate::format::{
    make_settings_keyboard, MsgBroadcastChatsUpdated, MsgSettings, MsgStart, MsgStoreError,
    MsgToggled, ADMIN_BROADCAST_LABEL, CB_SET_CHATS, CB_TOGGLE_ADMIN, CB_TOGGLE_CHANNEL,
    CHANNEL_BROADCAST_LABEL, MSG_BROADCAST_CHATS_PROMPT, MSG_INVALID_CHAT_IDS, MSG_NEED_ADMIN,
    MSG_PASSWORD_ACCEPTED, MSG_PASSWORD_PROMPT, MSG_WRONG_PASSWORD,
};
use crate::job::{Origin, OriginKind};
use crate::links::{extract_links, Links};
use crate::settings::Settings;
use crate::state::{PendingInput, State};
use crate::store::AdminRecord;
use crate::utils::{parse_chat_ids, SendMessageSettersExt};
use crate::Command;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// The user a text came from.
#[derive(Debug, Clone)]
pub struct Author<'a> {
    pub id: u64,
    pub username: Option<&'a str>,
    pub full_name: String,
}

impl<'a> From<&'a User> for Author<'a> {
    fn from(user: &'a User) -> Self {
        Self {
            id: user.id.0,
            username: user.username.as_deref(),
            full_name: user.full_name(),
        }
    }
}

/// Result of a pending password or chat-list answer.
#[derive(Debug)]
enum PendingReply {
    Authenticated,
    WrongPassword,
    NeedAdmin,
    ChatsUpdated(Vec<i64>),
    InvalidChatIds,
    StoreFailed(anyhow::Error),
}

/// What to do with a text that is not a known command.
#[derive(Debug)]
enum TextAction {
    Ignore,
    Reply(PendingReply),
    Submit(Links, OriginKind),
}

/// Handle messages from private chats and groups.
///
/// Commands first, then a pending password or chat-list answer, then links.
pub async fn message_handler(bot: Bot, msg: Message, me: Me, state: Arc<State>) -> HandlerResult {
    let Some(text) = message_text(&msg) else {
        return Ok(());
    };
    let author = msg.from.as_ref().map(Author::from);
    let admin = match &author {
        Some(author) => state.is_admin(author.id).await,
        None => false,
    };

    if let Ok(cmd) = Command::parse(text, me.username()) {
        match cmd {
            Command::Start => {
                bot.send_message(msg.chat.id, MsgStart { admin })
                    .parse_mode(ParseMode::Html)
                    .await?;
            }
            Command::Settings => {
                if admin {
                    send_settings(&bot, msg.chat.id, Some(msg.id), &state.settings.snapshot())
                        .await?;
                } else if let Some(author) = &author {
                    state.expect_input(author.id, PendingInput::AwaitingPassword);
                    bot.send_message(msg.chat.id, MSG_PASSWORD_PROMPT)
                        .reply_to_message_id_opt(Some(msg.id))
                        .await?;
                }
            }
        }
        return Ok(());
    }

    match handle_text(&state, author.as_ref(), admin, text).await {
        TextAction::Ignore => {}
        TextAction::Reply(reply) => send_pending_reply(&bot, msg.chat.id, &state, reply).await?,
        TextAction::Submit(links, kind) => {
            tracing::info!(chat = msg.chat.id.0, %kind, count = links.len(), "Received links");
            let origin = Origin {
                chat_id: msg.chat.id,
                message_id: msg.id,
                kind,
            };
            for link in links {
                state.pipeline.submit(link, origin);
            }
        }
    }
    Ok(())
}

/// Handle posts of channels the bot is a member of. Only used while channel
/// broadcasting is on.
pub async fn channel_post_handler(msg: Message, state: Arc<State>) -> HandlerResult {
    let Some(text) = message_text(&msg) else {
        return Ok(());
    };
    let origin = Origin {
        chat_id: msg.chat.id,
        message_id: msg.id,
        kind: OriginKind::Channel,
    };
    for link in channel_links(&state, text) {
        tracing::info!(chat = msg.chat.id.0, link = %link, "Received link from channel");
        state.pipeline.submit(link, origin);
    }
    Ok(())
}

/// Handle the settings keyboard.
pub async fn callback_handler(bot: Bot, q: CallbackQuery, state: Arc<State>) -> HandlerResult {
    if !state.is_admin(q.from.id.0).await {
        bot.answer_callback_query(q.id)
            .text(MSG_NEED_ADMIN)
            .show_alert(true)
            .await?;
        return Ok(());
    }
    let (Some(data), Some(MaybeInaccessibleMessage::Regular(message))) = (q.data, q.message)
    else {
        return Ok(());
    };
    let chat_id = message.chat.id;
    let message_id = message.id;

    let (label, toggled) = match SettingsAction::from_str(&data)? {
        SettingsAction::ToggleAdminBroadcast => (
            ADMIN_BROADCAST_LABEL,
            state.settings.toggle_admin_broadcast().await,
        ),
        SettingsAction::ToggleChannelBroadcast => (
            CHANNEL_BROADCAST_LABEL,
            state.settings.toggle_channel_broadcast().await,
        ),
        SettingsAction::SetBroadcastChats => {
            state.expect_input(q.from.id.0, PendingInput::AwaitingBroadcastChats);
            bot.answer_callback_query(q.id).await?;
            bot.send_message(chat_id, MSG_BROADCAST_CHATS_PROMPT)
                .await?;
            return Ok(());
        }
    };

    match toggled {
        Ok(enabled) => {
            tracing::info!(user = q.from.id.0, label, enabled, "Settings toggled");
            edit_settings(&bot, chat_id, message_id, &state.settings.snapshot()).await?;
            bot.answer_callback_query(q.id)
                .text(MsgToggled { label, enabled })
                .await?;
        }
        Err(e) => {
            tracing::error!("Failed to save settings: {e}");
            bot.answer_callback_query(q.id)
                .text(MsgStoreError { error: &e })
                .show_alert(true)
                .await?;
        }
    }
    Ok(())
}

async fn handle_text(
    state: &State,
    author: Option<&Author<'_>>,
    admin: bool,
    text: &str,
) -> TextAction {
    let text = text.trim();
    // unknown commands leave a pending input in place
    if text.starts_with('/') {
        return TextAction::Ignore;
    }
    if let Some(author) = author {
        if let Some(pending) = state.take_pending(author.id) {
            return TextAction::Reply(answer_pending(state, author, admin, pending, text).await);
        }
    }

    let links = extract_links(text);
    if links.is_empty() {
        return TextAction::Ignore;
    }
    let kind = if admin {
        OriginKind::Admin
    } else {
        OriginKind::User
    };
    TextAction::Submit(links, kind)
}

async fn answer_pending(
    state: &State,
    author: &Author<'_>,
    admin: bool,
    pending: PendingInput,
    text: &str,
) -> PendingReply {
    match pending {
        PendingInput::AwaitingPassword => {
            if let Err(e) = state.settings.authenticate(text) {
                tracing::warn!(user = author.id, "Admin authentication failed: {e}");
                return PendingReply::WrongPassword;
            }
            let record = AdminRecord {
                user_id: author.id as i64,
                username: author.username.map(str::to_string),
                full_name: author.full_name.clone(),
                added_at: DateTime::now(),
            };
            match state.store.add_admin(record).await {
                Ok(()) => {
                    tracing::info!(user = author.id, "New admin added");
                    PendingReply::Authenticated
                }
                Err(e) => {
                    tracing::error!(user = author.id, "Failed to save admin: {e}");
                    PendingReply::StoreFailed(e)
                }
            }
        }
        PendingInput::AwaitingBroadcastChats if !admin => PendingReply::NeedAdmin,
        PendingInput::AwaitingBroadcastChats => {
            let Ok(chats) = parse_chat_ids(text) else {
                return PendingReply::InvalidChatIds;
            };
            match state.settings.set_broadcast_chats(chats.clone()).await {
                Ok(()) => {
                    tracing::info!(?chats, "Broadcast chats updated");
                    PendingReply::ChatsUpdated(chats)
                }
                Err(e) => {
                    tracing::error!("Failed to save broadcast chats: {e}");
                    PendingReply::StoreFailed(e)
                }
            }
        }
    }
}

async fn send_pending_reply(
    bot: &Bot,
    chat_id: ChatId,
    state: &State,
    reply: PendingReply,
) -> anyhow::Result<()> {
    match reply {
        PendingReply::Authenticated => {
            bot.send_message(chat_id, MSG_PASSWORD_ACCEPTED).await?;
            // admins get /settings in their own command list
            if let Err(e) = bot
                .set_my_commands(Command::bot_commands())
                .scope(BotCommandScope::Chat {
                    chat_id: Recipient::Id(chat_id),
                })
                .await
            {
                tracing::warn!(chat = chat_id.0, "Failed to set admin commands: {e}");
            }
            send_settings(bot, chat_id, None, &state.settings.snapshot()).await
        }
        PendingReply::ChatsUpdated(chats) => {
            bot.send_message(chat_id, MsgBroadcastChatsUpdated { chats: &chats })
                .await?;
            send_settings(bot, chat_id, None, &state.settings.snapshot()).await
        }
        PendingReply::WrongPassword => {
            bot.send_message(chat_id, MSG_WRONG_PASSWORD).await?;
            Ok(())
        }
        PendingReply::NeedAdmin => {
            bot.send_message(chat_id, MSG_NEED_ADMIN).await?;
            Ok(())
        }
        PendingReply::InvalidChatIds => {
            bot.send_message(chat_id, MSG_INVALID_CHAT_IDS).await?;
            Ok(())
        }
        PendingReply::StoreFailed(e) => {
            bot.send_message(chat_id, MsgStoreError { error: &e })
                .parse_mode(ParseMode::Html)
                .await?;
            Ok(())
        }
    }
}

/// Links of a channel post, or none while channel broadcasting is off.
fn channel_links(state: &State, text: &str) -> Links {
    if !state.settings.snapshot().channel_broadcast_enabled {
        return Links::new();
    }
    extract_links(text)
}

async fn send_settings(
    bot: &Bot,
    chat_id: ChatId,
    reply_to: Option<MessageId>,
    settings: &Settings,
) -> anyhow::Result<()> {
    bot.send_message(chat_id, MsgSettings(settings))
        .parse_mode(ParseMode::Html)
        .reply_markup(make_settings_keyboard(settings))
        .reply_to_message_id_opt(reply_to)
        .await?;
    Ok(())
}

async fn edit_settings(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    settings: &Settings,
) -> anyhow::Result<()> {
    match bot
        .edit_message_text(chat_id, message_id, MsgSettings(settings))
        .parse_mode(ParseMode::Html)
        .reply_markup(make_settings_keyboard(settings))
        .await
    {
        Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn message_text(msg: &Message) -> Option<&str> {
    msg.text().or_else(|| msg.caption())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsAction {
    ToggleAdminBroadcast,
    ToggleChannelBroadcast,
    SetBroadcastChats,
}

impl FromStr for SettingsAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CB_TOGGLE_ADMIN => Ok(Self::ToggleAdminBroadcast),
            CB_TOGGLE_CHANNEL => Ok(Self::ToggleChannelBroadcast),
            CB_SET_CHATS => Ok(Self::SetBroadcastChats),
            _ => Err(anyhow::anyhow!("Invalid action")),
        }
    }
}
