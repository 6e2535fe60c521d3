use std::fmt::{Display, Error, Formatter};

use teloxide::{
    types::{InlineKeyboardButton, InlineKeyboardMarkup},
    utils::html::escape,
};

use crate::{
    constants::MAX_ERROR_LEN,
    fetch::Progress,
    job::JobError,
    settings::Settings,
};

macro_rules! into_string {
    ($($ty: ty),* $(,)?) => {
        $(
            impl From<$ty> for String {
                fn from(msg: $ty) -> String {
                    msg.to_string()
                }
            }
        )*
    };
}

pub struct SizeFormatter(pub u64);
impl Display for SizeFormatter {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        macro_rules! clamp_size {
            ($size: expr, $unit_var: expr, $unit: literal) => {
                if $size >= 1024.0 {
                    $size /= 1024.0;
                    $unit_var = $unit;
                }
            };
        }

        let mut size = self.0 as f64;
        let mut unit = "B";
        clamp_size!(size, unit, "KiB");
        clamp_size!(size, unit, "MiB");
        clamp_size!(size, unit, "GiB");
        clamp_size!(size, unit, "TiB");
        write!(f, "{:.2} {}", size, unit)
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "✅ ON"
    } else {
        "❌ OFF"
    }
}

fn enabled_disabled(enabled: bool) -> &'static str {
    if enabled {
        "✅ Enabled"
    } else {
        "❌ Disabled"
    }
}

// Telegram rejects overly long error texts; keep the head of the message.
fn brief(text: &str) -> String {
    text.chars().take(MAX_ERROR_LEN).collect()
}

pub struct MsgStart {
    pub admin: bool,
}

impl Display for MsgStart {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        writeln!(f, "🤖 <b>TeraBox Downloader Bot</b>\n")?;
        if self.admin {
            writeln!(f, "👑 Welcome back, Admin!\n")?;
            writeln!(f, "• Send TeraBox links to download videos")?;
            write!(f, "• Use /settings to configure bot")
        } else {
            write!(f, "📥 Send me TeraBox links and I'll download videos for you!")
        }
    }
}

pub struct MsgSettings<'a>(pub &'a Settings);

impl Display for MsgSettings<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let settings = self.0;
        writeln!(f, "⚙️ <b>Bot Settings</b>\n")?;
        writeln!(
            f,
            "📡 Admin Broadcast: {}",
            enabled_disabled(settings.admin_broadcast_enabled)
        )?;
        writeln!(f, "  <i>(When enabled, videos from admin links are broadcasted)</i>\n")?;
        writeln!(
            f,
            "📺 Channel Broadcast: {}",
            enabled_disabled(settings.channel_broadcast_enabled)
        )?;
        writeln!(f, "  <i>(When enabled, videos from channel posts are broadcasted)</i>\n")?;
        write!(f, "🆔 Broadcast Chats: ")?;
        if settings.broadcast_chats.is_empty() {
            write!(f, "None")
        } else {
            let chats: Vec<String> = settings.broadcast_chats.iter().map(i64::to_string).collect();
            write!(f, "{}", chats.join(", "))
        }
    }
}

pub struct MsgProcessing<'a> {
    pub link: &'a str,
}

impl Display for MsgProcessing<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "🔍 <b>Processing:</b> <code>{}</code>", escape(self.link))
    }
}

pub struct MsgQueued {
    pub ahead: usize,
}

impl Display for MsgQueued {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "🕒 Queued, {} job(s) ahead. Waiting for a free slot...", self.ahead)
    }
}

pub struct MsgFound<'a> {
    pub filename: &'a str,
    pub size: u64,
}

impl Display for MsgFound<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "📥 Found: <code>{}</code> ({}). Starting download...",
            escape(self.filename),
            SizeFormatter(self.size)
        )
    }
}

pub struct MsgDownloading<'a> {
    pub filename: &'a str,
    pub progress: Progress,
}

impl Display for MsgDownloading<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let p = &self.progress;
        writeln!(f, "📥 <b>Downloading</b> <code>{}</code>", escape(self.filename))?;
        writeln!(f, "📦 Size: <b>{}</b>", SizeFormatter(p.total))?;
        writeln!(
            f,
            "⬇️ Progress: <b>{}/{}</b> (<b>{:.0}%</b>)",
            SizeFormatter(p.downloaded),
            SizeFormatter(p.total),
            p.percent()
        )?;
        write!(f, "⚡ Speed: <b>{}/s</b>", SizeFormatter(p.speed() as u64))
    }
}

pub struct MsgUploading<'a> {
    pub filename: &'a str,
}

impl Display for MsgUploading<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "📤 Uploading <code>{}</code>...", escape(self.filename))
    }
}

pub struct MsgJobFailed<'a> {
    pub link: &'a str,
    pub error: &'a JobError,
}

impl Display for MsgJobFailed<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self.error {
            JobError::Resolution(e) => write!(
                f,
                "❌ Failed to retrieve links for <code>{}</code>: {}",
                escape(self.link),
                escape(&brief(e))
            ),
            JobError::UnsupportedType { filename } => write!(
                f,
                "ℹ️ Skipped non-video file: <code>{}</code>. Only video files are processed.",
                escape(filename)
            ),
            JobError::TooLarge {
                filename,
                size,
                limit,
            } => write!(
                f,
                "❌ File <code>{}</code> is too large (<b>{}</b>). Max {}.",
                escape(filename),
                SizeFormatter(*size),
                SizeFormatter(*limit)
            ),
            JobError::Download(e) => write!(
                f,
                "❌ Failed to download from <code>{}</code>: {}",
                escape(self.link),
                escape(&brief(e))
            ),
            JobError::Upload(e) => write!(
                f,
                "❌ Failed to send the video from <code>{}</code>: {}",
                escape(self.link),
                escape(&brief(e))
            ),
        }
    }
}

pub struct MsgCaption<'a> {
    pub filename: &'a str,
}

impl Display for MsgCaption<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.filename)
    }
}

pub struct MsgToggled {
    pub label: &'static str,
    pub enabled: bool,
}

impl Display for MsgToggled {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let state = if self.enabled { "ON" } else { "OFF" };
        write!(f, "{} turned {state} ✅", self.label)
    }
}

pub struct MsgBroadcastChatsUpdated<'a> {
    pub chats: &'a [i64],
}

impl Display for MsgBroadcastChatsUpdated<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "✅ Updated broadcast chats: {:?}", self.chats)
    }
}

pub struct MsgStoreError<'a> {
    pub error: &'a anyhow::Error,
}

impl Display for MsgStoreError<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "❌ Failed to save settings: {}", escape(&brief(&self.error.to_string())))
    }
}

into_string!(
    MsgStart,
    MsgSettings<'_>,
    MsgProcessing<'_>,
    MsgQueued,
    MsgFound<'_>,
    MsgDownloading<'_>,
    MsgUploading<'_>,
    MsgJobFailed<'_>,
    MsgCaption<'_>,
    MsgToggled,
    MsgBroadcastChatsUpdated<'_>,
    MsgStoreError<'_>,
);

pub const MSG_PASSWORD_PROMPT: &str = "🔐 Enter admin password to access settings:";
pub const MSG_PASSWORD_ACCEPTED: &str = "✅ Password accepted! You are now an admin.";
pub const MSG_WRONG_PASSWORD: &str = "❌ Wrong password. Try /settings again.";
pub const MSG_BROADCAST_CHATS_PROMPT: &str = "📨 Send new broadcast chat ID(s), comma-separated:";
pub const MSG_INVALID_CHAT_IDS: &str =
    "❌ Invalid format. Please enter numeric chat IDs separated by commas.";
pub const MSG_NEED_ADMIN: &str = "❌ You need admin access!";

pub const ADMIN_BROADCAST_LABEL: &str = "📡 Admin Broadcast";
pub const CHANNEL_BROADCAST_LABEL: &str = "📺 Channel Broadcast";

pub const CB_TOGGLE_ADMIN: &str = "toggle_admin_broadcast";
pub const CB_TOGGLE_CHANNEL: &str = "toggle_channel_broadcast";
pub const CB_SET_CHATS: &str = "set_broadcast_id";

pub fn make_settings_keyboard(settings: &Settings) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            format!(
                "{ADMIN_BROADCAST_LABEL}: {}",
                on_off(settings.admin_broadcast_enabled)
            ),
            CB_TOGGLE_ADMIN,
        )],
        vec![InlineKeyboardButton::callback(
            format!(
                "{CHANNEL_BROADCAST_LABEL}: {}",
                on_off(settings.channel_broadcast_enabled)
            ),
            CB_TOGGLE_CHANNEL,
        )],
        vec![InlineKeyboardButton::callback(
            "🆔 Set Broadcast Chat ID(s)",
            CB_SET_CHATS,
        )],
    ])
}
