mod broadcast;
mod config;
mod constants;
mod fetch;
mod format;
mod gate;
mod handlers;
mod job;
mod links;
mod pipeline;
mod resolver;
mod settings;
mod state;
mod store;
mod surface;
mod utils;

use std::{error::Error, sync::Arc};

use clap::Parser;
use config::Config;
use handlers::{callback_handler, channel_post_handler, message_handler};
use state::State;
use teloxide::{prelude::*, types::BotCommand, utils::command::BotCommands};
use tracing_subscriber::EnvFilter;

/// These commands are supported:
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    /// Start the bot
    Start,
    /// Bot settings (admin only)
    Settings,
}

#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path of config toml file.
    #[arg(short, long)]
    pub config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_file = Args::parse()
        .config
        .or_else(|| {
            std::env::var("CONFIG_PATH")
                .ok()
                .and_then(|s| if s.is_empty() { None } else { Some(s) })
        })
        .unwrap_or_else(|| "config.toml".to_string());
    tracing::info!("Use config file: {config_file}");
    let config = Config::load_from(&config_file)?;
    tracing::info!("Config file {config_file} load successfully");

    let mut bot = Bot::new(&config.telegram.token);
    if let Some(api_url) = config.telegram.api_url.as_deref() {
        bot = bot.set_api_url(api_url.parse()?);
        tracing::info!("Use Bot API server: {api_url}");
    }
    let state = Arc::new(State::new(&config, bot.clone()).await?);
    tracing::info!(
        capacity = state.pipeline.gate().capacity(),
        "Job pipeline ready"
    );

    // everyone sees /start, admins get the full list after authenticating
    bot.set_my_commands(vec![BotCommand::new("start", "Start the bot")])
        .await?;

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(message_handler))
        .branch(Update::filter_channel_post().endpoint(channel_post_handler))
        .branch(Update::filter_callback_query().endpoint(callback_handler));

    tracing::info!("Bot created and running");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}
