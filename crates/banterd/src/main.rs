use anyhow::Result;
use banter_core::history::{InMemoryTranscripts, TranscriptStore};
use banter_core::{ConfigStore, ConnectionParams, Session};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod admin;
mod generate;
mod responder;
mod state;

use admin::AdminHandler;
use generate::CompletionsClient;
use responder::Responder;
use state::BotState;

#[derive(Parser, Debug)]
#[command(name = "banterd", version, about = "IRC chat bot backed by a text-generation API")]
struct Cli {
    #[arg(long, default_value = "./banter.toml")]
    config: PathBuf,

    /// Keep transcripts in Redis at this URL instead of in memory.
    #[cfg(feature = "redis")]
    #[arg(long)]
    redis: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = Arc::new(ConfigStore::open(cli.config.clone())?);
    let config = store.get();

    let transcripts = open_transcripts(&cli, config.history_to_keep)?;

    let generator = Arc::new(CompletionsClient::new(store.clone()));
    let bot = Arc::new(BotState::new(store.clone(), transcripts, generator));

    let mut session = Session::new(
        ConnectionParams::from_config(&config),
        config.rate_limit.window(),
    );
    session
        .dispatcher_mut()
        .add_message_handler(Arc::new(Responder::new(bot.clone())));
    session
        .dispatcher_mut()
        .add_message_handler(Arc::new(AdminHandler::new(bot.clone())));

    let unprompted = tokio::spawn(responder::run_unprompted(bot.clone(), session.handle()));

    info!(server = %config.irc.server, nick = %config.irc.nick, "banterd starting");
    let result = session.connect().await;
    unprompted.abort();
    result?;

    info!("banterd exiting");
    Ok(())
}

#[cfg(feature = "redis")]
fn open_transcripts(cli: &Cli, max_chars: usize) -> Result<Arc<dyn TranscriptStore>> {
    use banter_core::history::redis_history::RedisTranscripts;

    let Some(url) = cli.redis.as_deref() else {
        return Ok(Arc::new(InMemoryTranscripts::new(max_chars)));
    };
    info!("keeping transcripts in redis");
    let client = redis::Client::open(url)?;
    Ok(Arc::new(RedisTranscripts::new(client, "banter:history", max_chars)))
}

#[cfg(not(feature = "redis"))]
fn open_transcripts(_cli: &Cli, max_chars: usize) -> Result<Arc<dyn TranscriptStore>> {
    Ok(Arc::new(InMemoryTranscripts::new(max_chars)))
}
