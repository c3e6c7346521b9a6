use crate::admin::{is_admin, reply_target};
use crate::state::BotState;
use async_trait::async_trait;
use banter_core::{ChannelMessage, MessageHandler, SessionHandle, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Transcripts shorter than this are not worth an unprompted message.
const MIN_TRANSCRIPT: usize = 10;

/// Records every channel message and answers when addressed.
pub struct Responder {
    bot: Arc<BotState>,
}

impl Responder {
    pub fn new(bot: Arc<BotState>) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MessageHandler for Responder {
    fn name(&self) -> &str {
        "responder"
    }

    async fn handle(&self, session: &SessionHandle, msg: &ChannelMessage) -> anyhow::Result<()> {
        let config = self.bot.config.get();
        if msg.text.starts_with(&config.command_key) && is_admin(&msg.raw_prefix, &config.admin) {
            return Ok(());
        }

        let nick = session.nick();
        let target = reply_target(msg, &nick);
        self.bot.record(&target, &msg.sender, &msg.text).await;

        if !self
            .bot
            .should_respond(&config, &msg.text, &target, &msg.sender)
        {
            self.bot.note_unanswered();
            return Ok(());
        }

        let Some(reply) = self.bot.reply(&config, &target, &nick).await else {
            return Ok(());
        };
        // A reply the rate limiter dropped was never seen, so it neither
        // enters the transcript nor counts as a response.
        if session.send_to_channel(&target, &reply).await? {
            self.bot.record(&target, &nick, &reply).await;
            self.bot.mark_responded();
        }
        Ok(())
    }
}

/// Timer-driven producer: every `message_randomly_time` seconds, speak up in
/// quiet channels. Parks until the next config reload while disabled.
pub async fn run_unprompted(bot: Arc<BotState>, session: SessionHandle) {
    loop {
        let period = bot.config.get().message_randomly_time;
        if period == 0 {
            debug!("unprompted messages disabled");
            bot.wait_reloaded().await;
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(period)) => {}
            _ = bot.wait_reloaded() => continue,
        }
        if matches!(session.state(), SessionState::Stopping | SessionState::Closed) {
            return;
        }
        speak_unprompted(&bot, &session, period).await;
    }
}

async fn speak_unprompted(bot: &BotState, session: &SessionHandle, period: u64) {
    if bot.seconds_since_response() < period {
        return;
    }
    let config = bot.config.get();
    let nick = session.nick();
    for channel in session.channels() {
        let transcript = bot.transcripts.get(&channel).await.unwrap_or_default();
        if transcript.chars().count() < MIN_TRANSCRIPT {
            continue;
        }
        let Some(message) = bot.reply(&config, &channel, &nick).await else {
            continue;
        };
        match session.send_to_channel(&channel, &message).await {
            Ok(true) => {
                info!(%channel, "sent unprompted message");
                bot.record(&channel, &nick, &message).await;
            }
            Ok(false) => {}
            Err(err) => warn!(%channel, %err, "unprompted send failed"),
        }
    }
    bot.mark_responded();
}
