use crate::generate::Generator;
use banter_core::config::Config;
use banter_core::util::now_ts;
use banter_core::{ConfigStore, TranscriptStore};
use chrono::Local;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::warn;

/// Unanswered count before the first reply; high so the first prompt-less
/// reply only waits on the time threshold.
const INITIAL_UNANSWERED: u64 = 100;

/// Everything the chat handlers and the timer task share.
pub struct BotState {
    pub config: Arc<ConfigStore>,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub generator: Arc<dyn Generator>,
    unanswered: AtomicU64,
    last_response: AtomicU64,
    reloaded: Notify,
}

impl BotState {
    pub fn new(
        config: Arc<ConfigStore>,
        transcripts: Arc<dyn TranscriptStore>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            config,
            transcripts,
            generator,
            unanswered: AtomicU64::new(INITIAL_UNANSWERED),
            last_response: AtomicU64::new(now_ts()),
            reloaded: Notify::new(),
        }
    }

    pub fn note_unanswered(&self) {
        self.unanswered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unanswered(&self) -> u64 {
        self.unanswered.load(Ordering::Relaxed)
    }

    pub fn mark_responded(&self) {
        self.unanswered.store(0, Ordering::Relaxed);
        self.last_response.store(now_ts(), Ordering::Relaxed);
    }

    pub fn seconds_since_response(&self) -> u64 {
        now_ts().saturating_sub(self.last_response.load(Ordering::Relaxed))
    }

    pub fn notify_reloaded(&self) {
        self.reloaded.notify_one();
    }

    pub async fn wait_reloaded(&self) {
        self.reloaded.notified().await;
    }

    /// Should a message in `target` get a reply? `target == sender` means a DM.
    pub fn should_respond(&self, config: &Config, text: &str, target: &str, sender: &str) -> bool {
        if text.to_uppercase().contains(&config.irc.nick.to_uppercase()) {
            return true;
        }
        if target == sender {
            return true;
        }
        let Some(unprompted) = &config.respond_without_prompt else {
            return false;
        };
        self.unanswered() >= unprompted.messages_between
            && self.seconds_since_response() >= unprompted.seconds_since_last_response
    }

    /// Ask the backend to continue `channel`'s transcript as `nick`. Any failure
    /// or an empty answer means no reply.
    pub async fn reply(&self, config: &Config, channel: &str, nick: &str) -> Option<String> {
        let transcript = match self.transcripts.get(channel).await {
            Ok(text) => text,
            Err(err) => {
                warn!(%channel, %err, "could not read transcript");
                return None;
            }
        };
        let prompt = format!("{transcript}[{nick}] ({})", stamp());
        let limit = Duration::from_secs(config.generation.timeout_secs);

        let reply = match tokio::time::timeout(limit, self.generator.generate(&prompt)).await {
            Ok(Ok(reply)) => reply.trim().to_string(),
            Ok(Err(err)) => {
                warn!(%channel, %err, "generation failed");
                return None;
            }
            Err(_) => {
                warn!(%channel, secs = limit.as_secs(), "generation timed out");
                return None;
            }
        };
        if reply.is_empty() {
            None
        } else {
            Some(reply)
        }
    }

    pub async fn record(&self, channel: &str, speaker: &str, text: &str) {
        let line = format!("[{speaker}] ({}) {text}\n", stamp());
        if let Err(err) = self.transcripts.append(channel, &line).await {
            warn!(%channel, %err, "could not append to transcript");
        }
    }
}

pub fn stamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
