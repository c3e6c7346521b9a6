use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Per-channel transcript, bounded to a number of characters.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn append(&self, channel: &str, text: &str) -> anyhow::Result<()>;
    async fn get(&self, channel: &str) -> anyhow::Result<String>;
    fn set_limit(&self, max_chars: usize);
}

#[derive(Debug)]
pub struct InMemoryTranscripts {
    max: AtomicUsize,
    channels: Mutex<HashMap<String, String>>,
}

impl InMemoryTranscripts {
    pub fn new(max: usize) -> Self {
        Self {
            max: AtomicUsize::new(max),
            channels: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TranscriptStore for InMemoryTranscripts {
    async fn append(&self, channel: &str, text: &str) -> anyhow::Result<()> {
        let max = self.max.load(Ordering::Relaxed);
        let mut channels = self.channels.lock().await;
        let entry = channels.entry(channel.to_string()).or_default();
        entry.push_str(text);
        keep_tail(entry, max);
        Ok(())
    }

    async fn get(&self, channel: &str) -> anyhow::Result<String> {
        let channels = self.channels.lock().await;
        Ok(channels.get(channel).cloned().unwrap_or_default())
    }

    fn set_limit(&self, max_chars: usize) {
        self.max.store(max_chars, Ordering::Relaxed);
    }
}

/// Drop characters from the front until at most `max` remain.
pub fn keep_tail(text: &mut String, max: usize) {
    let count = text.chars().count();
    if count <= max {
        return;
    }
    let cut = text
        .char_indices()
        .nth(count - max)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    text.drain(..cut);
}

#[cfg(feature = "redis")]
pub mod redis_history {
    use super::*;
    use redis::AsyncCommands;

    pub struct RedisTranscripts {
        client: redis::Client,
        prefix: String,
        max: AtomicUsize,
    }

    impl RedisTranscripts {
        pub fn new(client: redis::Client, prefix: impl Into<String>, max: usize) -> Self {
            Self {
                client,
                prefix: prefix.into(),
                max: AtomicUsize::new(max),
            }
        }

        fn key(&self, channel: &str) -> String {
            format!("{}:{}", self.prefix, channel)
        }
    }

    #[async_trait]
    impl TranscriptStore for RedisTranscripts {
        async fn append(&self, channel: &str, text: &str) -> anyhow::Result<()> {
            let mut conn = self.client.get_async_connection().await?;
            let key = self.key(channel);
            let _: () = conn.append(&key, text).await?;
            let mut current: String = conn.get(&key).await?;
            let before = current.len();
            keep_tail(&mut current, self.max.load(Ordering::Relaxed));
            if current.len() != before {
                let _: () = conn.set(&key, current).await?;
            }
            Ok(())
        }

        async fn get(&self, channel: &str) -> anyhow::Result<String> {
            let mut conn = self.client.get_async_connection().await?;
            let raw: Option<String> = conn.get(self.key(channel)).await?;
            Ok(raw.unwrap_or_default())
        }

        fn set_limit(&self, max_chars: usize) {
            self.max.store(max_chars, Ordering::Relaxed);
        }
    }
}
