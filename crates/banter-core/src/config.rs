use crate::rate::RateWindow;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

pub const DEFAULT_HISTORY_TO_KEEP: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub irc: IrcConfig,
    pub rate_limit: RateLimitConfig,
    /// Full prefix (`nick!user@host`) allowed to run admin commands.
    #[serde(default)]
    pub admin: String,
    #[serde(default = "default_command_key")]
    pub command_key: String,
    #[serde(default = "default_history")]
    pub history_to_keep: usize,
    #[serde(default)]
    pub respond_without_prompt: Option<UnpromptedConfig>,
    /// Seconds between unprompted messages; 0 disables them.
    #[serde(default)]
    pub message_randomly_time: u64,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrcConfig {
    pub server: String,
    pub port: u16,
    pub nick: String,
    #[serde(default)]
    pub nickpass: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_realname")]
    pub realname: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub messages: usize,
    pub seconds: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> RateWindow {
        RateWindow::new(self.messages, self.seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnpromptedConfig {
    pub messages_between: u64,
    pub seconds_since_last_response: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout(),
            endpoint: default_endpoint(),
        }
    }
}

fn default_command_key() -> String {
    "!".into()
}

fn default_history() -> usize {
    DEFAULT_HISTORY_TO_KEEP
}

fn default_realname() -> String {
    "banter".into()
}

fn default_model() -> String {
    "gpt-3.5-turbo-instruct".into()
}

fn default_max_tokens() -> u32 {
    64
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout() -> u64 {
    30
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/completions".into()
}

impl Config {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config = toml::from_str::<Config>(raw).context("parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.irc.server.trim().is_empty() {
            bail!("irc.server must not be empty");
        }
        if self.irc.nick.trim().is_empty() {
            bail!("irc.nick must not be empty");
        }
        if self.rate_limit.messages == 0 {
            bail!("rate_limit.messages must be at least 1");
        }
        if self.command_key.is_empty() {
            bail!("command_key must not be empty");
        }
        Ok(())
    }
}

/// File-backed config that can be re-read while the session keeps running.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<Config>>,
}

impl ConfigStore {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let config = Config::load(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn get(&self) -> Arc<Config> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-read the file. On error the previous config stays in place.
    pub fn reload(&self) -> anyhow::Result<Arc<Config>> {
        let config = Arc::new(Config::load(&self.path)?);
        match self.current.write() {
            Ok(mut guard) => *guard = config.clone(),
            Err(poisoned) => *poisoned.into_inner() = config.clone(),
        }
        info!(path = %self.path.display(), "config reloaded");
        Ok(config)
    }
}
