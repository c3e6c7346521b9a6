use crate::state::BotState;
use async_trait::async_trait;
use banter_core::{ChannelMessage, MessageHandler, SessionHandle};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Join(String),
    Part(Option<String>),
    Shutdown,
    ReloadConfig,
    Unknown(String),
}

impl AdminCommand {
    /// `None` when the text is not addressed to the bot as a command.
    pub fn parse(text: &str, command_key: &str) -> Option<Self> {
        let body = text.strip_prefix(command_key)?;
        let mut parts = body.splitn(2, ' ');
        let name = parts.next().unwrap_or("").to_lowercase();
        let args = parts.next().unwrap_or("").trim().to_string();
        let cmd = match name.as_str() {
            "join" => Self::Join(args),
            "leave" | "part" => Self::Part(if args.is_empty() { None } else { Some(args) }),
            "shutdown" => Self::Shutdown,
            "reload_config" | "config" | "reloadconfig" => Self::ReloadConfig,
            _ => Self::Unknown(name),
        };
        Some(cmd)
    }
}

/// Compare a received prefix with the configured admin, ignoring the leading `:`.
pub fn is_admin(raw_prefix: &str, admin: &str) -> bool {
    let admin = admin.trim_start_matches(':');
    !admin.is_empty() && raw_prefix.trim_start_matches(':') == admin
}

/// Where a reply to `msg` goes: the channel, or the sender for a DM.
pub fn reply_target(msg: &ChannelMessage, nick: &str) -> String {
    if msg.channel == nick {
        msg.sender.clone()
    } else {
        msg.channel.clone()
    }
}

pub struct AdminHandler {
    bot: Arc<BotState>,
}

impl AdminHandler {
    pub fn new(bot: Arc<BotState>) -> Self {
        Self { bot }
    }

    async fn reload(&self, session: &SessionHandle, target: &str, sender: &str) -> anyhow::Result<()> {
        match self.bot.config.reload() {
            Ok(config) => {
                session.apply_config(&config);
                self.bot.transcripts.set_limit(config.history_to_keep);
                self.bot.notify_reloaded();
                session
                    .send_to_channel(target, &format!("{sender}: reloaded config"))
                    .await?;
            }
            Err(err) => {
                warn!(%err, "config reload failed");
                session
                    .send_to_channel(target, &format!("{sender}: reload failed: {err}"))
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for AdminHandler {
    fn name(&self) -> &str {
        "admin"
    }

    async fn handle(&self, session: &SessionHandle, msg: &ChannelMessage) -> anyhow::Result<()> {
        let config = self.bot.config.get();
        if !is_admin(&msg.raw_prefix, &config.admin) {
            return Ok(());
        }
        let Some(cmd) = AdminCommand::parse(&msg.text, &config.command_key) else {
            return Ok(());
        };
        let target = reply_target(msg, &session.nick());
        info!(?cmd, sender = %msg.sender, "admin command");

        match cmd {
            AdminCommand::Join(channel) if channel.is_empty() => {
                session
                    .send_to_channel(&target, &format!("{}: usage: join <channel>", msg.sender))
                    .await?;
            }
            AdminCommand::Join(channel) => session.join_channel(&channel).await?,
            AdminCommand::Part(channel) => {
                let channel = channel.unwrap_or_else(|| target.clone());
                session.part_channel(&channel).await?;
            }
            AdminCommand::Shutdown => session.stop(),
            AdminCommand::ReloadConfig => self.reload(session, &target, &msg.sender).await?,
            AdminCommand::Unknown(name) => {
                warn!(command = %name, "unknown admin command");
                session
                    .send_to_channel(&target, &format!("{}: unknown command {name}", msg.sender))
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{bot_with, Wire, CONFIG};
    use banter_core::{ConnectionParams, RateWindow, Session};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn parse_commands() {
        assert_eq!(
            AdminCommand::parse("!join #rust", "!"),
            Some(AdminCommand::Join("#rust".into()))
        );
        assert_eq!(AdminCommand::parse("!leave", "!"), Some(AdminCommand::Part(None)));
        assert_eq!(
            AdminCommand::parse("!part #rust", "!"),
            Some(AdminCommand::Part(Some("#rust".into())))
        );
        assert_eq!(AdminCommand::parse("!shutdown", "!"), Some(AdminCommand::Shutdown));
        for alias in ["!reload_config", "!config", "!reloadconfig"] {
            assert_eq!(AdminCommand::parse(alias, "!"), Some(AdminCommand::ReloadConfig));
        }
        assert_eq!(
            AdminCommand::parse("!dance now", "!"),
            Some(AdminCommand::Unknown("dance".into()))
        );
        assert_eq!(AdminCommand::parse("join #rust", "!"), None);
    }

    #[test]
    fn multi_char_command_key() {
        assert_eq!(
            AdminCommand::parse("bot: shutdown", "bot: "),
            Some(AdminCommand::Shutdown)
        );
    }

    #[test]
    fn admin_match_ignores_leading_colon() {
        assert!(is_admin(":boss!b@host", "boss!b@host"));
        assert!(is_admin(":boss!b@host", ":boss!b@host"));
        assert!(!is_admin(":boss!x@host", "boss!b@host"));
        assert!(!is_admin(":", ""));
    }

    #[test]
    fn dm_replies_go_to_sender() {
        let msg = ChannelMessage {
            sender: "alice".into(),
            channel: "banter".into(),
            text: "hi".into(),
            raw_prefix: ":alice!a@h".into(),
        };
        assert_eq!(reply_target(&msg, "banter"), "alice");
        let msg = ChannelMessage {
            channel: "#test".into(),
            ..msg
        };
        assert_eq!(reply_target(&msg, "banter"), "#test");
    }

    #[tokio::test]
    async fn reload_applies_new_config_and_reports() {
        let (bot, _, dir) = bot_with(CONFIG, None);
        let config = bot.config.get();
        let mut session = Session::new(ConnectionParams::from_config(&config), config.rate_limit.window());
        session
            .dispatcher_mut()
            .add_message_handler(Arc::new(AdminHandler::new(bot.clone())));
        let mut wire = Wire::start(session).await;
        let path = dir.path().join("banter.toml");

        let updated = CONFIG
            .replace(r##"channels = ["#test"]"##, r##"channels = ["#test", "#more"]"##)
            .replace("messages = 5", "messages = 9")
            .replace("seconds = 10", "seconds = 30")
            .replace("history_to_keep = 500", "history_to_keep = 20");
        std::fs::write(&path, updated).unwrap();
        wire.server_write
            .write_all(b":boss!b@host PRIVMSG #test :!reload_config\r\n")
            .await
            .unwrap();
        assert_eq!(wire.next_line().await, "PRIVMSG #test :boss: reloaded config\r\n");

        assert_eq!(wire.handle.channels(), vec!["#test", "#more"]);
        assert_eq!(wire.handle.rate_window(), RateWindow::new(9, 30));
        bot.transcripts.append("#x", &"y".repeat(30)).await.unwrap();
        assert_eq!(bot.transcripts.get("#x").await.unwrap().len(), 20);
        tokio::time::timeout(Duration::from_secs(1), bot.wait_reloaded())
            .await
            .expect("unprompted task was not woken");

        std::fs::write(&path, "not = [valid").unwrap();
        wire.server_write
            .write_all(b":boss!b@host PRIVMSG #test :!config\r\n")
            .await
            .unwrap();
        let line = wire.next_line().await;
        assert!(line.starts_with("PRIVMSG #test :boss: reload failed: "), "{line}");
        assert_eq!(bot.config.get().irc.channels, vec!["#test", "#more"]);
        assert_eq!(wire.handle.rate_window(), RateWindow::new(9, 30));

        wire.stop().await;
    }
}
