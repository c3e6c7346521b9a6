//! Ordered handler registry run once per inbound line.
//!
//! System handlers see every line and ignore events they do not care about.
//! Message handlers only see `ChannelMessage` events. Both lists run in
//! registration order, and a failing handler never stops the ones after it.

use crate::protocol::{ChannelMessage, Command, ProtocolEvent};
use crate::session::SessionHandle;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

#[async_trait]
pub trait SystemHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(
        &self,
        session: &SessionHandle,
        event: &ProtocolEvent,
        line: &str,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, session: &SessionHandle, msg: &ChannelMessage) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct Dispatcher {
    system: Vec<Arc<dyn SystemHandler>>,
    user: Vec<Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// PING replies, NickServ re-identification and channel rejoin, in that order.
    pub fn with_housekeeping() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.add_system_handler(Arc::new(PingResponder));
        dispatcher.add_system_handler(Arc::new(Reauthenticator));
        dispatcher.add_system_handler(Arc::new(ChannelRejoiner));
        dispatcher
    }

    pub fn add_system_handler(&mut self, handler: Arc<dyn SystemHandler>) {
        self.system.push(handler);
    }

    pub fn add_message_handler(&mut self, handler: Arc<dyn MessageHandler>) {
        self.user.push(handler);
    }

    pub async fn dispatch(&self, session: &SessionHandle, event: &ProtocolEvent, line: &str) {
        for handler in &self.system {
            if let Err(err) = handler.handle(session, event, line).await {
                warn!(handler = handler.name(), %err, "system handler failed");
            }
        }

        let ProtocolEvent::ChannelMessage(msg) = event else {
            return;
        };
        for handler in &self.user {
            // Run on its own task so a panic surfaces as a JoinError here.
            let task = {
                let handler = handler.clone();
                let session = session.clone();
                let msg = msg.clone();
                tokio::spawn(async move { handler.handle(&session, &msg).await })
            };
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(handler = handler.name(), %err, "message handler failed"),
                Err(err) => warn!(handler = handler.name(), %err, "message handler panicked"),
            }
        }
    }
}

pub struct PingResponder;

#[async_trait]
impl SystemHandler for PingResponder {
    fn name(&self) -> &str {
        "ping"
    }

    async fn handle(
        &self,
        session: &SessionHandle,
        event: &ProtocolEvent,
        _line: &str,
    ) -> anyhow::Result<()> {
        let ProtocolEvent::Ping { token } = event else {
            return Ok(());
        };
        session
            .send_command(&Command::Pong {
                token: token.clone(),
            })
            .await
    }
}

pub struct Reauthenticator;

#[async_trait]
impl SystemHandler for Reauthenticator {
    fn name(&self) -> &str {
        "reauth"
    }

    async fn handle(
        &self,
        session: &SessionHandle,
        event: &ProtocolEvent,
        _line: &str,
    ) -> anyhow::Result<()> {
        if !matches!(event, ProtocolEvent::AuthChallenge) {
            return Ok(());
        }
        session.identify().await
    }
}

pub struct ChannelRejoiner;

#[async_trait]
impl SystemHandler for ChannelRejoiner {
    fn name(&self) -> &str {
        "rejoin"
    }

    async fn handle(
        &self,
        session: &SessionHandle,
        event: &ProtocolEvent,
        _line: &str,
    ) -> anyhow::Result<()> {
        if !matches!(event, ProtocolEvent::AuthAccepted) {
            return Ok(());
        }
        session.join_configured().await
    }
}
