//! Live connection: handshake, receive loop and the outbound send paths.
//!
//! `Session` owns the read half and the dispatcher and drives the loop.
//! `SessionHandle` is the cloneable side given to handlers and timer tasks; it
//! serializes writes behind one lock and gates channel text through the rate
//! limiter.

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::framer::LineFramer;
use crate::protocol::{format_command, parse_line, redact, Command, ProtocolEvent};
use crate::rate::{RateLimiter, RateWindow};
use crate::transport::{self, BoxedWriter, Endpoint};
use anyhow::{bail, Context};
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Active,
    Stopping,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub endpoint: Endpoint,
    pub nick: String,
    pub nickpass: String,
    pub realname: String,
    pub channels: Vec<String>,
}

impl ConnectionParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: Endpoint {
                host: config.irc.server.clone(),
                port: config.irc.port,
                tls: config.irc.tls,
                ca_file: config.irc.ca_file.clone(),
            },
            nick: config.irc.nick.clone(),
            nickpass: config.irc.nickpass.clone(),
            realname: config.irc.realname.clone(),
            channels: config.irc.channels.clone(),
        }
    }
}

struct Shared {
    params: RwLock<ConnectionParams>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    limiter: Mutex<RateLimiter>,
    state: watch::Sender<SessionState>,
}

#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    fn new(params: ConnectionParams, window: RateWindow) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                params: RwLock::new(params),
                writer: tokio::sync::Mutex::new(None),
                limiter: Mutex::new(RateLimiter::new(window)),
                state,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn nick(&self) -> String {
        self.params().nick
    }

    pub fn channels(&self) -> Vec<String> {
        self.params().channels
    }

    pub fn rate_window(&self) -> RateWindow {
        self.limiter().window()
    }

    /// Sends currently retained by the rate limiter.
    pub fn rate_recorded(&self) -> usize {
        self.limiter().recorded()
    }

    /// Pick up reloaded channels, NickServ secret and rate quota.
    /// The nick and server only take effect on the next connection.
    pub fn apply_config(&self, config: &Config) {
        {
            let mut params = match self.shared.params.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            params.channels = config.irc.channels.clone();
            params.nickpass = config.irc.nickpass.clone();
            params.realname = config.irc.realname.clone();
        }
        self.limiter().set_window(config.rate_limit.window());
    }

    /// Write one raw line as given; the caller supplies the terminator.
    /// Never rate limited.
    pub async fn send(&self, raw: &str) -> anyhow::Result<()> {
        info!(line = %redact(raw), ">");
        let mut writer = self.shared.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            bail!("not connected");
        };
        writer
            .write_all(raw.as_bytes())
            .await
            .context("write to server")?;
        writer.flush().await.context("flush to server")?;
        Ok(())
    }

    pub async fn send_command(&self, cmd: &Command) -> anyhow::Result<()> {
        self.send(&format_command(cmd)).await
    }

    /// Rate-limited PRIVMSG. Returns `false` when the message was dropped.
    pub async fn send_to_channel(&self, channel: &str, text: &str) -> anyhow::Result<bool> {
        let admitted = self.limiter().try_admit();
        if !admitted {
            debug!(%channel, "rate limit reached, dropping message");
            return Ok(false);
        }
        self.send_command(&Command::Privmsg {
            target: channel.to_string(),
            text: text.to_string(),
        })
        .await?;
        Ok(true)
    }

    pub async fn join_channel(&self, channel: &str) -> anyhow::Result<()> {
        self.send_command(&Command::Join {
            channel: channel.to_string(),
        })
        .await
    }

    pub async fn part_channel(&self, channel: &str) -> anyhow::Result<()> {
        self.send_command(&Command::Part {
            channel: channel.to_string(),
        })
        .await
    }

    pub async fn identify(&self) -> anyhow::Result<()> {
        let secret = self.params().nickpass;
        self.send_command(&Command::Identify { secret }).await
    }

    /// JOIN every configured channel, in configured order.
    pub async fn join_configured(&self) -> anyhow::Result<()> {
        for channel in self.channels() {
            self.join_channel(&channel).await?;
        }
        Ok(())
    }

    /// Ask the receive loop to exit after the line it is handling. Safe to call
    /// from a handler running on that loop.
    pub fn stop(&self) {
        let changed = self.shared.state.send_if_modified(|state| {
            if matches!(state, SessionState::Stopping | SessionState::Closed) {
                return false;
            }
            *state = SessionState::Stopping;
            true
        });
        if changed {
            info!("session stop requested");
        }
    }

    fn set_state(&self, next: SessionState) {
        self.shared.state.send_if_modified(|state| {
            let stopping = matches!(state, SessionState::Stopping | SessionState::Closed);
            if *state == next || (stopping && next != SessionState::Closed) {
                return false;
            }
            debug!(from = ?*state, to = ?next, "session state");
            *state = next;
            true
        });
    }

    async fn attach(&self, writer: BoxedWriter) {
        *self.shared.writer.lock().await = Some(writer);
    }

    async fn close(&self) {
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.set_state(SessionState::Closed);
    }

    fn params(&self) -> ConnectionParams {
        match self.shared.params.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn limiter(&self) -> std::sync::MutexGuard<'_, RateLimiter> {
        match self.shared.limiter.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct Session {
    handle: SessionHandle,
    dispatcher: Dispatcher,
}

impl Session {
    /// A session with the PING/auth housekeeping handlers already registered.
    pub fn new(params: ConnectionParams, window: RateWindow) -> Self {
        Self {
            handle: SessionHandle::new(params, window),
            dispatcher: Dispatcher::with_housekeeping(),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Open the socket and run until stopped or the server hangs up.
    pub async fn connect(self) -> anyhow::Result<()> {
        self.handle.set_state(SessionState::Connecting);
        let endpoint = self.handle.params().endpoint;
        let (reader, writer) = match transport::open(&endpoint).await {
            Ok(halves) => halves,
            Err(err) => {
                self.handle.set_state(SessionState::Closed);
                return Err(err);
            }
        };
        self.run(reader, writer).await
    }

    /// Handshake and receive loop over an already open stream.
    pub async fn run<R>(self, reader: R, writer: BoxedWriter) -> anyhow::Result<()>
    where
        R: AsyncRead + Send + Unpin,
    {
        self.handle.set_state(SessionState::Connecting);
        self.handle.attach(writer).await;
        let result = self.drive(reader).await;
        self.handle.close().await;
        info!("session closed");
        result
    }

    async fn drive<R>(&self, mut reader: R) -> anyhow::Result<()>
    where
        R: AsyncRead + Send + Unpin,
    {
        let params = self.handle.params();
        self.handle
            .send_command(&Command::User {
                nick: params.nick.clone(),
                realname: params.realname.clone(),
            })
            .await?;
        self.handle
            .send_command(&Command::Nick {
                nick: params.nick.clone(),
            })
            .await?;
        self.handle.identify().await?;
        self.handle.set_state(SessionState::Authenticating);
        self.handle.join_configured().await?;

        let mut state_rx = self.handle.shared.state.subscribe();
        let mut framer = LineFramer::new();
        let mut buf = vec![0u8; READ_CHUNK];
        'read: loop {
            if self.stopping() {
                break;
            }
            let read = tokio::select! {
                read = reader.read(&mut buf) => read,
                _ = stop_requested(&mut state_rx) => break,
            };
            let n = match read {
                Ok(n) => n,
                Err(err) => {
                    warn!(%err, "read from server failed");
                    return Err(err).context("read from server");
                }
            };
            if n == 0 {
                info!("server closed the connection");
                if let Some(line) = framer.finish() {
                    self.process(&line).await;
                }
                break;
            }
            for line in framer.feed(&buf[..n]) {
                self.process(&line).await;
                // Lines after a stop request in the same read are dropped.
                if self.stopping() {
                    break 'read;
                }
            }
        }
        Ok(())
    }

    fn stopping(&self) -> bool {
        matches!(
            self.handle.state(),
            SessionState::Stopping | SessionState::Closed
        )
    }

    async fn process(&self, line: &str) {
        info!(%line, "<");
        let event = parse_line(line);
        if matches!(event, ProtocolEvent::AuthAccepted) {
            self.handle.set_state(SessionState::Active);
        }
        self.dispatcher.dispatch(&self.handle, &event, line).await;
    }
}

async fn stop_requested(rx: &mut watch::Receiver<SessionState>) {
    loop {
        let state = *rx.borrow_and_update();
        if matches!(state, SessionState::Stopping | SessionState::Closed) {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
