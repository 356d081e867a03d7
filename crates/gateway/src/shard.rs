//! Shard: one persistent gateway connection.
//!
//! Owns its socket and timers exclusively. The outer [`Shard::run`] loop
//! drives reconnects with back-off; [`Shard::connect_and_stream`] is a
//! single connection lifecycle: connect → Hello → Identify/Resume →
//! heartbeating message loop. Nothing outside this task ever mutates the
//! shard's state — the fleet only forwards commands into the command
//! channel and reads the published [`ShardState`].

use std::sync::Arc;
use std::time::Duration;

use accord_wire::{
    CloseCode, Envelope, HelloPayload, OpCode, ReadyPayload, RequestGuildMembers,
    RequestSoundboardSounds, Resume, VoiceStateUpdate,
};
use anyhow::anyhow;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::{GatewayConfig, GATEWAY_VERSION};
use crate::error::{GatewayError, Result};
use crate::heartbeat::Heartbeat;
use crate::reconnect::pseudo_random_fraction;
use crate::session::{Session, ShardState, ShardStatus};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Commands the fleet (or application) can push into a shard.
#[derive(Debug, Clone)]
pub enum ShardCommand {
    UpdatePresence(Value),
    UpdateVoiceState(VoiceStateUpdate),
    RequestGuildMembers(RequestGuildMembers),
    RequestSoundboardSounds(RequestSoundboardSounds),
}

/// Events a shard emits upward.
#[derive(Debug, Clone)]
pub enum ShardEvent {
    /// A decoded gateway dispatch, READY and RESUMED included.
    Dispatch {
        shard_id: u32,
        event_type: String,
        data: Value,
    },
    /// The shard went terminally down (fatal close or exhausted retries).
    Terminated { shard_id: u32, reason: String },
}

/// Cheap cloneable handle to a running shard.
#[derive(Clone)]
pub struct ShardHandle {
    id: u32,
    commands: mpsc::Sender<ShardCommand>,
    state: watch::Receiver<ShardState>,
}

impl ShardHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current state snapshot.
    pub fn state(&self) -> ShardState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn watch(&self) -> watch::Receiver<ShardState> {
        self.state.clone()
    }

    /// Forward a command; returns `false` if the shard task is gone.
    pub async fn send(&self, command: ShardCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }
}

/// How one connection lifecycle ended.
enum ConnectionOutcome {
    /// Worth a resume/reconnect attempt.
    Recoverable { ready_seen: bool },
    /// Non-resumable close code: do not retry.
    Fatal { code: CloseCode, reason: String },
}

enum Flow {
    Continue,
    /// Close the socket and reconnect on the resume path.
    Reconnect,
}

pub struct Shard {
    id: u32,
    total: u32,
    gateway_url: String,
    config: Arc<GatewayConfig>,
    session: Session,
    state_tx: watch::Sender<ShardState>,
    events: mpsc::Sender<ShardEvent>,
    commands: mpsc::Receiver<ShardCommand>,
}

impl Shard {
    pub fn new(
        id: u32,
        total: u32,
        gateway_url: impl Into<String>,
        config: Arc<GatewayConfig>,
        events: mpsc::Sender<ShardEvent>,
    ) -> (Self, ShardHandle) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ShardState::new(id));

        let shard = Self {
            id,
            total,
            gateway_url: gateway_url.into(),
            config,
            session: Session::default(),
            state_tx,
            events,
            commands: command_rx,
        };
        let handle = ShardHandle {
            id,
            commands: command_tx,
            state: state_rx,
        };
        (shard, handle)
    }

    /// Run the shard until shutdown or a terminal failure.
    ///
    /// Recoverable disconnects reconnect with back-off (resuming when a
    /// session survives); the attempt counter resets every time a session
    /// reaches Ready/Resumed. Returns only on fatal error, exhausted
    /// attempts, or when `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let mut attempt: u32 = 0;

        let err = loop {
            if shutdown.is_cancelled() {
                break GatewayError::Shutdown;
            }

            let outcome = tokio::select! {
                r = self.connect_and_stream() => r,
                _ = shutdown.cancelled() => {
                    tracing::info!(shard_id = self.id, "shutdown requested");
                    break GatewayError::Shutdown;
                }
            };

            match outcome {
                Ok(ConnectionOutcome::Fatal { code, reason }) => {
                    tracing::error!(
                        shard_id = self.id,
                        %code,
                        reason = %reason,
                        "non-resumable close, shard going down"
                    );
                    self.session.clear();
                    self.sync_session();
                    break GatewayError::Fatal { code, reason };
                }
                Ok(ConnectionOutcome::Recoverable { ready_seen }) => {
                    // Only a completed handshake resets the budget.
                    if ready_seen {
                        attempt = 0;
                    }
                    tracing::info!(shard_id = self.id, ready_seen, "connection closed");
                }
                Err(e) => {
                    tracing::warn!(shard_id = self.id, attempt, error = %e, "connection lost");
                }
            }
            self.set_status(ShardStatus::Disconnected);

            if self.config.reconnect.should_give_up(attempt) {
                tracing::error!(shard_id = self.id, attempts = attempt, "reconnect attempts exhausted");
                self.session.clear();
                self.sync_session();
                break GatewayError::ReconnectExhausted(attempt);
            }

            let delay = self.config.reconnect.delay_for_attempt(attempt);
            tracing::info!(
                shard_id = self.id,
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                "reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break GatewayError::Shutdown,
            }
            attempt += 1;
        };

        self.set_status(ShardStatus::Idle);
        if !matches!(err, GatewayError::Shutdown) {
            let _ = self
                .events
                .send(ShardEvent::Terminated {
                    shard_id: self.id,
                    reason: err.to_string(),
                })
                .await;
        }
        Err(err)
    }

    /// One connection lifecycle. `Ok` carries how the connection ended;
    /// `Err` is a transport-level failure (connect refused, socket error),
    /// always treated as recoverable by the caller.
    async fn connect_and_stream(&mut self) -> anyhow::Result<ConnectionOutcome> {
        let resuming = self.session.can_resume();
        let url = self.connect_url(resuming);
        self.set_status(ShardStatus::Connecting);
        tracing::info!(shard_id = self.id, url = %url, resuming, "connecting to gateway");

        let (ws, _response) = connect_async(&url).await?;
        let (mut sink, mut stream) = ws.split();

        // ── Wait for Hello ───────────────────────────────────────────
        let hello = tokio::time::timeout(self.config.hello_timeout, self.await_hello(&mut stream))
            .await
            .map_err(|_| anyhow!("hello timeout"))??;
        let interval = Duration::from_millis(hello.heartbeat_interval);

        // ── Start the heartbeat engine, then handshake ───────────────
        let mut heartbeat = Heartbeat::new(interval);
        let seed = u64::from(self.id) ^ Utc::now().timestamp_millis() as u64;
        let first_beat = tokio::time::Instant::now() + heartbeat.first_delay(seed);
        let mut beat_timer = tokio::time::interval_at(first_beat, interval);
        beat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        if resuming {
            self.set_status(ShardStatus::Resuming);
            let resume = Resume {
                token: self.config.token.clone(),
                session_id: self.session.session_id.clone().unwrap_or_default(),
                seq: self.session.sequence.unwrap_or(0),
            };
            self.send(&mut sink, Envelope::resume(&resume)?).await?;
            tracing::info!(shard_id = self.id, "resume sent");
        } else {
            self.set_status(ShardStatus::Identifying);
            let identify = self.config.identify_for(self.id, self.total);
            self.send(&mut sink, Envelope::identify(&identify)?).await?;
            tracing::info!(shard_id = self.id, "identify sent");
        }

        // ── Message loop ─────────────────────────────────────────────
        // All timers live in this scope: returning tears them down before
        // the socket is dropped, so no stale timer can fire afterwards.
        let mut ready_seen = false;
        let mut commands_open = true;
        loop {
            tokio::select! {
                _ = beat_timer.tick() => {
                    if heartbeat.is_zombied() {
                        tracing::warn!(
                            shard_id = self.id,
                            "previous heartbeat never acked, force-closing zombied connection"
                        );
                        self.close(&mut sink, "zombied connection").await;
                        return Ok(ConnectionOutcome::Recoverable { ready_seen });
                    }
                    self.send_heartbeat(&mut sink, &mut heartbeat).await?;
                }

                cmd = self.commands.recv(), if commands_open => {
                    match cmd {
                        Some(cmd) => self.handle_command(&mut sink, cmd).await?,
                        None => commands_open = false,
                    }
                }

                frame = stream.next() => {
                    let Some(frame) = frame else {
                        return Ok(ConnectionOutcome::Recoverable { ready_seen });
                    };
                    let frame = frame?;

                    if let Message::Close(close_frame) = frame {
                        return Ok(self.classify_close(close_frame, ready_seen));
                    }

                    let envelope = match self.config.codec.decode(&frame) {
                        Ok(Some(envelope)) => envelope,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::debug!(shard_id = self.id, error = %e, "undecodable frame");
                            continue;
                        }
                    };

                    match self.handle_envelope(&mut sink, &mut heartbeat, envelope, &mut ready_seen).await? {
                        Flow::Continue => {}
                        Flow::Reconnect => {
                            self.close(&mut sink, "reconnect requested").await;
                            return Ok(ConnectionOutcome::Recoverable { ready_seen });
                        }
                    }
                }
            }
        }
    }

    async fn await_hello(&self, stream: &mut WsStream) -> anyhow::Result<HelloPayload> {
        while let Some(frame) = stream.next().await {
            let frame = frame?;
            if let Message::Close(close_frame) = &frame {
                return Err(anyhow!("closed before hello: {close_frame:?}"));
            }
            if let Some(envelope) = self.config.codec.decode(&frame)? {
                if envelope.op == OpCode::Hello {
                    return Ok(serde_json::from_value(envelope.d)?);
                }
                tracing::debug!(
                    shard_id = self.id,
                    op = envelope.op.code(),
                    "unexpected pre-hello frame"
                );
            }
        }
        Err(anyhow!("connection closed before hello"))
    }

    async fn handle_envelope(
        &mut self,
        sink: &mut WsSink,
        heartbeat: &mut Heartbeat,
        envelope: Envelope,
        ready_seen: &mut bool,
    ) -> anyhow::Result<Flow> {
        // Sequence tracking comes before everything else, even for frames
        // we otherwise ignore: resume correctness depends on it.
        if let Some(seq) = envelope.s {
            self.session.sequence = Some(seq);
            self.sync_session();
        }

        match envelope.op {
            OpCode::Dispatch => {
                let event_type = envelope.t.clone().unwrap_or_default();
                match event_type.as_str() {
                    "READY" => match serde_json::from_value::<ReadyPayload>(envelope.d.clone()) {
                        Ok(ready) => {
                            self.session.session_id = Some(ready.session_id);
                            self.session.resume_url = ready.resume_gateway_url;
                            self.sync_session();
                            *ready_seen = true;
                            self.set_status(ShardStatus::Ready);
                            tracing::info!(shard_id = self.id, "shard ready");
                        }
                        Err(e) => {
                            tracing::warn!(shard_id = self.id, error = %e, "malformed READY payload");
                        }
                    },
                    "RESUMED" => {
                        *ready_seen = true;
                        self.set_status(ShardStatus::Ready);
                        tracing::info!(shard_id = self.id, "session resumed");
                    }
                    _ => {}
                }
                let _ = self
                    .events
                    .send(ShardEvent::Dispatch {
                        shard_id: self.id,
                        event_type,
                        data: envelope.d,
                    })
                    .await;
            }

            // The server may demand a beat outside the regular cadence.
            OpCode::Heartbeat => {
                self.send_heartbeat(sink, heartbeat).await?;
            }

            OpCode::HeartbeatAck => {
                let latency = heartbeat.on_ack();
                self.publish(|state| {
                    state.last_heartbeat_ack = Some(Utc::now());
                    if latency.is_some() {
                        state.latency = latency;
                    }
                });
            }

            OpCode::Reconnect => {
                tracing::info!(shard_id = self.id, "server requested reconnect");
                return Ok(Flow::Reconnect);
            }

            OpCode::InvalidSession => {
                let resumable = envelope.invalid_session_resumable();
                self.handle_invalid_session(sink, resumable).await?;
            }

            other => {
                tracing::debug!(shard_id = self.id, op = other.code(), "ignoring opcode");
            }
        }
        Ok(Flow::Continue)
    }

    /// Wait a randomized delay, then re-handshake on the same socket:
    /// resume if the server allows it and we still hold a session,
    /// otherwise identify from scratch.
    async fn handle_invalid_session(
        &mut self,
        sink: &mut WsSink,
        resumable: bool,
    ) -> anyhow::Result<()> {
        let min = self.config.invalid_session_delay_min;
        let span = self
            .config
            .invalid_session_delay_max
            .saturating_sub(min);
        let seed = u64::from(self.id) ^ Utc::now().timestamp_millis() as u64;
        let delay = min + span.mul_f64(pseudo_random_fraction(seed));

        tracing::warn!(
            shard_id = self.id,
            resumable,
            delay_ms = delay.as_millis() as u64,
            "session invalidated"
        );
        tokio::time::sleep(delay).await;

        if resumable && self.session.can_resume() {
            self.set_status(ShardStatus::Resuming);
            let resume = Resume {
                token: self.config.token.clone(),
                session_id: self.session.session_id.clone().unwrap_or_default(),
                seq: self.session.sequence.unwrap_or(0),
            };
            self.send(sink, Envelope::resume(&resume)?).await?;
        } else {
            self.session.clear();
            self.sync_session();
            self.set_status(ShardStatus::Identifying);
            let identify = self.config.identify_for(self.id, self.total);
            self.send(sink, Envelope::identify(&identify)?).await?;
        }
        Ok(())
    }

    async fn handle_command(&mut self, sink: &mut WsSink, command: ShardCommand) -> anyhow::Result<()> {
        if self.state_tx.borrow().status != ShardStatus::Ready {
            tracing::debug!(shard_id = self.id, ?command, "dropping command, shard not ready");
            return Ok(());
        }
        let envelope = match command {
            ShardCommand::UpdatePresence(presence) => Envelope::presence_update(presence),
            ShardCommand::UpdateVoiceState(voice) => Envelope::voice_state_update(&voice)?,
            ShardCommand::RequestGuildMembers(req) => Envelope::request_guild_members(&req)?,
            ShardCommand::RequestSoundboardSounds(req) => {
                Envelope::request_soundboard_sounds(&req)?
            }
        };
        self.send(sink, envelope).await
    }

    async fn send_heartbeat(&self, sink: &mut WsSink, heartbeat: &mut Heartbeat) -> anyhow::Result<()> {
        self.send(sink, Envelope::heartbeat(self.session.sequence))
            .await?;
        heartbeat.on_sent();
        self.publish(|state| state.last_heartbeat_sent = Some(Utc::now()));
        Ok(())
    }

    async fn send(&self, sink: &mut WsSink, envelope: Envelope) -> anyhow::Result<()> {
        let message = self.config.codec.encode(&envelope)?;
        sink.send(message).await?;
        Ok(())
    }

    /// Best-effort close with our internal code; the session stays
    /// resumable on the server side.
    async fn close(&self, sink: &mut WsSink, reason: &'static str) {
        let frame = CloseFrame {
            code: WsCloseCode::from(CloseCode::RECONNECT.0),
            reason: reason.into(),
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            tracing::debug!(shard_id = self.id, error = %e, "close frame not delivered");
        }
    }

    fn classify_close(
        &mut self,
        close_frame: Option<CloseFrame<'_>>,
        ready_seen: bool,
    ) -> ConnectionOutcome {
        let code = close_frame
            .as_ref()
            .map(|f| CloseCode(u16::from(f.code)))
            .unwrap_or(CloseCode(1006));
        if code.is_resumable() {
            tracing::warn!(shard_id = self.id, %code, "gateway closed connection");
            ConnectionOutcome::Recoverable { ready_seen }
        } else {
            ConnectionOutcome::Fatal {
                code,
                reason: close_frame
                    .map(|f| f.reason.into_owned())
                    .unwrap_or_default(),
            }
        }
    }

    fn connect_url(&self, resuming: bool) -> String {
        let base = if resuming {
            self.session
                .resume_url
                .clone()
                .unwrap_or_else(|| self.gateway_url.clone())
        } else {
            self.gateway_url.clone()
        };
        let base = base.trim_end_matches('/');
        format!(
            "{base}/?v={GATEWAY_VERSION}&encoding={}",
            self.config.codec.transport_encoding()
        )
    }

    // ── State publishing (single writer: this task) ──────────────────

    fn set_status(&self, status: ShardStatus) {
        self.state_tx.send_modify(|state| state.status = status);
    }

    fn sync_session(&self) {
        let session = self.session.clone();
        self.state_tx.send_modify(move |state| state.session = session);
    }

    fn publish(&self, f: impl FnOnce(&mut ShardState)) {
        self.state_tx.send_modify(f);
    }
}
