//! Connection state machine.
//!
//! [`ConnectionMachine::handle`] is the only place where connection state
//! changes. It never performs I/O: it returns a list of [`Action`]s that the
//! session driver executes in order, feeding socket outcomes back in as new
//! [`Input`]s.
//!
//! Every socket is tagged with a generation number. Inputs carrying a
//! generation other than the current one belong to a socket that was already
//! replaced or torn down and are ignored, so at most one socket is ever
//! current.

use crate::config::{LiveConfig, SessionOptions};
use crate::error::{RealtimeError, Result};
use crate::events::{AudioPayload, LiveEvent};
use crate::protocol::{self, InboundMessage, OutboundMessage, ServerContent};
use crate::queue::OutboundQueue;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Reconnect scheduled after an unintentional close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRetry {
    /// One-based number of the attempt that will run at `fire_at`.
    pub attempt: u32,
    /// When the attempt starts.
    pub fire_at: Instant,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// Socket open in flight.
    Connecting,
    /// Socket open, setup sent.
    Open,
    /// Intentional close in progress.
    Closing,
    /// No socket and no retry pending.
    Closed,
    /// Waiting for a scheduled reconnect.
    Reconnecting(PendingRetry),
}

impl ConnectionState {
    /// Short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Reconnecting(_) => "reconnecting",
        }
    }

    /// Whether frames can be transmitted right now.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something that happened to the session.
#[derive(Debug, Clone)]
pub enum Input {
    /// Caller asked to connect with the given setup.
    Connect(LiveConfig),
    /// Caller asked to disconnect.
    Disconnect,
    /// Caller asked to send a message.
    Send(OutboundMessage),
    /// The socket for `generation` finished its handshake.
    SocketOpened { generation: u64 },
    /// Opening or reading the socket for `generation` failed.
    SocketFailed { generation: u64, error: String },
    /// The socket for `generation` closed.
    SocketClosed { generation: u64, reason: String },
    /// Writing to the socket for `generation` failed. `unsent` holds the
    /// message that failed followed by every transmit that never ran.
    TransmitFailed { generation: u64, unsent: Vec<OutboundMessage>, error: String },
    /// The scheduled reconnect deadline passed.
    RetryDue,
    /// A text frame arrived on the socket for `generation`.
    Frame { generation: u64, text: String },
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open a new socket tagged with `generation`, dropping any in-flight open.
    OpenSocket { generation: u64 },
    /// Abandon the in-flight open.
    CancelConnect,
    /// Close the current socket and report back with `SocketClosed`.
    CloseSocket,
    /// Encode and write a frame on the current socket.
    Transmit(OutboundMessage),
    /// Arm the reconnect deadline.
    ScheduleRetry { fire_at: Instant },
    /// Disarm the reconnect deadline.
    CancelRetry,
    /// Resolve every pending `connect()` future.
    ResolveConnect(std::result::Result<(), String>),
    /// Broadcast an event.
    Emit(LiveEvent),
    /// Hand audio to the playback sequencer.
    PlayAudio(AudioPayload),
    /// Halt playback and clear its queue.
    StopPlayback,
}

/// Pure connection state machine.
#[derive(Debug)]
pub struct ConnectionMachine {
    options: SessionOptions,
    state: ConnectionState,
    attempt: u32,
    generation: u64,
    config: Option<LiveConfig>,
    queue: OutboundQueue,
}

impl ConnectionMachine {
    /// Create a machine in the idle state.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            state: ConnectionState::Idle,
            attempt: 0,
            generation: 0,
            config: None,
            queue: OutboundQueue::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts made since the last successful open or manual connect.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Generation of the current socket.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of messages waiting for the next open.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Apply one input and return the actions to perform, in order.
    ///
    /// Only `Send` can fail, with [`RealtimeError::NotConnected`] when no
    /// connection can be (re)established.
    pub fn handle(&mut self, input: Input, now: Instant) -> Result<Vec<Action>> {
        let actions = match input {
            Input::Connect(config) => self.on_connect(config),
            Input::Disconnect => self.on_disconnect(),
            Input::Send(message) => return self.on_send(message),
            Input::SocketOpened { generation } => self.on_opened(generation),
            Input::SocketFailed { generation, error } => self.on_lost(generation, error, now),
            Input::SocketClosed { generation, reason } => self.on_lost(generation, reason, now),
            Input::TransmitFailed { generation, unsent, error } => {
                self.queue
                    .requeue_front(unsent.into_iter().filter(|m| !matches!(m, OutboundMessage::Setup(_))));
                self.on_lost(generation, error, now)
            }
            Input::RetryDue => self.on_retry_due(),
            Input::Frame { generation, text } => self.on_frame(generation, &text),
        };
        Ok(actions)
    }

    fn open_socket(&mut self) -> Action {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        Action::OpenSocket { generation: self.generation }
    }

    fn on_connect(&mut self, config: LiveConfig) -> Vec<Action> {
        let mut actions = Vec::new();
        match self.state {
            ConnectionState::Connecting => {
                debug!("Connect requested while connecting, joining in-flight attempt");
                return actions;
            }
            ConnectionState::Open | ConnectionState::Closing => {
                actions.push(Action::CloseSocket);
                actions.push(Action::Emit(LiveEvent::Close { reason: "replaced by new connection".into() }));
            }
            ConnectionState::Reconnecting(_) => actions.push(Action::CancelRetry),
            ConnectionState::Idle | ConnectionState::Closed => {}
        }
        self.attempt = 0;
        self.config = Some(config);
        actions.push(self.open_socket());
        info!(generation = self.generation, "Connecting");
        actions
    }

    fn on_disconnect(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                info!(generation = self.generation, "Disconnecting");
                vec![Action::CloseSocket]
            }
            ConnectionState::Connecting => {
                // Invalidate the in-flight socket should it still open.
                self.generation += 1;
                self.state = ConnectionState::Closed;
                info!("Connect attempt cancelled by disconnect");
                vec![
                    Action::CancelConnect,
                    Action::ResolveConnect(Err("connect cancelled by disconnect".into())),
                    Action::Emit(LiveEvent::log("client.close", "connect cancelled")),
                ]
            }
            ConnectionState::Reconnecting(_) => {
                self.state = ConnectionState::Closed;
                info!("Pending reconnect cancelled by disconnect");
                vec![Action::CancelRetry, Action::Emit(LiveEvent::log("client.close", "reconnect cancelled"))]
            }
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed => Vec::new(),
        }
    }

    fn on_send(&mut self, message: OutboundMessage) -> Result<Vec<Action>> {
        match self.state {
            ConnectionState::Open => Ok(vec![Action::Transmit(message)]),
            ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {
                self.queue.enqueue(message);
                Ok(Vec::new())
            }
            ConnectionState::Idle | ConnectionState::Closed => {
                if self.config.is_none() || self.attempt >= self.options.max_retries {
                    return Err(RealtimeError::NotConnected);
                }
                self.queue.enqueue(message);
                info!(generation = self.generation + 1, "Send while closed, reconnecting");
                Ok(vec![self.open_socket()])
            }
            ConnectionState::Closing => Err(RealtimeError::NotConnected),
        }
    }

    fn on_opened(&mut self, generation: u64) -> Vec<Action> {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            debug!(generation, current = self.generation, "Ignoring stale socket open");
            return vec![Action::CloseSocket];
        }
        let Some(config) = self.config.clone() else {
            return vec![Action::CloseSocket];
        };

        self.state = ConnectionState::Open;
        self.attempt = 0;
        info!(generation, queued = self.queue.len(), "Socket open, sending setup");

        let mut actions = vec![Action::Emit(LiveEvent::Open), Action::Transmit(OutboundMessage::Setup(config))];
        actions.extend(self.queue.drain().into_iter().map(Action::Transmit));
        actions.push(Action::Emit(LiveEvent::Connected));
        actions.push(Action::ResolveConnect(Ok(())));
        actions
    }

    fn on_lost(&mut self, generation: u64, reason: String, now: Instant) -> Vec<Action> {
        if generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring event from stale socket");
            return Vec::new();
        }
        match self.state {
            ConnectionState::Closing => {
                self.state = ConnectionState::Closed;
                info!(generation, "Socket closed");
                vec![Action::Emit(LiveEvent::Close { reason })]
            }
            ConnectionState::Connecting => {
                warn!(generation, error = %reason, "Socket open failed");
                let mut actions = vec![
                    Action::ResolveConnect(Err(reason.clone())),
                    Action::Emit(LiveEvent::log("client.error", reason)),
                ];
                actions.extend(self.schedule_retry(now));
                actions
            }
            ConnectionState::Open => {
                warn!(generation, reason = %reason, "Socket closed unexpectedly");
                // Waiters are still pending when the setup or flush of a fresh socket failed.
                let mut actions = vec![
                    Action::ResolveConnect(Err(reason.clone())),
                    Action::Emit(LiveEvent::Close { reason }),
                ];
                actions.extend(self.schedule_retry(now));
                actions
            }
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Reconnecting(_) => Vec::new(),
        }
    }

    fn schedule_retry(&mut self, now: Instant) -> Vec<Action> {
        if self.attempt >= self.options.max_retries {
            self.state = ConnectionState::Closed;
            warn!(max_retries = self.options.max_retries, "Reconnect attempts exhausted");
            return vec![Action::Emit(LiveEvent::log(
                "client.reconnect",
                format!("giving up after {} attempts", self.attempt),
            ))];
        }
        let delay = self.options.backoff_delay(self.attempt);
        self.attempt += 1;
        let fire_at = now.checked_add(delay).unwrap_or_else(|| far_future(now));
        self.state = ConnectionState::Reconnecting(PendingRetry { attempt: self.attempt, fire_at });
        info!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        vec![
            Action::ScheduleRetry { fire_at },
            Action::Emit(LiveEvent::Reconnecting { attempt: self.attempt, delay }),
        ]
    }

    fn on_retry_due(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Reconnecting(retry) => {
                info!(attempt = retry.attempt, "Reconnecting");
                vec![self.open_socket()]
            }
            _ => Vec::new(),
        }
    }

    fn on_frame(&mut self, generation: u64, text: &str) -> Vec<Action> {
        if generation != self.generation || self.state != ConnectionState::Open {
            debug!(generation, "Dropping frame from inactive socket");
            return Vec::new();
        }
        let message = protocol::decode(text);
        let mut actions = vec![Action::Emit(LiveEvent::log(format!("server.{}", message.kind()), summarize(&message)))];
        match message {
            InboundMessage::SetupComplete => actions.push(Action::Emit(LiveEvent::SetupComplete)),
            InboundMessage::ToolCall(call) => actions.push(Action::Emit(LiveEvent::ToolCall(call))),
            InboundMessage::ToolCallCancellation(cancel) => {
                actions.push(Action::Emit(LiveEvent::ToolCallCancellation(cancel)))
            }
            InboundMessage::ServerContent(content) => dispatch_server_content(content, &mut actions),
            InboundMessage::Unknown(_) => {}
        }
        actions
    }
}

/// Stand-in deadline for delays too large to add to an `Instant`.
fn far_future(now: Instant) -> Instant {
    now + Duration::from_secs(86_400 * 365 * 30)
}

fn dispatch_server_content(content: ServerContent, actions: &mut Vec<Action>) {
    if content.interrupted {
        actions.push(Action::StopPlayback);
        actions.push(Action::Emit(LiveEvent::Interrupted));
        return;
    }
    if let Some(turn) = content.model_turn {
        let (audio, rest) = turn.split_audio();
        for blob in audio {
            match blob.decode_data() {
                Ok(data) => {
                    let payload = AudioPayload { data: Bytes::from(data), mime_type: blob.mime_type };
                    actions.push(Action::PlayAudio(payload.clone()));
                    actions.push(Action::Emit(LiveEvent::Audio(payload)));
                }
                Err(e) => {
                    warn!(error = %e, mime_type = %blob.mime_type, "Dropping undecodable audio part");
                    actions.push(Action::Emit(LiveEvent::log("server.audio", e.to_string())));
                }
            }
        }
        if let Some(rest) = rest {
            actions.push(Action::Emit(LiveEvent::Content(rest)));
        }
    }
    if content.turn_complete {
        actions.push(Action::Emit(LiveEvent::TurnComplete));
    }
}

fn summarize(message: &InboundMessage) -> String {
    match message {
        InboundMessage::SetupComplete => "setup complete".to_string(),
        InboundMessage::ServerContent(c) if c.interrupted => "interrupted".to_string(),
        InboundMessage::ServerContent(c) => {
            let parts = c.model_turn.as_ref().map_or(0, |t| t.parts.len());
            format!("parts={parts} turnComplete={}", c.turn_complete)
        }
        InboundMessage::ToolCall(call) => {
            let names: Vec<&str> = call.function_calls.iter().map(|f| f.name.as_str()).collect();
            names.join(", ")
        }
        InboundMessage::ToolCallCancellation(cancel) => cancel.ids.join(", "),
        InboundMessage::Unknown(_) => "unrecognized frame".to_string(),
    }
}
