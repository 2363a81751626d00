//! Live session handle and its driver task.
//!
//! A [`LiveSession`] is a cheap cloneable handle. All state lives in a single
//! driver task that owns the socket, the [`ConnectionMachine`] and the
//! reconnect deadline; handles talk to it over a command channel and observe
//! it through a broadcast channel of [`LiveEvent`]s and a watch channel of
//! [`ConnectionState`]s.

use crate::audio::playback::PlaybackHandle;
use crate::config::{LiveConfig, SessionOptions};
use crate::error::{RealtimeError, Result};
use crate::events::LiveEvent;
use crate::machine::{Action, ConnectionMachine, ConnectionState, Input};
use crate::protocol::{self, FunctionResponse, MediaChunk, OutboundMessage};
use crate::transport::{Connector, Transport, TransportEvent, WsConnector};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use mmlive_telemetry::{frame_dispatch_span, live_session_span, session_connect_span};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{Instrument, debug, info, warn};

/// How long a graceful close may take before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

enum Command {
    Connect { config: LiveConfig, reply: oneshot::Sender<Result<()>> },
    Disconnect { reply: oneshot::Sender<()> },
    Send { message: OutboundMessage, reply: oneshot::Sender<Result<()>> },
    AttachPlayback(PlaybackHandle),
}

/// Handle to a resilient live session.
///
/// Dropping every handle shuts the driver down and closes the socket. A running
/// [`ToolDispatcher`](crate::ToolDispatcher) holds a handle of its own until it
/// is dropped or aborted.
#[derive(Clone)]
pub struct LiveSession {
    session_id: String,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<LiveEvent>,
    state: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("session_id", &self.session_id)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl LiveSession {
    /// Create a session that connects over WebSocket.
    ///
    /// Must be called from within a tokio runtime. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(options: SessionOptions) -> Self {
        Self::with_connector(options, Arc::new(WsConnector::new()))
    }

    /// Create a session using a custom transport connector.
    pub fn with_connector(options: SessionOptions, connector: Arc<dyn Connector>) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let (state_tx, state) = watch::channel(ConnectionState::Idle);

        let driver = Driver {
            machine: ConnectionMachine::new(options.clone()),
            options,
            connector,
            events: events.clone(),
            state: state_tx,
            socket: None,
            connecting: None,
            retry_at: None,
            waiters: Vec::new(),
            playback: None,
        };
        tokio::spawn(driver.run(rx).instrument(live_session_span(&session_id)));

        Self { session_id, commands, events, state }
    }

    /// Unique id of this session, used in logs.
    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Connect with the given setup, resolving once the socket is open and
    /// the setup frame was sent.
    ///
    /// Joins the in-flight attempt when already connecting. Fails if that
    /// attempt fails or is cancelled by [`disconnect`](Self::disconnect).
    pub async fn connect(&self, config: LiveConfig) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect { config, reply })?;
        rx.await.map_err(|_| RealtimeError::SessionClosed)?
    }

    /// Close the socket without reconnecting. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Disconnect { reply })?;
        rx.await.map_err(|_| RealtimeError::SessionClosed)
    }

    /// Send a message, resolving once it was written or queued for the next open.
    ///
    /// Fails with [`RealtimeError::NotConnected`] when reconnect attempts are
    /// exhausted or the session was never connected.
    pub async fn send(&self, message: OutboundMessage) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { message, reply })?;
        rx.await.map_err(|_| RealtimeError::SessionClosed)?
    }

    /// Send a user text turn.
    pub async fn send_text(&self, text: impl Into<String>, turn_complete: bool) -> Result<()> {
        self.send(OutboundMessage::text(text, turn_complete)).await
    }

    /// Stream captured media.
    pub async fn send_realtime_input(&self, chunks: Vec<MediaChunk>) -> Result<()> {
        self.send(OutboundMessage::media(chunks)).await
    }

    /// Answer tool calls.
    pub async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.send(OutboundMessage::tool_response(responses)).await
    }

    /// Route model audio to `playback` and stop it on interruptions.
    pub fn attach_playback(&self, playback: PlaybackHandle) -> Result<()> {
        self.command(Command::AttachPlayback(playback))
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.events.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| RealtimeError::SessionClosed)
    }
}

struct Socket {
    generation: u64,
    transport: Transport,
}

struct PendingConnect {
    generation: u64,
    future: BoxFuture<'static, Result<Transport>>,
}

struct Driver {
    machine: ConnectionMachine,
    options: SessionOptions,
    connector: Arc<dyn Connector>,
    events: broadcast::Sender<LiveEvent>,
    state: watch::Sender<ConnectionState>,
    socket: Option<Socket>,
    connecting: Option<PendingConnect>,
    retry_at: Option<Instant>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    playback: Option<PlaybackHandle>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                (generation, result) = next_connect(&mut self.connecting), if self.connecting.is_some() => {
                    self.connecting = None;
                    let input = match result {
                        Ok(transport) => {
                            self.socket = Some(Socket { generation, transport });
                            Input::SocketOpened { generation }
                        }
                        Err(e) => Input::SocketFailed { generation, error: e.to_string() },
                    };
                    self.feed(input).await;
                }
                (generation, event) = next_event(&mut self.socket), if self.socket.is_some() => {
                    self.on_transport_event(generation, event).await;
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.feed(Input::RetryDue).await;
                }
            }
        }

        debug!("All session handles dropped, shutting down");
        self.feed(Input::Disconnect).await;
        if let Some(mut socket) = self.socket.take() {
            let _ = timeout(CLOSE_TIMEOUT, socket.transport.sink.close()).await;
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { config, reply } => {
                if let Err(e) = config.validate().and_then(|()| self.options.url().map(drop)) {
                    let _ = reply.send(Err(e));
                    return;
                }
                let span = session_connect_span(&config.model);
                self.waiters.push(reply);
                self.feed(Input::Connect(config)).instrument(span).await;
            }
            Command::Disconnect { reply } => {
                self.feed(Input::Disconnect).await;
                let _ = reply.send(());
            }
            Command::Send { message, reply } => {
                match self.machine.handle(Input::Send(message), Instant::now()) {
                    Ok(actions) => {
                        self.execute(actions).await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::AttachPlayback(playback) => self.playback = Some(playback),
        }
    }

    async fn on_transport_event(&mut self, generation: u64, event: Option<Result<TransportEvent>>) {
        let input = match event {
            Some(Ok(TransportEvent::Frame(text))) => {
                let span = frame_dispatch_span(generation);
                self.feed(Input::Frame { generation, text }).instrument(span).await;
                return;
            }
            Some(Ok(TransportEvent::Closed { reason })) => {
                self.socket = None;
                Input::SocketClosed { generation, reason }
            }
            Some(Err(e)) if !e.triggers_reconnect() => {
                warn!(generation, error = %e, "Dropping unreadable frame");
                let _ = self.events.send(LiveEvent::log("server.error", e.to_string()));
                return;
            }
            Some(Err(e)) => {
                self.socket = None;
                Input::SocketFailed { generation, error: e.to_string() }
            }
            None => {
                self.socket = None;
                Input::SocketClosed { generation, reason: "connection closed".to_string() }
            }
        };
        self.feed(input).await;
    }

    async fn feed(&mut self, input: Input) {
        match self.machine.handle(input, Instant::now()) {
            Ok(actions) => self.execute(actions).await,
            Err(e) => warn!(error = %e, "Rejected input"),
        }
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        let mut work: VecDeque<Action> = actions.into();
        while let Some(action) = work.pop_front() {
            let follow_up = match action {
                Action::OpenSocket { generation } => self.open_socket(generation),
                Action::CancelConnect => {
                    self.connecting = None;
                    None
                }
                Action::CloseSocket => self.close_socket().await,
                Action::Transmit(message) => match self.transmit(&message).await {
                    Ok(()) => None,
                    Err(e) => {
                        let mut unsent = vec![message];
                        let mut rest = VecDeque::with_capacity(work.len());
                        for action in work.drain(..) {
                            match action {
                                Action::Transmit(message) => unsent.push(message),
                                // The socket never became usable.
                                Action::Emit(LiveEvent::Connected) | Action::ResolveConnect(Ok(())) => {}
                                other => rest.push_back(other),
                            }
                        }
                        work = rest;
                        let generation =
                            self.socket.take().map_or(self.machine.generation(), |s| s.generation);
                        warn!(generation, error = %e, requeued = unsent.len(), "Send failed");
                        Some(Input::TransmitFailed { generation, unsent, error: e.to_string() })
                    }
                },
                Action::ScheduleRetry { fire_at } => {
                    self.retry_at = Some(fire_at);
                    None
                }
                Action::CancelRetry => {
                    self.retry_at = None;
                    None
                }
                Action::ResolveConnect(result) => {
                    for waiter in self.waiters.drain(..) {
                        let _ = waiter.send(result.clone().map_err(RealtimeError::connection));
                    }
                    None
                }
                Action::Emit(event) => {
                    let _ = self.events.send(event);
                    None
                }
                Action::PlayAudio(payload) => {
                    if let Some(playback) = &self.playback {
                        if let Err(e) = playback.enqueue_pcm(&payload.data, &payload.mime_type) {
                            warn!(error = %e, mime_type = %payload.mime_type, "Dropping audio part");
                        }
                    }
                    None
                }
                Action::StopPlayback => {
                    if let Some(playback) = &self.playback {
                        if let Err(e) = playback.stop() {
                            warn!(error = %e, "Failed to stop playback");
                        }
                    }
                    None
                }
            };

            if let Some(input) = follow_up {
                match self.machine.handle(input, Instant::now()) {
                    Ok(more) => work.extend(more),
                    Err(e) => warn!(error = %e, "Rejected follow-up input"),
                }
            }
            self.publish_state();
        }
        self.publish_state();
    }

    fn open_socket(&mut self, generation: u64) -> Option<Input> {
        self.socket = None;
        match self.options.url() {
            Ok(url) => {
                let connector = self.connector.clone();
                debug!(generation, "Opening socket");
                self.connecting = Some(PendingConnect {
                    generation,
                    future: Box::pin(async move { connector.connect(url).await }),
                });
                None
            }
            Err(e) => Some(Input::SocketFailed { generation, error: e.to_string() }),
        }
    }

    async fn close_socket(&mut self) -> Option<Input> {
        let Some(mut socket) = self.socket.take() else {
            // Nothing to close; settle an intentional close right away.
            return (self.machine.state() == ConnectionState::Closing).then(|| Input::SocketClosed {
                generation: self.machine.generation(),
                reason: "closed by client".to_string(),
            });
        };
        match timeout(CLOSE_TIMEOUT, socket.transport.sink.close()).await {
            Ok(Ok(())) => debug!(generation = socket.generation, "Socket closed"),
            Ok(Err(e)) => debug!(generation = socket.generation, error = %e, "Error while closing socket"),
            Err(_) => debug!(generation = socket.generation, "Close timed out, dropping socket"),
        }
        Some(Input::SocketClosed { generation: socket.generation, reason: "closed by client".to_string() })
    }

    async fn transmit(&mut self, message: &OutboundMessage) -> Result<()> {
        let Some(socket) = self.socket.as_mut() else {
            return Err(RealtimeError::connection("no open socket"));
        };
        let text = match protocol::encode(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "Dropping unencodable message");
                return Ok(());
            }
        };
        debug!(kind = message.kind(), len = text.len(), "Sending frame");
        socket.transport.sink.send(text).await?;
        if matches!(message, OutboundMessage::Setup(_)) {
            info!(generation = socket.generation, "Setup sent");
        }
        let _ = self.events.send(LiveEvent::log("client.send", message.kind()));
        Ok(())
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

async fn next_connect(pending: &mut Option<PendingConnect>) -> (u64, Result<Transport>) {
    match pending {
        Some(pending) => (pending.generation, (&mut pending.future).await),
        None => std::future::pending().await,
    }
}

async fn next_event(socket: &mut Option<Socket>) -> (u64, Option<Result<TransportEvent>>) {
    match socket {
        Some(socket) => (socket.generation, socket.transport.stream.next().await),
        None => std::future::pending().await,
    }
}
