//! Shared harness: an in-memory connector whose sockets are driven by the test.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc as duplex;
use futures::{SinkExt, StreamExt};
use mmlive_realtime::{
    Connector, LiveEvent, RealtimeError, Result, SessionOptions, Transport, TransportEvent,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::time::Instant;
use url::Url;

pub const WAIT: Duration = Duration::from_secs(30);

/// What the next connect attempt does.
pub enum Plan {
    Accept,
    Refuse(&'static str),
    /// Accept once the notify fires.
    AcceptAfter(Arc<Notify>),
    /// Accept, but every write fails. The socket is not handed to the test.
    AcceptBroken,
}

/// Connector handing every accepted socket to the test.
pub struct ScriptedConnector {
    plans: Mutex<VecDeque<Plan>>,
    attempts: Mutex<Vec<Instant>>,
    accepted: mpsc::UnboundedSender<ServerSocket>,
    broken: Mutex<Vec<duplex::UnboundedSender<Result<TransportEvent>>>>,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSocket>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            plans: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
            accepted,
            broken: Mutex::new(Vec::new()),
        };
        (Arc::new(connector), rx)
    }

    /// Queue plans for the next attempts. Attempts without a plan are accepted.
    pub fn plan(&self, plan: Plan) {
        self.plans.lock().push_back(plan);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: Url) -> Result<Transport> {
        self.attempts.lock().push(Instant::now());
        let plan = self.plans.lock().pop_front().unwrap_or(Plan::Accept);
        let broken = match plan {
            Plan::Accept => false,
            Plan::Refuse(reason) => return Err(RealtimeError::connection(reason)),
            Plan::AcceptAfter(gate) => {
                gate.notified().await;
                false
            }
            Plan::AcceptBroken => true,
        };

        let (client_tx, from_client) = duplex::unbounded::<String>();
        let (to_client, client_rx) = duplex::unbounded::<Result<TransportEvent>>();
        let sink = client_tx.sink_map_err(|e| RealtimeError::connection(e.to_string()));
        let server = ServerSocket { url, from_client, to_client };
        if broken {
            // Keep the read half open so only writes fail.
            let ServerSocket { to_client, .. } = server;
            self.broken.lock().push(to_client);
        } else {
            let _ = self.accepted.send(server);
        }
        Ok(Transport::new(Box::pin(sink), Box::pin(client_rx)))
    }
}

/// Server end of an accepted socket. Dropping it drops the connection.
pub struct ServerSocket {
    pub url: Url,
    from_client: duplex::UnboundedReceiver<String>,
    to_client: duplex::UnboundedSender<Result<TransportEvent>>,
}

impl ServerSocket {
    /// Next frame sent by the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.from_client.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the socket");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Frames already sent and not yet received.
    pub fn pending(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(Some(text)) = self.from_client.try_next() {
            frames.push(serde_json::from_str(&text).expect("client sent invalid JSON"));
        }
        frames
    }

    /// Whether the client closed its sending half.
    pub async fn client_closed(&mut self) -> bool {
        matches!(tokio::time::timeout(WAIT, self.from_client.next()).await, Ok(None))
    }

    pub fn send_json(&self, frame: Value) {
        self.to_client
            .unbounded_send(Ok(TransportEvent::Frame(frame.to_string())))
            .expect("client stream dropped");
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(TransportEvent::Frame(text.to_string())));
    }

    /// Send a close frame, then hang up.
    pub fn close(self, reason: &str) {
        let _ = self.to_client.unbounded_send(Ok(TransportEvent::Closed { reason: reason.to_string() }));
    }
}

pub fn options() -> SessionOptions {
    SessionOptions::new("test-key").with_endpoint("wss://live.test/ws")
}

pub async fn next_socket(accepted: &mut mpsc::UnboundedReceiver<ServerSocket>) -> ServerSocket {
    tokio::time::timeout(WAIT, accepted.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Next event that is not a streaming log entry.
pub async fn next_signal(events: &mut broadcast::Receiver<LiveEvent>) -> LiveEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if event.is_log() => continue,
                Ok(event) => return event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("session events closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for a session event")
}

/// Collect signals until `stop` matches, inclusive.
pub async fn signals_until(
    events: &mut broadcast::Receiver<LiveEvent>,
    stop: impl Fn(&LiveEvent) -> bool,
) -> Vec<LiveEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_signal(events).await;
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Signals already buffered on `events`.
pub fn drain_signals(events: &mut broadcast::Receiver<LiveEvent>) -> Vec<LiveEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if !event.is_log() {
            seen.push(event);
        }
    }
    seen
}

/// Base64 PCM16 of `samples` silent samples.
pub fn silent_pcm_base64(samples: usize) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(vec![0u8; samples * 2])
}
