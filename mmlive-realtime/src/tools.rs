//! Client-side tool execution.
//!
//! Register handlers in a [`ToolRegistry`], declare them in the setup with
//! [`ToolRegistry::apply_to`], then start a [`ToolDispatcher`] on the session.
//! The dispatcher answers every `toolCall` frame with a single `toolResponse`
//! and skips calls the service cancelled in the meantime.

use crate::config::{LiveConfig, ToolDefinition};
use crate::error::{RealtimeError, Result};
use crate::events::LiveEvent;
use crate::protocol::{FunctionCall, FunctionResponse, ToolCall};
use crate::session::LiveSession;
use async_trait::async_trait;
use mmlive_telemetry::{tool_dispatcher_span, tool_execute_span};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, warn};

/// Handler for a single tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute a tool call and return the result.
    async fn execute(&self, call: &FunctionCall) -> Result<Value>;
}

/// A simple function-based tool handler.
pub struct FnToolHandler<F>
where
    F: Fn(&FunctionCall) -> Result<Value> + Send + Sync,
{
    handler: F,
}

impl<F> FnToolHandler<F>
where
    F: Fn(&FunctionCall) -> Result<Value> + Send + Sync,
{
    /// Create a new function-based tool handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> ToolHandler for FnToolHandler<F>
where
    F: Fn(&FunctionCall) -> Result<Value> + Send + Sync,
{
    async fn execute(&self, call: &FunctionCall) -> Result<Value> {
        (self.handler)(call)
    }
}

/// Tool declarations with their handlers.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, (ToolDefinition, Arc<dyn ToolHandler>)>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.tools.keys().collect::<Vec<_>>()).finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with a handler.
    pub fn tool(mut self, definition: ToolDefinition, handler: impl ToolHandler + 'static) -> Self {
        self.tools.insert(definition.name.clone(), (definition, Arc::new(handler)));
        self
    }

    /// Register a tool with a synchronous function handler.
    pub fn tool_fn<F>(self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(&FunctionCall) -> Result<Value> + Send + Sync + 'static,
    {
        self.tool(definition, FnToolHandler::new(handler))
    }

    /// Declared tools, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<_> = self.tools.values().map(|(d, _)| d.clone()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Add every registered tool to the setup's function declarations.
    pub fn apply_to(&self, config: LiveConfig) -> LiveConfig {
        self.definitions().into_iter().fold(config, LiveConfig::with_tool)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool is registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute one call. Unknown tools and handler errors become `{"error": ...}` results.
    pub async fn execute(&self, call: &FunctionCall) -> FunctionResponse {
        let output = match self.tools.get(&call.name) {
            Some((_, handler)) => {
                match handler.execute(call).instrument(tool_execute_span(&call.name, &call.id)).await {
                    Ok(value) => value,
                    Err(e) => serde_json::json!({ "error": e.to_string() }),
                }
            }
            None => serde_json::json!({ "error": format!("Unknown tool: {}", call.name) }),
        };
        FunctionResponse { response: output, id: call.id.clone() }
    }
}

/// Background task answering tool calls on a session.
#[derive(Debug)]
pub struct ToolDispatcher {
    task: JoinHandle<()>,
}

impl ToolDispatcher {
    /// Start answering tool calls on `session`.
    pub fn spawn(session: LiveSession, registry: ToolRegistry) -> Self {
        let events = session.subscribe();
        let span = tool_dispatcher_span(session.id());
        Self { task: tokio::spawn(dispatch(session, registry, events).instrument(span)) }
    }

    /// Stop answering tool calls.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for ToolDispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn dispatch(
    session: LiveSession,
    registry: ToolRegistry,
    mut events: tokio::sync::broadcast::Receiver<LiveEvent>,
) {
    let registry = Arc::new(registry);
    let mut pending = PendingCalls::default();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Vec<FunctionResponse>>();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(LiveEvent::ToolCall(call)) => {
                    pending.start(&call);
                    let registry = registry.clone();
                    let done = done_tx.clone();
                    tokio::spawn(async move {
                        let _ = done.send(run_calls(&registry, call).await);
                    });
                }
                Ok(LiveEvent::ToolCallCancellation(cancel)) => {
                    debug!(ids = ?cancel.ids, "Tool calls cancelled");
                    pending.cancel(cancel.ids);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Tool dispatcher lagged behind session events"),
                Err(RecvError::Closed) => break,
            },
            Some(responses) = done_rx.recv() => {
                let responses = pending.finish(responses);
                if responses.is_empty() {
                    continue;
                }
                if let Err(e) = session.send_tool_response(responses).await {
                    warn!(error = %e, "Failed to send tool response");
                    if matches!(e, RealtimeError::SessionClosed) {
                        break;
                    }
                }
            }
        }
    }
}

/// Ids of calls still executing, and which of them were cancelled.
#[derive(Debug, Default)]
struct PendingCalls {
    running: HashSet<String>,
    cancelled: HashSet<String>,
}

impl PendingCalls {
    fn start(&mut self, call: &ToolCall) {
        self.running.extend(call.function_calls.iter().map(|c| c.id.clone()));
    }

    /// Cancellations for calls already answered are ignored.
    fn cancel(&mut self, ids: impl IntoIterator<Item = String>) {
        let running = &self.running;
        self.cancelled.extend(ids.into_iter().filter(|id| running.contains(id)));
    }

    /// Settle finished calls, keeping the responses nobody cancelled.
    fn finish(&mut self, responses: Vec<FunctionResponse>) -> Vec<FunctionResponse> {
        responses
            .into_iter()
            .filter(|r| {
                self.running.remove(&r.id);
                !self.cancelled.remove(&r.id)
            })
            .collect()
    }
}

async fn run_calls(registry: &ToolRegistry, call: ToolCall) -> Vec<FunctionResponse> {
    let mut responses = Vec::with_capacity(call.function_calls.len());
    for function_call in &call.function_calls {
        responses.push(registry.execute(function_call).await);
    }
    responses
}
