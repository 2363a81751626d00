//! Span helpers for live session operations
//!
//! Provides pre-configured spans for instrumenting the session driver,
//! connection attempts, inbound frames and tool calls.

use tracing::Span;

/// Create the span a session driver runs in
///
/// # Arguments
/// * `session_id` - Unique ID of the session
///
/// # Example
/// ```
/// use mmlive_telemetry::live_session_span;
/// let span = live_session_span("3f2c9a");
/// let _enter = span.enter();
/// ```
pub fn live_session_span(session_id: &str) -> Span {
    tracing::info_span!("live_session", session.id = session_id)
}

/// Create a span for a connect request
///
/// # Arguments
/// * `model` - Model named in the setup frame
pub fn session_connect_span(model: &str) -> Span {
    tracing::info_span!("session.connect", model.name = model, otel.kind = "client")
}

/// Create a span for handling one inbound frame
///
/// # Arguments
/// * `generation` - Socket generation the frame arrived on
pub fn frame_dispatch_span(generation: u64) -> Span {
    tracing::debug_span!("frame.dispatch", socket.generation = generation)
}

/// Create a span for tool execution
///
/// # Arguments
/// * `tool_name` - Name of the tool being executed
/// * `call_id` - ID of the function call being answered
///
/// # Example
/// ```
/// use mmlive_telemetry::tool_execute_span;
/// let span = tool_execute_span("get_weather", "call-1");
/// let _enter = span.enter();
/// // Tool execution code here
/// ```
pub fn tool_execute_span(tool_name: &str, call_id: &str) -> Span {
    tracing::info_span!("tool.execute", tool.name = tool_name, call.id = call_id, otel.kind = "internal")
}

/// Create the span a tool dispatcher runs in
pub fn tool_dispatcher_span(session_id: &str) -> Span {
    tracing::info_span!("tool.dispatcher", session.id = session_id)
}
