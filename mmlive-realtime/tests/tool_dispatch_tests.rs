//! Tool calls answered through a live session.

mod common;

use async_trait::async_trait;
use common::*;
use mmlive_realtime::protocol::FunctionCall;
use mmlive_realtime::{LiveConfig, LiveEvent, LiveSession, Result, ToolDefinition, ToolDispatcher, ToolHandler, ToolRegistry};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Answers only once released.
struct GatedHandler {
    gate: Arc<Notify>,
}

#[async_trait]
impl ToolHandler for GatedHandler {
    async fn execute(&self, _call: &FunctionCall) -> Result<Value> {
        self.gate.notified().await;
        Ok(json!({ "status": "late" }))
    }
}

fn weather_tool() -> ToolDefinition {
    ToolDefinition::new("get_weather")
        .with_description("Current weather for a city")
        .with_parameters(json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city"]
        }))
}

fn registry(gate: Arc<Notify>) -> ToolRegistry {
    ToolRegistry::new()
        .tool_fn(weather_tool(), |call| {
            let city = call.args["city"].as_str().unwrap_or("nowhere");
            Ok(json!({ "city": city, "forecast": "sunny" }))
        })
        .tool(ToolDefinition::new("slow_lookup"), GatedHandler { gate })
}

#[tokio::test]
async fn test_tool_call_gets_one_response() {
    let (connector, mut accepted) = ScriptedConnector::new();
    let session = LiveSession::with_connector(options(), connector.clone());
    let registry = registry(Arc::new(Notify::new()));
    let _dispatcher = ToolDispatcher::spawn(session.clone(), registry.clone());

    session.connect(registry.apply_to(LiveConfig::default())).await.unwrap();
    let mut server = next_socket(&mut accepted).await;

    let setup = server.recv_json().await;
    let declarations = &setup["setup"]["tools"][0]["functionDeclarations"];
    assert_eq!(declarations[0]["name"], "get_weather");
    assert_eq!(declarations[1]["name"], "slow_lookup");

    server.send_json(json!({
        "toolCall": {
            "functionCalls": [
                { "name": "get_weather", "id": "call-1", "args": { "city": "Lisbon" } },
                { "name": "launch_rocket", "id": "call-2", "args": {} }
            ]
        }
    }));

    let response = server.recv_json().await;
    assert_eq!(
        response,
        json!({
            "toolResponse": {
                "functionResponses": [
                    { "id": "call-1", "response": { "city": "Lisbon", "forecast": "sunny" } },
                    { "id": "call-2", "response": { "error": "Unknown tool: launch_rocket" } }
                ]
            }
        })
    );
    assert!(server.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_calls_are_not_answered() {
    let (connector, mut accepted) = ScriptedConnector::new();
    let session = LiveSession::with_connector(options(), connector.clone());
    let gate = Arc::new(Notify::new());
    let registry = registry(gate.clone());
    let _dispatcher = ToolDispatcher::spawn(session.clone(), registry.clone());

    session.connect(registry.apply_to(LiveConfig::default())).await.unwrap();
    let mut events = session.subscribe();
    let mut server = next_socket(&mut accepted).await;
    server.recv_json().await;

    server.send_json(json!({
        "toolCall": { "functionCalls": [{ "name": "slow_lookup", "id": "slow-1", "args": {} }] }
    }));
    server.send_json(json!({ "toolCallCancellation": { "ids": ["slow-1"] } }));
    signals_until(&mut events, |e| matches!(e, LiveEvent::ToolCallCancellation(_))).await;
    // Let the dispatcher observe the cancellation before the handler returns.
    tokio::time::sleep(Duration::from_millis(10)).await;
    gate.notify_one();

    server.send_json(json!({
        "toolCall": { "functionCalls": [{ "name": "get_weather", "id": "fast-1", "args": { "city": "Oslo" } }] }
    }));
    let response = server.recv_json().await;
    let responses = response["toolResponse"]["functionResponses"].as_array().unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], "fast-1");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(server.pending().is_empty());
}

#[tokio::test]
async fn test_dispatcher_handle_keeps_driver_running() {
    let (connector, mut accepted) = ScriptedConnector::new();
    let session = LiveSession::with_connector(options(), connector.clone());
    session.connect(LiveConfig::default()).await.unwrap();
    let mut server = next_socket(&mut accepted).await;
    server.recv_json().await;

    let dispatcher = ToolDispatcher::spawn(session.clone(), ToolRegistry::new());
    let mut states = session.state_changes();
    drop(session);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(states.has_changed().is_ok(), "driver stopped while the dispatcher still held a handle");

    drop(dispatcher);
    assert!(server.client_closed().await);
    tokio::time::timeout(WAIT, async { while states.changed().await.is_ok() {} })
        .await
        .expect("driver kept running after the last handle was dropped");
}
