//! Tools the console answers locally.

use mmlive_realtime::{ToolDefinition, ToolRegistry};
use serde_json::json;

/// Registry with the console's built-in tools.
pub fn builtin_tools() -> ToolRegistry {
    ToolRegistry::new().tool_fn(
        ToolDefinition::new("get_current_time")
            .with_description("Current local date and time on the user's machine")
            .with_parameters(json!({ "type": "object", "properties": {} })),
        |_| {
            let now = chrono::Local::now();
            Ok(json!({ "datetime": now.to_rfc3339(), "timezone": now.format("%Z").to_string() }))
        },
    )
}
