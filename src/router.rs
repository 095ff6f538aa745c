use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::bridge::{EditorBridge, InvokeError};
use crate::catalog::{ToolArgs, ToolCatalog};
use crate::relay::VisualizationRelay;

pub const STATUS_TOOL: &str = "get_godot_status";
pub const STATUS_TOOL_DESCRIPTION: &str = "Check if the Godot editor is connected. Use this before other tools to see whether results will be live or mock data.";
pub const PROJECT_MAP_TOOL: &str = "map_project";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

const FAILURE_HINT: &str =
    "The tool call was sent to Godot but failed. Check Godot editor for details.";

/// Outcome of a routed call. `Failure` still carries a well-formed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolReply {
    Success(Value),
    Failure(Value),
}

impl ToolReply {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn payload(&self) -> &Value {
        match self {
            Self::Success(payload) | Self::Failure(payload) => payload,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Unknown tool: {name}. Available tools: {}", .available.join(", "))]
    UnknownTool {
        name: String,
        available: Vec<&'static str>,
    },
}

pub struct ToolRouter {
    bridge: EditorBridge,
    relay: VisualizationRelay,
    catalog: ToolCatalog,
}

impl ToolRouter {
    pub fn new(bridge: EditorBridge, relay: VisualizationRelay, catalog: ToolCatalog) -> Self {
        Self {
            bridge,
            relay,
            catalog,
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Routes a call to the editor, falling back to the catalog placeholder
    /// while no editor is attached.
    pub async fn handle(&self, name: &str, args: ToolArgs) -> Result<ToolReply, RouterError> {
        if name == STATUS_TOOL {
            return Ok(ToolReply::Success(self.status().await));
        }
        let Some(tool) = self.catalog.get(name) else {
            return Err(RouterError::UnknownTool {
                name: name.to_owned(),
                available: self.available_tools(),
            });
        };

        let result = match self.bridge.invoke(tool.name, Value::Object(args.clone())).await {
            Ok(result) => result,
            Err(InvokeError::NotConnected) => {
                debug!("Godot not connected, returning placeholder for {name}");
                tool.mock_response(&args)
            }
            Err(err) => {
                warn!("tool {name} failed: {err}");
                return Ok(ToolReply::Failure(failure_payload(name, args, &err)));
            }
        };

        if tool.name == PROJECT_MAP_TOOL {
            return Ok(ToolReply::Success(self.attach_visualization(result).await));
        }
        Ok(ToolReply::Success(result))
    }

    pub async fn status(&self) -> Value {
        let status = self.bridge.status().await;
        let (mode, message) = if status.connected {
            let project = status
                .project_path
                .as_deref()
                .map(|path| format!(" ({path})"))
                .unwrap_or_default();
            (
                "live",
                format!("Godot is connected{project}. Tools will execute in the Godot editor."),
            )
        } else {
            (
                "mock",
                "Godot is not connected. Tools will return mock data. Open a Godot project with the MCP plugin enabled to connect.".to_owned(),
            )
        };
        json!({
            "connected": status.connected,
            "server_version": SERVER_VERSION,
            "websocket_port": status.port,
            "mode": mode,
            "project_path": status.project_path,
            "connected_at": status.connected_at,
            "pending_requests": status.pending_requests,
            "message": message,
        })
    }

    fn available_tools(&self) -> Vec<&'static str> {
        let mut names = vec![STATUS_TOOL];
        names.extend(self.catalog.names());
        names
    }

    async fn attach_visualization(&self, mut result: Value) -> Value {
        let Some(project_map) = result.get("project_map").cloned() else {
            return result;
        };
        let url = match self.relay.serve(&project_map).await {
            Ok(url) => url,
            Err(err) => {
                warn!("visualization failed: {err:#}");
                return result;
            }
        };
        let count = |key: &str| project_map.get(key).and_then(Value::as_u64).unwrap_or(0);
        let message = format!(
            "Project mapped: {} scripts, {} connections. Interactive visualization opened in browser at {url}",
            count("total_scripts"),
            count("total_connections"),
        );
        if let Value::Object(map) = &mut result {
            map.insert("visualization_url".to_owned(), Value::String(url));
            map.insert("message".to_owned(), Value::String(message));
        }
        result
    }
}

fn failure_payload(tool: &str, args: Map<String, Value>, err: &InvokeError) -> Value {
    json!({
        "error": err.to_string(),
        "tool": tool,
        "args": args,
        "mode": "live",
        "hint": FAILURE_HINT,
    })
}
