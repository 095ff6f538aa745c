//! Wire envelopes exchanged with the editor plugin and with the relay page.
//!
//! Editor frames are JSON text messages discriminated by a `type` field. The
//! relay page speaks a simpler `{id, command, args}` request shape and gets the
//! same `id` echoed back so it can pair replies with concurrent requests.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TOOL_RESULT: &str = "tool_result";
pub const PONG: &str = "pong";
pub const GODOT_READY: &str = "godot_ready";

/// Frames written to the editor.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage<'a> {
    ToolInvoke {
        id: &'a str,
        tool: &'a str,
        args: &'a Value,
    },
    Ping,
}

impl OutboundMessage<'_> {
    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self).context("failed serializing outbound frame")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolResultFrame {
    pub id: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Frames read from the editor, after kind dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    ToolResult(ToolResultFrame),
    Pong,
    Ready { project_path: Option<String> },
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct ReadyFrame {
    #[serde(default)]
    project_path: Option<String>,
}

pub fn parse_inbound(text: &str) -> Result<InboundMessage> {
    let frame: Value = serde_json::from_str(text).context("inbound frame is not JSON")?;
    let kind = frame
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("inbound frame has no type"))?
        .to_owned();
    match kind.as_str() {
        TOOL_RESULT => {
            let result: ToolResultFrame =
                serde_json::from_value(frame).context("invalid tool_result frame")?;
            Ok(InboundMessage::ToolResult(result))
        }
        PONG => Ok(InboundMessage::Pong),
        GODOT_READY => {
            let ready: ReadyFrame =
                serde_json::from_value(frame).context("invalid godot_ready frame")?;
            Ok(InboundMessage::Ready {
                project_path: ready.project_path,
            })
        }
        _ => Ok(InboundMessage::Unknown(kind)),
    }
}

/// A command sent by the relay page over its own socket.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayCommand {
    #[serde(default)]
    pub id: Value,
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

impl RelayCommand {
    pub fn args_object(&self) -> Value {
        match &self.args {
            Value::Object(_) => self.args.clone(),
            _ => Value::Object(Map::new()),
        }
    }
}

pub fn relay_success(id: Value, result: Value) -> Value {
    let mut reply = match result {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_owned(), other);
            map
        }
    };
    reply.insert("ok".to_owned(), Value::Bool(true));
    reply.insert("id".to_owned(), id);
    Value::Object(reply)
}

pub fn relay_failure(id: Value, error: impl Into<String>) -> Value {
    let mut reply = Map::new();
    reply.insert("id".to_owned(), id);
    reply.insert("ok".to_owned(), Value::Bool(false));
    reply.insert("error".to_owned(), Value::String(error.into()));
    Value::Object(reply)
}
