use std::time::Duration;

/// Why an editor call did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    #[error("Godot is not connected")]
    NotConnected,
    #[error("tool {tool} timed out after {}ms", .timeout.as_millis())]
    Timeout { tool: String, timeout: Duration },
    #[error("{0}")]
    Remote(String),
    #[error("Godot disconnected")]
    Disconnected,
    #[error("server shutting down")]
    ShuttingDown,
    #[error("failed encoding tool invocation: {0}")]
    Encode(String),
}

impl InvokeError {
    pub(crate) fn remote(message: Option<String>) -> Self {
        match message {
            Some(message) if !message.trim().is_empty() => Self::Remote(message),
            _ => Self::Remote("Tool execution failed".to_owned()),
        }
    }
}
