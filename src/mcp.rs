//! MCP surface: lists the catalog plus the status tool and hands every call to
//! the router.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, JsonObject, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData, RoleServer, ServerHandler, ServiceExt};
use serde_json::{json, Value};
use tracing::info;

use crate::router::{ToolRouter, SERVER_VERSION, STATUS_TOOL, STATUS_TOOL_DESCRIPTION};

const INSTRUCTIONS: &str = "Godot editor bridge. Call get_godot_status first: when the editor is not connected every tool returns mock data marked with _mock. map_project opens an interactive project map in the browser.";

#[derive(Clone)]
pub struct EditorMcp {
    router: Arc<ToolRouter>,
}

impl EditorMcp {
    pub fn new(router: Arc<ToolRouter>) -> Self {
        Self { router }
    }

    /// Serves MCP over stdin/stdout until the client goes away.
    pub async fn serve_stdio(self) -> Result<()> {
        info!("MCP server ready on stdio");
        let service = self
            .serve((tokio::io::stdin(), tokio::io::stdout()))
            .await
            .context("failed starting MCP stdio transport")?;
        let reason = service.waiting().await.context("MCP service task failed")?;
        info!("MCP session ended: {reason:?}");
        Ok(())
    }

    fn tools(&self) -> Vec<Tool> {
        let catalog = self.router.catalog();
        let mut tools = Vec::with_capacity(catalog.len() + 1);
        tools.push(Tool::new(
            STATUS_TOOL,
            STATUS_TOOL_DESCRIPTION,
            Arc::new(empty_object_schema()),
        ));
        tools.extend(catalog.tools().iter().map(|tool| {
            Tool::new(tool.name, tool.description, Arc::new(tool.input_schema()))
        }));
        tools
    }

    async fn dispatch(&self, name: &str, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let reply = self
            .router
            .handle(name, args)
            .await
            .map_err(|err| ErrorData::invalid_params(err.to_string(), None))?;
        let text = serde_json::to_string(reply.payload()).map_err(|err| {
            ErrorData::internal_error(format!("failed encoding tool result: {err}"), None)
        })?;
        if reply.is_error() {
            Ok(CallToolResult::error(vec![Content::text(text)]))
        } else {
            Ok(CallToolResult::success(vec![Content::text(text)]))
        }
    }
}

impl ServerHandler for EditorMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "godot-mcp-server".into(),
                version: SERVER_VERSION.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(self.tools())))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        _: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let args = request.arguments.unwrap_or_default();
            self.dispatch(&request.name, args).await
        }
    }
}

fn empty_object_schema() -> JsonObject {
    match json!({"type": "object", "properties": {}}) {
        Value::Object(schema) => schema,
        _ => JsonObject::new(),
    }
}
