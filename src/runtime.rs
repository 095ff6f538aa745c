use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};

use crate::bridge::EditorBridge;
use crate::catalog::ToolCatalog;
use crate::config::Config;
use crate::mcp::EditorMcp;
use crate::relay::VisualizationRelay;
use crate::router::ToolRouter;

pub struct ServerRuntime {
    config: Config,
}

impl ServerRuntime {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        info!(
            "starting runtime (bridge={}, timeout_ms={}, ping_ms={}, relay_start_port={}, open_browser={})",
            self.config.bridge.listen_addr(),
            self.config.bridge.request_timeout_ms,
            self.config.bridge.ping_interval_ms,
            self.config.relay.start_port,
            self.config.relay.open_browser
        );

        let bridge = EditorBridge::new(self.config.bridge.clone());
        bridge
            .on_connection_change(|event| {
                let mode = if event.connected { "live" } else { "mock" };
                info!("tool calls now run in {mode} mode");
            })
            .await;
        if let Err(err) = bridge.start().await {
            warn!("editor bridge unavailable, serving mock data only: {err:#}");
        }

        let relay = VisualizationRelay::new(bridge.clone(), self.config.relay.clone());
        let router = ToolRouter::new(bridge.clone(), relay.clone(), ToolCatalog::builtin());
        let server = EditorMcp::new(Arc::new(router));

        let result = tokio::select! {
            res = server.serve_stdio() => res,
            _ = signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                Ok(())
            }
        };

        relay.stop().await;
        bridge.stop().await;
        result
    }
}
