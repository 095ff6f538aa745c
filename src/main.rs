mod bridge;
mod catalog;
mod config;
mod mcp;
mod protocol;
mod relay;
mod router;
mod runtime;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    about = "MCP server bridging AI tool calls to a running Godot editor"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(
        long,
        global = true,
        env = "GODOT_MCP_CONFIG",
        default_value = "godot-mcp.toml"
    )]
    config: PathBuf,

    /// Log level filter, e.g. info,debug,trace.
    #[arg(long, global = true, env = "GODOT_MCP_LOG", default_value = "info")]
    log: String,

    /// Override the editor bridge port (0 picks a free port).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Override the first port tried by the visualization relay.
    #[arg(long = "relay-port", global = true)]
    relay_port: Option<u16>,

    /// Override the per-call editor timeout in milliseconds.
    #[arg(long = "timeout-ms", global = true)]
    timeout_ms: Option<u64>,

    /// Never launch a browser for project maps.
    #[arg(long = "no-browser", global = true)]
    no_browser: bool,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommand {
    /// Run the MCP server on stdio with the editor bridge (default).
    Serve,
    /// Print the tool catalog.
    Tools(ToolsArgs),
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Debug, Clone, Args, Default)]
struct ToolsArgs {
    /// Emit the catalog as JSON, including input schemas.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log)?;

    let command = cli.command.clone().unwrap_or(CliCommand::Serve);
    match command {
        CliCommand::Serve => run_server(&cli).await,
        CliCommand::Tools(args) => print_tools(args),
        CliCommand::Config => print_config(&cli),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut cfg = Config::load(&cli.config)?;
    cfg.apply_cli_overrides(cli.port, cli.relay_port, cli.timeout_ms, cli.no_browser)?;
    Ok(cfg)
}

async fn run_server(cli: &Cli) -> Result<()> {
    let cfg = load_config(cli)?;
    runtime::ServerRuntime::new(cfg).run().await
}

fn print_tools(args: ToolsArgs) -> Result<()> {
    let catalog = catalog::ToolCatalog::builtin();
    if args.json {
        let summaries = catalog
            .tools()
            .iter()
            .map(catalog::ToolDef::summary)
            .collect::<Vec<_>>();
        let payload = json!({
            "status_tool": router::STATUS_TOOL,
            "tools": summaries,
        });
        let text =
            serde_json::to_string_pretty(&payload).context("failed serializing tool catalog")?;
        println!("{text}");
        return Ok(());
    }

    println!("{:<22} {:<14} {}", router::STATUS_TOOL, "status", router::STATUS_TOOL_DESCRIPTION);
    for tool in catalog.tools() {
        println!(
            "{:<22} {:<14} {}",
            tool.name,
            tool.category.as_str(),
            tool.description
        );
    }
    Ok(())
}

fn print_config(cli: &Cli) -> Result<()> {
    let cfg = load_config(cli)?;
    let text = toml::to_string_pretty(&cfg).context("failed serializing configuration")?;
    print!("{text}");
    Ok(())
}

fn init_logging(filter: &str) -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
