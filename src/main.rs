// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Toolhost main entry point - CLI and commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use toolhost::catalog::{CatalogEntry, CatalogFilter, InvocationRequest, InvocationResult, ToolHealth};
use toolhost::config::{self, CliOptions, HostConfig};
use toolhost::connection::ConnectionStatus;
use toolhost::host::{HostStatus, ToolHost};
use toolhost::monitor::{MonitorEvent, Severity};
use toolhost::telemetry::{init_telemetry, LogTraceSink, TelemetryConfig, TraceSink};

/// Toolhost version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Toolhost - supervise tool servers and call their tools.
#[derive(Parser)]
#[command(name = "toolhost")]
#[command(author, version, about = "Supervise tool servers and call their tools", long_about = None)]
struct Cli {
    /// Configuration file (replaces the workspace search)
    #[arg(short, long, env = "TOOLHOST_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Only manage these server ids
    #[arg(long, value_delimiter = ',', global = true)]
    only: Vec<String>,

    /// Do not restart crashed processes
    #[arg(long, global = true)]
    no_auto_restart: bool,

    /// Do not reconnect lost connections
    #[arg(long, global = true)]
    no_auto_reconnect: bool,

    /// Forward monitor events to the log as trace events
    #[arg(long, global = true)]
    trace_events: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Show verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Show debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Show trace output (full protocol traffic)
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for toolhost.
#[derive(Subcommand)]
enum Commands {
    /// Start every server and keep them supervised until Ctrl-C
    Serve,

    /// List the tools in the catalog
    Tools {
        /// Only tools in this namespace
        #[arg(short, long)]
        namespace: Option<String>,
        /// Only tools in this category
        #[arg(short = 'C', long)]
        category: Option<String>,
        /// Free-text search over names, descriptions and tags
        #[arg(short, long)]
        search: Option<String>,
        /// Only available tools
        #[arg(long)]
        available: bool,
    },

    /// Call a tool
    Call {
        /// Tool id (`namespace:name`) or unambiguous tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
        /// Skip the result cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Show connections, processes, health and alerts
    Status,

    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show the resolved configuration
    Show,
    /// Write an example configuration to the current directory
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry = init_telemetry(&TelemetryConfig::from_flags(cli.verbose, cli.debug, cli.trace))?;

    match &cli.command {
        Commands::Config { action } => return handle_config(&cli, action.as_ref()),
        Commands::Version => {
            println!("toolhost {}", VERSION);
            return Ok(());
        }
        _ => {}
    }

    let config = load(&cli)?;
    let sink: Option<Arc<dyn TraceSink>> = if cli.trace_events {
        Some(Arc::new(LogTraceSink))
    } else {
        None
    };
    let host = ToolHost::build(config, sink);

    let outcome = run(&cli, &host).await;
    host.shutdown().await;
    let failed = outcome?;
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn load(cli: &Cli) -> anyhow::Result<HostConfig> {
    let workspace_root = std::env::current_dir()?;
    let options = CliOptions {
        only_servers: cli.only.clone(),
        no_auto_restart: cli.no_auto_restart,
        no_auto_reconnect: cli.no_auto_reconnect,
    };
    Ok(config::load_config(
        &workspace_root,
        cli.config.as_deref(),
        options,
    )?)
}

fn handle_config(cli: &Cli, action: Option<&ConfigAction>) -> anyhow::Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let config = load(cli)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", serde_yaml::to_string(&config)?);
            }
        }
        Some(ConfigAction::Init) => {
            let workspace_root = std::env::current_dir()?;
            let path = config::init_config(&workspace_root, None)?;
            println!("Created config file: {}", path.display());
        }
    }
    Ok(())
}

/// Run a host command. Returns whether the command failed.
async fn run(cli: &Cli, host: &ToolHost) -> anyhow::Result<bool> {
    let results = host.start().await;
    if !cli.json {
        for (id, result) in &results {
            if let Err(e) = result {
                eprintln!("{} {}: {}", "!".yellow(), id.bright_white(), e);
            }
        }
    }

    match &cli.command {
        Commands::Serve => serve(cli, host).await.map(|_| false),
        Commands::Tools {
            namespace,
            category,
            search,
            available,
        } => {
            let mut filter = CatalogFilter::new();
            filter.namespace = namespace.clone();
            filter.category = category.clone();
            filter.search = search.clone();
            if *available {
                filter = filter.available(true);
            }
            let tools = host.catalog().get_all(&filter).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tools)?);
            } else {
                print_tools(&tools);
            }
            Ok(false)
        }
        Commands::Call {
            tool,
            args,
            no_cache,
        } => {
            let arguments: serde_json::Value = serde_json::from_str(args)
                .map_err(|e| anyhow::anyhow!("--args is not valid JSON: {}", e))?;
            let mut request = InvocationRequest::new(tool.clone(), arguments);
            if *no_cache {
                request = request.bypass_cache();
            }
            let result = host.execute(request).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            Ok(!result.success)
        }
        Commands::Status => {
            host.monitor().check_health().await;
            let status = host.status().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            Ok(false)
        }
        Commands::Config { .. } | Commands::Version => Ok(false),
    }
}

async fn serve(cli: &Cli, host: &ToolHost) -> anyhow::Result<()> {
    let tools = host.catalog().get_all(&CatalogFilter::new()).await;
    if !cli.json {
        println!(
            "{} Serving {} tools from {} servers. Press Ctrl-C to stop.",
            "→".cyan(),
            tools.len().to_string().bright_white(),
            host.config().enabled_servers().len().to_string().bright_white()
        );
    }

    let mut events = host.monitor().subscribe();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            event = events.recv() => match event {
                Ok(MonitorEvent::AlertTriggered(alert)) => {
                    if cli.json {
                        println!("{}", serde_json::to_string(&alert)?);
                    } else {
                        println!("{} {}", severity_label(alert.severity), alert.description);
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    if !cli.json {
        println!("{} Shutting down...", "→".cyan());
    }
    Ok(())
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    let label = format!("[{}]", severity);
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::High => label.red(),
        Severity::Medium => label.yellow(),
        Severity::Low => label.dimmed(),
    }
}

fn health_label(health: ToolHealth) -> colored::ColoredString {
    let label = health.to_string();
    match health {
        ToolHealth::Healthy => label.green(),
        ToolHealth::Degraded => label.yellow(),
        ToolHealth::Unavailable => label.red(),
    }
}

fn status_label(status: ConnectionStatus) -> colored::ColoredString {
    let label = status.to_string();
    match status {
        ConnectionStatus::Connected => label.green(),
        ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => label.yellow(),
        ConnectionStatus::Disconnected => label.dimmed(),
        ConnectionStatus::Failed | ConnectionStatus::Timeout => label.red(),
    }
}

fn print_tools(tools: &[CatalogEntry]) {
    if tools.is_empty() {
        println!("{}", "No tools found".dimmed());
        return;
    }
    for entry in tools {
        println!(
            "{} {} [{}] {}",
            entry.id.bright_white(),
            format!("({})", entry.category).cyan(),
            health_label(entry.health),
            entry.description.as_deref().unwrap_or("").dimmed()
        );
    }
    println!("\n{} tools", tools.len());
}

fn print_result(result: &InvocationResult) {
    if result.success {
        let payload = result
            .result
            .as_ref()
            .map(|v| serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()))
            .unwrap_or_default();
        println!("{}", payload);
        let cached = if result.metadata.cache_hit { " (cached)" } else { "" };
        eprintln!(
            "{} {} in {:?}{}",
            "✓".green(),
            result.tool_id,
            result.execution_time,
            cached
        );
    } else {
        eprintln!(
            "{} {}: {}",
            "✗".red(),
            result.tool_id,
            result.error.as_deref().unwrap_or("unknown error").red()
        );
    }
}

fn print_status(status: &HostStatus) {
    println!("{}", "Connections".bright_blue().bold());
    if status.connections.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for conn in &status.connections {
        let pid = conn
            .process
            .as_ref()
            .and_then(|p| p.pid)
            .map(|p| format!("pid {}", p))
            .unwrap_or_else(|| "no process".to_string());
        println!(
            "  {} {} ({}, {} tools){}",
            conn.server_id.bright_white(),
            status_label(conn.status),
            pid,
            conn.tools.len(),
            conn.last_error
                .as_deref()
                .map(|e| format!(" - {}", e))
                .unwrap_or_default()
                .red()
        );
    }

    println!("\n{}", "Processes".bright_blue().bold());
    for process in &status.processes {
        println!(
            "  {} {} restarts={} errors={}",
            process.server_id.bright_white(),
            process.status,
            process.restart_count,
            process.error_count
        );
    }

    if !status.health.is_empty() {
        println!("\n{}", "Health".bright_blue().bold());
        for check in &status.health {
            let mark = if check.healthy { "✓".green() } else { "✗".red() };
            let rtt = check
                .response_time_ms
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} {} rtt {} success {:.0}%",
                mark,
                check.server_id,
                rtt,
                check.success_rate * 100.0
            );
        }
    }

    let m = &status.metrics;
    println!("\n{}", "Metrics".bright_blue().bold());
    println!(
        "  executions {} (error rate {:.1}%), connections {}/{}, errors {}",
        m.total_executions,
        m.error_rate,
        m.connections.connected,
        m.connections.total,
        m.total_errors
    );

    if !status.active_alerts.is_empty() {
        println!("\n{}", "Active alerts".bright_blue().bold());
        for alert in &status.active_alerts {
            println!("  {} {}", severity_label(alert.severity), alert.description);
        }
    }
}
