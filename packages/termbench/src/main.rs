use anyhow::{Context, Result};
use bench_core::ws::WsConnector;
use channel_hub::SharedChannelHub;
use clap::{Parser, Subcommand};
use layout_tree::Direction;
use session_transport::SessionTransportManager;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::prelude::*;

mod api;
mod cli;
mod config;
mod layout_store;
mod models;
mod surface;
mod workbench;

use crate::api::ApiClient;
use crate::config::{BenchConfig, FileConfig, load_config};
use crate::layout_store::{LayoutSaver, LayoutStore};
use crate::surface::ScreenSurfaceFactory;
use crate::workbench::WorkbenchController;

#[derive(Parser)]
#[command(name = "bench")]
#[command(about = "Terminal client for a workbench of remote shell sessions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.termbench)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Server base URL, overriding config.toml and BENCH_SERVER__BASE_URL
    #[arg(long, global = true)]
    server: Option<String>,

    /// Workbench name, ID, or ID prefix to operate on (default: first)
    #[arg(short, long, global = true)]
    workbench: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List or edit workbenches
    Workbenches(WorkbenchesArgs),

    /// List or edit sessions of the workbench
    Sessions(SessionsArgs),

    /// Show or edit the panel layout
    Layout(LayoutArgs),

    /// Create a session as a new tab
    New(NewArgs),

    /// Split the panel holding a session and start a new session beside it
    Split(SplitArgs),

    /// Close a session
    Close(TargetArgs),

    /// Attach the terminal to a session
    Attach(AttachArgs),

    /// Print messages from the shared channel
    Watch(WatchArgs),
}

#[derive(Parser)]
struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct WorkbenchesArgs {
    #[command(subcommand)]
    action: Option<WorkbenchAction>,

    #[command(flatten)]
    list: JsonArgs,
}

#[derive(Subcommand)]
enum WorkbenchAction {
    /// Create a workbench
    Create { name: String },
    /// Rename a workbench
    Rename { target: String, name: String },
    /// Change a workbench's color
    Color { target: String, color: String },
    /// Delete a workbench and close its sessions
    Delete { target: String },
}

#[derive(Parser)]
struct SessionsArgs {
    #[command(subcommand)]
    action: Option<SessionAction>,

    #[command(flatten)]
    list: JsonArgs,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Change a session's title or color
    Edit {
        target: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Make a session the active tab of its panel
    Focus { target: String },
}

#[derive(Parser)]
struct LayoutArgs {
    #[command(subcommand)]
    action: Option<LayoutAction>,

    #[command(flatten)]
    show: JsonArgs,
}

#[derive(Subcommand)]
enum LayoutAction {
    /// Set the size ratios of a split's children
    Sizes {
        panel: String,
        #[arg(value_delimiter = ',', required = true)]
        sizes: Vec<f64>,
    },
    /// Move a divider of a split by a ratio delta
    Drag {
        panel: String,
        divider: usize,
        #[arg(allow_negative_numbers = true)]
        delta: f64,
        /// Treat DELTA as pixels across a split this many pixels long
        #[arg(long)]
        extent: Option<f64>,
    },
}

#[derive(Parser)]
struct NewArgs {
    /// Panel ID to add the tab to (default: first panel)
    #[arg(long)]
    panel: Option<String>,
}

#[derive(Parser)]
struct SplitArgs {
    /// Session title, ID, or ID prefix whose panel is split
    target: String,

    /// Stack the new panel below instead of beside
    #[arg(long)]
    vertical: bool,
}

#[derive(Parser)]
struct TargetArgs {
    /// Session title, ID, or ID prefix
    target: String,
}

#[derive(Parser)]
struct AttachArgs {
    /// Session title, ID, or ID prefix (default: the focused session)
    target: Option<String>,
}

#[derive(Parser)]
struct WatchArgs {
    /// Topics to subscribe to
    topics: Vec<String>,

    /// Output as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BenchConfig::new(cli.data_dir.clone())?;
    let attaching = matches!(cli.command, Some(Commands::Attach(_)));
    init_logging(&config, cli.debug, attaching)?;

    let file_config: FileConfig = load_config(&config.data_dir, cli.server.as_deref())
        .extract()
        .with_context(|| format!("Invalid configuration in {}", config.config_toml_path().display()))?;
    debug!(server = %file_config.server.base_url, "configuration loaded");

    if let Some(Commands::Watch(args)) = cli.command {
        let connector = WsConnector::new(file_config.connect_timeout());
        let hub = SharedChannelHub::new(file_config.hub_settings()?, Arc::new(connector));
        return cli::watch::watch(hub, args.topics, args.json).await;
    }

    let api = ApiClient::new(&file_config.server.base_url, file_config.request_timeout())?;
    let (output_tx, output_rx) = mpsc::unbounded_channel();
    let transport = SessionTransportManager::new(
        file_config.transport_settings()?,
        Arc::new(WsConnector::new(file_config.connect_timeout())),
        Arc::new(ScreenSurfaceFactory::with_sink(output_tx)),
        Arc::new(api.clone()),
    );
    let saver = LayoutSaver::new(LayoutStore::new(&config.layouts_dir), file_config.save_debounce());
    let controller = Arc::new(WorkbenchController::new(
        Arc::new(api),
        transport.clone(),
        saver,
    ));

    controller.load().await?;
    if let Some(target) = cli.workbench.as_deref() {
        cli::select_workbench(&controller, target).await?;
    }

    let result = run(cli.command, Arc::clone(&controller), output_rx).await;
    controller.flush_layout();
    transport.shutdown();
    result
}

async fn run(
    command: Option<Commands>,
    controller: Arc<WorkbenchController>,
    output: mpsc::UnboundedReceiver<(bench_core::SessionId, Vec<u8>)>,
) -> Result<()> {
    match command {
        None => cli::sessions_command(&controller, false),
        Some(Commands::Workbenches(args)) => match args.action {
            None => cli::workbenches_command(&controller, args.list.json),
            Some(WorkbenchAction::Create { name }) => {
                cli::create_workbench_command(&controller, &name).await
            }
            Some(WorkbenchAction::Rename { target, name }) => {
                cli::rename_workbench_command(&controller, &target, &name).await
            }
            Some(WorkbenchAction::Color { target, color }) => {
                cli::recolor_workbench_command(&controller, &target, &color).await
            }
            Some(WorkbenchAction::Delete { target }) => {
                cli::delete_workbench_command(&controller, &target).await
            }
        },
        Some(Commands::Sessions(args)) => match args.action {
            None => cli::sessions_command(&controller, args.list.json),
            Some(SessionAction::Edit { target, title, color }) => {
                cli::retitle_command(&controller, &target, title, color).await
            }
            Some(SessionAction::Focus { target }) => cli::focus_command(&controller, &target),
        },
        Some(Commands::Layout(args)) => match args.action {
            None => cli::layout_command(&controller, args.show.json),
            Some(LayoutAction::Sizes { panel, sizes }) => {
                cli::resize_command(&controller, &panel, sizes)
            }
            Some(LayoutAction::Drag {
                panel,
                divider,
                delta,
                extent,
            }) => cli::drag_command(&controller, &panel, divider, delta, extent),
        },
        Some(Commands::New(args)) => cli::new_command(&controller, args.panel).await,
        Some(Commands::Split(args)) => {
            let direction = if args.vertical {
                Direction::Vertical
            } else {
                Direction::Horizontal
            };
            cli::split_command(&controller, &args.target, direction).await
        }
        Some(Commands::Close(args)) => cli::close_command(&controller, &args.target).await,
        #[cfg(unix)]
        Some(Commands::Attach(args)) => {
            cli::attach_command(controller, args.target.as_deref(), output).await
        }
        #[cfg(not(unix))]
        Some(Commands::Attach(_)) => {
            drop(output);
            anyhow::bail!("attach needs a unix terminal")
        }
        Some(Commands::Watch(_)) => Ok(()),
    }
}

/// Interactive attach owns the terminal, so its logs go to a file instead.
fn init_logging(config: &BenchConfig, debug: bool, attaching: bool) -> Result<()> {
    let default_directive = if debug {
        "bench=debug,session_transport=debug,channel_hub=debug,layout_tree=debug,info"
    } else {
        "bench=info,session_transport=info,channel_hub=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let (stderr_layer, file_layer) = if attaching {
        let path = config.attach_log_path();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Arc::new(file));
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        (Some(layer), None)
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    debug!("termbench {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
