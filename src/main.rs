// ABOUTME: Command-line entry point: loads config, sets up logging and metrics, runs the bot.
// ABOUTME: `run` drives the console transport; `check-config` validates and prints configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roombot::app::{install_metrics_exporter, App, Storage};
use roombot::console::{run_console, ConsoleTransport};
use roombot::logging;
use roombot_core::config::Config;
use roombot_core::{RoomIdentity, UserId};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "roombot", version, about = "Multi-room chat bot with owner-approved room presence")]
struct Cli {
    /// Config file (default: $ROOMBOT_CONFIG_PATH, ./roombot.toml, then the XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Also write daily-rotated JSON logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot against the stdin/stdout console transport
    Run {
        /// Room your input lines are posted in; connected as a permanent room
        #[arg(long, default_value = "console.local:1")]
        room: RoomIdentity,

        /// User id your input lines are posted as
        #[arg(long, default_value_t = 1)]
        user: UserId,
    },
    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::install_panic_hook();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _log_guard = logging::init(cli.log_json, cli.log_dir.as_deref())?;

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
            Ok(())
        }
        Commands::Run { room, user } => run(config, room, user).await,
    }
}

async fn run(mut config: Config, room: RoomIdentity, user: UserId) -> Result<()> {
    tracing::info!(
        invoker = %config.bot.invoker,
        permanent_rooms = config.rooms.permanent.len(),
        backend = ?config.storage.backend,
        "Starting roombot"
    );

    if let Some(addr) = &config.metrics.listen_addr {
        install_metrics_exporter(addr)?;
    }

    if !config.rooms.permanent.contains(&room) {
        config.rooms.permanent.push(room.clone());
    }

    let transport = Arc::new(ConsoleTransport::stdout());
    let storage = Storage::open(&config.storage)?;
    let acl = Arc::new(config.acl.build());
    let app = App::build(&config, transport.clone(), storage, acl)?;

    let summary = app.start().await?;
    for (failed, reason) in &summary.failed {
        tracing::warn!(room = %failed, %reason, "Room could not be restored");
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = run_console(stdin, transport, room, user) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
    }

    tracing::info!("roombot stopped");
    Ok(())
}
