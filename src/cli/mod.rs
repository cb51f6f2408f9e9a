pub mod daemon_path;
pub mod process;
pub mod view;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use process::{kill_previous_daemons, restart_daemon};
use tracing::level_filters::LevelFilter;
use view::{process_devices_command, process_usage_command, ViewArgs};

use crate::{
    client::start_client,
    server::{args::ServerArgs, start_server},
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX, SERVER_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "Heartbeat", version, long_about = None)]
#[command(about = "Tracks per-device application usage onto a central server", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts the client daemon for this device")]
    Init {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
    },
    #[command(
        about = "Run the client directly in current console. Used for creating a daemon internally and for debugging"
    )]
    Run {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
    },
    #[command(about = "Stop currently running client daemon.")]
    Stop {},
    #[command(about = "Run the reconciliation server")]
    Serve {
        #[command(flatten)]
        args: ServerArgs,
    },
    #[command(about = "Show usage records stored on the server")]
    Usage {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, help = "Only records of this device")]
        device: Option<String>,
        #[arg(long, help = "Only records of this day. Examples are \"today\", \"yesterday\", \"15/03/2025\"")]
        date: Option<String>,
    },
    #[command(about = "List devices known to the server and their status")]
    Devices {
        #[command(flatten)]
        view: ViewArgs,
    },
}

/// Log file prefix for the command. The server gets its own so its log files
/// don't interleave with the short-lived cli invocations.
fn log_prefix(commands: &Commands) -> &'static str {
    match commands {
        Commands::Serve { .. } => SERVER_PREFIX,
        _ => CLI_PREFIX,
    }
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(
        log_prefix(&args.commands),
        &create_application_default_path()?,
        logging_level,
        args.log,
    )?;

    match args.commands {
        Commands::Init { .. } => {
            restart_daemon()?;
            Ok(())
        }
        Commands::Stop {} => {
            kill_previous_daemons();
            Ok(())
        }
        Commands::Run { dir } => {
            let dir = dir.map_or_else(create_application_default_path, Ok)?;
            start_client(dir).await
        }
        Commands::Serve { args } => start_server(args).await,
        Commands::Usage { view, device, date } => process_usage_command(view, device, date).await,
        Commands::Devices { view } => process_devices_command(view).await,
    }
}
