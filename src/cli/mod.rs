pub mod app;
pub mod commands;
pub mod dates;

use std::path::PathBuf;

use anyhow::Result;
use app::App;
use clap::{Parser, Subcommand};
use commands::{
    process_activity_command, process_sessions_command, process_timer_command,
    process_user_command, ActivityCommand, SessionsCommand, TimerCommand, UserCommand,
};
use tracing::level_filters::LevelFilter;

use crate::{
    config::AppPaths,
    utils::{
        dir::{create_application_default_path, ensure_dir},
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "tallyhours", version, long_about = None)]
#[command(about = "Track hours spent on your activities by day, month and year", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default uses $XDG_STATE_HOME/tallyhours or $HOME/.local/state/tallyhours"
    )]
    dir: Option<PathBuf>,
    #[arg(
        long,
        short,
        global = true,
        help = "Work with this user's activities instead of the current user"
    )]
    user: Option<String>,
    #[arg(long, global = true, help = "Print logs to the console")]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Activity(ActivityCommand),
    #[command(about = "Show the session log")]
    Sessions {
        #[command(flatten)]
        command: SessionsCommand,
    },
    #[command(subcommand, about = "Live stopwatches for activities")]
    Timer(TimerCommand),
    #[command(subcommand, about = "Manage user names")]
    Users(UserCommand),
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let root = args.dir.map_or_else(create_application_default_path, ensure_dir)?;
    let paths = AppPaths::new(root);

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &paths.logs(), logging_level, args.log)?;

    let app = App::open(paths, args.user.as_deref()).await?;

    match args.commands {
        Commands::Activity(command) => process_activity_command(&app, command).await,
        Commands::Sessions { command } => process_sessions_command(&app, command).await,
        Commands::Timer(command) => process_timer_command(&app, command).await,
        Commands::Users(command) => process_user_command(&app, command).await,
    }
}
