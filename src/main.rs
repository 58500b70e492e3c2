mod artwork;
mod cli;
mod config;
mod daemon;
mod db;
mod discord;
mod ipc;
mod models;
mod query;
mod source;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{App, CacheCommands, Cli, Commands, ConfigCommands, DaemonCommands};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let app = App::new()?;

    match cli.command {
        Commands::Pid { timeout_ms } => {
            app.pid(timeout_ms)?;
        }
        Commands::NowPlaying => {
            app.now_playing()?;
        }
        Commands::Artwork => {
            app.artwork()?;
        }
        Commands::Status => {
            app.status()?;
        }
        Commands::Refresh => {
            app.refresh()?;
        }
        Commands::Clear => {
            app.clear()?;
        }
        Commands::Daemon { command } => match command {
            DaemonCommands::Start => {
                app.daemon_start()?;
            }
            DaemonCommands::Stop => {
                app.daemon_stop()?;
            }
            DaemonCommands::Status => {
                app.daemon_status()?;
            }
            DaemonCommands::Run => {
                app.daemon_run()?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                app.config_path()?;
            }
            ConfigCommands::Show => {
                app.config_show()?;
            }
        },
        Commands::Cache { command } => match command {
            CacheCommands::Stats => {
                app.cache_stats()?;
            }
            CacheCommands::Clear => {
                app.cache_clear()?;
            }
        },
    }

    Ok(())
}
