use clap::{Parser, Subcommand};

mod commands;
pub use commands::*;

#[derive(Parser)]
#[command(name = "nowplaying-rpc")]
#[command(about = "Mirror the system now-playing application into Discord Rich Presence")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the PID of the now-playing application
    Pid {
        /// How long to wait for the provider, in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Show what the system reports as now playing
    #[command(name = "now-playing")]
    NowPlaying,

    /// Resolve the album artwork link for the current track
    Artwork,

    /// Show the daemon's presence status
    Status,

    /// Ask the daemon to poll immediately
    Refresh,

    /// Clear the Discord presence until the track changes
    Clear,

    /// Daemon management
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Artwork link cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Start the daemon
    Start,
    /// Stop the daemon
    Stop,
    /// Show daemon status
    Status,
    /// Run daemon in foreground (internal use)
    Run,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the config file location
    Path,
    /// Print the effective configuration
    Show,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show how many artwork links are cached
    Stats,
    /// Remove all cached artwork links
    Clear,
}
