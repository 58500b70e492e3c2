use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::time::Duration;

use crate::artwork::{ArtworkResolver, QqMusicSearch};
use crate::config::Config;
use crate::daemon::Daemon;
use crate::db::Database;
use crate::ipc::{DaemonClient, DaemonResponse};
use crate::models::{NowPlayingInfo, PresenceStatus};
use crate::query::NowPlayingPidQuery;
use crate::source::{self, NowPlayingSource};

pub struct App {
    pub config: Config,
}

impl App {
    pub fn new() -> Result<Self> {
        let config = Config::load()?;
        config.ensure_dirs()?;

        Ok(Self { config })
    }

    fn client(&self) -> DaemonClient {
        DaemonClient::new(self.config.socket_path())
    }

    fn ensure_daemon(&self) -> Result<DaemonClient> {
        let client = self.client();
        if !client.is_daemon_running() {
            if self.config.daemon.auto_start {
                println!("Starting daemon...");
                Daemon::start_detached(&self.config)?;
            } else {
                bail!("Daemon is not running. Start it with: nowplaying-rpc daemon start");
            }
        }
        Ok(client)
    }

    fn source(&self) -> Arc<dyn NowPlayingSource> {
        source::system_source(self.config.daemon.query_timeout())
    }

    fn open_db(&self) -> Result<Database> {
        Database::open(&self.config.db_path()).with_context(|| "Failed to open database")
    }

    fn current_info(&self, source: &dyn NowPlayingSource) -> Result<Option<NowPlayingInfo>> {
        source
            .now_playing_info()
            .with_context(|| "Failed to read now-playing info")
    }

    // Command implementations

    pub fn pid(&self, timeout_ms: Option<u64>) -> Result<()> {
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.daemon.query_timeout());

        let query = NowPlayingPidQuery::new(self.source());
        let pid = query.request_blocking(timeout)?;
        println!("{pid}");

        Ok(())
    }

    pub fn now_playing(&self) -> Result<()> {
        let source = self.source();
        let pid = NowPlayingPidQuery::new(Arc::clone(&source))
            .request_blocking(self.config.daemon.query_timeout())?;

        if pid.is_none() {
            println!("Nothing is playing.");
            return Ok(());
        }

        let app = source.app_identifier(pid).unwrap_or(None);
        let playing = source.is_playing().unwrap_or(false);

        println!("PID: {pid}");
        println!("App: {}", app.as_deref().unwrap_or("unknown"));
        println!(
            "Allowed: {}",
            if self.config.daemon.is_allowed(app.as_deref()) {
                "yes"
            } else {
                "no"
            }
        );
        println!("State: {}", if playing { "Playing" } else { "Paused" });

        match self.current_info(source.as_ref())? {
            Some(info) => print_track(&info),
            None => println!("No track info."),
        }

        Ok(())
    }

    pub fn artwork(&self) -> Result<()> {
        let source = self.source();
        let Some(info) = self.current_info(source.as_ref())? else {
            println!("Nothing is playing.");
            return Ok(());
        };

        let resolver = ArtworkResolver::new(
            self.open_db()?,
            Box::new(QqMusicSearch::new(&self.config.artwork)),
        );
        match resolver.resolve(&info)? {
            Some(link) => println!("{link}"),
            None => println!("No artwork found for {}", info.search_terms().trim()),
        }

        Ok(())
    }

    pub fn status(&self) -> Result<()> {
        let client = self.client();

        if !client.is_daemon_running() {
            println!("Daemon is not running.");
            return Ok(());
        }

        let status = client.get_status()?;
        print_status(&status);

        Ok(())
    }

    pub fn refresh(&self) -> Result<()> {
        let client = self.ensure_daemon()?;
        report(client.refresh()?, "Refresh requested.")
    }

    pub fn clear(&self) -> Result<()> {
        let client = self.ensure_daemon()?;
        report(client.clear()?, "Presence cleared.")
    }

    pub fn daemon_start(&self) -> Result<()> {
        if Daemon::is_running(&self.config) {
            println!("Daemon is already running.");
            return Ok(());
        }

        Daemon::start_detached(&self.config)?;
        println!("Daemon started.");

        Ok(())
    }

    pub fn daemon_stop(&self) -> Result<()> {
        if !Daemon::is_running(&self.config) {
            println!("Daemon is not running.");
            return Ok(());
        }

        Daemon::stop(&self.config)?;
        println!("Daemon stopped.");

        Ok(())
    }

    pub fn daemon_status(&self) -> Result<()> {
        if Daemon::is_running(&self.config) {
            println!("Daemon is running.");
        } else {
            println!("Daemon is not running.");
        }

        Ok(())
    }

    pub fn daemon_run(&self) -> Result<()> {
        let daemon = Daemon::new(self.config.clone())?;
        daemon.run()
    }

    pub fn config_path(&self) -> Result<()> {
        println!("{}", Config::config_path().display());
        Ok(())
    }

    pub fn config_show(&self) -> Result<()> {
        print!("{}", self.config.to_toml()?);
        Ok(())
    }

    pub fn cache_stats(&self) -> Result<()> {
        let count = self.open_db()?.artwork_link_count()?;
        println!("Cached artwork links: {count}");
        Ok(())
    }

    pub fn cache_clear(&self) -> Result<()> {
        let removed = self.open_db()?.clear_artwork_links()?;
        println!("Removed {removed} cached artwork links.");
        Ok(())
    }
}

fn report(response: DaemonResponse, message: &str) -> Result<()> {
    match response {
        DaemonResponse::Error(e) => bail!("{e}"),
        _ => {
            println!("{message}");
            Ok(())
        }
    }
}

fn print_track(info: &NowPlayingInfo) {
    println!("Title: {}", info.title.as_deref().unwrap_or("Unknown title"));
    println!("Artist: {}", info.artist.as_deref().unwrap_or("Unknown artist"));
    println!("Album: {}", info.album.as_deref().unwrap_or("Unknown album"));
    println!("Duration: {}", info.format_duration());
}

fn print_status(status: &PresenceStatus) {
    if let Some(track) = &status.track {
        let state = if status.is_playing {
            "Playing"
        } else {
            "Paused"
        };
        println!(
            "{state}: {} - {}",
            track.title.as_deref().unwrap_or("Unknown title"),
            track.artist.as_deref().unwrap_or("Unknown artist")
        );
        println!("Duration: {}", track.format_duration());
    } else {
        println!("Not playing");
    }

    println!("PID: {}", status.pid);
    if let Some(app) = &status.app {
        println!("App: {app}");
    }
    if let Some(artwork) = &status.artwork {
        println!("Artwork: {artwork}");
    }
    println!(
        "Discord: {}",
        if status.discord_connected {
            "connected"
        } else {
            "disconnected"
        }
    );
    if let Some(at) = status.last_update {
        println!("Last change: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}
