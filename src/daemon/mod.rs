use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::artwork::{ArtworkResolver, QqMusicSearch};
use crate::config::{Config, DaemonConfig};
use crate::db::Database;
use crate::discord::{Activity, ActivityType, Assets, Timestamps};
use crate::ipc::{DaemonCommand, DaemonResponse};
use crate::models::{NowPlayingInfo, PresenceStatus, ProcessId};
use crate::query::{NowPlayingPidQuery, SerialQueue};
use crate::source::{self, NowPlayingSource};

mod presence;

use presence::{DiscordSink, PresenceUpdate, Throttle, run_presence_sender};

/// Start times within this many seconds count as the same playback.
const START_JITTER_SECS: i64 = 2;

// Signals for the monitor thread
enum MonitorSignal {
    Refresh,
    Clear,
}

pub struct Daemon {
    config: Config,
}

impl Daemon {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn run(&self) -> Result<()> {
        use interprocess::local_socket::prelude::*;
        use interprocess::local_socket::{GenericFilePath, ListenerOptions};

        let socket_path = self.config.socket_path();

        // Remove stale socket
        if socket_path.exists() {
            fs::remove_file(&socket_path)?;
        }

        // Write PID file
        let pid_path = self.config.pid_path();
        fs::write(&pid_path, std::process::id().to_string())?;

        // Create listener
        let name = socket_path.as_os_str().to_fs_name::<GenericFilePath>()?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_sync()
            .with_context(|| "Failed to create socket listener")?;

        info!("Daemon started, listening on {}", socket_path.display());

        let status = Arc::new(Mutex::new(PresenceStatus::default()));
        let running = Arc::new(AtomicBool::new(true));
        let discord_connected = Arc::new(AtomicBool::new(false));

        // Presence sender owns the Discord connection
        let (presence_tx, presence_rx) = mpsc::channel();
        let sink = DiscordSink::new(
            self.config.discord.client_id.clone(),
            Arc::clone(&discord_connected),
        );
        let throttle = Throttle::new(Duration::from_secs(
            self.config.discord.min_update_interval_secs,
        ));
        let presence_thread = thread::spawn(move || {
            run_presence_sender(presence_rx, sink, throttle);
        });

        // Monitor polls the now-playing source
        let source = source::system_source(self.config.daemon.query_timeout());
        let artwork = if self.config.artwork.enabled {
            let db = Database::open(&self.config.db_path())
                .with_context(|| "Failed to open artwork cache")?;
            Some(ArtworkResolver::new(
                db,
                Box::new(QqMusicSearch::new(&self.config.artwork)),
            ))
        } else {
            None
        };
        let mut monitor = Monitor::new(
            source,
            SerialQueue::new("nowplaying.daemon")?,
            self.config.daemon.clone(),
            artwork,
            Arc::clone(&status),
            presence_tx.clone(),
        );
        let (signal_tx, signal_rx) = mpsc::channel();
        let monitor_running = Arc::clone(&running);
        let poll_interval = self.config.daemon.poll_interval();
        thread::spawn(move || {
            monitor.run(signal_rx, monitor_running, poll_interval);
        });

        // Accept connections on main thread
        while running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok(conn) => {
                    let response =
                        handle_connection(conn, &status, &running, &discord_connected, &signal_tx);

                    if let Err(e) = response {
                        error!("Connection error: {e}");
                    }
                }
                Err(e) => {
                    if running.load(Ordering::SeqCst) {
                        error!("Accept error: {e}");
                    }
                }
            }
        }

        // Cleanup
        drop(signal_tx);
        let _ = presence_tx.send(PresenceUpdate::Shutdown);
        let _ = presence_thread.join();
        let _ = fs::remove_file(&socket_path);
        let _ = fs::remove_file(&pid_path);

        info!("Daemon stopped");
        Ok(())
    }

    pub fn start_detached(config: &Config) -> Result<()> {
        use std::process::Command;

        let socket_path = config.socket_path();
        if socket_path.exists() {
            let client = crate::ipc::DaemonClient::new(&socket_path);
            if client.is_daemon_running() {
                anyhow::bail!("Daemon is already running");
            }
            fs::remove_file(&socket_path)?;
        }

        let exe = std::env::current_exe()?;

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;

            Command::new(&exe)
                .arg("daemon")
                .arg("run")
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .process_group(0)
                .spawn()
                .with_context(|| "Failed to start daemon")?;
        }

        #[cfg(not(unix))]
        {
            Command::new(&exe)
                .arg("daemon")
                .arg("run")
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .spawn()
                .with_context(|| "Failed to start daemon")?;
        }

        for _ in 0..50 {
            if socket_path.exists() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }

        anyhow::bail!("Daemon failed to start")
    }

    pub fn stop(config: &Config) -> Result<()> {
        let client = crate::ipc::DaemonClient::new(config.socket_path());
        if client.is_daemon_running() {
            client.shutdown()?;
            for _ in 0..50 {
                if !config.socket_path().exists() {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
        Ok(())
    }

    pub fn is_running(config: &Config) -> bool {
        let client = crate::ipc::DaemonClient::new(config.socket_path());
        client.is_daemon_running()
    }
}

/// What the monitor last asked the presence sender to show.
#[derive(Debug, Clone, PartialEq)]
enum Shown {
    Nothing,
    Cleared,
    Track { key: String, start: Option<i64> },
    /// Cleared by request; stays cleared until the track changes.
    Suppressed { key: String },
}

struct Monitor {
    source: Arc<dyn NowPlayingSource>,
    query: NowPlayingPidQuery,
    queue: SerialQueue,
    config: DaemonConfig,
    artwork: Option<ArtworkResolver>,
    status: Arc<Mutex<PresenceStatus>>,
    presence: Sender<PresenceUpdate>,
    shown: Shown,
}

impl Monitor {
    fn new(
        source: Arc<dyn NowPlayingSource>,
        queue: SerialQueue,
        config: DaemonConfig,
        artwork: Option<ArtworkResolver>,
        status: Arc<Mutex<PresenceStatus>>,
        presence: Sender<PresenceUpdate>,
    ) -> Self {
        Self {
            query: NowPlayingPidQuery::new(Arc::clone(&source)),
            source,
            queue,
            config,
            artwork,
            status,
            presence,
            shown: Shown::Nothing,
        }
    }

    fn run(&mut self, signals: Receiver<MonitorSignal>, running: Arc<AtomicBool>, interval: Duration) {
        debug!("Monitor polling on queue '{}'", self.queue.label());
        while running.load(Ordering::SeqCst) {
            self.tick();

            match signals.recv_timeout(interval) {
                Ok(MonitorSignal::Refresh) | Err(mpsc::RecvTimeoutError::Timeout) => {}
                Ok(MonitorSignal::Clear) => self.clear_on_request(),
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Monitor stopped");
    }

    /// Wait for an async query answer on the daemon queue.
    fn await_answer<T>(&self, rx: Receiver<T>, fallback: T) -> T {
        // The source applies its own timeout; this only guards against a stuck queue.
        let limit = self.config.query_timeout() + Duration::from_secs(1);
        rx.recv_timeout(limit).unwrap_or(fallback)
    }

    fn current_pid(&self) -> ProcessId {
        let (tx, rx) = mpsc::channel();
        self.query.request(&self.queue, move |pid| {
            let _ = tx.send(pid);
        });
        self.await_answer(rx, ProcessId::NONE)
    }

    fn current_is_playing(&self) -> bool {
        let (tx, rx) = mpsc::channel();
        self.query.request_is_playing(&self.queue, move |playing| {
            let _ = tx.send(playing);
        });
        self.await_answer(rx, false)
    }

    fn tick(&mut self) {
        let pid = self.current_pid();
        if pid.is_none() {
            self.show_nothing(pid, None, false, None);
            return;
        }

        let app = self.source.app_identifier(pid).unwrap_or_else(|e| {
            debug!("No app identifier for {pid}: {e}");
            None
        });
        if !self.config.is_allowed(app.as_deref()) {
            debug!("Ignoring now-playing app {app:?}");
            self.show_nothing(pid, app, false, None);
            return;
        }

        if !self.current_is_playing() {
            self.show_nothing(pid, app, false, None);
            return;
        }

        let info = match self.source.now_playing_info() {
            Ok(Some(info)) => info,
            Ok(None) => {
                self.show_nothing(pid, app, true, None);
                return;
            }
            Err(e) => {
                debug!("Now-playing info unavailable: {e}");
                self.show_nothing(pid, app, true, None);
                return;
            }
        };

        let key = info.cache_key();
        let start = info.timestamps().map(|(start, _)| start);
        let unchanged = match &self.shown {
            Shown::Track { key: k, start: s } => *k == key && same_start(*s, start),
            Shown::Suppressed { key: k } => *k == key,
            _ => false,
        };
        if unchanged {
            self.update_status(pid, app, true, Some(info), None);
            return;
        }

        let artwork = self
            .artwork
            .as_ref()
            .map(|resolver| resolver.resolve_or_empty(&info))
            .unwrap_or_default();
        let activity = build_activity(&info, &artwork);

        info!(
            "Now playing: {} - {}",
            info.title.as_deref().unwrap_or("?"),
            info.artist.as_deref().unwrap_or("?")
        );
        let _ = self.presence.send(PresenceUpdate::Set(activity));
        self.shown = Shown::Track { key, start };
        let artwork = (!artwork.is_empty()).then_some(artwork);
        self.update_status(pid, app, true, Some(info), artwork);
    }

    /// Clear the presence unless it is already clear.
    fn show_nothing(
        &mut self,
        pid: ProcessId,
        app: Option<String>,
        is_playing: bool,
        info: Option<NowPlayingInfo>,
    ) {
        if matches!(self.shown, Shown::Track { .. }) {
            let _ = self.presence.send(PresenceUpdate::Clear);
        }
        if self.shown != Shown::Nothing {
            self.shown = Shown::Cleared;
        }
        self.update_status(pid, app, is_playing, info, None);
    }

    fn clear_on_request(&mut self) {
        let _ = self.presence.send(PresenceUpdate::Clear);
        let key = self
            .status
            .lock()
            .unwrap()
            .track
            .as_ref()
            .map(NowPlayingInfo::cache_key);
        self.shown = match key {
            Some(key) => Shown::Suppressed { key },
            None => Shown::Cleared,
        };
        info!("Presence cleared on request");
    }

    fn update_status(
        &self,
        pid: ProcessId,
        app: Option<String>,
        is_playing: bool,
        track: Option<NowPlayingInfo>,
        artwork: Option<String>,
    ) {
        let mut s = self.status.lock().unwrap();
        let changed = s.track.as_ref().map(NowPlayingInfo::cache_key)
            != track.as_ref().map(NowPlayingInfo::cache_key)
            || s.is_playing != is_playing;

        s.pid = pid;
        s.app = app;
        s.is_playing = is_playing;
        if artwork.is_some() || changed {
            s.artwork = artwork;
        }
        s.track = track;
        if changed {
            s.last_update = Some(Utc::now());
        }
    }
}

fn same_start(a: Option<i64>, b: Option<i64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).abs() <= START_JITTER_SECS,
        (None, None) => true,
        _ => false,
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

pub fn build_activity(info: &NowPlayingInfo, artwork: &str) -> Activity {
    Activity {
        kind: ActivityType::Listening,
        state: non_empty(info.album.as_deref()),
        details: non_empty(info.title.as_deref()),
        timestamps: info.timestamps().map(|(start, end)| Timestamps {
            start: Some(start),
            end: Some(end),
        }),
        assets: Some(Assets {
            large_image: Some(artwork.to_string()),
            large_text: Some(
                non_empty(info.artist.as_deref()).unwrap_or_else(|| "Unknown artist".to_string()),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn handle_connection(
    conn: interprocess::local_socket::Stream,
    status: &Arc<Mutex<PresenceStatus>>,
    running: &Arc<AtomicBool>,
    discord_connected: &Arc<AtomicBool>,
    signals: &Sender<MonitorSignal>,
) -> Result<()> {
    let mut reader = BufReader::new(&conn);
    let mut writer = &conn;

    let mut line = String::new();
    reader.read_line(&mut line)?;

    let command: DaemonCommand = serde_json::from_str(&line)?;
    let response = handle_command(command, status, running, discord_connected, signals);

    let response_json = serde_json::to_string(&response)?;
    writeln!(writer, "{response_json}")?;
    writer.flush()?;

    Ok(())
}

fn handle_command(
    command: DaemonCommand,
    status: &Arc<Mutex<PresenceStatus>>,
    running: &Arc<AtomicBool>,
    discord_connected: &Arc<AtomicBool>,
    signals: &Sender<MonitorSignal>,
) -> DaemonResponse {
    match command {
        DaemonCommand::GetStatus => {
            let mut s = status.lock().unwrap().clone();
            s.discord_connected = discord_connected.load(Ordering::SeqCst);
            DaemonResponse::Status(s)
        }
        DaemonCommand::Refresh => {
            if signals.send(MonitorSignal::Refresh).is_ok() {
                DaemonResponse::Ok
            } else {
                DaemonResponse::Error("Monitor not running".to_string())
            }
        }
        DaemonCommand::Clear => {
            if signals.send(MonitorSignal::Clear).is_ok() {
                DaemonResponse::Ok
            } else {
                DaemonResponse::Error("Monitor not running".to_string())
            }
        }
        DaemonCommand::Shutdown => {
            running.store(false, Ordering::SeqCst);
            DaemonResponse::Ok
        }
    }
}
