use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::discord::{Activity, DiscordError, DiscordRpc};

/// How long the sender idles when nothing is pending.
const IDLE_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceUpdate {
    Set(Activity),
    Clear,
    Shutdown,
}

/// Spacing between sends. Discord silently drops updates that come too fast.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_sent: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: None,
        }
    }

    /// Time left before the next send is allowed.
    pub fn delay(&self, now: Instant) -> Duration {
        match self.last_sent {
            Some(last) => (last + self.min_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }
}

/// Where activity updates end up.
pub trait PresenceSink {
    fn set_activity(&mut self, activity: &Activity) -> Result<(), DiscordError>;
    fn clear_activity(&mut self) -> Result<(), DiscordError>;
    fn shutdown(&mut self);
}

/// Discord connection that is (re)established on demand.
pub struct DiscordSink {
    client_id: String,
    rpc: Option<DiscordRpc<interprocess::local_socket::Stream>>,
    connected: Arc<AtomicBool>,
}

impl DiscordSink {
    pub fn new(client_id: String, connected: Arc<AtomicBool>) -> Self {
        Self {
            client_id,
            rpc: None,
            connected,
        }
    }

    fn with_rpc<F>(&mut self, f: F) -> Result<(), DiscordError>
    where
        F: FnOnce(&mut DiscordRpc<interprocess::local_socket::Stream>) -> Result<(), DiscordError>,
    {
        if self.rpc.is_none() {
            self.rpc = Some(DiscordRpc::connect(&self.client_id)?);
            self.connected.store(true, Ordering::SeqCst);
        }

        let result = match self.rpc.as_mut() {
            Some(rpc) => f(rpc),
            None => Err(DiscordError::NotRunning),
        };

        if result.is_err() {
            // Reconnect on the next send.
            self.rpc = None;
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }
}

impl PresenceSink for DiscordSink {
    fn set_activity(&mut self, activity: &Activity) -> Result<(), DiscordError> {
        self.with_rpc(|rpc| rpc.set_activity(activity))
    }

    fn clear_activity(&mut self) -> Result<(), DiscordError> {
        self.with_rpc(|rpc| rpc.clear_activity())
    }

    fn shutdown(&mut self) {
        if let Some(mut rpc) = self.rpc.take() {
            let _ = rpc.clear_activity();
            let _ = rpc.close();
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Drain `rx` into `sink`, at most one send per throttle interval. A newer
/// update replaces one that is still waiting.
pub fn run_presence_sender<S: PresenceSink>(rx: Receiver<PresenceUpdate>, mut sink: S, mut throttle: Throttle) {
    let mut pending: Option<PresenceUpdate> = None;

    loop {
        let wait = if pending.is_some() {
            throttle.delay(Instant::now())
        } else {
            IDLE_WAIT
        };

        if !wait.is_zero() || pending.is_none() {
            match rx.recv_timeout(wait) {
                Ok(PresenceUpdate::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Ok(update) => {
                    if pending.replace(update).is_some() {
                        debug!("Superseded a pending presence update");
                    }
                    continue;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
        }

        let Some(update) = pending.take() else {
            continue;
        };

        let result = match &update {
            PresenceUpdate::Set(activity) => sink.set_activity(activity),
            PresenceUpdate::Clear => sink.clear_activity(),
            PresenceUpdate::Shutdown => Ok(()),
        };
        throttle.mark_sent(Instant::now());

        match result {
            Ok(()) => debug!("Presence update delivered"),
            Err(DiscordError::NotRunning) => {
                debug!("Discord is not running, dropping presence update")
            }
            Err(e) => warn!("Failed to update presence: {e}"),
        }
    }

    sink.shutdown();
    info!("Presence sender stopped");
}
