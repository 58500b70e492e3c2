use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an OS process, or [`ProcessId::NONE`] when no application
/// currently owns now-playing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i32")]
pub struct ProcessId(i32);

impl ProcessId {
    pub const NONE: ProcessId = ProcessId(0);

    /// Negative and zero values collapse to `NONE`.
    pub fn from_raw(raw: i32) -> Self {
        if raw > 0 { Self(raw) } else { Self::NONE }
    }

    pub fn as_raw(self) -> i32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl From<i32> for ProcessId {
    fn from(raw: i32) -> Self {
        Self::from_raw(raw)
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Track length in seconds
    pub duration: Option<u64>,
    /// When the provider last sampled the elapsed time
    pub timestamp: Option<DateTime<Utc>>,
    /// Seconds into the track at `timestamp`
    pub elapsed: Option<u64>,
}

impl NowPlayingInfo {
    pub fn cache_key(&self) -> String {
        format!(
            "{};{};{}",
            self.title.as_deref().unwrap_or(""),
            self.artist.as_deref().unwrap_or(""),
            self.album.as_deref().unwrap_or("")
        )
    }

    pub fn search_terms(&self) -> String {
        format!(
            "{} {} {}",
            self.title.as_deref().unwrap_or(""),
            self.artist.as_deref().unwrap_or(""),
            self.album.as_deref().unwrap_or("")
        )
    }

    /// Start and end of the track in unix seconds, if enough is known.
    /// Values too large to place on the calendar give `None`.
    pub fn timestamps(&self) -> Option<(i64, i64)> {
        let timestamp = self.timestamp?;
        let duration = i64::try_from(self.duration?).ok()?;
        let elapsed = i64::try_from(self.elapsed.unwrap_or(0)).ok()?;

        let start = timestamp.checked_sub_signed(TimeDelta::try_seconds(elapsed)?)?;
        let remaining = TimeDelta::try_seconds(duration.checked_sub(elapsed)?)?;
        let end = timestamp.checked_add_signed(remaining)?;
        Some((start.timestamp(), end.timestamp()))
    }

    pub fn format_duration(&self) -> String {
        match self.duration {
            Some(d) => format!("{}:{:02}", d / 60, d % 60),
            None => "--:--".to_string(),
        }
    }
}

/// What the daemon last observed and pushed to Discord.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub pid: ProcessId,
    pub app: Option<String>,
    pub is_playing: bool,
    pub track: Option<NowPlayingInfo>,
    pub artwork: Option<String>,
    pub discord_connected: bool,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtworkLink {
    pub hash: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
}

impl ArtworkLink {
    pub fn new(hash: String, link: String) -> Self {
        Self {
            hash,
            link,
            created_at: Utc::now(),
        }
    }
}
