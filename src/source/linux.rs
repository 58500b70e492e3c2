use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::{Connection, Proxy, connection};
use zbus::names::BusName;
use zbus::zvariant::{OwnedValue, Value};

use super::{NowPlayingSource, SourceError};
use crate::models::{NowPlayingInfo, ProcessId};

const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";
const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

impl From<zbus::Error> for SourceError {
    fn from(e: zbus::Error) -> Self {
        SourceError::Transport(e.to_string())
    }
}

impl From<zbus::fdo::Error> for SourceError {
    fn from(e: zbus::fdo::Error) -> Self {
        SourceError::Transport(e.to_string())
    }
}

/// MPRIS players on the D-Bus session bus.
pub struct MprisSource {
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl MprisSource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            conn: Mutex::new(None),
        }
    }

    fn connection(&self) -> Result<Connection, SourceError> {
        let mut guard = self.conn.lock().unwrap();
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = connection::Builder::session()?
            .method_timeout(self.timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    fn players(&self, conn: &Connection) -> Result<Vec<String>, SourceError> {
        let dbus = DBusProxy::new(conn)?;
        let mut players: Vec<String> = dbus
            .list_names()?
            .into_iter()
            .map(|name| name.to_string())
            .filter(|name| name.starts_with(MPRIS_PREFIX))
            .collect();
        players.sort();
        Ok(players)
    }

    fn player_proxy<'a>(conn: &Connection, name: &'a str) -> Result<Proxy<'a>, SourceError> {
        Ok(Proxy::new(conn, name, MPRIS_PATH, PLAYER_INTERFACE)?)
    }

    fn playback_status(conn: &Connection, name: &str) -> Result<String, SourceError> {
        let proxy = Self::player_proxy(conn, name)?;
        Ok(proxy.get_property::<String>("PlaybackStatus")?)
    }

    /// The player that owns now-playing status: the first one that is
    /// playing, otherwise the first one registered.
    fn active_player(&self, conn: &Connection) -> Result<Option<String>, SourceError> {
        let players = self.players(conn)?;
        for name in &players {
            if matches!(Self::playback_status(conn, name).as_deref(), Ok("Playing")) {
                return Ok(Some(name.clone()));
            }
        }
        Ok(players.into_iter().next())
    }

    fn pid_of(conn: &Connection, name: &str) -> Result<ProcessId, SourceError> {
        let dbus = DBusProxy::new(conn)?;
        let bus_name =
            BusName::try_from(name).map_err(|e| SourceError::Transport(e.to_string()))?;
        let pid = dbus.get_connection_unix_process_id(bus_name)?;
        Ok(ProcessId::from_raw(i32::try_from(pid).unwrap_or(0)))
    }
}

impl NowPlayingSource for MprisSource {
    fn now_playing_pid(&self) -> Result<ProcessId, SourceError> {
        let conn = self.connection()?;
        match self.active_player(&conn)? {
            Some(name) => {
                let pid = Self::pid_of(&conn, &name)?;
                debug!("MPRIS player {name} has PID {pid}");
                Ok(pid)
            }
            None => Ok(ProcessId::NONE),
        }
    }

    fn is_playing(&self) -> Result<bool, SourceError> {
        let conn = self.connection()?;
        match self.active_player(&conn)? {
            Some(name) => Ok(Self::playback_status(&conn, &name)? == "Playing"),
            None => Ok(false),
        }
    }

    fn now_playing_info(&self) -> Result<Option<NowPlayingInfo>, SourceError> {
        let conn = self.connection()?;
        let Some(name) = self.active_player(&conn)? else {
            return Ok(None);
        };

        let proxy = Self::player_proxy(&conn, &name)?;
        let metadata = proxy.get_property::<HashMap<String, OwnedValue>>("Metadata")?;
        let position = proxy.get_property::<i64>("Position").ok();

        Ok(Some(read_metadata(&metadata, position)))
    }

    fn app_identifier(&self, pid: ProcessId) -> Result<Option<String>, SourceError> {
        if pid.is_none() {
            return Ok(None);
        }
        let conn = self.connection()?;
        for name in self.players(&conn)? {
            if Self::pid_of(&conn, &name).ok() == Some(pid) {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }
}

fn read_metadata(metadata: &HashMap<String, OwnedValue>, position_us: Option<i64>) -> NowPlayingInfo {
    let string = |key: &str| match metadata.get(key).map(|v| &**v) {
        Some(Value::Str(s)) if !s.as_str().is_empty() => Some(s.to_string()),
        _ => None,
    };

    let artist = match metadata.get("xesam:artist").map(|v| &**v) {
        Some(Value::Array(artists)) => {
            let names: Vec<&str> = artists
                .inner()
                .iter()
                .filter_map(|v| match v {
                    Value::Str(s) if !s.as_str().is_empty() => Some(s.as_str()),
                    _ => None,
                })
                .collect();
            (!names.is_empty()).then(|| names.join(", "))
        }
        Some(Value::Str(s)) if !s.as_str().is_empty() => Some(s.to_string()),
        _ => None,
    };

    // Players disagree on the integer type of mpris:length
    let length_us = match metadata.get("mpris:length").map(|v| &**v) {
        Some(Value::I64(l)) => Some(*l),
        Some(Value::U64(l)) => Some(i64::try_from(*l).unwrap_or(i64::MAX)),
        Some(Value::I32(l)) => Some(i64::from(*l)),
        Some(Value::U32(l)) => Some(i64::from(*l)),
        _ => None,
    };

    NowPlayingInfo {
        title: string("xesam:title"),
        artist,
        album: string("xesam:album"),
        duration: length_us.filter(|l| *l > 0).map(|l| (l / 1_000_000) as u64),
        timestamp: position_us.map(|_| Utc::now()),
        elapsed: position_us.filter(|p| *p >= 0).map(|p| (p / 1_000_000) as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(v: impl Into<Value<'static>>) -> OwnedValue {
        OwnedValue::try_from(v.into()).unwrap()
    }

    fn metadata(entries: Vec<(&str, OwnedValue)>) -> HashMap<String, OwnedValue> {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_read_metadata_full_track() {
        let md = metadata(vec![
            ("xesam:title", value("Hey Jude")),
            (
                "xesam:artist",
                value(vec!["The Beatles".to_string(), "Paul".to_string()]),
            ),
            ("xesam:album", value("Hey Jude")),
            ("mpris:length", value(431_000_000i64)),
        ]);

        let info = read_metadata(&md, Some(61_500_000));
        assert_eq!(info.title.as_deref(), Some("Hey Jude"));
        assert_eq!(info.artist.as_deref(), Some("The Beatles, Paul"));
        assert_eq!(info.album.as_deref(), Some("Hey Jude"));
        assert_eq!(info.duration, Some(431));
        assert_eq!(info.elapsed, Some(61));
        assert!(info.timestamp.is_some());
    }

    #[test]
    fn test_read_metadata_unsigned_length() {
        let md = metadata(vec![("mpris:length", value(90_000_000u64))]);
        assert_eq!(read_metadata(&md, None).duration, Some(90));
    }

    #[test]
    fn test_read_metadata_drops_empty_strings() {
        let md = metadata(vec![
            ("xesam:title", value("")),
            ("xesam:artist", value(vec![String::new()])),
            ("xesam:album", value("")),
        ]);

        let info = read_metadata(&md, None);
        assert!(info.title.is_none());
        assert!(info.artist.is_none());
        assert!(info.album.is_none());
        assert!(info.timestamp.is_none());
    }

    #[test]
    fn test_read_metadata_ignores_bad_lengths_and_positions() {
        let md = metadata(vec![("mpris:length", value(-5i64))]);
        let info = read_metadata(&md, Some(-1_000_000));
        assert!(info.duration.is_none());
        assert!(info.elapsed.is_none());
        assert!(info.timestamp.is_some());
    }

    #[test]
    fn test_read_metadata_oversized_length_has_no_timestamps() {
        let md = metadata(vec![("mpris:length", value(i64::MAX))]);
        let info = read_metadata(&md, Some(0));
        assert_eq!(info.duration, Some((i64::MAX / 1_000_000) as u64));
        assert!(info.timestamps().is_none());
    }
}
