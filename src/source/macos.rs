use block2::{Block, RcBlock};
use chrono::{DateTime, Utc};
use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2_app_kit::NSRunningApplication;
use objc2_foundation::{NSDate, NSDictionary, NSNumber, NSString};
use std::ffi::{c_int, c_void};
use std::sync::mpsc;
use std::time::Duration;
use tracing::debug;

use super::{NowPlayingSource, SourceError};
use crate::models::{NowPlayingInfo, ProcessId};

type DispatchQueue = *mut c_void;
type InfoDictionary = NSDictionary<NSString, AnyObject>;

#[link(name = "MediaRemote", kind = "framework")]
unsafe extern "C" {
    fn MRMediaRemoteGetNowPlayingApplicationPID(
        queue: DispatchQueue,
        completion: &Block<dyn Fn(c_int)>,
    );
    fn MRMediaRemoteGetNowPlayingApplicationIsPlaying(
        queue: DispatchQueue,
        completion: &Block<dyn Fn(u8)>,
    );
    fn MRMediaRemoteGetNowPlayingInfo(
        queue: DispatchQueue,
        completion: &Block<dyn Fn(*const InfoDictionary)>,
    );
}

unsafe extern "C" {
    fn dispatch_get_global_queue(identifier: isize, flags: usize) -> DispatchQueue;
}

const KEY_TITLE: &str = "kMRMediaRemoteNowPlayingInfoTitle";
const KEY_ARTIST: &str = "kMRMediaRemoteNowPlayingInfoArtist";
const KEY_ALBUM: &str = "kMRMediaRemoteNowPlayingInfoAlbum";
const KEY_DURATION: &str = "kMRMediaRemoteNowPlayingInfoDuration";
const KEY_TIMESTAMP: &str = "kMRMediaRemoteNowPlayingInfoTimestamp";
const KEY_ELAPSED: &str = "kMRMediaRemoteNowPlayingInfoElapsedTime";

/// MediaRemote.framework, the provider behind the macOS Now Playing widget.
pub struct MediaRemoteSource {
    timeout: Duration,
}

impl MediaRemoteSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn queue() -> DispatchQueue {
        // QOS_CLASS_DEFAULT
        unsafe { dispatch_get_global_queue(0, 0) }
    }

    fn wait<T>(&self, rx: mpsc::Receiver<T>) -> Result<T, SourceError> {
        rx.recv_timeout(self.timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => SourceError::Timeout(self.timeout),
            mpsc::RecvTimeoutError::Disconnected => {
                SourceError::Transport("completion block dropped".to_string())
            }
        })
    }
}

impl NowPlayingSource for MediaRemoteSource {
    fn now_playing_pid(&self) -> Result<ProcessId, SourceError> {
        let (tx, rx) = mpsc::channel();
        let block = RcBlock::new(move |pid: c_int| {
            let _ = tx.send(pid);
        });
        unsafe { MRMediaRemoteGetNowPlayingApplicationPID(Self::queue(), &block) };

        let raw = self.wait(rx)?;
        debug!("MediaRemote reported PID {raw}");
        Ok(ProcessId::from_raw(raw))
    }

    fn is_playing(&self) -> Result<bool, SourceError> {
        let (tx, rx) = mpsc::channel();
        let block = RcBlock::new(move |playing: u8| {
            let _ = tx.send(playing != 0);
        });
        unsafe { MRMediaRemoteGetNowPlayingApplicationIsPlaying(Self::queue(), &block) };

        self.wait(rx)
    }

    fn now_playing_info(&self) -> Result<Option<NowPlayingInfo>, SourceError> {
        let (tx, rx) = mpsc::channel();
        let block = RcBlock::new(move |dict: *const InfoDictionary| {
            // The dictionary only lives for the duration of the block.
            let info = unsafe { dict.as_ref() }.map(read_info);
            let _ = tx.send(info);
        });
        unsafe { MRMediaRemoteGetNowPlayingInfo(Self::queue(), &block) };

        self.wait(rx)
    }

    fn app_identifier(&self, pid: ProcessId) -> Result<Option<String>, SourceError> {
        if pid.is_none() {
            return Ok(None);
        }
        let app = unsafe { NSRunningApplication::runningApplicationWithProcessIdentifier(pid.as_raw()) };
        Ok(app
            .and_then(|app| unsafe { app.bundleIdentifier() })
            .map(|id| id.to_string()))
    }
}

fn read_info(dict: &InfoDictionary) -> NowPlayingInfo {
    NowPlayingInfo {
        title: string_value(dict, KEY_TITLE),
        artist: string_value(dict, KEY_ARTIST),
        album: string_value(dict, KEY_ALBUM),
        duration: number_value(dict, KEY_DURATION).map(|d| d.max(0.0) as u64),
        timestamp: date_value(dict, KEY_TIMESTAMP),
        elapsed: number_value(dict, KEY_ELAPSED).map(|e| e.max(0.0) as u64),
    }
}

fn lookup(dict: &InfoDictionary, key: &str) -> Option<Retained<AnyObject>> {
    dict.objectForKey(&NSString::from_str(key))
}

fn string_value(dict: &InfoDictionary, key: &str) -> Option<String> {
    lookup(dict, key)?
        .downcast::<NSString>()
        .ok()
        .map(|s| s.to_string())
}

fn number_value(dict: &InfoDictionary, key: &str) -> Option<f64> {
    lookup(dict, key)?
        .downcast::<NSNumber>()
        .ok()
        .map(|n| n.as_f64())
}

fn date_value(dict: &InfoDictionary, key: &str) -> Option<DateTime<Utc>> {
    let date = lookup(dict, key)?.downcast::<NSDate>().ok()?;
    let secs = date.timeIntervalSince1970();
    DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
}
