use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{NowPlayingInfo, ProcessId};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("now-playing provider is unavailable: {0}")]
    Unavailable(String),
    #[error("now-playing provider did not answer within {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("now-playing queries are not supported on this platform")]
    Unsupported,
}

/// A system-level media-status provider.
///
/// Implementations talk to whatever the platform uses to track the active
/// media session. Calls may block; callers that must not block go through
/// [`crate::query::NowPlayingPidQuery`].
pub trait NowPlayingSource: Send + Sync {
    /// PID of the application that owns now-playing status, or `ProcessId::NONE`.
    fn now_playing_pid(&self) -> Result<ProcessId, SourceError>;

    fn is_playing(&self) -> Result<bool, SourceError>;

    fn now_playing_info(&self) -> Result<Option<NowPlayingInfo>, SourceError>;

    /// Stable identifier for the app behind `pid` (bundle id, bus name).
    fn app_identifier(&self, pid: ProcessId) -> Result<Option<String>, SourceError>;
}

impl<T: NowPlayingSource + ?Sized> NowPlayingSource for Arc<T> {
    fn now_playing_pid(&self) -> Result<ProcessId, SourceError> {
        (**self).now_playing_pid()
    }

    fn is_playing(&self) -> Result<bool, SourceError> {
        (**self).is_playing()
    }

    fn now_playing_info(&self) -> Result<Option<NowPlayingInfo>, SourceError> {
        (**self).now_playing_info()
    }

    fn app_identifier(&self, pid: ProcessId) -> Result<Option<String>, SourceError> {
        (**self).app_identifier(pid)
    }
}

/// Source for platforms without a known now-playing provider.
pub struct UnsupportedSource;

impl NowPlayingSource for UnsupportedSource {
    fn now_playing_pid(&self) -> Result<ProcessId, SourceError> {
        Err(SourceError::Unsupported)
    }

    fn is_playing(&self) -> Result<bool, SourceError> {
        Err(SourceError::Unsupported)
    }

    fn now_playing_info(&self) -> Result<Option<NowPlayingInfo>, SourceError> {
        Err(SourceError::Unsupported)
    }

    fn app_identifier(&self, _pid: ProcessId) -> Result<Option<String>, SourceError> {
        Err(SourceError::Unsupported)
    }
}

/// The provider for the current platform.
pub fn system_source(timeout: Duration) -> Arc<dyn NowPlayingSource> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(macos::MediaRemoteSource::new(timeout))
    }

    #[cfg(target_os = "linux")]
    {
        Arc::new(linux::MprisSource::new(timeout))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = timeout;
        Arc::new(UnsupportedSource)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_source_reports_unsupported() {
        let source = UnsupportedSource;
        assert!(matches!(
            source.now_playing_pid(),
            Err(SourceError::Unsupported)
        ));
        assert!(matches!(source.is_playing(), Err(SourceError::Unsupported)));
    }

    #[test]
    fn test_arc_source_delegates() {
        let source: Arc<dyn NowPlayingSource> = Arc::new(stub::StubSource::with_pid(77));
        assert_eq!(source.now_playing_pid().unwrap().as_raw(), 77);
    }
}
