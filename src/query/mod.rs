//! Asynchronous now-playing queries with completion callbacks.
//!
//! A request returns immediately. The provider is asked on a short-lived
//! query thread and the completion is then handed to the caller's
//! [`ExecutionContext`], so the callback never runs on the requesting thread
//! unless that thread is the context itself.

use anyhow::{Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::models::ProcessId;
use crate::source::NowPlayingSource;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where a completion callback runs.
pub trait ExecutionContext: Send + Sync {
    fn dispatch(&self, job: Job);
}

impl<T: ExecutionContext + ?Sized> ExecutionContext for Arc<T> {
    fn dispatch(&self, job: Job) {
        (**self).dispatch(job)
    }
}

struct QueueInner {
    label: String,
    tx: Sender<Job>,
    thread_id: ThreadId,
}

/// A labelled worker thread that runs jobs one at a time, in submission order.
#[derive(Clone)]
pub struct SerialQueue {
    inner: Arc<QueueInner>,
}

impl SerialQueue {
    pub fn new(label: &str) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let thread_label = label.to_string();

        let handle = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                // Exits once every sender is gone.
                for job in rx {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Job panicked on queue '{thread_label}'");
                    }
                }
                debug!("Queue '{thread_label}' drained");
            })
            .with_context(|| format!("Failed to spawn queue thread '{label}'"))?;

        Ok(Self {
            inner: Arc::new(QueueInner {
                label: label.to_string(),
                tx,
                thread_id: handle.thread().id(),
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// True when called from a job running on this queue.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }
}

impl ExecutionContext for SerialQueue {
    fn dispatch(&self, job: Job) {
        if self.inner.tx.send(job).is_err() {
            error!("Queue '{}' is gone, dropping job", self.inner.label);
        }
    }
}

/// Single-shot query for the PID of the now-playing application.
#[derive(Clone)]
pub struct NowPlayingPidQuery {
    source: Arc<dyn NowPlayingSource>,
}

impl NowPlayingPidQuery {
    pub fn new(source: Arc<dyn NowPlayingSource>) -> Self {
        Self { source }
    }

    /// Ask the provider for the now-playing PID and deliver it to
    /// `on_complete` on `context`. Any provider failure is delivered as
    /// `ProcessId::NONE`.
    pub fn request<C, F>(&self, context: &C, on_complete: F)
    where
        C: ExecutionContext + Clone + 'static,
        F: FnOnce(ProcessId) + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        let ask = move || match source.now_playing_pid() {
            Ok(pid) => pid,
            Err(e) => {
                warn!("Now-playing PID query failed: {e}");
                ProcessId::NONE
            }
        };
        run_query(context, ProcessId::NONE, on_complete, ask);
    }

    /// Ask whether the now-playing application is playing. Failures read as
    /// not playing.
    pub fn request_is_playing<C, F>(&self, context: &C, on_complete: F)
    where
        C: ExecutionContext + Clone + 'static,
        F: FnOnce(bool) + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        let ask = move || match source.is_playing() {
            Ok(playing) => playing,
            Err(e) => {
                warn!("Now-playing state query failed: {e}");
                false
            }
        };
        run_query(context, false, on_complete, ask);
    }

    /// Run [`request`](Self::request) on a private queue and wait for the
    /// answer. Gives `NONE` if nothing arrives within `timeout`.
    pub fn request_blocking(&self, timeout: Duration) -> Result<ProcessId> {
        let queue = SerialQueue::new("nowplaying.pid")?;
        let (tx, rx) = mpsc::channel();
        self.request(&queue, move |pid| {
            let _ = tx.send(pid);
        });

        match rx.recv_timeout(timeout) {
            Ok(pid) => Ok(pid),
            Err(_) => {
                warn!("No now-playing PID within {timeout:?}");
                Ok(ProcessId::NONE)
            }
        }
    }
}

/// Runs `query` on its own thread and hands the answer to `on_complete` on
/// `context`. A panicking provider or a failed spawn delivers `fallback`.
fn run_query<C, T, Q, F>(context: &C, fallback: T, on_complete: F, query: Q)
where
    C: ExecutionContext + Clone + 'static,
    T: Copy + Send + 'static,
    Q: FnOnce() -> T + Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(on_complete)));
    let worker_context = context.clone();
    let worker_slot = Arc::clone(&slot);

    let spawned = thread::Builder::new()
        .name("nowplaying-query".to_string())
        .spawn(move || {
            let value = panic::catch_unwind(AssertUnwindSafe(query)).unwrap_or_else(|_| {
                error!("Now-playing provider panicked");
                fallback
            });
            deliver(&worker_context, &worker_slot, value);
        });

    if let Err(e) = spawned {
        error!("Failed to spawn query thread: {e}");
        deliver(context, &slot, fallback);
    }
}

fn deliver<C, T, F>(context: &C, slot: &Mutex<Option<F>>, value: T)
where
    C: ExecutionContext,
    T: Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    if let Some(on_complete) = slot.lock().unwrap().take() {
        context.dispatch(Box::new(move || on_complete(value)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NowPlayingInfo;
    use crate::source::SourceError;
    use crate::source::stub::StubSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_serial_queue_runs_in_order() {
        let queue = SerialQueue::new("test.order").unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            queue.dispatch(Box::new(move || tx.send(i).unwrap()));
        }
        let seen: Vec<i32> = (0..10).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_serial_queue_survives_panicking_job() {
        let queue = SerialQueue::new("test.panic").unwrap();
        queue.dispatch(Box::new(|| panic!("boom")));

        let (tx, rx) = mpsc::channel();
        queue.dispatch(Box::new(move || tx.send("still alive").unwrap()));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "still alive");
    }

    #[test]
    fn test_request_delivers_pid_on_context() {
        let query = NowPlayingPidQuery::new(Arc::new(StubSource::with_pid(4242)));
        let queue = SerialQueue::new("test.context").unwrap();
        let check = queue.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (tx, rx) = mpsc::channel();

        query.request(&queue, move |pid| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send((pid, check.is_current())).unwrap();
        });

        let (pid, on_context) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(pid, ProcessId::from_raw(4242));
        assert!(on_context);
        assert!(!queue.is_current());

        // Nothing else may arrive.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_does_not_block_caller() {
        let source = StubSource::with_pid(1).delayed(Duration::from_millis(300));
        let query = NowPlayingPidQuery::new(Arc::new(source));
        let queue = SerialQueue::new("test.nonblocking").unwrap();
        let (tx, rx) = mpsc::channel();

        let started = std::time::Instant::now();
        query.request(&queue, move |pid| tx.send(pid).unwrap());
        assert!(started.elapsed() < Duration::from_millis(300));

        assert_eq!(rx.recv_timeout(WAIT).unwrap().as_raw(), 1);
    }

    #[test]
    fn test_nothing_playing_yields_sentinel() {
        let query = NowPlayingPidQuery::new(Arc::new(StubSource::with_pid(0)));
        let queue = SerialQueue::new("test.none").unwrap();
        let (tx, rx) = mpsc::channel();

        query.request(&queue, move |pid| tx.send(pid).unwrap());

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), ProcessId::NONE);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_provider_failure_yields_sentinel() {
        let query = NowPlayingPidQuery::new(Arc::new(StubSource::failing("daemon gone")));
        let queue = SerialQueue::new("test.failure").unwrap();
        let (tx, rx) = mpsc::channel();

        query.request(&queue, move |pid| tx.send(pid).unwrap());

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), ProcessId::NONE);
    }

    #[test]
    fn test_concurrent_requests_do_not_cross() {
        let slow = NowPlayingPidQuery::new(Arc::new(
            StubSource::with_pid(111).delayed(Duration::from_millis(150)),
        ));
        let fast = NowPlayingPidQuery::new(Arc::new(StubSource::with_pid(222)));
        let queue_a = SerialQueue::new("test.a").unwrap();
        let queue_b = SerialQueue::new("test.b").unwrap();
        let (tx, rx) = mpsc::channel();

        let tx_a = tx.clone();
        slow.request(&queue_a, move |pid| tx_a.send(("a", pid)).unwrap());
        fast.request(&queue_b, move |pid| tx.send(("b", pid)).unwrap());

        let mut results: Vec<_> = (0..2).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        results.sort_by_key(|(tag, _)| *tag);
        assert_eq!(
            results,
            vec![
                ("a", ProcessId::from_raw(111)),
                ("b", ProcessId::from_raw(222))
            ]
        );
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    struct PanickingSource;

    impl NowPlayingSource for PanickingSource {
        fn now_playing_pid(&self) -> Result<ProcessId, SourceError> {
            panic!("provider crashed");
        }

        fn is_playing(&self) -> Result<bool, SourceError> {
            panic!("provider crashed");
        }

        fn now_playing_info(&self) -> Result<Option<NowPlayingInfo>, SourceError> {
            panic!("provider crashed");
        }

        fn app_identifier(&self, _pid: ProcessId) -> Result<Option<String>, SourceError> {
            panic!("provider crashed");
        }
    }

    #[test]
    fn test_panicking_provider_still_completes() {
        let query = NowPlayingPidQuery::new(Arc::new(PanickingSource));
        let queue = SerialQueue::new("test.provider_panic").unwrap();
        let (tx, rx) = mpsc::channel();

        let pid_tx = tx.clone();
        query.request(&queue, move |pid| pid_tx.send(pid.is_none()).unwrap());
        query.request_is_playing(&queue, move |playing| tx.send(!playing).unwrap());

        assert!(rx.recv_timeout(WAIT).unwrap());
        assert!(rx.recv_timeout(WAIT).unwrap());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_request_is_playing() {
        let stub = StubSource::with_pid(5);
        *stub.playing.lock().unwrap() = false;
        let query = NowPlayingPidQuery::new(Arc::new(stub));
        let queue = SerialQueue::new("test.playing").unwrap();
        let (tx, rx) = mpsc::channel();

        query.request_is_playing(&queue, move |playing| tx.send(playing).unwrap());

        assert!(!rx.recv_timeout(WAIT).unwrap());
    }

    #[test]
    fn test_request_blocking() {
        let query = NowPlayingPidQuery::new(Arc::new(StubSource::with_pid(31337)));
        assert_eq!(query.request_blocking(WAIT).unwrap().as_raw(), 31337);
    }

    #[test]
    fn test_request_blocking_times_out_to_sentinel() {
        let source = StubSource::with_pid(9).delayed(Duration::from_millis(500));
        let query = NowPlayingPidQuery::new(Arc::new(source));
        let pid = query.request_blocking(Duration::from_millis(50)).unwrap();
        assert!(pid.is_none());
    }
}
