//! Progress reporting for byte streams.
//!
//! A reporter counts bytes passing through it. When an interval is set, a
//! timer task emits periodic events whether or not chunks are arriving. The
//! end of the stream cancels the timer and emits exactly one final event.

use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    fmt, io,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

/// A snapshot of transfer progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub bytes_transferred: u64,
    pub is_done: bool,
    /// Expected size, when known up front.
    pub total: Option<u64>,
    /// Static label supplied when the reporter was built (e.g. the object).
    pub label: Option<String>,
    /// Time since the stream started flowing.
    pub elapsed: Duration,
}

impl ProgressEvent {
    /// Percentage complete, when the total is known and non-zero.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) => self.is_done.then_some(100.0),
            Some(total) => Some(self.bytes_transferred as f64 * 100.0 / total as f64),
            None => None,
        }
    }

    /// Average throughput since the start.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_transferred as f64 / secs
    }

    /// Estimated time to completion at the average rate so far.
    pub fn eta(&self) -> Option<Duration> {
        let total = self.total?;
        let remaining = total.saturating_sub(self.bytes_transferred);
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }
}

/// Receives progress events.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Forwards events into a channel for callers that prefer to read them.
pub struct ChannelObserver(mpsc::UnboundedSender<ProgressEvent>);

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        // A receiver that went away just stops listening.
        let _ = self.0.send(event.clone());
    }
}

/// Configuration of one progress stage.
#[derive(Clone)]
pub struct ProgressReporter {
    observer: Arc<dyn ProgressObserver>,
    interval: Option<Duration>,
    total: Option<u64>,
    label: Option<String>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("interval", &self.interval)
            .field("total", &self.total)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// A zero interval means only the final event is emitted.
    pub fn new(observer: Arc<dyn ProgressObserver>, interval: Option<Duration>) -> Self {
        Self {
            observer,
            interval: interval.filter(|d| !d.is_zero()),
            total: None,
            label: None,
        }
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Wrap `inner`, counting bytes and reporting as configured.
    pub fn report<S>(self, inner: S) -> impl Stream<Item = io::Result<Bytes>> + Send
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        try_stream! {
            let shared = Arc::new(Shared {
                reporter: self,
                bytes: AtomicU64::new(0),
                started: Instant::now(),
                finished: Mutex::new(false),
            });
            let ticker = shared.reporter.interval.map(|every| Ticker::spawn(Arc::clone(&shared), every));

            pin_mut!(inner);
            while let Some(chunk) = inner.next().await {
                let chunk = chunk?;
                shared.bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                yield chunk;
            }

            drop(ticker);
            shared.emit_final();
        }
    }
}

struct Shared {
    reporter: ProgressReporter,
    bytes: AtomicU64,
    started: Instant,
    /// Serialises emission so no periodic event can follow the final one.
    finished: Mutex<bool>,
}

impl Shared {
    fn event(&self, is_done: bool) -> ProgressEvent {
        ProgressEvent {
            bytes_transferred: self.bytes.load(Ordering::Relaxed),
            is_done,
            total: self.reporter.total,
            label: self.reporter.label.clone(),
            elapsed: self.started.elapsed(),
        }
    }

    fn emit_periodic(&self) {
        let finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        if !*finished {
            self.reporter.observer.on_progress(&self.event(false));
        }
    }

    fn emit_final(&self) {
        let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        *finished = true;
        self.reporter.observer.on_progress(&self.event(true));
    }
}

/// Periodic emitter; aborted when dropped, which covers both normal
/// completion and a pipeline torn down mid-transfer.
struct Ticker(JoinHandle<()>);

impl Ticker {
    fn spawn(shared: Arc<Shared>, every: Duration) -> Self {
        Self(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                shared.emit_periodic();
            }
        }))
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::throttle::{Rate, throttle};
    use futures::stream;

    fn recorder() -> (Arc<Mutex<Vec<ProgressEvent>>>, Arc<dyn ProgressObserver>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let observer: Arc<dyn ProgressObserver> =
            Arc::new(move |e: &ProgressEvent| sink.lock().unwrap().push(e.clone()));
        (events, observer)
    }

    fn chunks(total: usize, piece: usize) -> Vec<io::Result<Bytes>> {
        vec![0u8; total]
            .chunks(piece)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_events_then_one_final() {
        let (events, observer) = recorder();
        let reporter = ProgressReporter::new(observer, Some(Duration::from_millis(1000)))
            .with_total(10_000)
            .with_label("s3://bucket/file");

        // 10k bytes at 3k/s takes a little over 3 seconds.
        let source = throttle(stream::iter(chunks(10_000, 512)), Rate::new(3_000).unwrap());
        let out: Vec<Bytes> = reporter
            .report(source)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out.iter().map(Bytes::len).sum::<usize>(), 10_000);

        let events = events.lock().unwrap();
        let periodic = events.iter().filter(|e| !e.is_done).count();
        let finals: Vec<_> = events.iter().filter(|e| e.is_done).collect();
        assert!(periodic >= 1, "expected periodic events, got {events:?}");
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].bytes_transferred, 10_000);
        assert_eq!(finals[0].label.as_deref(), Some("s3://bucket/file"));
        assert_eq!(finals[0].percent(), Some(100.0));
        assert!(events.last().unwrap().is_done);
    }

    #[tokio::test(start_paused = true)]
    async fn without_interval_only_final_is_emitted() {
        let (events, observer) = recorder();
        let reporter = ProgressReporter::new(observer, Some(Duration::ZERO));
        let source = throttle(stream::iter(chunks(5_000, 256)), Rate::new(1_000).unwrap());
        let _: Vec<_> = reporter.report(source).collect().await;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_done);
        assert_eq!(events[0].bytes_transferred, 5_000);
        assert!(events[0].total.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stream_emits_no_final_event_and_stops_ticking() {
        let (events, observer) = recorder();
        let reporter = ProgressReporter::new(observer, Some(Duration::from_millis(100)));
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("network reset")),
        ]);
        let out: Vec<_> = reporter.report(source).collect().await;
        assert!(out[1].is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(events.lock().unwrap().iter().all(|e| !e.is_done));
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn channel_observer_forwards_events() {
        let (observer, mut rx) = ChannelObserver::new();
        let reporter = ProgressReporter::new(Arc::new(observer), None).with_total(3);
        let _: Vec<_> = reporter
            .report(stream::iter(vec![Ok(Bytes::from_static(b"abc"))]))
            .collect()
            .await;
        let event = rx.recv().await.unwrap();
        assert!(event.is_done);
        assert_eq!(event.bytes_transferred, 3);
    }

    #[test]
    fn speed_statistics() {
        let event = ProgressEvent {
            bytes_transferred: 2_000,
            is_done: false,
            total: Some(10_000),
            label: None,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(event.percent(), Some(20.0));
        assert_eq!(event.bytes_per_second(), 1_000.0);
        assert_eq!(event.eta(), Some(Duration::from_secs(8)));

        let stalled = ProgressEvent {
            elapsed: Duration::ZERO,
            ..event
        };
        assert_eq!(stalled.eta(), None);
    }
}
