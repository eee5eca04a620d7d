//! Linear byte pipelines: one source, optional flow-control stages, one sink.
//!
//! Stages are stream adapters stacked in the order they are added. The first
//! error raised by any stage ends the chain, and dropping the pipeline drops
//! every stage with it (the progress timer included).

pub mod hasher;
pub mod progress;
pub mod throttle;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::{
    io,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use self::{hasher::ContentHasher, progress::ProgressReporter, throttle::Rate};

/// The byte stream type passed between the pipeline and the remote store.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

pub struct Pipeline {
    stream: ByteStream,
    stages: Vec<&'static str>,
}

impl Pipeline {
    pub fn from_source<S>(source: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: Box::pin(source),
            stages: vec!["source"],
        }
    }

    /// Feed every byte seen at this point of the chain into `hasher`.
    pub fn hash(mut self, hasher: &ContentHasher) -> Self {
        self.stream = Box::pin(hasher.tap(self.stream));
        self.stages.push("hash");
        self
    }

    pub fn throttle(mut self, rate: Option<Rate>) -> Self {
        if let Some(rate) = rate {
            self.stream = Box::pin(throttle::throttle(self.stream, rate));
            self.stages.push("throttle");
        }
        self
    }

    pub fn report_progress(mut self, reporter: Option<ProgressReporter>) -> Self {
        if let Some(reporter) = reporter {
            self.stream = Box::pin(reporter.report(self.stream));
            self.stages.push("progress");
        }
        self
    }

    /// Stage names in order, for logging.
    pub fn stages(&self) -> &[&'static str] {
        &self.stages
    }

    /// Finish the chain as a request body for the remote store.
    ///
    /// The store only sees a copy of a stage failure; the original error is
    /// kept in the returned [`StageFailure`] so the caller can report the real
    /// cause rather than whatever the store made of it.
    pub fn into_body(self) -> (ByteStream, StageFailure) {
        debug!(stages = ?self.stages, "pipeline assembled as body");
        let failure = StageFailure::default();
        let slot = failure.clone();
        let body = self.stream.map(move |item| {
            item.map_err(|err| {
                let echo = io::Error::new(err.kind(), err.to_string());
                slot.record(err);
                echo
            })
        });
        (Box::pin(body), failure)
    }

    /// Drain the chain into `sink`, returning the number of bytes written.
    pub async fn drain_into<W>(mut self, sink: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        debug!(stages = ?self.stages, "pipeline draining into sink");
        let mut written = 0u64;
        while let Some(chunk) = self.stream.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }
}

/// First error raised inside a pipeline handed off as a body.
#[derive(Clone, Default)]
pub struct StageFailure(Arc<Mutex<Option<io::Error>>>);

impl StageFailure {
    fn record(&self, err: io::Error) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn take(&self) -> Option<io::Error> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
