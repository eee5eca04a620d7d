//! Bandwidth throttling for byte streams.
//!
//! Output is cut into chunks of a tenth of the configured rate. Each time a
//! chunk completes, the piece that completed it is held back until the bytes
//! sent in the current window no longer exceed the rate.

use crate::errors::{TransferError, TransferResult};
use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{fmt, io, str::FromStr, time::Duration};
use tokio::time::Instant;

/// Windows longer than this are restarted, so a long stall never turns into
/// a burst of catch-up traffic.
const WINDOW_MAX: Duration = Duration::from_secs(30);

/// A validated, non-zero throughput limit in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate(u64);

impl Rate {
    pub fn new(bytes_per_second: u64) -> TransferResult<Self> {
        if bytes_per_second == 0 {
            return Err(TransferError::InvalidRate(bytes_per_second.to_string()));
        }
        Ok(Self(bytes_per_second))
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.0
    }

    /// Size of one throttling quantum (~100ms of traffic), at least 1 byte.
    pub fn chunk_size(&self) -> u64 {
        self.0.div_ceil(10).max(1)
    }
}

/// Accepts plain integers and `k` (x1000) / `m` (x1,000,000) suffixes, in
/// either case: `"500"`, `"64k"`, `"2M"`.
impl FromStr for Rate {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TransferError::InvalidRate(s.to_string());
        let lower = s.trim().to_ascii_lowercase();
        let (digits, multiplier) = match lower.strip_suffix('m') {
            Some(d) => (d, 1_000_000),
            None => match lower.strip_suffix('k') {
                Some(d) => (d, 1_000),
                None => (lower.as_str(), 1),
            },
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let n: u64 = digits.parse().map_err(|_| bad())?;
        let bps = n.checked_mul(multiplier).ok_or_else(bad)?;
        Self::new(bps).map_err(|_| bad())
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} B/s", self.0)
    }
}

/// Bookkeeping for one throttled stream.
#[derive(Debug)]
pub struct RateLimiter {
    rate: Rate,
    chunk_size: u64,
    chunk_bytes: u64,
    window_start: Instant,
    window_bytes: u64,
}

impl RateLimiter {
    pub fn new(rate: Rate) -> Self {
        Self {
            rate,
            chunk_size: rate.chunk_size(),
            chunk_bytes: 0,
            window_start: Instant::now(),
            window_bytes: 0,
        }
    }

    /// How many bytes fit before the current chunk boundary.
    pub fn room(&self) -> usize {
        (self.chunk_size - self.chunk_bytes) as usize
    }

    /// Account for a piece about to be emitted. Returns how long to hold it
    /// back when the piece completes a chunk.
    pub fn record(&mut self, len: usize) -> Option<Duration> {
        self.chunk_bytes += len as u64;
        self.window_bytes += len as u64;
        if self.chunk_bytes < self.chunk_size {
            return None;
        }
        self.chunk_bytes -= self.chunk_size;
        let delay = self.delay();
        (!delay.is_zero()).then_some(delay)
    }

    fn delay(&mut self) -> Duration {
        let elapsed = self.window_start.elapsed();
        let expected =
            Duration::from_secs_f64(self.window_bytes as f64 / self.rate.bytes_per_second() as f64);
        if elapsed > WINDOW_MAX {
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }
        expected.saturating_sub(elapsed)
    }
}

/// Wrap `inner` so that it yields at most `rate` bytes per second.
///
/// Only the upstream chunk currently being cut is held in memory.
pub fn throttle<S>(inner: S, rate: Rate) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    try_stream! {
        let mut limiter = RateLimiter::new(rate);
        pin_mut!(inner);
        while let Some(chunk) = inner.next().await {
            let mut data = chunk?;
            while !data.is_empty() {
                let take = limiter.room().min(data.len());
                let piece = data.split_to(take);
                if let Some(delay) = limiter.record(piece.len()) {
                    tokio::time::sleep(delay).await;
                }
                yield piece;
            }
        }
    }
}
