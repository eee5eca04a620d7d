//! Per-transfer options.

use super::attributes::OwnerIdentity;
use crate::{
    errors::TransferResult,
    pipeline::{
        progress::{ProgressObserver, ProgressReporter},
        throttle::Rate,
    },
};
use std::{fmt, sync::Arc, time::Duration};

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(1000);

/// Everything a single upload or download can be tuned with.
///
/// All values are validated when set, so a constructed `TransferOptions` is
/// always usable as is.
#[derive(Clone)]
pub struct TransferOptions {
    /// Progress observer; `None` disables progress tracking entirely.
    pub on_progress: Option<Arc<dyn ProgressObserver>>,
    /// Minimum time between periodic events; `None` means final event only.
    pub progress_interval: Option<Duration>,
    /// Throughput cap; `None` means unlimited.
    pub rate_limit: Option<Rate>,
    /// Identity recorded in uploaded attributes.
    pub owner: OwnerIdentity,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            on_progress: None,
            progress_interval: Some(DEFAULT_PROGRESS_INTERVAL),
            rate_limit: None,
            owner: OwnerIdentity::default(),
        }
    }
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("progress_interval", &self.progress_interval)
            .field("rate_limit", &self.rate_limit)
            .field("owner", &self.owner)
            .finish()
    }
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.on_progress = Some(Arc::new(observer));
        self
    }

    pub fn with_progress_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.on_progress = Some(observer);
        self
    }

    /// Interval in milliseconds; 0 disables periodic events.
    pub fn with_progress_interval_ms(mut self, ms: u64) -> Self {
        self.progress_interval = (ms > 0).then(|| Duration::from_millis(ms));
        self
    }

    pub fn with_rate_limit(mut self, rate: Rate) -> Self {
        self.rate_limit = Some(rate);
        self
    }

    /// Parse and set a rate such as `"500k"`.
    pub fn with_rate_limit_str(self, rate: &str) -> TransferResult<Self> {
        Ok(self.with_rate_limit(rate.parse()?))
    }

    pub fn with_owner(mut self, owner: OwnerIdentity) -> Self {
        self.owner = owner;
        self
    }

    /// The progress stage for a transfer of `total` bytes, if tracking is on.
    pub(crate) fn progress_reporter(&self, total: u64, label: &str) -> Option<ProgressReporter> {
        self.on_progress.as_ref().map(|observer| {
            ProgressReporter::new(Arc::clone(observer), self.progress_interval)
                .with_total(total)
                .with_label(label)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::TransferError, pipeline::progress::ProgressEvent};

    #[test]
    fn defaults() {
        let opts = TransferOptions::default();
        assert!(opts.on_progress.is_none());
        assert_eq!(opts.progress_interval, Some(Duration::from_secs(1)));
        assert!(opts.rate_limit.is_none());
        assert!(opts.progress_reporter(10, "x").is_none());
    }

    #[test]
    fn zero_interval_disables_periodic_events() {
        let opts = TransferOptions::new().with_progress_interval_ms(0);
        assert!(opts.progress_interval.is_none());
    }

    #[test]
    fn rate_is_validated_when_set() {
        let opts = TransferOptions::new().with_rate_limit_str("1000k").unwrap();
        assert_eq!(opts.rate_limit.unwrap().bytes_per_second(), 1_000_000);

        let err = TransferOptions::new().with_rate_limit_str("lots").unwrap_err();
        assert!(matches!(err, TransferError::InvalidRate(_)));
    }

    #[test]
    fn reporter_built_only_with_observer() {
        let opts = TransferOptions::new().with_progress(|_: &ProgressEvent| {});
        assert!(opts.progress_reporter(10, "s3://b/k").is_some());
        assert!(format!("{opts:?}").contains("on_progress: true"));
    }
}
