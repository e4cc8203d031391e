use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Counters shared by the producer loop, the playback driver, and whoever reports on them.
///
/// All updates are `Relaxed` increments: these are diagnostics, not synchronization.
#[derive(Debug, Default)]
pub struct StreamStats {
    produced: AtomicU64,
    dropped: AtomicU64,
    overrun_events: AtomicU64,
    played: AtomicU64,
    underrun_samples: AtomicU64,
    underrun_events: AtomicU64,
    sink_faults: AtomicU64,
    sink_resets: AtomicU64,
    device_underruns: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Samples accepted into the ring.
    pub produced: u64,
    /// Samples generated but dropped because the ring was full.
    pub dropped: u64,
    pub overrun_events: u64,
    /// Real samples delivered to the sink.
    pub played: u64,
    /// Samples replaced with silence because the ring ran dry.
    pub underrun_samples: u64,
    pub underrun_events: u64,
    pub sink_faults: u64,
    pub sink_resets: u64,
    /// Underruns reported by the device itself.
    pub device_underruns: u64,
}

impl StreamStats {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_produced(&self, samples: usize) {
        self.produced.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_overrun(&self, dropped: usize) {
        self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        self.overrun_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_played(&self, samples: usize) {
        self.played.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_underrun(&self, missing: usize) {
        self.underrun_samples
            .fetch_add(missing as u64, Ordering::Relaxed);
        self.underrun_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_fault(&self) {
        self.sink_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_reset(&self) {
        self.sink_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_device_underrun(&self) {
        self.device_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            produced: self.produced.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            overrun_events: self.overrun_events.load(Ordering::Relaxed),
            played: self.played.load(Ordering::Relaxed),
            underrun_samples: self.underrun_samples.load(Ordering::Relaxed),
            underrun_events: self.underrun_events.load(Ordering::Relaxed),
            sink_faults: self.sink_faults.load(Ordering::Relaxed),
            sink_resets: self.sink_resets.load(Ordering::Relaxed),
            device_underruns: self.device_underruns.load(Ordering::Relaxed),
        }
    }
}

/// Rate limiter for warnings emitted from hot loops.
#[derive(Debug)]
pub(crate) struct LogThrottle {
    interval: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            suppressed: 0,
        }
    }

    /// Returns `Some(suppressed_since_last)` when a log line may be emitted at `now`.
    pub(crate) fn ready(&mut self, now: Instant) -> Option<u64> {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => {
                self.suppressed += 1;
                None
            }
            _ => {
                self.last = Some(now);
                Some(std::mem::take(&mut self.suppressed))
            }
        }
    }
}
