//! Audio sink abstraction used by the playback driver.
//!
//! A sink is the only place the driver is allowed to block: [`AudioSink::period_ready`]
//! suspends until the device can take another period. Each period is written in place
//! through a [`PeriodView`] the sink lends out for the duration of a single
//! [`AudioSink::commit`] call, then takes back.

use std::ops::{Deref, DerefMut};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::SessionConfig;

/// Sink failures, split by how the driver must react.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink could not be opened or negotiated to the session parameters. Fatal.
    #[error("audio sink configuration failed: {0}")]
    Config(String),
    /// A mid-stream device fault (preemption, stream error). Recoverable via reset.
    #[error("audio device fault: {0}")]
    Device(String),
    /// The device starved and dropped a period. Counted; no reset needed.
    #[error("audio device underrun")]
    Underrun,
    /// The device went away (unplugged, stream invalidated). Fatal.
    #[error("audio device disconnected: {0}")]
    Disconnected(String),
    /// The sink is gone. Fatal.
    #[error("audio sink closed")]
    Closed,
}

impl SinkError {
    /// Whether streaming has to stop, as opposed to continuing after recovery.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Disconnected(_) | Self::Closed)
    }
}

/// Parameters handed to a sink when it is opened.
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Output device name (substring match). `None` selects the default device.
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Frames per committed period.
    pub period_frames: usize,
    /// How many periods may be queued inside the sink ahead of the device.
    pub buffered_periods: usize,
}

impl SinkConfig {
    pub fn for_session(config: &SessionConfig, device: Option<String>) -> Self {
        Self {
            device,
            sample_rate: config.sample_rate,
            period_frames: config.period_frames,
            buffered_periods: 2,
        }
    }
}

/// Mutable window onto the sink's buffer for one period.
///
/// Only obtainable inside [`AudioSink::commit`]; the borrow ends when the fill callback
/// returns, after which the sink owns the samples again.
pub struct PeriodView<'a> {
    samples: &'a mut [i16],
}

impl<'a> PeriodView<'a> {
    pub fn new(samples: &'a mut [i16]) -> Self {
        Self { samples }
    }
}

impl Deref for PeriodView<'_> {
    type Target = [i16];

    fn deref(&self) -> &[i16] {
        self.samples
    }
}

impl DerefMut for PeriodView<'_> {
    fn deref_mut(&mut self) -> &mut [i16] {
        self.samples
    }
}

/// External playback endpoint (mono, `i16`, fixed rate and period size).
///
/// Implementations are opened by their own constructors, which report
/// [`SinkError::Config`] when the requested parameters cannot be honoured.
pub trait AudioSink: Send {
    /// Frames per period. Fixed for the life of the sink.
    fn period_frames(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Block until the sink can accept another period, or until `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    fn period_ready(&mut self, timeout: Duration) -> Result<bool, SinkError>;

    /// Lend the next period buffer to `fill`, then hand the result to the device.
    fn commit(&mut self, fill: &mut dyn FnMut(PeriodView<'_>)) -> Result<(), SinkError>;

    /// Recover from a [`SinkError::Device`] fault and re-arm for the next period.
    ///
    /// Not called for [`SinkError::Underrun`], which needs no recovery.
    fn reset(&mut self) -> Result<(), SinkError>;

    /// Release the device. Further calls return [`SinkError::Closed`].
    fn close(&mut self);
}

/// Clock-paced sink that discards audio.
///
/// Accepts one period every `period_frames / sample_rate` seconds, which makes it a
/// stand-in for a real device in headless runs and tests.
pub struct NullSink {
    sample_rate: u32,
    period_frames: usize,
    period: Duration,
    next_due: Option<Instant>,
    buffer: Vec<i16>,
    committed: u64,
    closed: bool,
}

impl NullSink {
    pub fn open(config: &SinkConfig) -> Result<Self, SinkError> {
        if config.sample_rate == 0 || config.period_frames == 0 {
            return Err(SinkError::Config(format!(
                "unsupported stream: {} Hz, {} frames per period",
                config.sample_rate, config.period_frames
            )));
        }
        let period =
            Duration::from_secs_f64(config.period_frames as f64 / f64::from(config.sample_rate));
        tracing::info!(
            rate_hz = config.sample_rate,
            period_frames = config.period_frames,
            "null sink opened"
        );
        Ok(Self {
            sample_rate: config.sample_rate,
            period_frames: config.period_frames,
            period,
            next_due: None,
            buffer: vec![0; config.period_frames],
            committed: 0,
            closed: false,
        })
    }
}

impl AudioSink for NullSink {
    fn period_frames(&self) -> usize {
        self.period_frames
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn period_ready(&mut self, timeout: Duration) -> Result<bool, SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        if due <= now {
            return Ok(true);
        }
        let wait = due - now;
        if wait > timeout {
            thread::sleep(timeout);
            return Ok(false);
        }
        thread::sleep(wait);
        Ok(true)
    }

    fn commit(&mut self, fill: &mut dyn FnMut(PeriodView<'_>)) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        fill(PeriodView::new(&mut self.buffer));
        self.committed += 1;

        let now = Instant::now();
        let due = self.next_due.unwrap_or(now) + self.period;
        // Fell more than a period behind: resync instead of bursting to catch up.
        self.next_due = Some(if due + self.period < now { now } else { due });
        Ok(())
    }

    fn reset(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.next_due = None;
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            tracing::info!(periods = self.committed, "null sink closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: u32, period: usize) -> SinkConfig {
        SinkConfig {
            device: None,
            sample_rate: rate,
            period_frames: period,
            buffered_periods: 2,
        }
    }

    #[test]
    fn fatal_errors_end_streaming() {
        assert!(SinkError::Config("x".into()).is_fatal());
        assert!(SinkError::Closed.is_fatal());
        assert!(SinkError::Disconnected("unplugged".into()).is_fatal());
        assert!(!SinkError::Device("xrun".into()).is_fatal());
        assert!(!SinkError::Underrun.is_fatal());
    }

    #[test]
    fn null_sink_rejects_degenerate_config() {
        assert!(matches!(
            NullSink::open(&config(0, 64)),
            Err(SinkError::Config(_))
        ));
        assert!(matches!(
            NullSink::open(&config(8_000, 0)),
            Err(SinkError::Config(_))
        ));
    }

    #[test]
    fn null_sink_lends_full_period() {
        let mut sink = NullSink::open(&config(8_000, 80)).unwrap();
        assert!(sink.period_ready(Duration::from_millis(50)).unwrap());
        let mut seen = 0;
        sink.commit(&mut |mut view| {
            seen = view.len();
            view.fill(3);
        })
        .unwrap();
        assert_eq!(seen, 80);
    }

    #[test]
    fn null_sink_paces_periods() {
        // 10 ms periods.
        let mut sink = NullSink::open(&config(8_000, 80)).unwrap();
        let start = Instant::now();
        for _ in 0..4 {
            while !sink.period_ready(Duration::from_millis(50)).unwrap() {}
            sink.commit(&mut |_| {}).unwrap();
        }
        // First period is due immediately, the next three are 10 ms apart.
        assert!(start.elapsed() >= Duration::from_millis(29));
    }

    #[test]
    fn null_sink_times_out_before_next_period() {
        // 1 s periods.
        let mut sink = NullSink::open(&config(100, 100)).unwrap();
        assert!(sink.period_ready(Duration::from_millis(5)).unwrap());
        sink.commit(&mut |_| {}).unwrap();
        assert!(!sink.period_ready(Duration::from_millis(5)).unwrap());
    }

    #[test]
    fn closed_null_sink_refuses_work() {
        let mut sink = NullSink::open(&config(8_000, 80)).unwrap();
        sink.close();
        assert!(matches!(
            sink.period_ready(Duration::from_millis(1)),
            Err(SinkError::Closed)
        ));
        assert!(matches!(sink.commit(&mut |_| {}), Err(SinkError::Closed)));
        assert!(matches!(sink.reset(), Err(SinkError::Closed)));
    }
}
