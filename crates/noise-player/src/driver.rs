//! Playback stage: the real-time consumer of the ring.
//!
//! Once per hardware period the driver:
//! - waits on the sink's period-ready signal (its only suspension point)
//! - pops exactly one period from the ring, zero-filling any shortfall
//! - commits the period to the sink
//!
//! A device fault does not end streaming: the sink is reset and the next period proceeds.
//! Only a sink that is closed, misconfigured or disconnected stops the driver.
//! The loop does no allocation and logs at most once per second while streaming.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::realtime;
use crate::ring::{PopResult, RingConsumer};
use crate::shutdown::StopFlag;
use crate::sink::{AudioSink, SinkError};
use crate::stats::{LogThrottle, StreamStats};

/// Startup options for [`PlaybackDriver`].
#[derive(Clone, Debug)]
pub struct DriverOptions {
    /// Request `SCHED_FIFO` for the driver thread; continue at normal priority if denied.
    pub realtime: bool,
    /// Longest single wait on the sink before re-checking the stop flag.
    pub poll_timeout: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            realtime: true,
            poll_timeout: Duration::from_millis(200),
        }
    }
}

pub struct PlaybackDriver {
    ring: RingConsumer,
    sink: Box<dyn AudioSink>,
    stop: StopFlag,
    stats: Arc<StreamStats>,
    options: DriverOptions,
    underrun_log: LogThrottle,
    fault_log: LogThrottle,
}

impl PlaybackDriver {
    pub fn new(
        ring: RingConsumer,
        sink: Box<dyn AudioSink>,
        stop: StopFlag,
        stats: Arc<StreamStats>,
        options: DriverOptions,
    ) -> Self {
        Self {
            ring,
            sink,
            stop,
            stats,
            options,
            underrun_log: LogThrottle::new(Duration::from_secs(1)),
            fault_log: LogThrottle::new(Duration::from_secs(1)),
        }
    }

    /// Run the driver on a dedicated thread (elevated there, if requested).
    pub fn spawn(self) -> io::Result<JoinHandle<Result<()>>> {
        thread::Builder::new()
            .name("noise-playback".to_string())
            .spawn(move || self.run())
    }

    /// Stream periods until the stop flag is raised, then close the sink.
    ///
    /// A fatal sink error raises the stop flag itself (so the producer winds down too)
    /// and is returned.
    pub fn run(mut self) -> Result<()> {
        if self.options.realtime {
            match realtime::promote_current_thread() {
                Ok(priority) => tracing::info!(priority, "playback thread running SCHED_FIFO"),
                Err(e) => tracing::warn!("{e}; continuing at normal priority"),
            }
        }
        tracing::info!(
            period_frames = self.sink.period_frames(),
            rate_hz = self.sink.sample_rate(),
            "playback driver started"
        );

        let result = self.stream_until_stopped();
        self.sink.close();
        if result.is_err() {
            self.stop.request();
        }
        tracing::info!("playback driver stopped");
        result.context("playback stopped on a fatal sink error")
    }

    fn stream_until_stopped(&mut self) -> Result<(), SinkError> {
        while !self.stop.is_stopped() {
            if let Err(e) = self.step() {
                self.recover(e)?;
            }
        }
        Ok(())
    }

    /// Deliver one period. Returns `Ok(false)` if the sink was not ready within the poll
    /// timeout (nothing consumed).
    pub fn step(&mut self) -> Result<bool, SinkError> {
        if !self.sink.period_ready(self.options.poll_timeout)? {
            return Ok(false);
        }

        let ring = &mut self.ring;
        let mut popped = PopResult::default();
        self.sink.commit(&mut |mut view| {
            popped = ring.pop_exact(&mut view);
        })?;

        self.stats.record_played(popped.read);
        if popped.is_short() {
            self.stats.record_underrun(popped.missing);
            if let Some(suppressed) = self.underrun_log.ready(Instant::now()) {
                tracing::debug!(
                    missing = popped.missing,
                    suppressed,
                    "ring underrun; period padded with silence"
                );
            }
        }
        Ok(true)
    }

    /// Handle a sink error from [`step`](Self::step). See [`recover_sink`].
    pub fn recover(&mut self, err: SinkError) -> Result<(), SinkError> {
        recover_sink(self.sink.as_mut(), err, &self.stats, &mut self.fault_log)
    }
}

/// Recovery policy shared by the playback driver and direct mode.
///
/// Fatal errors are returned. Device underruns are only counted. Any other fault resets
/// the sink; a reset that fails without being fatal is retried on the next fault.
/// Warnings go through `log` so a persistently failing sink cannot flood the output.
pub(crate) fn recover_sink(
    sink: &mut dyn AudioSink,
    err: SinkError,
    stats: &StreamStats,
    log: &mut LogThrottle,
) -> Result<(), SinkError> {
    if err.is_fatal() {
        tracing::error!("audio sink failed: {err}");
        return Err(err);
    }
    if matches!(err, SinkError::Underrun) {
        stats.record_device_underrun();
        if let Some(suppressed) = log.ready(Instant::now()) {
            tracing::debug!(suppressed, "device reported an underrun");
        }
        return Ok(());
    }

    stats.record_sink_fault();
    match sink.reset() {
        Ok(()) => {
            stats.record_sink_reset();
            if let Some(suppressed) = log.ready(Instant::now()) {
                tracing::warn!(suppressed, "{err}; sink reset");
            }
            Ok(())
        }
        Err(e) if e.is_fatal() => {
            tracing::error!("{err}; audio sink reset failed: {e}");
            Err(e)
        }
        Err(e) => {
            if let Some(suppressed) = log.ready(Instant::now()) {
                tracing::warn!(suppressed, "{err}; audio sink reset failed: {e}");
            }
            Ok(())
        }
    }
}
