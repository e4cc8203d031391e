//! Session wiring: source → producer → ring → playback driver → sink.
//!
//! [`Session::start`] validates the configuration against the opened sink, builds the
//! ring, and spawns both loops. The caller keeps the [`Session`] to stop and join them;
//! the ring is dropped only after both threads have exited.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::SessionConfig;
use crate::config::{BITS_PER_SAMPLE, CHANNELS};
use crate::driver::{DriverOptions, PlaybackDriver, recover_sink};
use crate::producer::ProducerLoop;
use crate::ring::ring_buffer;
use crate::shutdown::{ShutdownController, StopFlag};
use crate::sink::{AudioSink, SinkError};
use crate::source::SampleSource;
use crate::stats::{LogThrottle, StatsSnapshot, StreamStats};

/// A running stream. Dropping it stops and joins both loops.
pub struct Session {
    controller: ShutdownController,
    stats: Arc<StreamStats>,
    config: SessionConfig,
}

impl Session {
    /// Start streaming `source` into `sink`.
    ///
    /// The sink's period size is authoritative; the ring must hold at least one period and
    /// the sink must run at the configured rate. Nothing is spawned if either check fails.
    pub fn start(
        mut config: SessionConfig,
        source: Box<dyn SampleSource>,
        sink: Box<dyn AudioSink>,
        stop: StopFlag,
    ) -> Result<Self> {
        if sink.sample_rate() != config.sample_rate {
            return Err(SinkError::Config(format!(
                "sink runs at {} Hz, session expects {} Hz",
                sink.sample_rate(),
                config.sample_rate
            ))
            .into());
        }
        config.period_frames = sink.period_frames();
        config.validate().context("invalid session config")?;

        let stats = StreamStats::shared();
        let (ring_tx, ring_rx) = ring_buffer(config.capacity_frames);
        let mut controller = ShutdownController::new(stop.clone());

        let producer = ProducerLoop::new(
            ring_tx,
            source,
            stop.clone(),
            stats.clone(),
            config.batch_frames,
            config.interval,
        );
        controller.attach_producer(producer.spawn().context("spawn producer thread")?);

        let driver = PlaybackDriver::new(
            ring_rx,
            sink,
            stop,
            stats.clone(),
            DriverOptions {
                realtime: config.realtime,
                poll_timeout: config.poll_timeout,
            },
        );
        // On failure the controller's Drop stops and joins the producer.
        controller.attach_driver(driver.spawn().context("spawn playback thread")?);

        tracing::info!(
            rate_hz = config.sample_rate,
            channels = CHANNELS,
            bits_per_sample = BITS_PER_SAMPLE,
            period_frames = config.period_frames,
            period_ms = config.period_duration().as_millis() as u64,
            capacity_frames = config.capacity_frames,
            batch_frames = config.batch_frames,
            interval_ms = config.interval.as_millis() as u64,
            ring_latency_ms = config.ring_latency().as_millis() as u64,
            "streaming session started"
        );

        Ok(Self {
            controller,
            stats,
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.controller.stop_flag()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Idempotent; returns `true` for the call that actually raised the flag.
    pub fn request_stop(&self) -> bool {
        self.controller.request_stop()
    }

    /// Block until someone raises the stop flag (signal handler, fatal sink error).
    pub fn wait(&self) {
        self.controller.stop_flag().wait();
    }

    /// Stop (if not already stopping), join both loops, and return the final counters.
    pub fn join(mut self) -> Result<StatsSnapshot> {
        self.controller.request_stop();
        self.controller.join_all()?;
        let snapshot = self.stats.snapshot();
        tracing::info!(?snapshot, "streaming session finished");
        Ok(snapshot)
    }
}

/// Synchronous variant without a ring: generate one period and commit it, in a loop, on
/// the calling thread. Sink errors are handled as in the threaded driver; returns when
/// `stop` is raised or the sink fails fatally.
pub fn run_direct(
    source: &mut dyn SampleSource,
    sink: &mut dyn AudioSink,
    stop: &StopFlag,
    stats: &StreamStats,
    poll_timeout: Duration,
) -> Result<()> {
    tracing::info!(
        period_frames = sink.period_frames(),
        rate_hz = sink.sample_rate(),
        "direct playback started"
    );
    let result = direct_loop(source, sink, stop, stats, poll_timeout);
    sink.close();
    tracing::info!("direct playback stopped");
    result
}

fn direct_loop(
    source: &mut dyn SampleSource,
    sink: &mut dyn AudioSink,
    stop: &StopFlag,
    stats: &StreamStats,
    poll_timeout: Duration,
) -> Result<()> {
    let mut fault_log = LogThrottle::new(Duration::from_secs(1));
    while !stop.is_stopped() {
        let outcome = sink.period_ready(poll_timeout).and_then(|ready| {
            if ready {
                sink.commit(&mut |mut view| source.fill(&mut view))?;
            }
            Ok(ready)
        });
        match outcome {
            Ok(true) => {
                let frames = sink.period_frames();
                stats.record_produced(frames);
                stats.record_played(frames);
            }
            Ok(false) => {}
            Err(e) => {
                recover_sink(sink, e, stats, &mut fault_log).context("direct playback failed")?
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{NullSink, SinkConfig};
    use crate::source::{Silence, Sine, WhiteNoise};
    use crate::testing::MemorySink;
    use std::thread;
    use std::time::Instant;

    fn fast_config(period_frames: usize) -> SessionConfig {
        let mut config = SessionConfig::new(22_050, period_frames);
        config.realtime = false;
        config.interval = Duration::from_millis(2);
        config.batch_frames = 64;
        config.poll_timeout = Duration::from_millis(20);
        config
    }

    #[test]
    fn session_streams_noise_in_order() {
        let sink = MemorySink::new(64).paced(Duration::from_millis(1));
        let log = sink.log();
        let mut config = fast_config(64);
        // Large enough that nothing is dropped while the test runs.
        config.capacity_frames = 1 << 16;
        let session = Session::start(
            config,
            Box::new(WhiteNoise::with_seed(11)),
            Box::new(sink),
            StopFlag::new(),
        )
        .unwrap();

        while log.lock().unwrap().periods.len() < 20 {
            thread::sleep(Duration::from_millis(1));
        }
        let snapshot = session.join().unwrap();
        assert_eq!(snapshot.dropped, 0);

        // Whatever reached the sink is a prefix of the generator stream, padded with
        // silence where the ring ran dry.
        let log = log.lock().unwrap();
        let real: Vec<i16> = log.periods.iter().flatten().copied().collect();
        let expected = WhiteNoise::with_seed(11).generate(snapshot.produced as usize);
        let mut cursor = 0;
        for sample in real {
            if cursor < expected.len() && sample == expected[cursor] {
                cursor += 1;
            } else {
                assert_eq!(sample, 0);
            }
        }
        assert_eq!(cursor as u64, snapshot.played);
        assert!(log.closed);
    }

    #[test]
    fn join_after_stop_is_prompt_and_repeatable_stop_is_harmless() {
        let sink = MemorySink::new(128).paced(Duration::from_millis(2));
        let session = Session::start(
            fast_config(128),
            Box::new(Silence),
            Box::new(sink),
            StopFlag::new(),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(session.request_stop());
        assert!(!session.request_stop());
        assert!(!session.request_stop());

        let start = Instant::now();
        session.join().unwrap();
        // One tick plus one period (plus scheduling slack).
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn external_stop_flag_ends_session() {
        let stop = StopFlag::new();
        let sink = NullSink::open(&SinkConfig {
            device: None,
            sample_rate: 22_050,
            period_frames: 256,
            buffered_periods: 2,
        })
        .unwrap();
        let session = Session::start(
            fast_config(256),
            Box::new(Sine::new(440.0, 0.5, 22_050)),
            Box::new(sink),
            stop.clone(),
        )
        .unwrap();

        let waiter = thread::spawn({
            let stop = session.stop_flag();
            move || stop.wait()
        });
        thread::sleep(Duration::from_millis(50));
        stop.request();
        waiter.join().unwrap();
        let snapshot = session.join().unwrap();
        assert!(snapshot.produced > 0);
        assert!(snapshot.played > 0);
    }

    #[test]
    fn sink_fault_mid_stream_is_recovered() {
        let sink = MemorySink::new(64)
            .paced(Duration::from_millis(1))
            .fail_commits(&[2, 5]);
        let log = sink.log();
        let session = Session::start(
            fast_config(64),
            Box::new(Silence),
            Box::new(sink),
            StopFlag::new(),
        )
        .unwrap();

        while log.lock().unwrap().periods.len() < 10 {
            thread::sleep(Duration::from_millis(1));
        }
        let snapshot = session.join().unwrap();
        assert_eq!(snapshot.sink_faults, 2);
        assert_eq!(snapshot.sink_resets, 2);
        assert_eq!(log.lock().unwrap().resets, 2);
    }

    #[test]
    fn fatal_sink_error_stops_session() {
        let sink = MemorySink::new(64)
            .paced(Duration::from_millis(1))
            .close_after(5);
        let session = Session::start(
            fast_config(64),
            Box::new(Silence),
            Box::new(sink),
            StopFlag::new(),
        )
        .unwrap();

        session.wait();
        assert!(session.join().is_err());
    }

    #[test]
    fn sink_period_overrides_config_and_is_validated() {
        let mut config = fast_config(64);
        config.capacity_frames = 100;
        let err = Session::start(
            config,
            Box::new(Silence),
            Box::new(MemorySink::new(128)),
            StopFlag::new(),
        )
        .err()
        .unwrap();
        assert!(format!("{err:#}").contains("smaller than one period"));
    }

    #[test]
    fn rate_mismatch_is_a_config_error() {
        let err = Session::start(
            fast_config(64),
            Box::new(Silence),
            Box::new(MemorySink::new(64).with_rate(48_000)),
            StopFlag::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<SinkError>(),
            Some(SinkError::Config(_))
        ));
    }

    #[test]
    fn direct_mode_commits_generated_periods() {
        let mut sink = MemorySink::new(32).fail_commits(&[1]);
        let log = sink.log();
        let stop = StopFlag::new();
        let stats = StreamStats::default();
        let mut source = WhiteNoise::with_seed(4);

        let remote = stop.clone();
        let observer = log.clone();
        let stopper = thread::spawn(move || {
            while observer.lock().unwrap().periods.len() < 3 {
                thread::sleep(Duration::from_millis(1));
            }
            remote.request();
        });
        run_direct(
            &mut source,
            &mut sink,
            &stop,
            &stats,
            Duration::from_millis(10),
        )
        .unwrap();
        stopper.join().unwrap();

        let log = log.lock().unwrap();
        let mut expected = WhiteNoise::with_seed(4);
        // The failed commit never called the fill, so the noise stream has no gap.
        assert_eq!(log.periods[0], expected.generate(32));
        assert_eq!(log.periods[1], expected.generate(32));
        assert_eq!(log.resets, 1);
        assert!(log.closed);
        assert_eq!(stats.snapshot().sink_faults, 1);
    }

    #[test]
    fn direct_mode_survives_failed_reset() {
        let mut sink = MemorySink::new(32).fail_commits(&[1]).fail_resets(1);
        let log = sink.log();
        let stop = StopFlag::new();
        let stats = StreamStats::default();
        let mut source = Silence;

        let remote = stop.clone();
        let observer = log.clone();
        let stopper = thread::spawn(move || {
            while observer.lock().unwrap().periods.len() < 3 {
                thread::sleep(Duration::from_millis(1));
            }
            remote.request();
        });
        run_direct(
            &mut source,
            &mut sink,
            &stop,
            &stats,
            Duration::from_millis(10),
        )
        .unwrap();
        stopper.join().unwrap();

        assert!(log.lock().unwrap().periods.len() >= 3);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sink_faults, 1);
        assert_eq!(snapshot.sink_resets, 0);
    }

    #[test]
    fn direct_mode_stops_on_closed_sink() {
        let mut sink = MemorySink::new(32).close_after(2);
        let stats = StreamStats::default();
        let err = run_direct(
            &mut Silence,
            &mut sink,
            &StopFlag::new(),
            &stats,
            Duration::from_millis(10),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SinkError>(),
            Some(SinkError::Closed)
        ));
        assert_eq!(stats.snapshot().played, 64);
    }
}
