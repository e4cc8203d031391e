//! Generator stage: fills the ring from a [`SampleSource`] on a fixed tick.
//!
//! The producer never waits for the consumer. When the ring is full the unwritten part
//! of a batch is dropped (and counted), which bounds latency to the ring capacity.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::ring::RingProducer;
use crate::shutdown::StopFlag;
use crate::source::SampleSource;
use crate::stats::{LogThrottle, StreamStats};

pub struct ProducerLoop {
    ring: RingProducer,
    source: Box<dyn SampleSource>,
    stop: StopFlag,
    stats: Arc<StreamStats>,
    batch: Vec<i16>,
    interval: Duration,
    overrun_log: LogThrottle,
}

impl ProducerLoop {
    pub fn new(
        ring: RingProducer,
        source: Box<dyn SampleSource>,
        stop: StopFlag,
        stats: Arc<StreamStats>,
        batch_frames: usize,
        interval: Duration,
    ) -> Self {
        Self {
            ring,
            source,
            stop,
            stats,
            batch: vec![0; batch_frames.max(1)],
            interval,
            overrun_log: LogThrottle::new(Duration::from_secs(1)),
        }
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("noise-producer".to_string())
            .spawn(move || self.run())
    }

    /// Tick until the stop flag is raised. A tick in progress always completes.
    pub fn run(mut self) {
        tracing::info!(
            batch_frames = self.batch.len(),
            interval_ms = self.interval.as_millis() as u64,
            "producer started"
        );
        let mut next_tick = Instant::now();
        while !self.stop.is_stopped() {
            self.tick();

            next_tick += self.interval;
            let now = Instant::now();
            if next_tick < now {
                // Overslept (suspend, heavy load): restart the schedule instead of bursting.
                next_tick = now;
            }
            if self.stop.wait_timeout(next_tick - now) {
                break;
            }
        }
        tracing::info!("producer stopped");
    }

    /// Generate one batch and push it. Returns the number of samples that made it in.
    pub fn tick(&mut self) -> usize {
        self.source.fill(&mut self.batch);
        let written = self.ring.push(&self.batch);
        self.stats.record_produced(written);

        let dropped = self.batch.len() - written;
        if dropped > 0 {
            self.stats.record_overrun(dropped);
            if let Some(suppressed) = self.overrun_log.ready(Instant::now()) {
                tracing::debug!(
                    dropped_samples = dropped,
                    occupancy = self.ring.occupancy(),
                    suppressed,
                    "ring full; dropping newest samples"
                );
            }
        }
        written
    }
}
