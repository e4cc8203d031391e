//! Scripted in-memory sink for driver and session tests.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::sink::{AudioSink, PeriodView, SinkError};

#[derive(Debug, Default)]
pub(crate) struct MemoryLog {
    pub(crate) periods: Vec<Vec<i16>>,
    pub(crate) resets: usize,
    pub(crate) closed: bool,
}

pub(crate) struct MemorySink {
    sample_rate: u32,
    period_frames: usize,
    buffer: Vec<i16>,
    log: Arc<Mutex<MemoryLog>>,
    commits: usize,
    failing: Vec<usize>,
    failing_resets: usize,
    ready: bool,
    pace: Duration,
    close_after: Option<usize>,
}

impl MemorySink {
    pub(crate) fn new(period_frames: usize) -> Self {
        Self {
            sample_rate: 22_050,
            period_frames,
            buffer: vec![0; period_frames],
            log: Arc::new(Mutex::new(MemoryLog::default())),
            commits: 0,
            failing: Vec::new(),
            failing_resets: 0,
            ready: true,
            pace: Duration::ZERO,
            close_after: None,
        }
    }

    pub(crate) fn log(&self) -> Arc<Mutex<MemoryLog>> {
        self.log.clone()
    }

    pub(crate) fn with_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Never signal period-ready; every wait times out.
    pub(crate) fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    /// Fail the commit attempts with these (zero-based) indices with a device fault.
    pub(crate) fn fail_commits(mut self, attempts: &[usize]) -> Self {
        self.failing = attempts.to_vec();
        self
    }

    /// Fail the next `count` resets with a (non-fatal) device fault.
    pub(crate) fn fail_resets(mut self, count: usize) -> Self {
        self.failing_resets = count;
        self
    }

    /// Sleep this long in every period-ready wait.
    pub(crate) fn paced(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Report the sink as closed once this many periods were committed.
    pub(crate) fn close_after(mut self, periods: usize) -> Self {
        self.close_after = Some(periods);
        self
    }

    fn is_closed(&self) -> bool {
        let log = self.log.lock().unwrap();
        log.closed || self.close_after.is_some_and(|n| log.periods.len() >= n)
    }
}

impl AudioSink for MemorySink {
    fn period_frames(&self) -> usize {
        self.period_frames
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn period_ready(&mut self, timeout: Duration) -> Result<bool, SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        if !self.ready {
            thread::sleep(timeout);
            return Ok(false);
        }
        if !self.pace.is_zero() {
            thread::sleep(self.pace);
        }
        Ok(true)
    }

    fn commit(&mut self, fill: &mut dyn FnMut(PeriodView<'_>)) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        let attempt = self.commits;
        self.commits += 1;
        if self.failing.contains(&attempt) {
            return Err(SinkError::Device(format!("injected fault on commit {attempt}")));
        }
        fill(PeriodView::new(&mut self.buffer));
        self.log.lock().unwrap().periods.push(self.buffer.clone());
        Ok(())
    }

    fn reset(&mut self) -> Result<(), SinkError> {
        self.log.lock().unwrap().resets += 1;
        if self.failing_resets > 0 {
            self.failing_resets -= 1;
            return Err(SinkError::Device("injected reset failure".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}
