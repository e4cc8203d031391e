//! Cooperative stop signal and join barrier for the streaming threads.
//!
//! Loops poll [`StopFlag::is_stopped`] (a single atomic load) once per iteration. Sleeping
//! loops can park on [`StopFlag::wait_timeout`] instead, which wakes early on a stop request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

#[derive(Debug, Default)]
struct StopState {
    stopped: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

/// Session-wide stop flag. Set once, never reset; cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct StopFlag {
    state: Arc<StopState>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }

    /// Raise the flag and wake all waiters.
    ///
    /// Idempotent; returns `true` only for the call that actually raised it.
    pub fn request(&self) -> bool {
        if self.state.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Taking the lock orders the notify after any waiter's flag check.
        let _g = self.state.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.state.cv.notify_all();
        true
    }

    /// Sleep for up to `timeout`, returning early (with `true`) if a stop is requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.state.lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.is_stopped() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            g = match self.state.cv.wait_timeout(g, deadline - now) {
                Ok((g, _)) => g,
                Err(e) => e.into_inner().0,
            };
        }
    }

    /// Block until a stop is requested.
    pub fn wait(&self) {
        let mut g = self.state.lock.lock().unwrap_or_else(|e| e.into_inner());
        while !self.is_stopped() {
            g = self.state.cv.wait(g).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Owns the stop flag and the streaming threads' join handles.
pub struct ShutdownController {
    stop: StopFlag,
    producer: Option<JoinHandle<()>>,
    driver: Option<JoinHandle<Result<()>>>,
}

impl ShutdownController {
    pub fn new(stop: StopFlag) -> Self {
        Self {
            stop,
            producer: None,
            driver: None,
        }
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub(crate) fn attach_producer(&mut self, handle: JoinHandle<()>) {
        self.producer = Some(handle);
    }

    pub(crate) fn attach_driver(&mut self, handle: JoinHandle<Result<()>>) {
        self.driver = Some(handle);
    }

    /// Ask both loops to exit after their current iteration. Idempotent.
    pub fn request_stop(&self) -> bool {
        let first = self.stop.request();
        if first {
            tracing::info!("stop requested");
        }
        first
    }

    /// Wait for both loops to exit.
    ///
    /// Does not raise the stop flag: call [`request_stop`](Self::request_stop) first, or
    /// rely on the driver raising it on a fatal sink error. Otherwise this blocks for as
    /// long as the stream runs. Reports a panicked thread or the driver's error; calling
    /// it again afterwards is a no-op.
    pub fn join_all(&mut self) -> Result<()> {
        let mut result = Ok(());
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                result = Err(anyhow!("producer thread panicked"));
            }
        }
        if let Some(handle) = self.driver.take() {
            let driver = handle
                .join()
                .map_err(|_| anyhow!("playback thread panicked"))
                .and_then(|r| r);
            if result.is_ok() {
                result = driver;
            }
        }
        result
    }
}

impl Drop for ShutdownController {
    fn drop(&mut self) {
        if self.producer.is_some() || self.driver.is_some() {
            self.stop.request();
            let _ = self.join_all();
        }
    }
}
