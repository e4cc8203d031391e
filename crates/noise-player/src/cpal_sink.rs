//! CPAL-backed [`AudioSink`].
//!
//! CPAL is callback driven, while the playback driver wants a blocking "period ready"
//! signal. The two are joined by a fixed pool of period buffers cycling through two
//! bounded channels:
//! - `free`: empty buffers. The driver blocks here in [`AudioSink::period_ready`].
//! - `filled`: committed periods. The CPAL callback drains these without blocking.
//!
//! The callback never allocates and never waits; when no filled period is queued it
//! outputs silence and counts a device underrun. The stream itself lives on a dedicated
//! thread because CPAL streams are not `Send` on every platform.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::device;
use crate::sink::{AudioSink, PeriodView, SinkConfig, SinkError};

/// Output stream on a CPAL device, fed one period at a time.
pub struct CpalSink {
    sample_rate: u32,
    period_frames: usize,
    device_name: String,
    pool: PeriodPool,
    device_underruns: Arc<AtomicU64>,
    stop_tx: Option<Sender<()>>,
    stream_thread: Option<JoinHandle<()>>,
}

struct StreamSetup {
    config: SinkConfig,
    feed: PeriodFeed,
    fault_tx: Sender<SinkError>,
}

impl CpalSink {
    /// Open the configured device and start its output stream.
    ///
    /// Fails with [`SinkError::Config`] when the device is missing or cannot run the
    /// requested rate natively.
    pub fn open(config: &SinkConfig) -> Result<Self, SinkError> {
        if config.sample_rate == 0 || config.period_frames == 0 {
            return Err(SinkError::Config(format!(
                "unsupported stream: {} Hz, {} frames per period",
                config.sample_rate, config.period_frames
            )));
        }
        let (pool, feed, fault_tx) =
            period_pool(config.buffered_periods.max(2), config.period_frames);
        let device_underruns = feed.underruns.clone();

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<String, SinkError>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let setup = StreamSetup {
            config: config.clone(),
            feed,
            fault_tx,
        };

        let stream_thread = thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let stream = match open_stream(setup) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Parked until close() (or the sink being dropped) releases the stream.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| SinkError::Config(format!("spawn output thread: {e}")))?;

        let device_name = match ready_rx.recv() {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = stream_thread.join();
                return Err(SinkError::Config("output thread exited during setup".to_string()));
            }
        };

        Ok(Self {
            sample_rate: config.sample_rate,
            period_frames: config.period_frames,
            device_name,
            pool,
            device_underruns,
            stop_tx: Some(stop_tx),
            stream_thread: Some(stream_thread),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Frames the device callback had to fill with silence because no period was queued.
    pub fn device_underrun_frames(&self) -> u64 {
        self.device_underruns.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<(), SinkError> {
        if self.stop_tx.is_none() {
            return Err(SinkError::Closed);
        }
        Ok(())
    }
}

impl AudioSink for CpalSink {
    fn period_frames(&self) -> usize {
        self.period_frames
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn period_ready(&mut self, timeout: Duration) -> Result<bool, SinkError> {
        self.ensure_open()?;
        self.pool.period_ready(timeout)
    }

    fn commit(&mut self, fill: &mut dyn FnMut(PeriodView<'_>)) -> Result<(), SinkError> {
        self.ensure_open()?;
        self.pool.commit(fill)
    }

    fn reset(&mut self) -> Result<(), SinkError> {
        self.ensure_open()?;
        self.pool.reset();
        tracing::debug!(device = %self.device_name, "output stream re-armed");
        Ok(())
    }

    fn close(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        let _ = stop_tx.send(());
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
        tracing::info!(
            device = %self.device_name,
            device_underrun_frames = self.device_underrun_frames(),
            "output stream closed"
        );
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Driver side of the period pool.
///
/// `free` holds empty buffers, `filled` holds committed periods waiting for the device.
/// Together with the buffer the callback is playing and the one lent out in `pending`,
/// every buffer of the pool is always in exactly one place.
struct PeriodPool {
    free_tx: Sender<Vec<i16>>,
    free_rx: Receiver<Vec<i16>>,
    filled_tx: Sender<Vec<i16>>,
    filled_rx: Receiver<Vec<i16>>,
    fault_rx: Receiver<SinkError>,
    pending: Option<Vec<i16>>,
}

/// Callback side of the period pool.
struct PeriodFeed {
    free_tx: Sender<Vec<i16>>,
    filled_rx: Receiver<Vec<i16>>,
    current: Option<Vec<i16>>,
    pos: usize,
    underruns: Arc<AtomicU64>,
}

/// Build a pool of `buffers` periods of `period_frames` samples each, plus the sender the
/// stream error callback reports through.
fn period_pool(
    buffers: usize,
    period_frames: usize,
) -> (PeriodPool, PeriodFeed, Sender<SinkError>) {
    let (free_tx, free_rx) = crossbeam_channel::bounded(buffers);
    let (filled_tx, filled_rx) = crossbeam_channel::bounded(buffers);
    let (fault_tx, fault_rx) = crossbeam_channel::bounded(8);
    for _ in 0..buffers {
        let _ = free_tx.send(vec![0i16; period_frames]);
    }
    let feed = PeriodFeed {
        free_tx: free_tx.clone(),
        filled_rx: filled_rx.clone(),
        current: None,
        pos: 0,
        underruns: Arc::new(AtomicU64::new(0)),
    };
    let pool = PeriodPool {
        free_tx,
        free_rx,
        filled_tx,
        filled_rx,
        fault_rx,
        pending: None,
    };
    (pool, feed, fault_tx)
}

impl PeriodPool {
    fn check_fault(&self) -> Result<(), SinkError> {
        match self.fault_rx.try_recv() {
            Ok(err) => Err(err),
            Err(TryRecvError::Empty) => Ok(()),
            // The error callback only goes away with the stream.
            Err(TryRecvError::Disconnected) => Err(SinkError::Closed),
        }
    }

    fn period_ready(&mut self, timeout: Duration) -> Result<bool, SinkError> {
        self.check_fault()?;
        if self.pending.is_some() {
            return Ok(true);
        }
        match self.free_rx.recv_timeout(timeout) {
            Ok(buf) => {
                self.pending = Some(buf);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(SinkError::Closed),
        }
    }

    fn commit(&mut self, fill: &mut dyn FnMut(PeriodView<'_>)) -> Result<(), SinkError> {
        self.check_fault()?;
        let mut buf = match self.pending.take() {
            Some(buf) => buf,
            None => self.free_rx.try_recv().map_err(|e| match e {
                TryRecvError::Empty => SinkError::Device("no free period to commit".to_string()),
                TryRecvError::Disconnected => SinkError::Closed,
            })?,
        };
        fill(PeriodView::new(&mut buf));
        self.filled_tx
            .try_send(buf)
            .map_err(|_| SinkError::Device("period queue overflow".to_string()))
    }

    /// Drop pending faults and hand queued periods back to the free pool.
    fn reset(&mut self) {
        while self.fault_rx.try_recv().is_ok() {}
        for buf in self.filled_rx.try_iter() {
            let _ = self.free_tx.try_send(buf);
        }
        if let Some(buf) = self.pending.take() {
            let _ = self.free_tx.try_send(buf);
        }
    }
}

impl PeriodFeed {
    /// Fill one device buffer of interleaved `channels_out` frames.
    ///
    /// Never blocks or allocates. A period may span several calls; once no filled period
    /// is queued the rest of `data` is silence and counted as device underrun frames.
    fn render<T>(&mut self, data: &mut [T], channels_out: usize)
    where
        T: cpal::Sample + cpal::FromSample<i16>,
    {
        let frames = data.len() / channels_out;
        for frame in 0..frames {
            if self.current.as_ref().is_none_or(|buf| self.pos >= buf.len()) {
                if let Some(done) = self.current.take() {
                    let _ = self.free_tx.try_send(done);
                }
                self.pos = 0;
                match self.filled_rx.try_recv() {
                    Ok(next) => self.current = Some(next),
                    Err(_) => {
                        let remaining = frames - frame;
                        self.underruns.fetch_add(remaining as u64, Ordering::Relaxed);
                        data[frame * channels_out..].fill(T::EQUILIBRIUM);
                        return;
                    }
                }
            }
            let sample = self.current.as_ref().map(|buf| buf[self.pos]).unwrap_or(0);
            let out = T::from_sample(sample);
            data[frame * channels_out..(frame + 1) * channels_out].fill(out);
            self.pos += 1;
        }
    }
}

/// Map a CPAL stream error onto the sink error taxonomy.
fn classify_stream_error(err: &cpal::StreamError) -> SinkError {
    match err {
        cpal::StreamError::DeviceNotAvailable | cpal::StreamError::StreamInvalidated => {
            SinkError::Disconnected(err.to_string())
        }
        cpal::StreamError::BufferUnderrun => SinkError::Underrun,
        cpal::StreamError::BackendSpecific { .. } => SinkError::Device(err.to_string()),
    }
}

/// Runs on the output thread: open the device, build and start the stream.
fn open_stream(setup: StreamSetup) -> Result<(cpal::Stream, String), SinkError> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, setup.config.device.as_deref())?;
    let name = device::device_name(&device).unwrap_or_else(|_| "unknown".to_string());
    let supported = device::pick_output_config(&device, setup.config.sample_rate)?;
    let mut stream_config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = device::pick_buffer_size(&supported, setup.config.period_frames) {
        stream_config.buffer_size = buf;
    }
    tracing::info!(
        device = %name,
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        sample_format = ?supported.sample_format(),
        buffer_size = ?stream_config.buffer_size,
        "device output config"
    );

    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, setup),
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, setup),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, setup),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, setup),
        other => Err(SinkError::Config(format!("unsupported sample format: {other:?}"))),
    }?;
    stream
        .play()
        .map_err(|e| SinkError::Config(format!("start output stream: {e}")))?;
    Ok((stream, name))
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    setup: StreamSetup,
) -> Result<cpal::Stream, SinkError>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels_out = usize::from(config.channels.max(1));
    let StreamSetup {
        mut feed,
        fault_tx,
        ..
    } = setup;

    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("stream error: {err}");
        let _ = fault_tx.try_send(classify_stream_error(&err));
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| feed.render(data, channels_out),
            err_fn,
            None,
        )
        .map_err(|e| SinkError::Config(format!("build output stream: {e}")))
}
