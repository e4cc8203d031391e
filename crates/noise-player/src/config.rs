use std::time::Duration;

use thiserror::Error;

/// Output sample rate used when nothing else is requested.
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 22_050;
/// Streams are always mono.
pub const CHANNELS: u16 = 1;
/// Samples are always signed 16-bit, native endian in memory.
pub const BITS_PER_SAMPLE: u16 = 16;
/// Ring capacity expressed in periods when not set explicitly.
pub const DEFAULT_CAPACITY_PERIODS: usize = 4;

/// Rejected session parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("sample rate must be non-zero")]
    ZeroSampleRate,
    #[error("period size must be non-zero")]
    ZeroPeriod,
    #[error("generation batch must be non-zero")]
    ZeroBatch,
    #[error("generation interval must be non-zero")]
    ZeroInterval,
    #[error("ring capacity {capacity} is smaller than one period ({period} frames)")]
    CapacityBelowPeriod { capacity: usize, period: usize },
    #[error("ring capacity {0} is too large")]
    CapacityTooLarge(usize),
}

/// Immutable parameters of one streaming session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Frames the sink consumes per hardware period.
    pub period_frames: usize,
    /// Ring buffer capacity in frames.
    pub capacity_frames: usize,
    /// Frames generated per producer tick.
    pub batch_frames: usize,
    /// Producer tick interval.
    pub interval: Duration,
    /// Ask the OS for a real-time scheduling class on the playback thread.
    pub realtime: bool,
    /// Upper bound on a single wait for the sink, so the driver notices stop requests
    /// even when the device stalls.
    pub poll_timeout: Duration,
}

/// Frames needed to cover `interval` at `sample_rate`, rounded up.
///
/// A non-positive interval falls back to one frame so the producer still makes progress.
pub fn batch_frames_for(sample_rate: u32, interval: Duration) -> usize {
    let frames = (f64::from(sample_rate) * interval.as_secs_f64()).ceil() as usize;
    frames.max(1)
}

impl Default for SessionConfig {
    /// 22.05 kHz mono, 1024-frame periods, 4-period ring, 10 ms producer ticks.
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE_HZ, 1024)
    }
}

impl SessionConfig {
    /// Derive the remaining parameters from a rate and period size.
    pub fn new(sample_rate: u32, period_frames: usize) -> Self {
        let interval = Duration::from_millis(10);
        Self {
            sample_rate,
            period_frames,
            capacity_frames: period_frames.saturating_mul(DEFAULT_CAPACITY_PERIODS),
            batch_frames: batch_frames_for(sample_rate, interval),
            interval,
            realtime: true,
            poll_timeout: Duration::from_millis(200),
        }
    }

    /// Duration of one hardware period.
    pub fn period_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.period_frames as f64 / f64::from(self.sample_rate))
    }

    /// Worst-case latency added by a full ring.
    pub fn ring_latency(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.capacity_frames as f64 / f64::from(self.sample_rate))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if self.period_frames == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.batch_frames == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.capacity_frames < self.period_frames {
            return Err(ConfigError::CapacityBelowPeriod {
                capacity: self.capacity_frames,
                period: self.period_frames,
            });
        }
        if self.capacity_frames > usize::MAX / 4 {
            return Err(ConfigError::CapacityTooLarge(self.capacity_frames));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_stream() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.sample_rate, 22_050);
        assert_eq!(cfg.period_frames, 1024);
        assert_eq!(cfg.capacity_frames, 4096);
        assert_eq!(cfg.batch_frames, 221);
        assert_eq!(cfg.interval, Duration::from_millis(10));
        assert!(cfg.realtime);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn batch_frames_rounds_up_and_never_hits_zero() {
        assert_eq!(batch_frames_for(48_000, Duration::from_millis(10)), 480);
        assert_eq!(batch_frames_for(22_050, Duration::from_millis(10)), 221);
        assert_eq!(batch_frames_for(22_050, Duration::ZERO), 1);
    }

    #[test]
    fn period_duration_uses_rate() {
        let cfg = SessionConfig::new(1_000, 250);
        assert_eq!(cfg.period_duration(), Duration::from_millis(250));
        assert_eq!(cfg.ring_latency(), Duration::from_secs(1));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = SessionConfig::default();
        cfg.capacity_frames = 512;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::CapacityBelowPeriod {
                capacity: 512,
                period: 1024
            })
        );

        let mut cfg = SessionConfig::default();
        cfg.sample_rate = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroSampleRate));

        let mut cfg = SessionConfig::default();
        cfg.interval = Duration::ZERO;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroInterval));

        let cfg = SessionConfig::new(22_050, 0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroPeriod));
    }
}
