//! Command-line interface definitions.
//!
//! This module contains the `clap`-powered CLI surface area (args + defaults) and its
//! mapping onto library config. Every flag is optional: with none, the binary plays
//! white noise on the default device until interrupted.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use noise_player::config::{DEFAULT_CAPACITY_PERIODS, SessionConfig, batch_frames_for};
use noise_player::sink::SinkConfig;
use noise_player::source::SourceKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    White,
    Sine,
    Silence,
}

#[derive(Parser, Debug)]
#[command(
    name = "white-noise",
    version,
    about = "Stream generated audio to an output device through a real-time ring buffer"
)]
pub struct Args {
    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Output sample rate in Hz (must be supported natively by the device)
    #[arg(long, default_value_t = 22_050)]
    pub sample_rate: u32,

    /// Frames per hardware period
    #[arg(long, default_value_t = 1024)]
    pub period_frames: usize,

    /// Ring buffer capacity in frames (default: 4 periods)
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Producer tick interval in milliseconds
    #[arg(long, default_value_t = 10)]
    pub interval_ms: u64,

    /// Frames generated per producer tick (default: one interval's worth)
    #[arg(long)]
    pub batch_frames: Option<usize>,

    /// Signal to play
    #[arg(long, value_enum, default_value_t = SourceArg::White)]
    pub source: SourceArg,

    /// Tone frequency for `--source sine`
    #[arg(long, default_value_t = 440.0)]
    pub frequency: f32,

    /// Tone amplitude for `--source sine`, as a fraction of full scale
    #[arg(long, default_value_t = 0.5)]
    pub amplitude: f32,

    /// Seed for `--source white` (random when omitted)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Keep the playback thread at normal scheduling priority
    #[arg(long)]
    pub no_realtime: bool,

    /// Periods the sink may queue ahead of the device
    #[arg(long, default_value_t = 2)]
    pub buffered_periods: usize,

    /// Discard audio through a clock-paced null sink instead of a device
    #[arg(long)]
    pub null_sink: bool,

    /// Skip the ring buffer: generate and write one period at a time on the main thread
    #[arg(long)]
    pub direct: bool,

    /// Print final stream counters as one JSON line on exit
    #[arg(long)]
    pub stats_json: bool,
}

impl Args {
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.sample_rate, self.period_frames);
        config.interval = Duration::from_millis(self.interval_ms);
        config.capacity_frames = self
            .capacity
            .unwrap_or_else(|| self.period_frames.saturating_mul(DEFAULT_CAPACITY_PERIODS));
        config.batch_frames = self
            .batch_frames
            .unwrap_or_else(|| batch_frames_for(self.sample_rate, config.interval));
        config.realtime = !self.no_realtime;
        config
    }

    pub fn sink_config(&self, session: &SessionConfig) -> SinkConfig {
        let mut sink = SinkConfig::for_session(session, normalize_device_name(self.device.clone()));
        sink.buffered_periods = self.buffered_periods.max(1);
        sink
    }

    pub fn source_kind(&self) -> SourceKind {
        match self.source {
            SourceArg::White => SourceKind::WhiteNoise { seed: self.seed },
            SourceArg::Sine => SourceKind::Sine {
                frequency_hz: self.frequency,
                amplitude: self.amplitude,
            },
            SourceArg::Silence => SourceKind::Silence,
        }
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_gives_reference_stream() {
        let args = Args::try_parse_from(["white-noise"]).unwrap();
        let config = args.session_config();
        assert_eq!(config.sample_rate, 22_050);
        assert_eq!(config.period_frames, 1024);
        assert_eq!(config.capacity_frames, 4096);
        assert_eq!(config.batch_frames, 221);
        assert!(config.realtime);
        assert_eq!(args.source_kind(), SourceKind::WhiteNoise { seed: None });
        assert!(!args.direct && !args.null_sink);
    }

    #[test]
    fn capacity_follows_period_unless_set() {
        let args = Args::try_parse_from(["white-noise", "--period-frames", "256"]).unwrap();
        assert_eq!(args.session_config().capacity_frames, 1024);

        let args =
            Args::try_parse_from(["white-noise", "--period-frames", "256", "--capacity", "300"])
                .unwrap();
        assert_eq!(args.session_config().capacity_frames, 300);
    }

    #[test]
    fn batch_follows_rate_and_interval() {
        let args = Args::try_parse_from([
            "white-noise",
            "--sample-rate",
            "48000",
            "--interval-ms",
            "5",
        ])
        .unwrap();
        let config = args.session_config();
        assert_eq!(config.batch_frames, 240);
        assert_eq!(config.interval, Duration::from_millis(5));
    }

    #[test]
    fn sine_source_and_flags_map_through() {
        let args = Args::try_parse_from([
            "white-noise",
            "--source",
            "sine",
            "--frequency",
            "1000",
            "--no-realtime",
        ])
        .unwrap();
        assert_eq!(
            args.source_kind(),
            SourceKind::Sine {
                frequency_hz: 1000.0,
                amplitude: 0.5
            }
        );
        assert!(!args.session_config().realtime);
    }

    #[test]
    fn blank_device_name_selects_default() {
        let args = Args::try_parse_from(["white-noise", "--device", "  "]).unwrap();
        let session = args.session_config();
        assert_eq!(args.sink_config(&session).device, None);

        let args = Args::try_parse_from(["white-noise", "--device", " USB "]).unwrap();
        assert_eq!(args.sink_config(&session).device.as_deref(), Some("USB"));
    }

    #[test]
    fn rejects_unknown_source() {
        assert!(Args::try_parse_from(["white-noise", "--source", "pink"]).is_err());
    }
}
