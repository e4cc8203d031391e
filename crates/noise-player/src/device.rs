//! Output device discovery and stream negotiation.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - picking a stream config that runs the session rate natively (no resampling)

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::sink::SinkError;

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default device when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, SinkError> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .map_err(|e| SinkError::Config(format!("no output devices: {e}")))?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(SinkError::Config(format!("no output device matched: {needle}")));
    }

    host.default_output_device()
        .ok_or_else(|| SinkError::Config("no default output device".to_string()))
}

/// Pick a supported config that runs exactly at `sample_rate`.
///
/// Prefers `i16` (no conversion), then the fewest channels (mono is copied to every
/// channel). Errors when no range covers the rate, since nothing downstream resamples.
pub fn pick_output_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<cpal::SupportedStreamConfig, SinkError> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| SinkError::Config(format!("query output configs: {e}")))?
        .collect();
    if ranges.is_empty() {
        return Err(SinkError::Config("no supported output configs".to_string()));
    }

    let mut best: Option<(u8, u16, cpal::SupportedStreamConfigRange)> = None;
    for range in ranges {
        if sample_rate < range.min_sample_rate() || sample_rate > range.max_sample_rate() {
            continue;
        }
        let rank = sample_format_rank(range.sample_format());
        if rank == u8::MAX {
            continue;
        }
        let channels = range.channels();
        let replace = match &best {
            None => true,
            Some((b_rank, b_channels, _)) => is_better_candidate(rank, channels, *b_rank, *b_channels),
        };
        if replace {
            best = Some((rank, channels, range));
        }
    }

    best.map(|(_, _, range)| range.with_sample_rate(sample_rate))
        .ok_or_else(|| {
            SinkError::Config(format!("device does not support {sample_rate} Hz output"))
        })
}

/// Pick a device buffer size close to one period.
///
/// Clamps `period_frames` into the advertised range; returns `None` when the device
/// does not report one, so CPAL uses its default.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    period_frames: usize,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let wanted = u32::try_from(period_frames).unwrap_or(u32::MAX);
            Some(cpal::BufferSize::Fixed(wanted.clamp(*min, (*max).max(*min))))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout.
///
/// This is intended for CLI UX (`--list-devices`) rather than structured output.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

/// Human-readable name of `device`, for logs.
pub fn device_name(device: &cpal::Device) -> Result<String> {
    device
        .description()
        .map(|d| d.to_string())
        .map_err(|e| anyhow!("device description: {e}"))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => u8::MAX,
    }
}

fn is_better_candidate(rank: u8, channels: u16, best_rank: u8, best_channels: u16) -> bool {
    if rank != best_rank {
        rank < best_rank
    } else {
        channels < best_channels
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
