//! white-noise: a small CLI that streams generated audio (white noise by default) to an
//! output device via CPAL.
//!
//! ## Pipeline
//! 1. **Generate**: a producer thread fills a lock-free ring every few milliseconds.
//! 2. **Play**: a real-time playback thread pulls one period per device period, padding
//!    with silence when the ring runs dry, and commits it to the output stream.
//!
//! Ctrl+C stops both threads cooperatively; the process exits once they are joined.

mod cli;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,white_noise=info,noise_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    runtime::run(&args)
}
