//! Process-level wiring: open the sink, install the interrupt handler, run a session.

use anyhow::{Context, Result};
use noise_player::config::SessionConfig;
use noise_player::cpal_sink::CpalSink;
use noise_player::device;
use noise_player::session::{self, Session};
use noise_player::shutdown::StopFlag;
use noise_player::sink::{AudioSink, NullSink, SinkConfig};
use noise_player::stats::{StatsSnapshot, StreamStats};

use crate::cli::Args;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Stream until Ctrl+C (or a fatal sink error), then report the final counters.
pub fn run(args: &Args) -> Result<()> {
    let config = args.session_config();
    config.validate().context("invalid options")?;
    let sink = open_sink(args, &config)?;
    let source = args.source_kind();
    tracing::info!(source = source.label(), "generator");

    let stop = StopFlag::new();
    install_interrupt_handler(stop.clone())?;

    let snapshot = if args.direct {
        run_direct(args, &config, sink, stop)?
    } else {
        let session = Session::start(config.clone(), source.build(config.sample_rate), sink, stop)?;
        println!("Playing {}. Press Ctrl+C to stop.", source.label());
        session.wait();
        session.join()?
    };

    report(&snapshot, args.stats_json)
}

fn run_direct(
    args: &Args,
    config: &SessionConfig,
    mut sink: Box<dyn AudioSink>,
    stop: StopFlag,
) -> Result<StatsSnapshot> {
    let stats = StreamStats::default();
    let mut source = args.source_kind().build(config.sample_rate);
    println!("Playing {} (direct). Press Ctrl+C to stop.", args.source_kind().label());
    session::run_direct(
        source.as_mut(),
        sink.as_mut(),
        &stop,
        &stats,
        config.poll_timeout,
    )?;
    Ok(stats.snapshot())
}

fn open_sink(args: &Args, config: &SessionConfig) -> Result<Box<dyn AudioSink>> {
    let sink_config: SinkConfig = args.sink_config(config);
    if args.null_sink {
        let sink = NullSink::open(&sink_config).context("open null sink")?;
        return Ok(Box::new(sink));
    }
    let sink = CpalSink::open(&sink_config).context("open audio output")?;
    tracing::info!(device = %sink.device_name(), "output device");
    Ok(Box::new(sink))
}

/// First Ctrl+C requests a clean stop; a second one exits immediately.
fn install_interrupt_handler(stop: StopFlag) -> Result<()> {
    ctrlc::set_handler(move || {
        if !stop.request() {
            std::process::exit(130);
        }
    })
    .context("install Ctrl+C handler")
}

fn report(snapshot: &StatsSnapshot, as_json: bool) -> Result<()> {
    tracing::info!(
        produced = snapshot.produced,
        played = snapshot.played,
        dropped = snapshot.dropped,
        underrun_samples = snapshot.underrun_samples,
        sink_faults = snapshot.sink_faults,
        sink_resets = snapshot.sink_resets,
        device_underruns = snapshot.device_underruns,
        "stream stats"
    );
    if as_json {
        println!("{}", serde_json::to_string(snapshot).context("encode stats")?);
    }
    Ok(())
}
