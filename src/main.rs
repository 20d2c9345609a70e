//! CLI entrypoint (SPEC_FULL.md §4.9): reads process flags/env, validates
//! them into a `CaptureConfig`, wires a chosen sink, starts the Lifecycle
//! Controller, and installs a Ctrl-C handler that calls `stop()`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use sniffer_capture::{LifecycleController, PcapCaptureSource};
use sniffer_core::config::{self, RawConfig};
use sniffer_core::error::{FatalErrorCode, SinkError};
use sniffer_core::model::{HttpMessageRecord, PipelineStats};
use sniffer_sink::{CallbackSink, HttpPostSink, JsonLinesSink, MessageSink};
use sniffer_tui::PipelineCounters;
use tracing::{error, info, warn};

/// Passive TCP/HTTP capture: observe, reassemble, parse — never proxy.
#[derive(Parser, Debug)]
#[command(name = "tcpsniffer", version, about)]
struct Cli {
    /// Capture interface name; empty selects the host default.
    #[arg(short, long, env = "TCPSNIFFER_IFACE", default_value = "")]
    interface: String,

    /// Port to watch for HTTP traffic. Repeatable.
    #[arg(short, long = "port", env = "TCPSNIFFER_PORTS", value_delimiter = ',', required = true)]
    ports: Vec<u32>,

    /// Fraction of connections to track, in (0, 1]. 1 disables sampling.
    #[arg(long, env = "TCPSNIFFER_SAMPLE_RATE", default_value_t = config::DEFAULT_SAMPLE_RATE)]
    sample_rate: f64,

    /// Per-message body cap in bytes.
    #[arg(long, env = "TCPSNIFFER_MAX_BODY_SIZE", default_value_t = config::DEFAULT_MAX_BODY_SIZE)]
    max_body_size: u32,

    /// Maximum tracked connections before oldest-first eviction.
    #[arg(long, env = "TCPSNIFFER_MAX_CONNECTIONS", default_value_t = config::DEFAULT_MAX_CONCURRENT_CONNECTIONS)]
    max_connections: u32,

    /// Idle timeout before a connection is evicted, in milliseconds.
    #[arg(long, env = "TCPSNIFFER_IDLE_TIMEOUT_MS", default_value_t = config::DEFAULT_CONNECTION_IDLE_TIMEOUT_MS)]
    idle_timeout_ms: u64,

    /// Where completed messages go.
    #[arg(long, value_enum, default_value_t = SinkKindArg::Stdout)]
    sink: SinkKindArg,

    /// Target URL for `--sink http`.
    #[arg(long, env = "TCPSNIFFER_SINK_URL")]
    sink_url: Option<String>,

    /// Launch the live status dashboard instead of logging to stderr.
    #[arg(long)]
    tui: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SinkKindArg {
    Stdout,
    Http,
    None,
}

fn build_sink(cli: &Cli) -> anyhow::Result<Box<dyn MessageSink>> {
    match cli.sink {
        SinkKindArg::Stdout => Ok(Box::new(JsonLinesSink::new(std::io::stdout()))),
        SinkKindArg::Http => {
            let url = cli
                .sink_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--sink http requires --sink-url"))?;
            Ok(Box::new(HttpPostSink::new(url)))
        }
        SinkKindArg::None => Ok(Box::new(CallbackSink::new(
            |_: &HttpMessageRecord| -> Result<(), SinkError> { Ok(()) },
        ))),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let raw = RawConfig {
        interface: Some(cli.interface.clone()),
        ports: cli.ports.clone(),
        sample_rate: Some(cli.sample_rate),
        max_body_size: Some(cli.max_body_size),
        max_concurrent_connections: Some(cli.max_connections),
        connection_idle_timeout_ms: Some(cli.idle_timeout_ms),
    };
    let capture_config = config::validate(raw)
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let mut sink = build_sink(&cli)?;

    let total_messages = Arc::new(AtomicU64::new(0));
    let error_count = Arc::new(AtomicU64::new(0));
    let latest_stats = Arc::new(Mutex::new(PipelineStats::default()));
    let stop_requested = Arc::new(AtomicBool::new(false));

    let (tui_tx, tui_rx) = mpsc::channel::<HttpMessageRecord>();

    let controller = LifecycleController::new(PcapCaptureSource::new());

    {
        let stop_requested = stop_requested.clone();
        ctrlc::set_handler(move || {
            stop_requested.store(true, Ordering::Release);
        })?;
    }

    let on_message = {
        let total_messages = total_messages.clone();
        let tui_enabled = cli.tui;
        move |record: HttpMessageRecord| {
            total_messages.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = sink.send(&record) {
                warn!(error = %e, "sink delivery failed");
            }
            if tui_enabled {
                let _ = tui_tx.send(record);
            }
        }
    };

    let on_stats = {
        let latest_stats = latest_stats.clone();
        move |stats: PipelineStats| {
            tracing::debug!(?stats, "pipeline counters updated");
            *latest_stats.lock().unwrap() = stats;
        }
    };

    let on_error = {
        let error_count = error_count.clone();
        let stop_requested = stop_requested.clone();
        move |code: FatalErrorCode, message: String| {
            error_count.fetch_add(1, Ordering::Relaxed);
            error!(code = %code, message = %message, "capture reported a fatal error");
            if matches!(code, FatalErrorCode::Unrecoverable) {
                stop_requested.store(true, Ordering::Release);
            }
        }
    };

    controller
        .start(capture_config.clone(), on_message, on_stats, on_error)
        .map_err(|e| anyhow::anyhow!("failed to start capture: {e}"))?;

    info!(
        interface = %capture_config.interface,
        ports = ?capture_config.ports,
        "tcpsniffer running, press ctrl-c to stop"
    );

    if cli.tui {
        let poll_messages = move || {
            let mut batch = Vec::new();
            while let Ok(record) = tui_rx.try_recv() {
                batch.push(record);
            }
            (
                batch,
                PipelineCounters {
                    stats: *latest_stats.lock().unwrap(),
                    errors: error_count.load(Ordering::Relaxed),
                },
            )
        };
        let should_stop = {
            let stop_requested = stop_requested.clone();
            move || stop_requested.load(Ordering::Acquire)
        };
        sniffer_tui::run_tui(
            &capture_config.interface,
            &capture_config.ports,
            poll_messages,
            should_stop,
        )?;
    } else {
        while !stop_requested.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    let stats = controller
        .stop()
        .map_err(|e| anyhow::anyhow!("failed to stop capture: {e}"))?;
    info!(
        messages = total_messages.load(Ordering::Relaxed),
        ?stats,
        "tcpsniffer stopped"
    );

    Ok(())
}
