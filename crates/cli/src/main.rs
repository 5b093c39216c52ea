use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;
use framecast::{
    CastError, DeliveryPolicy, DispatchConfig, Server, ServerConfig, SourceSpec, WsConfig,
    WsTransport,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "framecast-server",
    about = "Stream live images to WebSocket clients, newest frame first"
)]
struct Args {
    /// Frame source: `pattern`, `pattern:WxH`, or a directory of JPEG files
    #[arg(default_value = "pattern")]
    device: String,

    /// TCP port to listen on
    #[arg(default_value_t = 9000)]
    port: u16,

    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Serve static files (e.g. a viewer page) from this directory
    #[arg(long, value_name = "DIR")]
    www: Option<PathBuf>,

    /// Frames per second polled from the source
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=240))]
    fps: u32,

    /// Re-send the current frame on every writable event, even if unchanged
    #[arg(long)]
    every_writable: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let policy = if args.every_writable {
        DeliveryPolicy::EveryWritable
    } else {
        DeliveryPolicy::ChangedOnly
    };
    let mut server = Server::new(ServerConfig {
        frame_interval: Duration::from_secs(1) / args.fps,
        dispatch: DispatchConfig {
            policy,
            ..DispatchConfig::default()
        },
    });

    // Installed first so a signal during startup still ends in a clean exit.
    let stop = server.stop_handle();
    let signal_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || signal_stop.request_stop()) {
        tracing::warn!(error = %e, "failed to install signal handler");
    }

    let source = match SourceSpec::parse(&args.device).and_then(|spec| spec.open()) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!(device = %args.device, error = %e, "failed to open frame source");
            return ExitCode::FAILURE;
        }
    };
    if stop.is_stop_requested() {
        tracing::info!("stop requested during startup");
        return ExitCode::SUCCESS;
    }

    let bind = format!("{}:{}", args.host, args.port);
    let ws_config = WsConfig {
        assets_dir: args.www.clone(),
        ..WsConfig::default()
    };
    let transport = match WsTransport::bind(&bind, ws_config) {
        Ok(transport) => transport,
        Err(e) => {
            tracing::error!(%bind, error = %e, "failed to start transport");
            return ExitCode::FAILURE;
        }
    };

    match server.start(source, Box::new(transport)) {
        Ok(()) => {}
        Err(CastError::StopRequested) => {
            tracing::info!("stop requested during startup");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            return ExitCode::FAILURE;
        }
    }

    tracing::info!(%bind, "streaming, press Ctrl+C to stop");
    while server.is_running() {
        thread::sleep(Duration::from_millis(100));
    }

    server.stop();

    let stats = server.stats();
    tracing::info!(
        frames_produced = stats.frames_produced,
        source_skips = stats.source_skips,
        frames_sent = stats.frames_sent,
        send_failures = stats.send_failures,
        connections = stats.connections_total,
        "shutdown complete"
    );
    ExitCode::SUCCESS
}
