//! CLI entry point for press-daq
//!
//! Every command runs the subscriber server and the reading sink; they differ
//! only in which ingest source is started.
//!
//! ```bash
//! press-daq serve --live /dev/ttyUSB0 --baud 115200
//! press-daq replay data/session.csv --speed 2 --loop
//! press-daq live COM3
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use press_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use press_daq::hub::server::SubscriberServer;
use press_daq::hub::BroadcastHub;
use press_daq::logging;
use press_daq::manager::SourceManager;
use press_daq::pipeline::IngestionPipeline;
use press_daq::sink::{CsvReadingSink, LatestValues, ReadingSink};
use press_daq::source::StopSignal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "press-daq")]
#[command(about = "Heated-press telemetry conditioning and broadcast", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Subscriber server address (overrides hub.bind)
    #[arg(long, global = true)]
    bind: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub, optionally starting a source
    Serve {
        /// Serial port to read from
        #[arg(long, conflicts_with = "replay")]
        live: Option<String>,

        /// Baud rate for --live
        #[arg(long)]
        baud: Option<u32>,

        /// Recording to play back
        #[arg(long)]
        replay: Option<PathBuf>,
    },

    /// Play a recorded session
    Replay {
        /// CSV or JSONL recording
        file: PathBuf,

        /// Playback speed factor
        #[arg(long)]
        speed: Option<f64>,

        /// Restart from the beginning when the end is reached
        #[arg(long = "loop")]
        loop_playback: bool,

        /// Device id stamped on replayed readings
        #[arg(long)]
        device_id: Option<String>,
    },

    /// Read a serial device
    Live {
        /// Serial port, e.g. /dev/ttyUSB0 or COM3
        port: String,

        #[arg(long)]
        baud: Option<u32>,

        /// Device id stamped on readings
        #[arg(long)]
        device_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(bind) = cli.bind {
        settings.hub.bind = bind;
    }
    settings.validate()?;
    logging::init_from_settings(&settings)?;
    let settings = Arc::new(settings);

    info!(
        name = %settings.application.name,
        version = env!("CARGO_PKG_VERSION"),
        "starting"
    );

    let sink: Arc<dyn ReadingSink> = if settings.storage.enabled {
        Arc::new(CsvReadingSink::new(&settings.storage.output_dir)?)
    } else {
        Arc::new(LatestValues::new())
    };
    let hub = BroadcastHub::from_config(&settings.hub);
    let pipeline = IngestionPipeline::new(sink, hub.clone());
    let manager = SourceManager::new(settings.clone(), pipeline);

    let server = SubscriberServer::bind(&settings.hub.bind, hub.clone()).await?;
    let server_stop = StopSignal::new();
    let server_task = tokio::spawn(server.run(server_stop.clone()));

    match cli.command {
        Commands::Serve { live, baud, replay } => {
            if let Some(port) = live {
                manager.start_live(&port, baud, None)?;
            } else if let Some(path) = replay {
                manager.start_replay(path, None, None, None)?;
            }
        }
        Commands::Replay {
            file,
            speed,
            loop_playback,
            device_id,
        } => {
            manager.start_replay(file, device_id.as_deref(), Some(loop_playback), speed)?;
        }
        Commands::Live {
            port,
            baud,
            device_id,
        } => manager.start_live(&port, baud, device_id.as_deref())?,
    }

    signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutdown requested");

    if let Err(e) = manager.stop_all().await {
        warn!(error = %e, "source did not stop cleanly");
    }
    server_stop.trigger();
    let _ = server_task.await;
    hub.clear();
    info!("stopped");
    Ok(())
}
