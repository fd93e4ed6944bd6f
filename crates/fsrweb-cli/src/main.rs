//! FSRWEB - installer and launcher for the FSR sensor web UI
//!
//! ## Commands
//!
//! - `install`: find the sensor board, patch the server config, build the
//!   web UI and verify it boots
//! - `run`: start the API server and keep it up until interrupted
//! - `discover`: scan serial ports for the sensor board and report

mod signals;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

use fsrweb_core::{discover_device, ConfigPatcher, DeviceMatch, DiscoveryResult};
use fsrweb_pipeline::{
    exit_code, pipeline, wait_ready, HttpProbe, PipelineError, PipelineStep, ProcessSupervisor,
    Readiness, ShutdownCoordinator,
};

/// Substring the built web UI serves on its index page; its presence is the
/// boot-test success criterion.
const READY_MARKER: &str = "You need to enable JavaScript to run this app.";

/// Readiness polling bound: 60 attempts at 500ms, about 30 seconds.
const READY_INTERVAL: Duration = Duration::from_millis(500);
const READY_ATTEMPTS: u32 = 60;

#[derive(Parser)]
#[command(name = "fsrweb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Installer and launcher for the FSR sensor web UI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// File that receives a copy of every log line
    #[arg(long, global = true, default_value = "install.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover the board, patch the server config, build the UI and
    /// verify it boots
    Install {
        /// Web UI checkout directory
        #[arg(long, default_value = "fsr/webui")]
        webui_dir: PathBuf,

        /// Server config file to patch with the discovered port
        #[arg(long, default_value = "fsr/webui/server/server.py")]
        server_config: PathBuf,

        /// Port the API server listens on
        #[arg(short, long, default_value_t = 5000)]
        port: u16,
    },

    /// Start the API server and keep it running until interrupted
    Run {
        /// Web UI checkout directory
        #[arg(long, default_value = "fsr/webui")]
        webui_dir: PathBuf,

        /// Port the API server listens on
        #[arg(short, long, default_value_t = 5000)]
        port: u16,
    },

    /// Scan serial ports for the sensor board and report the result
    Discover,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fsrweb_pipeline::init_tracing(cli.json, level, Some(&cli.log_file));

    let supervisor = ProcessSupervisor::new();
    let cancel = CancellationToken::new();
    let coordinator = Arc::new(ShutdownCoordinator::new(
        supervisor.registry(),
        cancel.clone(),
    ));

    // Signal path: SIGINT/SIGTERM cancels every wait and sweeps the
    // registry. The same coordinator serves the completion and error
    // paths below, so the sweep happens exactly once whoever wins.
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if signals::wait_for_shutdown_signal().await.is_ok() {
                info!("interrupt received, shutting down");
                coordinator.shutdown();
            }
        });
    }

    let result = match cli.command {
        Commands::Install {
            webui_dir,
            server_config,
            port,
        } => cmd_install(&supervisor, &coordinator, &webui_dir, &server_config, port).await,
        Commands::Run { webui_dir, port } => {
            cmd_run(&supervisor, &coordinator, &webui_dir, port).await
        }
        Commands::Discover => cmd_discover().await,
    };

    let code = match result {
        Ok(code) => code,
        Err(err) => {
            if matches!(
                err.downcast_ref::<PipelineError>(),
                Some(PipelineError::Cancelled)
            ) {
                exit_code::INTERRUPTED
            } else {
                error!(error = %err, "fatal error");
                exit_code::PIPELINE_FAILED
            }
        }
    };

    // No-op if a signal or the command itself already swept.
    coordinator.shutdown();
    std::process::exit(code);
}

/// The full first-time setup: discovery, config patch, dependency install,
/// build, and a boot test of the built server.
async fn cmd_install(
    supervisor: &ProcessSupervisor,
    coordinator: &ShutdownCoordinator,
    webui_dir: &Path,
    server_config: &Path,
    port: u16,
) -> Result<i32> {
    let device_found = match scan_for_device().await? {
        DiscoveryResult::Found(device) => {
            info!(
                port = %device.port.name,
                sensors = device.sensor_count,
                "sensor board found, patching server config"
            );
            patch_config(&device, server_config)?;
            true
        }
        DiscoveryResult::NotFound => {
            warn!("no sensor board found on any serial port");
            warn!(
                "set SERIAL_PORT and num_sensors in {} by hand before starting the server",
                server_config.display()
            );
            false
        }
    };

    let steps = vec![
        PipelineStep::custom(
            "npm_install_yarn",
            vec![
                "npm".to_string(),
                "install".to_string(),
                "-g".to_string(),
                "yarn".to_string(),
            ],
            600,
        ),
        PipelineStep::custom(
            "yarn_install",
            vec!["yarn".to_string(), "install".to_string()],
            1200,
        )
        .in_dir(webui_dir),
        PipelineStep::custom(
            "yarn_build",
            vec!["yarn".to_string(), "build".to_string()],
            1800,
        )
        .in_dir(webui_dir),
    ];

    pipeline::run(supervisor, &steps, &coordinator.cancel_token()).await?;

    // Boot test: the build only counts if the server actually comes up
    // and serves the app page.
    info!("build complete, boot-testing the server");
    let _server = start_server(supervisor, webui_dir)?;

    let probe = probe_for(port);
    let cancel = coordinator.cancel_token();
    match wait_ready(&probe, READY_INTERVAL, READY_ATTEMPTS, &cancel).await {
        Readiness::Ready => info!("server boot test passed"),
        Readiness::TimedOut => {
            return Err(PipelineError::NeverReady {
                attempts: READY_ATTEMPTS,
            }
            .into())
        }
        Readiness::Cancelled => return Ok(exit_code::INTERRUPTED),
    }

    coordinator.shutdown();

    if device_found {
        info!("install complete");
        Ok(exit_code::SUCCESS)
    } else {
        warn!("install complete, but no sensor board was found");
        Ok(exit_code::DEVICE_NOT_FOUND)
    }
}

/// Start the server, wait for readiness, then park until a signal.
async fn cmd_run(
    supervisor: &ProcessSupervisor,
    coordinator: &ShutdownCoordinator,
    webui_dir: &Path,
    port: u16,
) -> Result<i32> {
    let _server = start_server(supervisor, webui_dir)?;

    let probe = probe_for(port);
    let cancel = coordinator.cancel_token();
    match wait_ready(&probe, READY_INTERVAL, READY_ATTEMPTS, &cancel).await {
        Readiness::Ready => {}
        Readiness::TimedOut => {
            return Err(PipelineError::NeverReady {
                attempts: READY_ATTEMPTS,
            }
            .into())
        }
        Readiness::Cancelled => return Ok(exit_code::INTERRUPTED),
    }

    info!("web UI running at http://localhost:{port}");
    println!("Web UI running at http://localhost:{port} — press Ctrl-C to stop");

    // Only a signal (or an external shutdown) ends this.
    cancel.cancelled().await;
    Ok(exit_code::INTERRUPTED)
}

/// One discovery scan, reported on stdout.
async fn cmd_discover() -> Result<i32> {
    match scan_for_device().await? {
        DiscoveryResult::Found(device) => {
            println!(
                "Found sensor board on {} ({} sensors)",
                device.port.name, device.sensor_count
            );
            Ok(exit_code::SUCCESS)
        }
        DiscoveryResult::NotFound => {
            println!("No sensor board found on any serial port");
            Ok(exit_code::DEVICE_NOT_FOUND)
        }
    }
}

/// Serial I/O is blocking; keep it off the async runtime threads.
async fn scan_for_device() -> Result<DiscoveryResult> {
    tokio::task::spawn_blocking(discover_device)
        .await
        .context("discovery task panicked")
}

fn patch_config(device: &DeviceMatch, server_config: &Path) -> Result<()> {
    ConfigPatcher::new()
        .apply(device, server_config)
        .with_context(|| format!("failed to patch {}", server_config.display()))
}

fn start_server(
    supervisor: &ProcessSupervisor,
    webui_dir: &Path,
) -> Result<fsrweb_pipeline::ServerHandle> {
    let step = PipelineStep::custom(
        "start_api",
        vec!["yarn".to_string(), "start-api".to_string()],
        0,
    )
    .in_dir(webui_dir);

    supervisor
        .spawn_server(&step)
        .context("failed to start the API server")
}

fn probe_for(port: u16) -> HttpProbe {
    HttpProbe::new(
        format!("http://localhost:{port}"),
        200,
        Some(READY_MARKER.to_string()),
    )
}
