//! Digitizers - simulated acquisition with trigger windowing
//!
//! Runs the simulated digitizer pipeline on a worker thread and serves the
//! diagnostic API until Ctrl+C.

use anyhow::Result;
use digitizers::config::AppConfig;
use digitizers::{PipelineHandle, StatsStore};
use digitizers_server::{AppState, ServerConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("digitizers=info".parse()?),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut port: Option<u16> = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("digitizers {} ({})", digitizers::VERSION, digitizers::BUILD_DATE);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--config" | "-c" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --config requires a path");
                    return Ok(());
                }
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
                continue;
            }
            "--port" | "-p" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --port requires a value");
                    return Ok(());
                }
                port = args[i + 1].parse().ok();
                if port.is_none() {
                    eprintln!("Error: Invalid port: {}", args[i + 1]);
                    return Ok(());
                }
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
    }

    println!("╔════════════════════════════════════════════════════════════╗");
    println!(
        "║        Digitizers v{} - Trigger Window Extraction         ║",
        digitizers::VERSION
    );
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    let path = config_path.unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&path);
    if let Some(port) = port {
        config.port = port;
    }

    run(config).await
}

fn print_help() {
    println!("Usage: digitizers [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config PATH       Load configuration from PATH (default: digitizers.json)");
    println!("  -p, --port PORT         Diagnostic server port (default: 8920)");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Examples:");
    println!("  digitizers --config lab.json --port 9000");
    println!("  curl -X POST http://localhost:8920/api/v1/postmortem/freeze");
    println!("  curl http://localhost:8920/api/v1/postmortem/data?items=1000");
}

async fn run(config: AppConfig) -> Result<()> {
    let stats = Arc::new(Mutex::new(StatsStore::new()));
    let mut pipeline = PipelineHandle::spawn_with_stats(config.pipeline.clone(), Arc::clone(&stats))?;
    let logging = Arc::new(AtomicBool::new(true));

    let spec = pipeline.spec();
    info!(
        pre_trigger = spec.pre_trigger,
        post_trigger = spec.post_trigger,
        decimation = config.pipeline.effective_decimation(),
        "Pipeline started"
    );

    // Log extracted windows until shutdown
    let windows = pipeline.windows();
    let logger_running = Arc::clone(&logging);
    let logger = std::thread::Builder::new()
        .name("window-logger".into())
        .spawn(move || {
            while logger_running.load(Ordering::Acquire) {
                match windows.recv_timeout(Duration::from_millis(500)) {
                    Ok(window) => {
                        let status = window
                            .acq_infos
                            .iter()
                            .fold(0u32, |acc, (_, info)| acc | info.status);
                        info!(
                            first_offset = window.first_offset,
                            trigger = %window.trigger.name,
                            trigger_timestamp_ns = window.trigger.timestamp_ns,
                            samples = window.samples.len(),
                            status,
                            "Window extracted"
                        );
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
        })?;

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let notify = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down");
        notify.notify_one();
    })?;

    let state = AppState::new(
        pipeline.post_mortem(),
        stats,
        pipeline.running_flag(),
        config.pipeline.clone(),
        ServerConfig {
            port: config.port,
            bind_addr: config.bind_addr.clone(),
        },
    );

    println!("Diagnostic API: http://{}:{}/api/v1/status", config.bind_addr, config.port);
    println!("Press Ctrl+C to stop.");
    println!();

    let result = digitizers_server::start_server(state, async move {
        shutdown.notified().await;
    })
    .await;
    if let Err(e) = &result {
        error!("Server error: {}", e);
    }

    logging.store(false, Ordering::Release);
    pipeline.stop();
    let _ = logger.join();
    info!("Stopped");

    result
}
