use anyhow::Context;
use bosun::storage::FileBackend;
use bosun::{AlarmEngine, Config, LoggingAudio, SensorBus, SensorSnapshot};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bosun::init();
    info!("Bosun v{} starting", bosun::VERSION);

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading config {}", path))?,
        None => {
            info!("No config file given, using defaults");
            Config::default()
        }
    };

    let mut engine = AlarmEngine::new(config.clone(), Arc::new(LoggingAudio))?;
    if let Some(path) = &config.persistence.path {
        info!("Persisting state to {}", path.display());
        engine = engine.with_persistence(Arc::new(FileBackend::new(path)));
    }
    let restored = engine.load_state().await.context("loading persisted state")?;
    if restored.history_reset {
        warn!("Persisted history had an incompatible schema and was discarded");
    }

    // Log every transition the UI would see
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    "{:?} {} at {:?}: {}",
                    event.kind, event.occurrence.alarm_id, event.occurrence.escalation_level, event.occurrence.message
                ),
                Err(RecvError::Lagged(missed)) => warn!("Event log lagged, {} events missed", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Newline-delimited JSON snapshots on stdin
    let bus = SensorBus::new();
    let feed = bus.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match SensorSnapshot::from_json_str(&line) {
                    Ok(snapshot) => feed.publish(&snapshot),
                    Err(e) => warn!("Ignoring sensor line: {}", e),
                },
                Ok(None) => {
                    info!("Sensor feed closed");
                    break;
                }
                Err(e) => {
                    error!("Sensor feed error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            engine.stop();
            engine.stop_monitors();
        }
        res = engine.run(bus) => {
            if let Err(e) = res {
                error!("Engine error: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = engine.save_state().await {
        error!("Failed to save state on shutdown: {}", e);
    }

    let stats = engine.stats();
    info!(
        "Final stats: {} scans, {} errors, uptime: {}s, {} alarms active",
        stats.scan_count, stats.error_count, stats.uptime_secs, stats.active_alarms
    );

    Ok(())
}
