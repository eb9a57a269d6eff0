//! # Pulse Producer Server
//!
//! Runs the producer half of the operational-event stream:
//! - **Seeding**: builds the initial timeline, anomalies and 24-hour volume
//!   ring in memory.
//! - **Emitter**: ticks the engine on a fixed interval and broadcasts each
//!   tick's frames.
//! - **Gateway**: serves `/stats/*` snapshots (with simulated request
//!   faults), `/health`, and the `/ws` push channel.
//! - **Graceful Shutdown**: `tokio-graceful` waits for Ctrl+C / SIGTERM, then
//!   cancels the emitter and the gateway.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_graceful::{Shutdown, ShutdownGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lib_pulse::loggers::setup_logging;
use lib_pulse::producer::emitter::{self, PUSH_CHANNEL_CAPACITY};
use lib_pulse::producer::engine::{PulseEngine, TickRates};
use lib_pulse::producer::gateway::{self, GatewayState};
use lib_pulse::producer::seed::{seed_dataset, SeedCounts};

mod pulse_logic;
use pulse_logic::config::{load_producer_config, ProducerSettings};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let (config, file_layer) = load_producer_config();
    let settings = config.settings();
    let _log_guard = setup_logging("server_pulse", &settings.log_dir, &settings.log_level)?;
    file_layer.log();
    info!(?settings, "server_pulse starting");

    let listener = TcpListener::bind(("0.0.0.0", settings.port))
        .await
        .with_context(|| format!("Failed to bind port {}", settings.port))?;

    let shutdown = Shutdown::default();
    shutdown.spawn_task_fn(move |guard| tokio_main(settings, listener, guard));

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    info!("Bye!");
    Ok(())
}

async fn tokio_main(settings: ProducerSettings, listener: TcpListener, guard: ShutdownGuard) {
    let mut rng = StdRng::from_os_rng();
    let counts = SeedCounts {
        events: settings.seed_events,
        anomalies: settings.seed_anomalies,
    };
    let engine = Arc::new(PulseEngine::new(
        seed_dataset(Local::now(), &mut rng, counts),
        TickRates::new(settings.fault_rate, settings.anomaly_rate),
    ));
    info!(?counts, "Seeded producer state");

    let (push_tx, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    let signal_guard = guard.clone();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        signal_guard.cancelled().await;
        info!("Signal received: initiate graceful shutdown");
        signal_cancel.cancel();
    });

    let emitter_handle = tokio::spawn(emitter::run(
        engine.clone(),
        push_tx.clone(),
        settings.tick_interval,
        cancel.clone(),
    ));

    let state = GatewayState::new(engine, push_tx, settings.request_fault_rate, cancel.clone());
    if let Err(e) = gateway::serve(listener, state).await {
        error!("Gateway failed: {}", e);
        cancel.cancel();
    }

    if let Err(e) = emitter_handle.await {
        error!("Emitter task failed: {}", e);
    }
    drop(guard);
}
