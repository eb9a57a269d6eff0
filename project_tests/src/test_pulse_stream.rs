//! Runs a fast-ticking producer in-process, follows it with a consumer,
//! and checks the consumer's state after the stream has run for a while.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use lib_pulse::consumer::cache::SliceCache;
use lib_pulse::consumer::channel::{ChannelState, PushChannel};
use lib_pulse::consumer::reconciler::Reconciler;
use lib_pulse::consumer::snapshot_client::HttpSnapshotSource;
use lib_pulse::models::{DashboardState, VOLUME_RING_LEN};
use lib_pulse::producer::emitter::{self, PUSH_CHANNEL_CAPACITY};
use lib_pulse::producer::engine::{PulseEngine, TickRates};
use lib_pulse::producer::gateway::{self, GatewayState};
use lib_pulse::producer::seed::{seed_dataset, SeedCounts};
use lib_pulse::retrieve::ky_http::ClientOptions;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// How long to follow the stream, in seconds
    #[clap(short, long, default_value_t = 5)]
    seconds: u64,

    /// Producer tick interval in milliseconds
    #[clap(short, long, default_value_t = 20)]
    tick_ms: u64,

    /// Share of snapshot requests answered with a simulated 500
    #[clap(long, default_value_t = 0.0)]
    request_fault_rate: f64,
}

fn check(name: &str, ok: bool, failures: &mut Vec<String>) {
    println!("[{}] {}", if ok { " OK " } else { "FAIL" }, name);
    if !ok {
        failures.push(name.to_string());
    }
}

fn newest_first(state: &DashboardState) -> bool {
    state.events.windows(2).all(|w| w[0].timestamp >= w[1].timestamp)
        && state.anomalies.windows(2).all(|w| w[0].timestamp >= w[1].timestamp)
}

fn volume_keys_unique(state: &DashboardState) -> bool {
    let keys: HashSet<&str> = state.volume_history.iter().map(|b| b.hour_display.as_str()).collect();
    keys.len() == state.volume_history.len()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let engine = Arc::new(PulseEngine::new(
        seed_dataset(Local::now(), &mut StdRng::from_os_rng(), SeedCounts::default()),
        TickRates::default(),
    ));
    let (push_tx, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    println!("producer listening on {}", addr);

    let state = GatewayState::new(engine.clone(), push_tx.clone(), args.request_fault_rate, cancel.clone());
    let gateway_task = tokio::spawn(gateway::serve(listener, state));
    let emitter_task = tokio::spawn(emitter::run(
        engine.clone(),
        push_tx,
        Duration::from_millis(args.tick_ms),
        cancel.clone(),
    ));

    let source = HttpSnapshotSource::new(&format!("http://{}", addr), ClientOptions::default())
        .context("Failed to build snapshot client")?;
    let reconciler = Arc::new(Reconciler::new(source, SliceCache::in_memory()));
    let channel = PushChannel::new(format!("ws://{}/ws", addr), Duration::from_millis(200), reconciler.clone());
    channel.connect();

    let report = reconciler.bootstrap().await;
    println!("bootstrap: {:?}", report);

    sleep(Duration::from_secs(args.seconds)).await;

    let mut failures = Vec::new();
    let state = reconciler.state();
    println!(
        "events {} | anomalies {} | volume buckets {} | workflows {}",
        state.events.len(),
        state.anomalies.len(),
        state.volume_history.len(),
        state.metrics.total_workflows
    );

    check("channel is live", channel.is_live(), &mut failures);
    check(
        "channel reports connected",
        channel.state() == ChannelState::Connected,
        &mut failures,
    );
    check("loading finished", !state.is_loading, &mut failures);
    check("events and anomalies are newest first", newest_first(&state), &mut failures);
    check(
        "volume history holds at most 24 buckets",
        state.volume_history.len() <= VOLUME_RING_LEN,
        &mut failures,
    );
    check("volume hour keys are unique", volume_keys_unique(&state), &mut failures);
    if report.overview {
        check("workflow total only grows", state.metrics.total_workflows >= 145, &mut failures);
    }

    // While paused, stream frames are dropped.
    reconciler.toggle_pause();
    let frozen = reconciler.state();
    sleep(Duration::from_millis(args.tick_ms * 10)).await;
    check("paused state does not move", reconciler.state() == frozen, &mut failures);
    reconciler.toggle_pause();

    if let Some(task) = channel.disconnect() {
        let _ = task.await;
    }
    cancel.cancel();
    let _ = emitter_task.await;
    match gateway_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => println!("gateway error: {}", e),
        Err(e) => println!("gateway task failed: {}", e),
    }

    if !failures.is_empty() {
        bail!("{} check(s) failed: {}", failures.len(), failures.join(", "));
    }
    println!("all checks passed");
    Ok(())
}
