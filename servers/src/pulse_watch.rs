//! # Pulse Watcher
//!
//! Terminal consumer of the operational-event stream. Bootstraps the
//! reconciler from cache and the producer's snapshots, follows the push
//! channel, and redraws a text dashboard on an interval. Notices (new
//! events, anomalies, simulated faults) are printed as they arrive.
//!
//! Commands are read from stdin; `h` lists them.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use lib_pulse::consumer::cache::{open_store, MemoryCache, SliceCache};
use lib_pulse::consumer::channel::PushChannel;
use lib_pulse::consumer::reconciler::{NoticeLevel, Reconciler};
use lib_pulse::consumer::snapshot_client::HttpSnapshotSource;
use lib_pulse::loggers::setup_logging;
use lib_pulse::retrieve::ky_http::ClientOptions;

mod pulse_logic;
use pulse_logic::commands::{WatchCommand, HELP};
use pulse_logic::config::load_watch_config;
use pulse_logic::render::{render, render_cell, ViewOptions};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let (config, file_layer) = load_watch_config();
    let settings = config.settings();
    let _log_guard = setup_logging("pulse_watch", &settings.log_dir, &settings.log_level)?;
    file_layer.log();
    info!(?settings, "pulse_watch starting");

    // Opening redis pings the server, which can take a couple of seconds
    let location = settings.cache.clone();
    let opened = tokio::task::spawn_blocking(move || open_store(&location))
        .await
        .map_err(anyhow::Error::from)
        .and_then(|store| store.map_err(anyhow::Error::from));
    let store = match opened {
        Ok(store) => store,
        Err(e) => {
            warn!(location = %settings.cache, error = %e, "Cache unavailable, using memory only");
            Arc::new(MemoryCache::default())
        }
    };
    let cache = SliceCache::new(store).with_caps(settings.cache_events_cap, settings.cache_anomalies_cap);

    let options = ClientOptions {
        max_retries: settings.fetch_retries,
        timeout: settings.fetch_timeout,
        ..Default::default()
    };
    let source = HttpSnapshotSource::new(&settings.api_url, options)
        .with_context(|| format!("Invalid API URL {}", settings.api_url))?;

    let reconciler = Arc::new(Reconciler::new(source, cache));
    let mut notices = reconciler.subscribe_notices();

    let channel = PushChannel::new(settings.push_url.clone(), settings.reconnect_delay, reconciler.clone());
    channel.connect();

    let report = reconciler.bootstrap().await;
    if !report.all_succeeded() {
        warn!(?report, "Some snapshots failed, showing cached data where available");
    }

    let mut view = ViewOptions::default();
    println!("{}", HELP);
    println!("{}", render(&reconciler.state(), channel.state(), &view));

    let mut ticker = interval(settings.render_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down.");
                break;
            }
            _ = ticker.tick() => {
                println!("{}", render(&reconciler.state(), channel.state(), &view));
            }
            notice = notices.recv() => {
                match notice {
                    Ok(notice) => {
                        let tag = match notice.level {
                            NoticeLevel::Info => "info",
                            NoticeLevel::Error => "ALERT",
                        };
                        println!("[{}] {}", tag, notice.text);
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notices skipped"),
                    Err(RecvError::Closed) => break,
                }
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        stdin_open = false;
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "stdin read failed, commands disabled");
                        stdin_open = false;
                        continue;
                    }
                };
                let redraw = match WatchCommand::parse(&line) {
                    Ok(WatchCommand::Quit) => break,
                    Ok(WatchCommand::Help) => {
                        println!("{}", HELP);
                        false
                    }
                    Ok(WatchCommand::TogglePause) => {
                        let paused = reconciler.toggle_pause();
                        println!("stream {}", if paused { "paused" } else { "resumed" });
                        true
                    }
                    Ok(WatchCommand::Filter(filter)) => {
                        view.filter = filter;
                        true
                    }
                    Ok(WatchCommand::Window(window)) => {
                        view.window = window;
                        true
                    }
                    Ok(WatchCommand::ToggleSeverity(severity)) => {
                        let visible = view.toggle_severity(severity);
                        println!("{} {}", severity.as_str(), if visible { "shown" } else { "hidden" });
                        true
                    }
                    Ok(WatchCommand::Cell(hour, severity)) => {
                        print!("{}", render_cell(&reconciler.state(), &view, hour, severity));
                        false
                    }
                    Ok(WatchCommand::Refresh) => {
                        // Re-fetch only; live slices never roll back to the cache
                        let report = reconciler.refresh().await;
                        println!("refresh: {:?}", report);
                        true
                    }
                    Err(e) => {
                        println!("{}", e);
                        false
                    }
                };
                if redraw {
                    println!("{}", render(&reconciler.state(), channel.state(), &view));
                }
            }
        }
    }

    if let Some(task) = channel.disconnect() {
        let _ = task.await;
    }
    info!("Bye!");
    Ok(())
}
