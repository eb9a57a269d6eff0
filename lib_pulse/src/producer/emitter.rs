//! # Stream Emitter
//!
//! Drives the engine on a fixed period and fans every resulting frame out to
//! push subscribers over a broadcast channel. Frames are published after the
//! engine lock is released, in the order the tick produced them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::PushMessage;
use crate::producer::engine::PulseEngine;

/// Capacity of the push fan-out channel. Slow subscribers that fall further
/// behind than this skip frames.
pub const PUSH_CHANNEL_CAPACITY: usize = 256;

/// Publishes one tick's frames. Returns how many subscribers saw each frame.
pub fn publish(tx: &broadcast::Sender<PushMessage>, frames: Vec<PushMessage>) -> usize {
    let mut receivers = 0;
    for frame in frames {
        if let PushMessage::SimulatedError(advisory) = &frame {
            tracing::warn!(message = %advisory.message, "Emitting simulated fault");
        } else {
            tracing::debug!(kind = ?frame.kind(), "Emitting frame");
        }
        // No subscribers is not an error; the frame is simply dropped.
        receivers = tx.send(frame).unwrap_or(0);
    }
    receivers
}

/// Ticks `engine` every `period` until `shutdown` is cancelled.
///
/// The first tick fires one full period after start, so a fresh subscriber
/// sees the seeded snapshot before any stream traffic.
pub async fn run(
    engine: Arc<PulseEngine>,
    tx: broadcast::Sender<PushMessage>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut rng = StdRng::from_os_rng();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // `interval` fires immediately; consume that so ticks start after one period.
    ticker.tick().await;

    tracing::info!(period_ms = period.as_millis() as u64, "Stream emitter started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Stream emitter received shutdown signal.");
                break;
            }
            _ = ticker.tick() => {
                let frames = engine.tick(Local::now(), &mut rng);
                publish(&tx, frames);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::engine::TickRates;
    use crate::producer::seed::{seed_dataset, SeedCounts};

    fn engine(rates: TickRates) -> Arc<PulseEngine> {
        let mut rng = StdRng::seed_from_u64(11);
        Arc::new(PulseEngine::new(
            seed_dataset(Local::now(), &mut rng, SeedCounts::default()),
            rates,
        ))
    }

    #[tokio::test]
    async fn emitter_publishes_event_frames_in_order() {
        let engine = engine(TickRates::new(0.0, 0.0));
        let (tx, mut rx) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(
            engine.clone(),
            tx,
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();
        assert!(matches!(first, PushMessage::NewEvent(_)));
        assert!(matches!(second, PushMessage::StatsUpdate(_)));
        assert!(matches!(third, PushMessage::VolumeUpdate(_)));

        shutdown.cancel();
        task.await.unwrap();
        assert!(engine.timeline().len() > 20);
    }

    #[tokio::test]
    async fn emitter_stops_on_cancel_without_ticking() {
        let engine = engine(TickRates::default());
        let (tx, _rx) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        run(engine.clone(), tx, Duration::from_secs(3600), shutdown).await;
        assert_eq!(engine.timeline().len(), 20);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let frames = vec![PushMessage::SimulatedError(crate::models::FaultAdvisory {
            message: "x".to_string(),
        })];
        assert_eq!(publish(&tx, frames), 0);
    }
}
