//! # Push Channel
//!
//! Websocket listener that feeds producer frames into a `Reconciler`.
//!
//! The listener is one background task bound to a `CancellationToken`.
//! `connect` and `disconnect` are idempotent, and dropping the channel
//! cancels the task. If the socket drops while connected, the listener waits
//! the reconnect delay and tries again until disconnected. Between attempts
//! the channel reports `Reconnecting`, never `Connected`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tokio_util::sync::CancellationToken;

use crate::consumer::reconciler::Reconciler;
use crate::consumer::snapshot_client::SnapshotSource;
use crate::error::ChannelError;

/// Lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No listener running.
    Disconnected,
    /// Listener running, but no socket open yet or between retries.
    Reconnecting,
    /// Socket open and frames flowing into the reconciler.
    Connected,
    /// Socket open with the reconciler's pause flag set.
    Paused,
}

struct Listener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Subscription to the producer's push endpoint.
pub struct PushChannel<S> {
    url: String,
    reconnect_delay: Duration,
    reconciler: Arc<Reconciler<S>>,
    listener: Mutex<Option<Listener>>,
    live: Arc<AtomicBool>,
}

impl<S> PushChannel<S>
where
    S: SnapshotSource + 'static,
{
    /// Creates a disconnected channel.
    ///
    /// # Arguments
    /// * `url` - The websocket endpoint, e.g. "ws://127.0.0.1:3000/ws".
    /// * `reconnect_delay` - Wait between a dropped socket and the next attempt.
    /// * `reconciler` - Receives every decoded frame.
    pub fn new(url: impl Into<String>, reconnect_delay: Duration, reconciler: Arc<Reconciler<S>>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
            reconciler,
            listener: Mutex::new(None),
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the listener if it is not already running. The channel reports
    /// `Reconnecting` until the first socket opens.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listen(
            self.url.clone(),
            self.reconnect_delay,
            self.reconciler.clone(),
            cancel.clone(),
            self.live.clone(),
        ));
        *listener = Some(Listener { cancel, task });
        tracing::info!(url = %self.url, "Push channel connecting");
    }

    /// Stops the listener if running. Returns the task handle so callers can
    /// wait for the socket to close.
    pub fn disconnect(&self) -> Option<JoinHandle<()>> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        listener.cancel.cancel();
        tracing::info!(url = %self.url, "Push channel disconnected");
        Some(listener.task)
    }

    /// Current lifecycle state. `Connected` and `Paused` both mean a socket
    /// is open right now.
    pub fn state(&self) -> ChannelState {
        let running = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if !running {
            ChannelState::Disconnected
        } else if !self.is_live() {
            ChannelState::Reconnecting
        } else if self.reconciler.is_paused() {
            ChannelState::Paused
        } else {
            ChannelState::Connected
        }
    }

    /// Whether a websocket is currently open (as opposed to between retries).
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl<S> Drop for PushChannel<S> {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.cancel.cancel();
        }
    }
}

async fn listen<S: SnapshotSource>(
    url: String,
    reconnect_delay: Duration,
    reconciler: Arc<Reconciler<S>>,
    cancel: CancellationToken,
    live: Arc<AtomicBool>,
) {
    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((ws_stream, _)) => {
                live.store(true, Ordering::SeqCst);
                tracing::info!(%url, "Push channel connected");
                let (mut write, mut read) = ws_stream.split();

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = write.close().await;
                            live.store(false, Ordering::SeqCst);
                            return;
                        }
                        msg = read.next() => {
                            match msg {
                                Some(Ok(WsMessage::Text(text))) => {
                                    let outcome = reconciler.apply_stream_text(text.as_str());
                                    tracing::trace!(?outcome, "Push frame handled");
                                }
                                Some(Ok(WsMessage::Close(_))) | None => {
                                    tracing::warn!(%url, "Push channel closed by producer");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    let e = ChannelError::Read(e.to_string());
                                    tracing::warn!(error = %e, "Push channel dropped");
                                    break;
                                }
                            }
                        }
                    }
                }
                live.store(false, Ordering::SeqCst);
            }
            Err(e) => {
                let e = ChannelError::Connect {
                    url: url.clone(),
                    reason: e.to_string(),
                };
                tracing::warn!(error = %e, "Push channel connect failed");
            }
        }

        tracing::info!(delay_ms = reconnect_delay.as_millis() as u64, "Reconnecting push channel");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
    live.store(false, Ordering::SeqCst);
}
