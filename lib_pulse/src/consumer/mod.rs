//! Consumer side: snapshot fetching, the state reconciler, the slice cache,
//! derived views and the push channel listener.

pub mod cache;
pub mod channel;
pub mod classify;
pub mod reconciler;
pub mod snapshot_client;
pub mod views;
