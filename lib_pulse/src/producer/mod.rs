//! Producer side: seeding, the tick engine, the periodic emitter and the
//! HTTP/websocket gateway.

pub mod emitter;
pub mod engine;
pub mod gateway;
pub mod seed;
