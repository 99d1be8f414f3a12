//! DataFlow engine: normalizes raw market events, runs them through a
//! transformer chain and a routing layer, and fans them out to pluggable
//! output channels (pub/sub, cache, WebSocket, batching) — plus the
//! WebSocket proxy subscribers connect to directly.

pub mod channel;
pub mod config;
pub mod demo;
pub mod error;
pub mod ingress;
pub mod manager;
pub mod model;
pub mod monitor;
pub mod normalizer;
pub mod proxy;
pub mod router;
pub mod transform;
