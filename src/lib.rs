//! World sync server
//!
//! Real-time synchronization core of a multiplayer game server: inbound
//! packets are reduced into per-type worker queues, interpreted into
//! authoritative world state and relayed to the other clients, while a
//! spatial element repository and a collision-shape engine back the
//! containment and proximity queries.

pub mod app;
pub mod client;
pub mod colshape;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod net;
pub mod packets;
pub mod server;
pub mod sync;
pub mod util;
pub mod world;
