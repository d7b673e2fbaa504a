//! streamhub: control plane hub for session-streaming agents.
//!
//! The hub accepts long-lived WebSocket connections from platform agents
//! (Kubernetes, Docker, VM, cloud), tracks their liveness, and dispatches
//! session-lifecycle commands to them while reconciling the agents'
//! ack/complete/failed reports against the durable command store.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod model;
pub mod protocol;
pub mod store;
