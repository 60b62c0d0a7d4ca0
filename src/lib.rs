//! vncgate - single-seat VNC proxy
//!
//! Sits between any number of VNC clients and one backend display
//! server, forwarding exactly one session at a time. A client arriving
//! while a session is active triggers a time-bounded operator decision:
//! keep the seated client or hand the seat over. Refused clients get a
//! protocol-conformant RFB rejection and a short cooldown.

/// Proxy configuration (YAML file + CLI overrides)
pub mod config;
/// Server lifecycle (shutdown flag, signal mapping)
pub mod core;
/// Network utilities (cooldown registry, RFB refusal handshake)
pub mod network;
/// Admission control and session forwarding
pub mod proxy;
