//! Application Layer - Use cases and port definitions.
//!
//! Ports describe what the relay needs from the outside world; services
//! drive the domain through those ports.

/// Port interfaces for storage, upstream session and fan-out.
pub mod ports;

/// Cache, pipeline and feed-state services.
pub mod services;
