//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Downstream client registry and fan-out.
pub mod broadcast;

/// Configuration from the environment.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// File-backed last quote store.
pub mod persistence;

/// HTTP banner, health endpoints and downstream WebSocket.
pub mod server;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Upstream REST session, streaming connector and codecs.
pub mod upstream;
