//! Domain Layer - Core quote types and normalization rules.
//!
//! This layer has no I/O. Everything here is plain Rust with
//! serialization support and is exercised directly by unit tests.

/// Quote, raw tick, session extrema and sentiment types.
pub mod quote;

/// Raw tick to canonical quote conversion.
pub mod normalizer;

/// Upstream session tokens, connector state and session errors.
pub mod session;
