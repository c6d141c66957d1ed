//! Tyk route operator - reconciles TykRoute resources into a shared gateway ConfigMap
//!
//! Each TykRoute carries one Tyk API definition. The operator validates it,
//! merges it into the ConfigMap the gateway mounts as its app directory
//! (one key per route, written with compare-and-swap so concurrent routes
//! never clobber each other), restarts the gateway Deployment when the
//! ConfigMap actually changed, and reports the outcome on the route's status.
//!
//! # Modules
//!
//! - [`crd`] - TykRoute CRD and the typed API definition
//! - [`validation`] - Pure validation of a route spec
//! - [`document`] - Versioned shared-document abstraction and its ConfigMap store
//! - [`sync`] - Compare-and-swap synchronizer for route entries
//! - [`reload`] - Gateway restart trigger
//! - [`controller`] - Reconciler, status reporting and finalizer handling
//! - [`retry`] - Backoff utilities
//! - [`config`] - CLI/environment configuration
//! - [`health`] - Liveness/readiness HTTP endpoint
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod document;
pub mod error;
pub mod health;
pub mod reload;
pub mod retry;
pub mod sync;
pub mod telemetry;
pub mod validation;

pub use error::Error;

/// Field manager recorded on every object the operator patches
pub const FIELD_MANAGER: &str = "tyk-route-operator";

/// Default port for the health endpoint
pub const DEFAULT_HEALTH_PORT: u16 = 8081;

/// Interval between "still alive" log lines
pub const HEARTBEAT_INTERVAL_SECS: u64 = 300;
