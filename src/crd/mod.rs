//! Custom Resource Definitions for the Tyk route operator
//!
//! This module contains the TykRoute CRD and the typed API definition it carries.

mod api_definition;
mod route;
mod types;

pub use api_definition::{
    listen_path_of, ApiDefinition, CacheOptions, CorsConfig, Lenient, ProxyConfig, RateLimit,
};
pub(crate) use api_definition::typed;
pub use route::{RouteTarget, TykRoute, TykRouteSpec, TykRouteStatus};
pub use types::{Condition, ConditionStatus, DocumentRef, RouteState, WorkloadRef};
