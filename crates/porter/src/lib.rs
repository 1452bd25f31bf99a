//! Serve predictive models as REST endpoints with uniform contracts.
//!
//! A [`Service`] binds a [`Model`] and its processors to an endpoint; a
//! [`ModelApp`] registers services under unique ids and answers health and
//! documentation requests. Transport lives in `porter-server`.

pub mod app;
pub mod config;
pub mod contract;
pub mod docs;
pub mod error;
pub mod frame;
pub mod model;
pub mod response;
pub mod schema;
pub mod service;
pub mod types;

/// Test utilities for unit and integration testing.
/// Only available with cfg(test) or feature "testing".
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use app::{HealthSnapshot, ModelApp, ServiceHealth};
pub use config::{AppConfig, ConfigLoader, PorterConfig, ResponseConfig};
pub use contract::{Contract, Contracts, RequestBody, ResponseBody};
pub use error::{ErrorReport, PorterError, SchemaIssue, SchemaValidationError};
pub use frame::{Frame, Row};
pub use model::{Model, Processor};
pub use response::{Payload, Response};
pub use schema::{Definitions, Required, Schema};
pub use service::{PredictionRequest, Service, ServiceBuilder};
pub use types::{Meta, ModelContext, ServiceStatus};

/// Version reported by health checks.
pub const PORTER_VERSION: &str = env!("CARGO_PKG_VERSION");
