use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Arbitrary string metadata attached to services and applications.
pub type Meta = BTreeMap<String, String>;

/// Key carrying the record correlation id in requests and predictions.
pub const ID_KEY: &str = "id";
pub const PREDICTION_KEY: &str = "prediction";
pub const PREDICTIONS_KEY: &str = "predictions";
pub const MODEL_NAME_KEY: &str = "model_name";
pub const API_VERSION_KEY: &str = "api_version";
pub const REQUEST_ID_KEY: &str = "request_id";

/// Envelope keys that service metadata may not shadow.
pub const RESERVED_META_KEYS: &[&str] = &[
    MODEL_NAME_KEY,
    API_VERSION_KEY,
    PREDICTIONS_KEY,
    REQUEST_ID_KEY,
];

pub const LIVENESS_ENDPOINT: &str = "/-/alive";
pub const READINESS_ENDPOINT: &str = "/-/ready";

/// Readiness of a single service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServiceStatus {
    #[default]
    Ready,
    Error(String),
}

impl ServiceStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ServiceStatus::Ready)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Ready => write!(f, "READY"),
            ServiceStatus::Error(detail) => write!(f, "ERROR: {}", detail),
        }
    }
}

impl std::str::FromStr for ServiceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "READY" {
            return Ok(ServiceStatus::Ready);
        }
        match s.strip_prefix("ERROR:") {
            Some(detail) => Ok(ServiceStatus::Error(detail.trim().to_string())),
            None => Err(anyhow::anyhow!("Invalid service status: {}", s)),
        }
    }
}

impl Serialize for ServiceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Identifies the service an error or health entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelContext {
    pub model_name: String,
    pub api_version: String,
    pub model_meta: Meta,
}
