//! Registry of services and the application-level routes around them.

use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::{AppConfig, PorterConfig, ResponseConfig};
use crate::contract::{Contract, Contracts, ResponseBody};
use crate::docs::make_openapi_spec;
use crate::error::{ErrorReport, PorterError};
use crate::response::{make_error_response, user_data_from_body, Response};
use crate::schema::builtins;
use crate::service::{PredictionRequest, Service};
use crate::types::{Meta, ModelContext, ServiceStatus, LIVENESS_ENDPOINT, READINESS_ENDPOINT};
use crate::PORTER_VERSION;

pub const ROOT_MESSAGE: &str = "Send POST requests to /<model-name>/<api-version>/prediction";

const DEPLOYED_ON_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealth {
    pub endpoint: String,
    pub status: ServiceStatus,
    pub model_context: ModelContext,
}

/// Body of both health endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub porter_version: String,
    pub deployed_on: String,
    pub app_meta: Meta,
    pub services: BTreeMap<String, ServiceHealth>,
}

impl HealthSnapshot {
    /// At least one service, and every service `READY`.
    pub fn is_ready(&self) -> bool {
        !self.services.is_empty() && self.services.values().all(|s| s.status.is_ready())
    }
}

/// A set of uniquely identified services plus application metadata.
///
/// Built at start-up and shared read-only while serving; the only state that
/// changes afterwards is each service's status cell.
#[derive(Debug)]
pub struct ModelApp {
    config: AppConfig,
    responses: ResponseConfig,
    services: Vec<Arc<Service>>,
    routes: Vec<(String, Contracts)>,
    deployed_on: String,
}

impl ModelApp {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            responses: ResponseConfig::default(),
            services: Vec::new(),
            routes: Vec::new(),
            deployed_on: chrono::Utc::now().format(DEPLOYED_ON_FORMAT).to_string(),
        }
    }

    pub fn from_config(config: &PorterConfig) -> Self {
        Self::new(config.app.clone()).with_response_config(config.responses.clone())
    }

    /// Build an application from `services`, failing as a whole on any
    /// duplicate id or endpoint.
    pub fn from_services(
        config: AppConfig,
        services: impl IntoIterator<Item = Service>,
    ) -> Result<Self, PorterError> {
        let mut app = Self::new(config);
        app.register_many(services)?;
        Ok(app)
    }

    pub fn with_response_config(mut self, responses: ResponseConfig) -> Self {
        self.responses = responses;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn response_config(&self) -> &ResponseConfig {
        &self.responses
    }

    pub fn deployed_on(&self) -> &str {
        &self.deployed_on
    }

    pub fn register(&mut self, service: Service) -> Result<Arc<Service>, PorterError> {
        self.check_available(&service, &[])?;
        tracing::info!(
            service_id = %service.id(),
            endpoint = %service.endpoint(),
            "Registered service"
        );
        let service = Arc::new(service);
        self.services.push(Arc::clone(&service));
        Ok(service)
    }

    /// Register every service or none of them.
    pub fn register_many(
        &mut self,
        services: impl IntoIterator<Item = Service>,
    ) -> Result<(), PorterError> {
        let pending: Vec<Service> = services.into_iter().collect();
        for (index, service) in pending.iter().enumerate() {
            self.check_available(service, &pending[..index])?;
        }
        for service in pending {
            self.register(service)?;
        }
        Ok(())
    }

    fn check_available(&self, service: &Service, pending: &[Service]) -> Result<(), PorterError> {
        let id_taken = self
            .services
            .iter()
            .map(|s| s.id())
            .chain(pending.iter().map(Service::id))
            .any(|id| id == service.id());
        if id_taken {
            return Err(PorterError::Configuration(format!(
                "a service has already been added using id={}",
                service.id()
            )));
        }

        let endpoint = service.endpoint();
        let endpoint_taken = self
            .services
            .iter()
            .map(|s| s.endpoint())
            .chain(pending.iter().map(Service::endpoint))
            .any(|e| e == endpoint);
        if endpoint_taken || self.is_reserved(endpoint) {
            return Err(PorterError::Configuration(format!(
                "endpoint {} of service {} is already routed",
                endpoint,
                service.id()
            )));
        }
        Ok(())
    }

    /// Paths routed by the application itself.
    pub fn reserved_paths(&self) -> Vec<&str> {
        let mut paths = vec!["/", LIVENESS_ENDPOINT, READINESS_ENDPOINT];
        if self.config.expose_docs {
            paths.push(&self.config.docs_url);
            paths.push(&self.config.docs_json_url);
        }
        paths.extend(self.routes.iter().map(|(path, _)| path.as_str()));
        paths
    }

    fn is_reserved(&self, path: &str) -> bool {
        self.reserved_paths().contains(&path)
    }

    /// Add the contracts of a route served outside the registry so it shows
    /// up in the API documentation.
    pub fn document_route(
        &mut self,
        path: impl Into<String>,
        contracts: Contracts,
    ) -> Result<(), PorterError> {
        let path = path.into();
        if self.is_reserved(&path) || self.service_for_endpoint(&path).is_some() {
            return Err(PorterError::Configuration(format!(
                "route {} is already documented",
                path
            )));
        }
        self.routes.push((path, contracts));
        Ok(())
    }

    pub fn routes(&self) -> &[(String, Contracts)] {
        &self.routes
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn service(&self, id: &str) -> Option<&Arc<Service>> {
        self.services.iter().find(|s| s.id() == id)
    }

    pub fn service_for_endpoint(&self, endpoint: &str) -> Option<&Arc<Service>> {
        self.services.iter().find(|s| s.endpoint() == endpoint)
    }

    pub fn compute_health(&self) -> HealthSnapshot {
        let services = self
            .services
            .iter()
            .map(|service| {
                (
                    service.id().to_string(),
                    ServiceHealth {
                        endpoint: service.endpoint().to_string(),
                        status: service.status(),
                        model_context: service.model_context().clone(),
                    },
                )
            })
            .collect();
        HealthSnapshot {
            porter_version: PORTER_VERSION.to_string(),
            deployed_on: self.deployed_on.clone(),
            app_meta: self.config.meta.clone(),
            services,
        }
    }

    pub fn compute_readiness(&self) -> bool {
        !self.services.is_empty() && self.services.iter().all(|s| s.is_ready())
    }

    /// Always 200.
    pub fn alive_response(&self) -> Response {
        let snapshot = self.compute_health();
        tracing::info!(ready = snapshot.is_ready(), services = snapshot.services.len(), "Liveness check");
        Response::json(200, health_body(&snapshot))
    }

    /// 200 when ready, 503 otherwise. The body is the same as for liveness.
    pub fn ready_response(&self) -> Response {
        let snapshot = self.compute_health();
        let ready = snapshot.is_ready();
        tracing::info!(ready, services = snapshot.services.len(), "Readiness check");
        Response::json(if ready { 200 } else { 503 }, health_body(&snapshot))
    }

    /// Run `service` over `request` and shape the outcome with this app's
    /// response configuration.
    pub fn predict(&self, service: &Service, request: &PredictionRequest<'_>) -> Response {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            service.handle(request, &self.responses)
        }));
        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(report)) => self.error_response(&report),
            Err(payload) => {
                let report = ErrorReport::new(PorterError::Internal(anyhow::anyhow!(
                    "service panicked: {}",
                    panic_message(payload.as_ref())
                )))
                .with_context(service.model_context().clone())
                .with_request_id(request.request_id)
                .with_user_data(user_data_from_body(request.body));
                self.error_response(&report)
            },
        }
    }

    pub fn error_response(&self, report: &ErrorReport) -> Response {
        let error = &report.error;
        let request_id = report.request_id.as_deref().unwrap_or("-");
        let service = report
            .context
            .as_ref()
            .map(|c| format!("{}:{}", c.model_name, c.api_version))
            .unwrap_or_default();
        if error.status_code() >= 500 {
            tracing::error!(
                request_id,
                service = %service,
                error = error.name(),
                traceback = %error.traceback(),
                "Request failed"
            );
        } else {
            tracing::warn!(
                request_id,
                service = %service,
                error = error.name(),
                message = %error,
                "Request rejected"
            );
        }
        make_error_response(report, &self.responses)
    }

    fn health_contracts() -> Contracts {
        Contracts::new().with(
            Contract::new("GET")
                .response(
                    ResponseBody::new(200, builtins::health_check())
                        .describe("Status of the application and its services"),
                )
                .response(ResponseBody::new(503, builtins::health_check()).describe("Not ready"))
                .tag("Health Check"),
        )
    }

    /// OpenAPI document over every service, the health checks and any
    /// documented routes.
    pub fn openapi(&self) -> Result<Value, PorterError> {
        let health = Self::health_contracts();
        let routes = self
            .services
            .iter()
            .map(|s| (s.endpoint(), s.contracts()))
            .chain([(LIVENESS_ENDPOINT, &health), (READINESS_ENDPOINT, &health)])
            .chain(self.routes.iter().map(|(path, c)| (path.as_str(), c)));
        make_openapi_spec(
            &self.config.name,
            self.config.description.as_deref(),
            &self.config.version,
            routes,
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

fn health_body(snapshot: &HealthSnapshot) -> Value {
    serde_json::to_value(snapshot).unwrap_or(Value::Null)
}
