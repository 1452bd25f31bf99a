//! Contract enforcement for routes outside the service registry.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    Router,
};
use porter::response::{make_error_response, user_data_from_body};
use porter::{Contracts, ErrorReport, PorterError, ResponseConfig};
use serde_json::Value;
use std::sync::Arc;

use crate::api::{into_http, request_id};

/// Largest body buffered for validation.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct ContractGuard {
    contracts: Arc<Contracts>,
    config: Arc<ResponseConfig>,
}

impl ContractGuard {
    fn reject(&self, report: &ErrorReport) -> Response {
        let error = &report.error;
        if error.status_code() >= 500 {
            tracing::error!(error = error.name(), message = %error, "Contract violation in response");
        } else {
            tracing::warn!(error = error.name(), message = %error, "Request violates contract");
        }
        into_http(make_error_response(report, &self.config))
    }
}

/// Wrap every route of `router` with contract validation.
///
/// Requests whose method has a contract demanding validation are checked
/// before the handler runs; a failure is answered with the error envelope.
/// Responses are checked only when `contracts` has response validation on.
pub fn attach_contracts<S>(router: Router<S>, contracts: Contracts, config: ResponseConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let guard = ContractGuard {
        contracts: Arc::new(contracts),
        config: Arc::new(config),
    };
    router.route_layer(middleware::from_fn_with_state(guard, enforce_contracts))
}

async fn enforce_contracts(
    State(guard): State<ContractGuard>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = request_id(request.headers());
    let method = request.method().as_str().to_string();

    let request = if guard.contracts.demands_request_validation(&method) {
        let (parts, body) = request.into_parts();
        let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(err) => {
                let report = ErrorReport::new(PorterError::BadRequest(format!(
                    "could not read request body: {}",
                    err
                )))
                .with_request_id(request_id.clone());
                return guard.reject(&report);
            },
        };
        let checked = serde_json::from_slice::<Value>(&bytes)
            .map_err(|err| PorterError::BadRequest(format!("request body is not valid JSON: {}", err)))
            .and_then(|payload| guard.contracts.validate_request(&method, &payload));
        if let Err(error) = checked {
            let report = ErrorReport::new(error)
                .with_request_id(request_id.clone())
                .with_user_data(user_data_from_body(&bytes));
            return guard.reject(&report);
        }
        Request::from_parts(parts, Body::from(bytes))
    } else {
        request
    };

    let response = next.run(request).await;
    if !guard.contracts.validates_responses() {
        return response;
    }

    let status = response.status().as_u16();
    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let report = ErrorReport::new(PorterError::Internal(anyhow::anyhow!(
                "could not read response body: {}",
                err
            )))
            .with_request_id(request_id);
            return guard.reject(&report);
        },
    };
    // Non-JSON bodies have nothing to validate against.
    if let Ok(payload) = serde_json::from_slice::<Value>(&bytes) {
        if let Err(error) = guard.contracts.validate_response(&method, status, &payload) {
            let report = ErrorReport::new(error).with_request_id(request_id);
            return guard.reject(&report);
        }
    }
    Response::from_parts(parts, Body::from(bytes))
}
