use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use porter::app::ROOT_MESSAGE;
use porter::docs::make_docs_html;
use porter::types::{LIVENESS_ENDPOINT, READINESS_ENDPOINT};
use porter::{ErrorReport, ModelApp, Payload, PorterError, PredictionRequest, Service};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::REQUEST_ID_HEADER;

/// Request id from the `x-request-id` header, or a fresh UUID v4 in hex.
pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
}

pub(crate) fn into_http(response: porter::Response) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match response.payload {
        Payload::Json(body) => (status, Json(body)).into_response(),
        Payload::Text(text) => (status, text).into_response(),
    }
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn predict(
    state: AppState,
    service: Arc<Service>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers);
    let response = state
        .app
        .predict(&service, &PredictionRequest::new(&request_id, &body));
    with_request_id(into_http(response), &request_id)
}

async fn alive(State(state): State<AppState>) -> Response {
    into_http(state.app.alive_response())
}

async fn ready(State(state): State<AppState>) -> Response {
    into_http(state.app.ready_response())
}

async fn root(State(state): State<AppState>) -> Response {
    let config = state.app.config();
    if config.expose_docs {
        Redirect::to(&config.docs_url).into_response()
    } else {
        ROOT_MESSAGE.into_response()
    }
}

async fn docs_json(State(state): State<AppState>) -> Response {
    match &state.docs {
        Some(docs) => Json(docs.as_ref().clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn docs_html(State(state): State<AppState>) -> Html<String> {
    Html(make_docs_html(&state.app.config().docs_json_url))
}

async fn not_found(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    let report = ErrorReport::new(PorterError::NotFound(uri.path().to_string()))
        .with_request_id(request_id(&headers));
    into_http(state.app.error_response(&report))
}

async fn method_not_allowed(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let report = ErrorReport::new(PorterError::MethodNotAllowed {
        method: method.to_string(),
        path: uri.path().to_string(),
    })
    .with_request_id(request_id(&headers));
    into_http(state.app.error_response(&report))
}

/// Router over every service of `app` plus the health, root and docs
/// routes. Fails when the API document cannot be rendered.
pub fn build_router(app: Arc<ModelApp>, support_response_gzip: bool) -> Result<Router, PorterError> {
    let state = AppState::new(app)?;

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::CONTENT_ENCODING,
            header::HeaderName::from_static(REQUEST_ID_HEADER),
        ]);

    let mut router: Router<AppState> = Router::new();
    for service in state.app.services() {
        let target = Arc::clone(service);
        let live = Arc::clone(service);
        let route = post(
            move |State(state): State<AppState>, headers: HeaderMap, body: Bytes| {
                predict(state, target, headers, body)
            },
        )
        .get(move || async move { into_http(live.liveness()) })
        .fallback(method_not_allowed);
        router = router.route(service.endpoint(), route);
    }

    router = router
        .route(LIVENESS_ENDPOINT, get(alive).fallback(method_not_allowed))
        .route(READINESS_ENDPOINT, get(ready).fallback(method_not_allowed))
        .route("/", get(root).fallback(method_not_allowed));

    if state.docs.is_some() {
        let config = state.app.config();
        router = router
            .route(
                &config.docs_json_url,
                get(docs_json).fallback(method_not_allowed),
            )
            .route(&config.docs_url, get(docs_html).fallback(method_not_allowed));
    }

    let mut router = router
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    if support_response_gzip {
        router = router
            .layer(CompressionLayer::new())
            .layer(RequestDecompressionLayer::new());
    }

    Ok(router.with_state(state))
}
