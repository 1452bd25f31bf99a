//! A hand-written route with a validated, documented contract served next to
//! a registered model.
//!
//! ```sh
//! cargo run -p porter-server --example contracts
//! curl -s localhost:8000/geo/distance -H 'content-type: application/json' -d '{"from": {"lat": 0, "lon": 0}, "to": {"lat": 3, "lon": 4}}'
//! open http://localhost:8000/docs/
//! ```

use anyhow::Result;
use axum::{routing::post, Json, Router};
use porter::{
    ConfigLoader, Contract, Contracts, Frame, ModelApp, RequestBody, ResponseBody, Schema, Service,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn point() -> Schema {
    Schema::object([("lat", Schema::number()), ("lon", Schema::number())])
        .describe("A coordinate pair")
        .reference("Point")
}

fn distance_contracts() -> Contracts {
    let request = Schema::object([("from", point()), ("to", point())]);
    let response = Schema::object([("distance", Schema::number())]);
    Contracts::new()
        .with(
            Contract::new("POST")
                .request(RequestBody::new(request).describe("Two points"))
                .response(ResponseBody::new(200, response).describe("Euclidean distance"))
                .validate_request(true)
                .tag("Geometry"),
        )
        .validate_responses(true)
}

async fn distance(Json(body): Json<Value>) -> Json<Value> {
    let coord = |point: &str, axis: &str| body[point][axis].as_f64().unwrap_or(0.0);
    let dlat = coord("to", "lat") - coord("from", "lat");
    let dlon = coord("to", "lon") - coord("from", "lon");
    Json(json!({ "distance": dlat.hypot(dlon) }))
}

#[tokio::main]
async fn main() -> Result<()> {
    porter_server::init_tracing();

    let mut config = ConfigLoader::from_env().load()?;
    config.app.expose_docs = true;
    let mut app = ModelApp::from_config(&config);

    let nearest = Service::builder("nearest-city", "1", |frame: &Frame| -> Result<Vec<Value>> {
        Ok(frame.iter().map(|_| json!("Null Island")).collect())
    })
    .feature_schema(Schema::object([("location", point())]))
    .build()?;
    app.register(nearest)?;
    app.document_route("/geo/distance", distance_contracts())?;

    let geo = attach(Router::new().route("/geo/distance", post(distance)), &app);
    let router = porter_server::build_router(Arc::new(app), config.support_response_gzip)?.merge(geo);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!("Starting server on {}", config.bind);
    axum::serve(listener, router).await?;
    Ok(())
}

fn attach(router: Router, app: &ModelApp) -> Router {
    porter_server::attach_contracts(router, distance_contracts(), app.response_config().clone())
}
