//! Serve a single lookup model.
//!
//! ```sh
//! cargo run -p porter-server --example getting_started
//! curl -s localhost:8000/a-model/0.0.0/prediction \
//!     -d '[{"id": 1, "feature1": 2, "feature2": "1"}, {"id": 2, "feature1": 2, "feature2": "2"}]'
//! ```
//!
//! Settings come from the TOML file named by `PORTER_CONFIG`
//! and `PORTER_*` environment variables.

use anyhow::Result;
use porter::{ConfigLoader, Frame, ModelApp, Schema, Service};
use serde_json::{json, Value};

/// `feature1` times a factor looked up by `feature2`.
fn lookup(frame: &Frame) -> Result<Vec<Value>> {
    frame
        .iter()
        .map(|row| {
            let feature1 = row
                .get("feature1")
                .and_then(Value::as_f64)
                .ok_or_else(|| anyhow::anyhow!("feature1 must be a number"))?;
            let factor = match row.get("feature2").and_then(Value::as_str) {
                Some("1") => 0.0,
                Some("2") => 1.0,
                other => anyhow::bail!("unknown feature2 value {:?}", other),
            };
            Ok(json!(feature1 * factor))
        })
        .collect()
}

fn negate(frame: Frame) -> Result<Frame> {
    Ok(frame.map_column("prediction", |v| json!(-v.as_f64().unwrap_or(0.0))))
}

#[tokio::main]
async fn main() -> Result<()> {
    porter_server::init_tracing();

    let config = ConfigLoader::from_env().load()?;

    let features = Schema::object([
        ("feature1", Schema::number().describe("Base value")),
        ("feature2", Schema::string().describe("Lookup key, \"1\" or \"2\"")),
    ]);

    let service = Service::builder("a-model", "0.0.0", lookup)
        .feature_schema(features)
        .prediction_schema(Schema::number())
        .validate_request(true)
        .postprocessor(negate)
        .meta("owner", "data-science")
        .build()?;

    let mut app = ModelApp::from_config(&config);
    app.register(service)?;

    porter_server::serve(app, &config).await
}
