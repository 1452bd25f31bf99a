use anyhow::Result;
use porter::schema::builtins;
use porter::{
    AppConfig, Frame, ModelApp, PredictionRequest, Required, ResponseConfig, Schema, Service,
    ServiceStatus,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

// -- Helpers --

fn lookup_model(frame: &Frame) -> Result<Vec<Value>> {
    frame
        .iter()
        .map(|row| {
            let feature1 = row.get("feature1").and_then(Value::as_i64).unwrap_or(0);
            let factor = match row.get("feature2").and_then(Value::as_str) {
                Some("1") => 0,
                Some("2") => 1,
                other => anyhow::bail!("no lookup entry for {:?}", other),
            };
            Ok(json!(feature1 * factor))
        })
        .collect()
}

fn negate(frame: Frame) -> Result<Frame> {
    Ok(frame.map_column("prediction", |v| json!(-v.as_i64().unwrap_or(0))))
}

fn double_x(frame: &Frame) -> Result<Vec<Value>> {
    Ok(frame
        .column("x")
        .map(|v| json!(v.and_then(Value::as_i64).unwrap_or(0) * 2))
        .collect())
}

fn post(app: &ModelApp, service: &Service, request_id: &str, body: &Value) -> (u16, Value) {
    let bytes = serde_json::to_vec(body).unwrap();
    let response = app.predict(service, &PredictionRequest::new(request_id, &bytes));
    (response.status, response.as_json().cloned().unwrap_or(Value::Null))
}

fn a_model_app(responses: ResponseConfig) -> ModelApp {
    let service = Service::builder("a-model", "0.0.0", lookup_model)
        .postprocessor(negate)
        .build()
        .unwrap();
    ModelApp::from_services(AppConfig::default(), [service])
        .unwrap()
        .with_response_config(responses)
}

// -- Tests --

#[test]
fn end_to_end_scenario() {
    let app = a_model_app(ResponseConfig {
        return_request_id_with_prediction: false,
        ..ResponseConfig::default()
    });
    let service = app.service("/a-model/0.0.0/prediction").unwrap().clone();
    let (status, body) = post(
        &app,
        &service,
        "abc",
        &json!([
            {"id": 1, "feature1": 2, "feature2": "1"},
            {"id": 2, "feature1": 2, "feature2": "2"}
        ]),
    );
    assert_eq!(status, 200);
    assert_eq!(
        serde_json::to_string(&body).unwrap(),
        r#"{"model_name":"a-model","api_version":"0.0.0","predictions":[{"id":1,"prediction":0},{"id":2,"prediction":-2}]}"#
    );
}

#[test]
fn end_to_end_scenario_with_request_id() {
    let app = a_model_app(ResponseConfig::default());
    let service = app.services()[0].clone();
    let (_, body) = post(
        &app,
        &service,
        "abc",
        &json!([{"id": 1, "feature1": 2, "feature2": "1"}]),
    );
    assert_eq!(body["request_id"], json!("abc"));
}

#[test]
fn id_correlation_survives_reordering() {
    let reversed = Service::builder("reversed", "1", double_x)
        .preprocessor(|mut frame: Frame| -> Result<Frame> {
            frame.rows_mut().reverse();
            Ok(frame)
        })
        .postprocessor(|mut frame: Frame| -> Result<Frame> {
            frame.rows_mut().sort_by_key(|row| row.id.as_i64().unwrap_or(0) % 3);
            Ok(frame)
        })
        .build()
        .unwrap();
    let app = ModelApp::from_services(AppConfig::default(), [reversed]).unwrap();
    let service = app.services()[0].clone();

    let records: Vec<Value> = (0..10).map(|i| json!({"id": i, "x": i * 10})).collect();
    let (status, body) = post(&app, &service, "r", &Value::Array(records));
    assert_eq!(status, 200);

    let mut pairs: Vec<(i64, i64)> = body["predictions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| (p["id"].as_i64().unwrap(), p["prediction"].as_i64().unwrap()))
        .collect();
    pairs.sort();
    let expected: Vec<(i64, i64)> = (0..10).map(|i| (i, i * 20)).collect();
    assert_eq!(pairs, expected);
}

#[test]
fn duplicate_ids_leave_no_app() {
    let first = Service::builder("a-model", "1", double_x).build().unwrap();
    let second = Service::builder("a-model", "1", double_x).build().unwrap();
    let result = ModelApp::from_services(AppConfig::default(), [first, second]);
    let err = result.unwrap_err();
    assert_eq!(err.name(), "ConfigurationError");
}

#[test]
fn missing_and_null_fields_are_all_named() {
    let service = Service::builder("m", "1", double_x)
        .feature_names(["feature1", "feature2", "feature3"])
        .validate_request(true)
        .build()
        .unwrap();
    let app = ModelApp::from_services(AppConfig::default(), [service]).unwrap();
    let service = app.services()[0].clone();

    let (status, body) = post(
        &app,
        &service,
        "r",
        &json!([
            {"id": 1, "feature1": 1, "feature2": 2, "feature3": 3},
            {"id": 2, "feature3": null}
        ]),
    );
    assert_eq!(status, 422);
    assert_eq!(body["error"]["name"], json!("InvalidRequest"));
    let message = body["error"]["messages"][0].as_str().unwrap();
    for field in ["feature1", "feature2", "feature3"] {
        assert!(message.contains(field), "{} not named in {}", field, message);
    }
}

#[test]
fn readiness_aggregates_service_status() {
    let empty = ModelApp::new(AppConfig::default());
    assert_eq!(empty.ready_response().status, 503);

    let app = ModelApp::from_services(
        AppConfig::default(),
        [
            Service::builder("a", "1", double_x).build().unwrap(),
            Service::builder("b", "1", double_x).build().unwrap(),
        ],
    )
    .unwrap();
    assert_eq!(app.ready_response().status, 200);

    app.service("/b/1/prediction")
        .unwrap()
        .set_status(ServiceStatus::Error("model file missing".to_string()));
    let response = app.ready_response();
    assert_eq!(response.status, 503);
    assert_eq!(
        response.as_json().unwrap()["services"]["/b/1/prediction"]["status"],
        json!("ERROR: model file missing")
    );
    assert_eq!(app.alive_response().status, 200);
}

#[test]
fn error_toggles_off_return_only_the_name() {
    let app = a_model_app(ResponseConfig::minimal());
    let service = app.services()[0].clone();
    let (status, body) = post(&app, &service, "123", &json!([{"id": 1, "feature2": "9"}]));
    assert_eq!(status, 500);
    assert_eq!(body, json!({"error": {"name": "PredictionError"}}));
}

#[test]
fn error_toggles_on_disclose_everything() {
    let app = a_model_app(ResponseConfig::verbose());
    let service = app.services()[0].clone();
    let payload = json!([{"id": 1, "feature2": "9"}]);
    let (status, body) = post(&app, &service, "123", &payload);
    assert_eq!(status, 500);
    assert_eq!(body["request_id"], json!("123"));
    assert_eq!(body["error"]["name"], json!("PredictionError"));
    assert!(body["error"]["messages"].is_array());
    assert!(body["error"]["traceback"]
        .as_str()
        .unwrap()
        .contains("no lookup entry"));
    assert_eq!(body["error"]["user_data"], payload);
    assert_eq!(
        body["model_context"],
        json!({"model_name": "a-model", "api_version": "0.0.0", "model_meta": {}})
    );
    assert!(builtins::model_context_error().validate(&body).is_ok());
}

#[test]
fn shared_sub_schema_renders_once() {
    let address = Schema::object([("street", Schema::string()), ("city", Schema::string())])
        .reference("Address");
    let person = Schema::object([("home", address.clone()), ("work", address)])
        .required(Required::Only(vec!["home".to_string()]));

    let (document, definitions) = person.to_document().unwrap();
    assert_eq!(definitions.len(), 1);
    assert_eq!(document["properties"]["home"], json!({"$ref": "#/definitions/Address"}));
    assert_eq!(document["properties"]["work"], json!({"$ref": "#/definitions/Address"}));

    let again = person.to_document().unwrap();
    assert_eq!(
        serde_json::to_vec(&(document, definitions)).unwrap(),
        serde_json::to_vec(&again).unwrap()
    );
}

#[test]
fn validated_service_rejects_bad_types_before_predicting() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let service = Service::builder("typed", "1", move |frame: &Frame| -> Result<Vec<Value>> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(vec![json!(1.0); frame.len()])
    })
    .feature_schema(Schema::object([
        ("age", Schema::integer().keyword("minimum", json!(0))),
        ("name", Schema::string()),
    ]))
    .validate_request(true)
    .build()
    .unwrap();
    let app = ModelApp::from_services(AppConfig::default(), [service]).unwrap();
    let service = app.services()[0].clone();

    let (status, _) = post(&app, &service, "r", &json!([{"id": 1, "age": -3, "name": "x"}]));
    assert_eq!(status, 422);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let (status, _) = post(&app, &service, "r", &json!([{"id": 1, "age": 30, "name": "x"}]));
    assert_eq!(status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn one_service_failing_does_not_affect_another() {
    let broken = Service::builder("broken", "1", |_: &Frame| -> Result<Vec<Value>> {
        anyhow::bail!("always fails")
    })
    .build()
    .unwrap();
    let healthy = Service::builder("healthy", "1", double_x).build().unwrap();
    let app = ModelApp::from_services(AppConfig::default(), [broken, healthy]).unwrap();

    let broken = app.service("/broken/1/prediction").unwrap().clone();
    let healthy = app.service("/healthy/1/prediction").unwrap().clone();
    assert_eq!(post(&app, &broken, "r", &json!([{"id": 1}])).0, 500);
    let (status, body) = post(&app, &healthy, "r", &json!([{"id": 1, "x": 4}]));
    assert_eq!(status, 200);
    assert_eq!(body["predictions"], json!([{"id": 1, "prediction": 8}]));
}

#[test]
fn concurrent_requests_share_one_app() {
    let app = Arc::new(a_model_app(ResponseConfig::default()));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let app = Arc::clone(&app);
            thread::spawn(move || {
                let service = app.services()[0].clone();
                let request_id = format!("req-{}", i);
                let (status, body) = post(
                    &app,
                    &service,
                    &request_id,
                    &json!([{"id": i, "feature1": i, "feature2": "2"}]),
                );
                assert_eq!(status, 200);
                assert_eq!(body["request_id"], json!(request_id));
                assert_eq!(body["predictions"], json!([{"id": i, "prediction": -i}]));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn openapi_document_lists_every_service() {
    let app = ModelApp::from_services(
        AppConfig {
            name: "docs-app".to_string(),
            expose_docs: true,
            ..AppConfig::default()
        },
        [
            Service::builder("a", "1", double_x)
                .feature_schema(Schema::object([("x", Schema::integer())]).reference("XFeatures"))
                .build()
                .unwrap(),
            Service::builder("b", "2", double_x).build().unwrap(),
        ],
    )
    .unwrap();
    let doc = app.openapi().unwrap();
    assert_eq!(doc["openapi"], json!("3.0.1"));
    assert!(doc["paths"]["/a/1/prediction"]["post"]["requestBody"].is_object());
    assert!(doc["paths"]["/b/2/prediction"]["post"].get("requestBody").is_none());
    assert!(doc["components"]["schemas"]["XFeatures"].is_object());
    assert!(doc["components"]["schemas"]["HealthCheck"].is_object());
}
