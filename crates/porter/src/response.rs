//! Canonical prediction and error envelopes.

use serde_json::{Map, Value};

use crate::config::ResponseConfig;
use crate::error::ErrorReport;
use crate::types::{
    ModelContext, API_VERSION_KEY, ID_KEY, MODEL_NAME_KEY, PREDICTIONS_KEY, PREDICTION_KEY,
    REQUEST_ID_KEY,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

/// Transport-independent response: a status code and a body.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub payload: Payload,
}

impl Response {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            payload: Payload::Json(body),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            payload: Payload::Text(body.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }
}

fn prediction_entry(id: Value, prediction: Value) -> Value {
    let mut entry = Map::new();
    entry.insert(ID_KEY.to_string(), id);
    entry.insert(PREDICTION_KEY.to_string(), prediction);
    Value::Object(entry)
}

/// Build the success envelope.
///
/// Batch services get a list under `predictions`; single-record services get
/// the one `{id, prediction}` object. Service metadata is flattened into the
/// top level between the model context and the predictions.
pub fn make_prediction_response(
    context: &ModelContext,
    request_id: &str,
    ids: Vec<Value>,
    predictions: Vec<Value>,
    batch: bool,
    config: &ResponseConfig,
) -> Response {
    let mut body = Map::new();
    if config.return_request_id_with_prediction {
        body.insert(
            REQUEST_ID_KEY.to_string(),
            Value::String(request_id.to_string()),
        );
    }
    body.insert(
        MODEL_NAME_KEY.to_string(),
        Value::String(context.model_name.clone()),
    );
    body.insert(
        API_VERSION_KEY.to_string(),
        Value::String(context.api_version.clone()),
    );
    for (key, value) in &context.model_meta {
        body.insert(key.clone(), Value::String(value.clone()));
    }

    let mut pairs = ids
        .into_iter()
        .zip(predictions)
        .map(|(id, prediction)| prediction_entry(id, prediction));
    let predictions = if batch {
        Value::Array(pairs.collect())
    } else {
        pairs.next().unwrap_or(Value::Null)
    };
    body.insert(PREDICTIONS_KEY.to_string(), predictions);

    Response::json(200, Value::Object(body))
}

/// Build the error envelope for `report`, disclosing only what `config`
/// allows.
pub fn make_error_response(report: &ErrorReport, config: &ResponseConfig) -> Response {
    let error = &report.error;
    let mut body = Map::new();

    if config.return_request_id_on_error {
        if let Some(request_id) = &report.request_id {
            body.insert(
                REQUEST_ID_KEY.to_string(),
                Value::String(request_id.clone()),
            );
        }
    }

    let mut error_body = Map::new();
    error_body.insert("name".to_string(), Value::String(error.name().to_string()));
    if config.return_message_on_error {
        error_body.insert(
            "messages".to_string(),
            Value::Array(error.messages().into_iter().map(Value::String).collect()),
        );
    }
    if config.return_traceback_on_error {
        error_body.insert("traceback".to_string(), Value::String(error.traceback()));
    }
    if config.return_user_data_on_error {
        if let Some(user_data) = &report.user_data {
            error_body.insert("user_data".to_string(), user_data.clone());
        }
    }
    body.insert("error".to_string(), Value::Object(error_body));

    if config.return_model_context_on_error {
        if let Some(context) = &report.context {
            let context = serde_json::to_value(context).unwrap_or(Value::Null);
            body.insert("model_context".to_string(), context);
        }
    }

    Response::json(error.status_code(), Value::Object(body))
}

/// The request payload as it should be echoed back: parsed JSON when it is
/// JSON, the raw text otherwise, `null` when empty.
pub fn user_data_from_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}
