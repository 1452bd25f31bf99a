//! A model bound to an endpoint, with its request-processing pipeline.

use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};

use crate::config::ResponseConfig;
use crate::contract::{Contract, Contracts, RequestBody, ResponseBody};
use crate::error::{ErrorReport, PorterError};
use crate::frame::Frame;
use crate::model::{Model, Processor};
use crate::response::{make_prediction_response, user_data_from_body, Response};
use crate::schema::{builtins, Required, Schema, SchemaKind};
use crate::types::{Meta, ModelContext, ServiceStatus, ID_KEY, RESERVED_META_KEYS};

pub const DEFAULT_ACTION: &str = "prediction";
pub const LIVENESS_MESSAGE: &str = "This endpoint is live. Send POST requests for predictions";

/// User check run over the parsed batch after the built-in column checks.
/// A failure is reported to the client as an invalid request.
pub type RequestCheck = dyn Fn(&Frame) -> anyhow::Result<()> + Send + Sync;

/// One inbound prediction request, already stripped of its transport.
#[derive(Debug, Clone, Copy)]
pub struct PredictionRequest<'a> {
    pub request_id: &'a str,
    pub body: &'a [u8],
}

impl<'a> PredictionRequest<'a> {
    pub fn new(request_id: &'a str, body: &'a [u8]) -> Self {
        Self { request_id, body }
    }
}

pub struct Service {
    id: String,
    name: String,
    api_version: String,
    endpoint: String,
    context: ModelContext,
    model: Arc<dyn Model>,
    preprocessors: Vec<Arc<dyn Processor>>,
    postprocessors: Vec<Arc<dyn Processor>>,
    additional_checks: Option<Arc<RequestCheck>>,
    feature_schema: Option<Schema>,
    feature_columns: Vec<String>,
    allow_nulls: bool,
    validate_request: bool,
    validate_response: bool,
    batch_prediction: bool,
    log_api_calls: bool,
    contracts: Contracts,
    status: RwLock<ServiceStatus>,
}

impl Service {
    pub fn builder(
        name: impl Into<String>,
        api_version: impl Into<String>,
        model: impl Model + 'static,
    ) -> ServiceBuilder {
        ServiceBuilder::new(name.into(), api_version.into(), Arc::new(model))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn meta(&self) -> &Meta {
        &self.context.model_meta
    }

    pub fn model_context(&self) -> &ModelContext {
        &self.context
    }

    pub fn contracts(&self) -> &Contracts {
        &self.contracts
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn is_batch(&self) -> bool {
        self.batch_prediction
    }

    pub fn allows_nulls(&self) -> bool {
        self.allow_nulls
    }

    pub fn validates_requests(&self) -> bool {
        self.validate_request
    }

    pub fn validates_responses(&self) -> bool {
        self.validate_response
    }

    pub fn status(&self) -> ServiceStatus {
        match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the status reported by health checks.
    pub fn set_status(&self, status: ServiceStatus) {
        match self.status.write() {
            Ok(mut current) => *current = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status().is_ready()
    }

    /// Answer to a GET on the prediction endpoint.
    pub fn liveness(&self) -> Response {
        Response::text(200, LIVENESS_MESSAGE)
    }

    /// Run the prediction pipeline over one request.
    ///
    /// Any failure comes back as a report carrying this service's model
    /// context, the request id and the raw payload, ready to be shaped.
    pub fn handle(
        &self,
        request: &PredictionRequest<'_>,
        config: &ResponseConfig,
    ) -> Result<Response, ErrorReport> {
        self.run_pipeline(request, config).map_err(|error| {
            ErrorReport::new(error)
                .with_context(self.context.clone())
                .with_request_id(request.request_id)
                .with_user_data(user_data_from_body(request.body))
        })
    }

    fn run_pipeline(
        &self,
        request: &PredictionRequest<'_>,
        config: &ResponseConfig,
    ) -> Result<Response, PorterError> {
        let payload = self.parse_payload(request.body)?;
        self.contracts.validate_request("POST", &payload)?;

        let records = into_records(payload)?;
        self.check_columns(&records)?;
        let frame = Frame::from_records(records)?;

        if let Some(check) = &self.additional_checks {
            check(&frame).map_err(|err| PorterError::InvalidRequest {
                message: format!("{:#}", err),
                fields: Vec::new(),
            })?;
        }

        let mut frame = match &self.feature_schema {
            Some(_) => frame.select(&self.feature_columns),
            None => frame,
        };
        for preprocessor in &self.preprocessors {
            frame = preprocessor
                .process(frame)
                .map_err(PorterError::Prediction)?;
        }

        let predictions = self.model.predict(&frame).map_err(PorterError::Prediction)?;
        if predictions.len() != frame.len() {
            return Err(PorterError::Prediction(anyhow::anyhow!(
                "model returned {} prediction(s) for {} record(s)",
                predictions.len(),
                frame.len()
            )));
        }

        let mut output = Frame::from_predictions(frame.into_iter().map(|row| row.id), predictions);
        for postprocessor in &self.postprocessors {
            output = postprocessor
                .process(output)
                .map_err(PorterError::Prediction)?;
        }
        let (ids, predictions) = output.into_predictions()?;
        if !self.batch_prediction && ids.len() != 1 {
            return Err(PorterError::Prediction(anyhow::anyhow!(
                "single-record service produced {} prediction(s)",
                ids.len()
            )));
        }

        let response = make_prediction_response(
            &self.context,
            request.request_id,
            ids,
            predictions,
            self.batch_prediction,
            config,
        );

        if let Some(body) = response.as_json() {
            self.contracts.validate_response("POST", response.status, body)?;
            if self.log_api_calls {
                tracing::info!(
                    event = "api_call",
                    request_id = request.request_id,
                    service_id = %self.id,
                    request_data = %String::from_utf8_lossy(request.body),
                    response_data = %body,
                    "api logging"
                );
            }
        }

        Ok(response)
    }

    fn parse_payload(&self, body: &[u8]) -> Result<Value, PorterError> {
        let payload: Value = serde_json::from_slice(body).map_err(|err| {
            PorterError::BadRequest(format!("request body is not valid JSON: {}", err))
        })?;
        match (self.batch_prediction, payload) {
            (true, Value::Array(items)) => Ok(Value::Array(items)),
            (true, Value::Object(record)) => Ok(Value::Array(vec![Value::Object(record)])),
            (false, Value::Object(record)) => Ok(Value::Object(record)),
            (true, _) => Err(PorterError::BadRequest(
                "expected a JSON object or an array of JSON objects".to_string(),
            )),
            (false, _) => Err(PorterError::BadRequest(
                "expected a single JSON object".to_string(),
            )),
        }
    }

    /// Column presence and null checks. Every violation across the batch is
    /// collected before failing.
    fn check_columns(&self, records: &[Map<String, Value>]) -> Result<(), PorterError> {
        let check_presence =
            self.feature_schema.is_none() && (self.validate_request || !self.allow_nulls);
        let check_nulls = !self.allow_nulls;
        if !check_presence && !check_nulls {
            return Ok(());
        }

        let mut missing: Vec<String> = Vec::new();
        let mut nulls: Vec<String> = Vec::new();
        for record in records {
            if check_presence {
                let required = std::iter::once(ID_KEY).chain(self.feature_columns.iter().map(String::as_str));
                for column in required {
                    if !record.contains_key(column) {
                        push_unique(&mut missing, column);
                    }
                }
            }
            if check_nulls {
                if self.feature_columns.is_empty() {
                    for (column, value) in record {
                        if value.is_null() {
                            push_unique(&mut nulls, column);
                        }
                    }
                } else {
                    for column in &self.feature_columns {
                        if record.get(column).is_some_and(Value::is_null) {
                            push_unique(&mut nulls, column);
                        }
                    }
                }
            }
        }

        if missing.is_empty() && nulls.is_empty() {
            Ok(())
        } else {
            Err(PorterError::column_violations(missing, nulls))
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("batch_prediction", &self.batch_prediction)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn push_unique(columns: &mut Vec<String>, column: &str) {
    if !columns.iter().any(|c| c == column) {
        columns.push(column.to_string());
    }
}

fn into_records(payload: Value) -> Result<Vec<Map<String, Value>>, PorterError> {
    let items = match payload {
        Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(record) => Ok(record),
            _ => Err(PorterError::BadRequest(format!(
                "record at index {} is not a JSON object",
                index
            ))),
        })
        .collect()
}

/// Configures a [`Service`]; nothing is checked until [`ServiceBuilder::build`].
pub struct ServiceBuilder {
    name: String,
    api_version: String,
    model: Arc<dyn Model>,
    id: Option<String>,
    endpoint: Option<String>,
    namespace: String,
    action: String,
    meta: Meta,
    preprocessors: Vec<Arc<dyn Processor>>,
    postprocessors: Vec<Arc<dyn Processor>>,
    additional_checks: Option<Arc<RequestCheck>>,
    feature_schema: Option<Schema>,
    prediction_schema: Option<Schema>,
    feature_names: Vec<String>,
    allow_nulls: bool,
    validate_request: bool,
    validate_response: bool,
    batch_prediction: bool,
    log_api_calls: bool,
    status: ServiceStatus,
}

impl ServiceBuilder {
    fn new(name: String, api_version: String, model: Arc<dyn Model>) -> Self {
        Self {
            name,
            api_version,
            model,
            id: None,
            endpoint: None,
            namespace: String::new(),
            action: DEFAULT_ACTION.to_string(),
            meta: Meta::new(),
            preprocessors: Vec::new(),
            postprocessors: Vec::new(),
            additional_checks: None,
            feature_schema: None,
            prediction_schema: None,
            feature_names: Vec::new(),
            allow_nulls: false,
            validate_request: false,
            validate_response: false,
            batch_prediction: true,
            log_api_calls: false,
            status: ServiceStatus::Ready,
        }
    }

    /// Explicit id. Defaults to the endpoint.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Explicit endpoint, overriding the derived
    /// `/{namespace}/{name}/{api_version}/{action}`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn metadata(mut self, meta: Meta) -> Self {
        self.meta.extend(meta);
        self
    }

    /// Append a preprocessor; they run in the order added.
    pub fn preprocessor(mut self, processor: impl Processor + 'static) -> Self {
        self.preprocessors.push(Arc::new(processor));
        self
    }

    pub fn postprocessor(mut self, processor: impl Processor + 'static) -> Self {
        self.postprocessors.push(Arc::new(processor));
        self
    }

    pub fn additional_checks<F>(mut self, check: F) -> Self
    where
        F: Fn(&Frame) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.additional_checks = Some(Arc::new(check));
        self
    }

    /// Object schema of one instance. Its properties become the feature
    /// columns handed to the model.
    pub fn feature_schema(mut self, schema: Schema) -> Self {
        self.feature_schema = Some(schema);
        self
    }

    pub fn prediction_schema(mut self, schema: Schema) -> Self {
        self.prediction_schema = Some(schema);
        self
    }

    /// Feature columns for services without a feature schema.
    pub fn feature_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_nulls(mut self, allow: bool) -> Self {
        self.allow_nulls = allow;
        self
    }

    pub fn validate_request(mut self, validate: bool) -> Self {
        self.validate_request = validate;
        self
    }

    /// Validate every success body against the documented response schema.
    /// Development only.
    pub fn validate_response(mut self, validate: bool) -> Self {
        self.validate_response = validate;
        self
    }

    pub fn batch_prediction(mut self, batch: bool) -> Self {
        self.batch_prediction = batch;
        self
    }

    pub fn log_api_calls(mut self, log: bool) -> Self {
        self.log_api_calls = log;
        self
    }

    pub fn status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn build(self) -> Result<Service, PorterError> {
        if self.name.trim().is_empty() {
            return Err(PorterError::Configuration(
                "service name must not be empty".to_string(),
            ));
        }
        if self.api_version.trim().is_empty() {
            return Err(PorterError::Configuration(format!(
                "service '{}' has an empty api_version",
                self.name
            )));
        }
        if let Some(key) = self
            .meta
            .keys()
            .find(|key| RESERVED_META_KEYS.contains(&key.as_str()))
        {
            return Err(PorterError::Configuration(format!(
                "service '{}' uses the reserved meta key '{}'",
                self.name, key
            )));
        }
        if let Some(schema) = &self.feature_schema {
            if !schema.is_object() {
                return Err(PorterError::Configuration(format!(
                    "feature schema of service '{}' must be an object, got {}",
                    self.name,
                    schema.kind().type_name()
                )));
            }
        }

        let endpoint = match self.endpoint.clone() {
            Some(endpoint) => endpoint,
            None => format!(
                "{}/{}/{}/{}",
                normalize_namespace(&self.namespace),
                self.name,
                self.api_version,
                self.action
            ),
        };
        check_endpoint(&endpoint)?;

        let feature_columns = match &self.feature_schema {
            Some(schema) => schema
                .properties()
                .iter()
                .map(|(name, _)| name.clone())
                .collect(),
            None => self.feature_names.clone(),
        };

        let contracts = self.contracts();
        let context = ModelContext {
            model_name: self.name.clone(),
            api_version: self.api_version.clone(),
            model_meta: self.meta,
        };

        Ok(Service {
            id: self.id.unwrap_or_else(|| endpoint.clone()),
            name: self.name,
            api_version: self.api_version,
            endpoint,
            context,
            model: self.model,
            preprocessors: self.preprocessors,
            postprocessors: self.postprocessors,
            additional_checks: self.additional_checks,
            feature_schema: self.feature_schema,
            feature_columns,
            allow_nulls: self.allow_nulls,
            validate_request: self.validate_request,
            validate_response: self.validate_response,
            batch_prediction: self.batch_prediction,
            log_api_calls: self.log_api_calls,
            contracts,
            status: RwLock::new(self.status),
        })
    }

    fn contracts(&self) -> Contracts {
        let mut post = Contract::new("POST")
            .validate_request(self.validate_request)
            .response(ResponseBody::new(200, self.response_schema()).describe("Model predictions"))
            .response(
                ResponseBody::new(400, builtins::model_context_error())
                    .describe("The request body could not be parsed"),
            )
            .response(
                ResponseBody::new(422, builtins::model_context_error())
                    .describe("The request data failed validation"),
            )
            .response(
                ResponseBody::new(500, builtins::model_context_error())
                    .describe("An error occurred during prediction"),
            )
            .tag(self.name.clone());
        if let Some(schema) = self.request_schema() {
            post = post.request(RequestBody::new(schema));
        }

        let get = Contract::new("GET")
            .response(ResponseBody::new(200, Schema::string()).describe(LIVENESS_MESSAGE))
            .tag(self.name.clone());

        Contracts::new()
            .with(post)
            .with(get)
            .validate_responses(self.validate_response)
    }

    /// Feature schema plus an integer `id`, wrapped in an array for batch
    /// services.
    fn request_schema(&self) -> Option<Schema> {
        let user = self.feature_schema.as_ref()?;

        let mut properties = vec![(
            ID_KEY.to_string(),
            Schema::integer().describe("An ID uniquely identifying each instance in the POST body."),
        )];
        properties.extend(user.properties().iter().cloned());

        let mut required = vec![ID_KEY.to_string()];
        required.extend(user.required_names());

        let mut instance = Schema::object(properties).required(Required::Only(required));
        if let SchemaKind::Object {
            additional_properties: Some(values),
            ..
        } = user.kind()
        {
            instance = instance.additional_properties((**values).clone());
        }
        for (key, value) in user.keywords() {
            instance = instance.keyword(key.clone(), value.clone());
        }
        if let Some(description) = user.description() {
            instance = instance.describe(description);
        }
        if let Some(name) = user.reference_name() {
            instance = instance.reference(name);
        }

        Some(if self.batch_prediction {
            Schema::array(instance)
        } else {
            instance
        })
    }

    fn response_schema(&self) -> Schema {
        let prediction = self
            .prediction_schema
            .clone()
            .unwrap_or_else(|| Schema::number().describe("Model prediction"));
        let entry = Schema::object([
            (
                ID_KEY,
                Schema::integer().describe("An ID uniquely identifying each instance in the POST body"),
            ),
            ("prediction", prediction),
        ])
        .describe("Model output");
        let predictions = if self.batch_prediction {
            Schema::array(entry)
        } else {
            entry
        };

        Schema::object([
            ("request_id", builtins::request_id()),
            ("model_name", Schema::string().describe("The name of the model.")),
            ("api_version", Schema::string().describe("The model API version.")),
            ("predictions", predictions),
        ])
        .required(Required::Only(vec![
            "model_name".to_string(),
            "api_version".to_string(),
            "predictions".to_string(),
        ]))
    }
}

fn normalize_namespace(namespace: &str) -> String {
    let trimmed = namespace.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn check_endpoint(endpoint: &str) -> Result<(), PorterError> {
    let malformed = !endpoint.starts_with('/')
        || (endpoint.len() > 1 && endpoint.ends_with('/'))
        || endpoint.contains("//")
        || endpoint.split('/').any(|segment| segment.starts_with(':'))
        || endpoint
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '*' | '?' | '#'));
    if malformed {
        Err(PorterError::Configuration(format!(
            "malformed endpoint '{}'",
            endpoint
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MockModel, MockProcessor};
    use anyhow::Result;
    use mockall::Sequence;
    use serde_json::json;

    fn lookup_model(frame: &Frame) -> Result<Vec<Value>> {
        frame
            .iter()
            .map(|row| {
                let feature1 = row
                    .get("feature1")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| anyhow::anyhow!("feature1 must be an integer"))?;
                let factor = match row.get("feature2").and_then(Value::as_str) {
                    Some("1") => 0,
                    Some("2") => 1,
                    other => anyhow::bail!("unknown feature2 {:?}", other),
                };
                Ok(json!(feature1 * factor))
            })
            .collect()
    }

    fn negate(frame: Frame) -> Result<Frame> {
        Ok(frame.map_column("prediction", |v| json!(-v.as_i64().unwrap_or(0))))
    }

    fn call(service: &Service, body: &str) -> Result<Response, ErrorReport> {
        service.handle(
            &PredictionRequest::new("123", body.as_bytes()),
            &ResponseConfig::default(),
        )
    }

    fn body(response: &Response) -> &Value {
        response.as_json().unwrap()
    }

    mod build {
        use super::*;

        #[test]
        fn derives_endpoint_and_id() {
            let service = Service::builder("a-model", "1.0", lookup_model).build().unwrap();
            assert_eq!(service.endpoint(), "/a-model/1.0/prediction");
            assert_eq!(service.id(), "/a-model/1.0/prediction");
        }

        #[test]
        fn namespace_and_action_shape_endpoint() {
            let service = Service::builder("a-model", "1.0", lookup_model)
                .namespace("team/")
                .action("score")
                .id("scorer")
                .build()
                .unwrap();
            assert_eq!(service.endpoint(), "/team/a-model/1.0/score");
            assert_eq!(service.id(), "scorer");
        }

        #[test]
        fn rejects_empty_name() {
            let err = Service::builder(" ", "1", lookup_model).build().unwrap_err();
            assert_eq!(err.name(), "ConfigurationError");
        }

        #[test]
        fn rejects_reserved_meta_keys() {
            let err = Service::builder("m", "1", lookup_model)
                .meta("predictions", "x")
                .build()
                .unwrap_err();
            assert!(err.to_string().contains("predictions"));
        }

        #[test]
        fn rejects_non_object_feature_schema() {
            let err = Service::builder("m", "1", lookup_model)
                .feature_schema(Schema::array(Schema::number()))
                .build()
                .unwrap_err();
            assert!(matches!(err, PorterError::Configuration(_)));
        }

        #[test]
        fn rejects_malformed_endpoint() {
            for endpoint in [
                "no-slash",
                "/trailing/",
                "/has space",
                "/{param}",
                "/a//b",
                "/models/:latest",
            ] {
                assert!(
                    Service::builder("m", "1", lookup_model)
                        .endpoint(endpoint)
                        .build()
                        .is_err(),
                    "{} should be rejected",
                    endpoint
                );
            }
        }

        #[test]
        fn rejects_colon_segment_from_name() {
            let err = Service::builder(":latest", "1", lookup_model)
                .build()
                .unwrap_err();
            assert_eq!(err.name(), "ConfigurationError");
        }

        #[test]
        fn request_schema_adds_integer_id() {
            let service = Service::builder("m", "1", lookup_model)
                .feature_schema(
                    Schema::object([("x", Schema::number())]).reference("Features"),
                )
                .build()
                .unwrap();
            let contract = service.contracts().get("POST").unwrap();
            let rendered = contract.request_body().unwrap().schema.to_inline();
            assert_eq!(rendered["type"], json!("array"));
            assert_eq!(rendered["items"]["properties"]["id"]["type"], json!("integer"));
            assert_eq!(rendered["items"]["required"], json!(["id", "x"]));
            assert_eq!(contract.tags(), ["m"]);
        }

        #[test]
        fn status_cell_is_mutable() {
            let service = Service::builder("m", "1", lookup_model).build().unwrap();
            assert!(service.is_ready());
            service.set_status(ServiceStatus::Error("loading".to_string()));
            assert_eq!(service.status().to_string(), "ERROR: loading");
        }
    }

    mod pipeline {
        use super::*;

        #[test]
        fn end_to_end_lookup_and_negate() {
            let service = Service::builder("a-model", "0.0.0", lookup_model)
                .postprocessor(negate)
                .build()
                .unwrap();
            let response = call(
                &service,
                r#"[{"id":1,"feature1":2,"feature2":"1"},{"id":2,"feature1":2,"feature2":"2"}]"#,
            )
            .unwrap();
            assert_eq!(
                body(&response),
                &json!({
                    "request_id": "123",
                    "model_name": "a-model",
                    "api_version": "0.0.0",
                    "predictions": [
                        {"id": 1, "prediction": 0},
                        {"id": 2, "prediction": -2}
                    ]
                })
            );
        }

        #[test]
        fn malformed_json_is_bad_request() {
            let service = Service::builder("m", "1", lookup_model).build().unwrap();
            let report = call(&service, "{not json").unwrap_err();
            assert_eq!(report.error.status_code(), 400);
            assert_eq!(report.request_id.as_deref(), Some("123"));
            assert_eq!(report.user_data, Some(json!("{not json")));
            assert_eq!(report.context.unwrap().model_name, "m");
        }

        #[test]
        fn missing_id_is_invalid_request() {
            let service = Service::builder("m", "1", lookup_model)
                .allow_nulls(true)
                .build()
                .unwrap();
            let report = call(&service, r#"[{"feature1": 1, "feature2": "1"}]"#).unwrap_err();
            assert_eq!(report.error.status_code(), 422);
            assert_eq!(report.error.fields(), ["id"]);
        }

        #[test]
        fn batch_service_accepts_single_object() {
            let service = Service::builder("m", "1", lookup_model).build().unwrap();
            let response = call(&service, r#"{"id": 5, "feature1": 3, "feature2": "2"}"#).unwrap();
            assert_eq!(body(&response)["predictions"], json!([{"id": 5, "prediction": 3}]));
        }

        #[test]
        fn single_service_returns_object() {
            let service = Service::builder("m", "1", lookup_model)
                .batch_prediction(false)
                .build()
                .unwrap();
            let response = call(&service, r#"{"id": 5, "feature1": 3, "feature2": "2"}"#).unwrap();
            assert_eq!(body(&response)["predictions"], json!({"id": 5, "prediction": 3}));

            let report = call(&service, r#"[{"id": 5}]"#).unwrap_err();
            assert_eq!(report.error.status_code(), 400);
        }

        #[test]
        fn single_service_fails_when_postprocessor_drops_the_row() {
            let service = Service::builder("m", "1", lookup_model)
                .batch_prediction(false)
                .postprocessor(|_: Frame| -> Result<Frame> { Ok(Frame::new(Vec::new())) })
                .build()
                .unwrap();
            let report = call(&service, r#"{"id": 5, "feature1": 3, "feature2": "2"}"#).unwrap_err();
            assert_eq!(report.error.name(), "PredictionError");
            assert_eq!(report.error.status_code(), 500);
        }

        #[test]
        fn non_object_records_are_rejected() {
            let service = Service::builder("m", "1", lookup_model).build().unwrap();
            let report = call(&service, r#"[{"id": 1}, 2]"#).unwrap_err();
            assert_eq!(report.error.name(), "BadRequest");
        }

        #[test]
        fn column_violations_are_collected() {
            let service = Service::builder("m", "1", lookup_model)
                .feature_names(["feature1", "feature2", "feature3"])
                .validate_request(true)
                .build()
                .unwrap();
            let report = call(
                &service,
                r#"[
                    {"id": 1, "feature1": 1, "feature3": null},
                    {"id": 2, "feature3": 4}
                ]"#,
            )
            .unwrap_err();
            assert_eq!(report.error.status_code(), 422);
            let mut fields = report.error.fields().to_vec();
            fields.sort();
            assert_eq!(fields, ["feature1", "feature2", "feature3"]);
        }

        #[test]
        fn nulls_pass_when_allowed() {
            let service = Service::builder("m", "1", |frame: &Frame| -> Result<Vec<Value>> {
                Ok(vec![json!(0); frame.len()])
            })
            .feature_names(["a"])
            .allow_nulls(true)
            .build()
            .unwrap();
            assert!(call(&service, r#"[{"id": 1, "a": null}]"#).is_ok());
        }

        #[test]
        fn schema_validation_runs_before_the_model() {
            let mut model = MockModel::new();
            model.expect_predict().never();
            let service = Service::builder("m", "1", model)
                .feature_schema(Schema::object([("x", Schema::number())]))
                .validate_request(true)
                .build()
                .unwrap();
            let report = call(&service, r#"[{"id": 1, "x": "text"}]"#).unwrap_err();
            assert_eq!(report.error.name(), "InvalidRequest");
            assert!(report.error.fields().contains(&"/0/x".to_string()));
        }

        #[test]
        fn feature_schema_selects_columns() {
            let service = Service::builder("m", "1", |frame: &Frame| -> Result<Vec<Value>> {
                Ok(frame
                    .iter()
                    .map(|row| json!(row.values.keys().cloned().collect::<Vec<_>>()))
                    .collect())
            })
            .feature_schema(Schema::object([("x", Schema::number())]))
            .build()
            .unwrap();
            let response = call(&service, r#"[{"id": 1, "x": 1, "extra": 2}]"#).unwrap();
            assert_eq!(body(&response)["predictions"][0]["prediction"], json!(["x"]));
        }

        #[test]
        fn predict_runs_once_per_batch() {
            let mut model = MockModel::new();
            model
                .expect_predict()
                .times(1)
                .returning(|frame| Ok(vec![json!(1); frame.len()]));
            let service = Service::builder("m", "1", model).build().unwrap();
            let response = call(&service, r#"[{"id": 1}, {"id": 2}, {"id": 3}]"#).unwrap();
            assert_eq!(body(&response)["predictions"].as_array().unwrap().len(), 3);
        }

        #[test]
        fn processors_run_in_order() {
            let mut seq = Sequence::new();
            let mut first = MockProcessor::new();
            first
                .expect_process()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|frame| Ok(frame.map_column("x", |v| json!(v.as_i64().unwrap_or(0) + 1))));
            let mut second = MockProcessor::new();
            second
                .expect_process()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|frame| Ok(frame.map_column("x", |v| json!(v.as_i64().unwrap_or(0) * 10))));

            let service = Service::builder("m", "1", |frame: &Frame| -> Result<Vec<Value>> {
                Ok(frame.column("x").map(|v| v.cloned().unwrap_or(Value::Null)).collect())
            })
            .preprocessor(first)
            .preprocessor(second)
            .build()
            .unwrap();
            let response = call(&service, r#"[{"id": 1, "x": 1}]"#).unwrap();
            assert_eq!(body(&response)["predictions"][0]["prediction"], json!(20));
        }

        #[test]
        fn reordering_keeps_id_correlation() {
            let service = Service::builder("m", "1", |frame: &Frame| -> Result<Vec<Value>> {
                Ok(frame.column("x").map(|v| v.cloned().unwrap_or(Value::Null)).collect())
            })
            .preprocessor(|mut frame: Frame| -> Result<Frame> {
                frame.rows_mut().reverse();
                Ok(frame)
            })
            .postprocessor(|mut frame: Frame| -> Result<Frame> {
                frame.rows_mut().rotate_left(1);
                Ok(frame)
            })
            .build()
            .unwrap();
            let response = call(
                &service,
                r#"[{"id": "a", "x": 1}, {"id": "b", "x": 2}, {"id": "c", "x": 3}]"#,
            )
            .unwrap();
            let mut pairs: Vec<(String, i64)> = body(&response)["predictions"]
                .as_array()
                .unwrap()
                .iter()
                .map(|p| {
                    (
                        p["id"].as_str().unwrap().to_string(),
                        p["prediction"].as_i64().unwrap(),
                    )
                })
                .collect();
            pairs.sort();
            assert_eq!(
                pairs,
                [("a".to_string(), 1), ("b".to_string(), 2), ("c".to_string(), 3)]
            );
        }

        #[test]
        fn model_failure_is_prediction_error_with_cause() {
            let service = Service::builder("m", "1", |_: &Frame| -> Result<Vec<Value>> {
                anyhow::bail!("weights not loaded")
            })
            .build()
            .unwrap();
            let report = call(&service, r#"[{"id": 1}]"#).unwrap_err();
            assert_eq!(report.error.status_code(), 500);
            assert_eq!(report.error.name(), "PredictionError");
            assert!(report.error.traceback().contains("weights not loaded"));
        }

        #[test]
        fn prediction_count_must_match_rows() {
            let service = Service::builder("m", "1", |_: &Frame| -> Result<Vec<Value>> {
                Ok(vec![json!(1)])
            })
            .build()
            .unwrap();
            let report = call(&service, r#"[{"id": 1}, {"id": 2}]"#).unwrap_err();
            assert_eq!(report.error.name(), "PredictionError");
        }

        #[test]
        fn additional_checks_reject_requests() {
            let service = Service::builder("m", "1", lookup_model)
                .allow_nulls(true)
                .additional_checks(|frame: &Frame| {
                    if frame.len() > 1 {
                        anyhow::bail!("one record at a time");
                    }
                    Ok(())
                })
                .build()
                .unwrap();
            let report = call(&service, r#"[{"id": 1}, {"id": 2}]"#).unwrap_err();
            assert_eq!(report.error.status_code(), 422);
            assert_eq!(report.error.messages(), ["one record at a time"]);
        }

        #[test]
        fn response_validation_catches_bad_predictions() {
            let service = Service::builder("m", "1", |frame: &Frame| -> Result<Vec<Value>> {
                Ok(vec![json!("not a number"); frame.len()])
            })
            .validate_response(true)
            .build()
            .unwrap();
            let report = call(&service, r#"[{"id": 1}]"#).unwrap_err();
            assert_eq!(report.error.name(), "SchemaValidationError");
        }

        #[test]
        fn meta_is_flattened_into_envelope() {
            let service = Service::builder("m", "1", lookup_model)
                .meta("owner", "ds")
                .build()
                .unwrap();
            let response = call(&service, r#"[{"id": 1, "feature1": 1, "feature2": "1"}]"#).unwrap();
            assert_eq!(body(&response)["owner"], json!("ds"));
        }

        #[test]
        fn get_returns_liveness_text() {
            let service = Service::builder("m", "1", lookup_model).build().unwrap();
            assert_eq!(
                service.liveness(),
                Response::text(200, "This endpoint is live. Send POST requests for predictions")
            );
        }
    }
}
