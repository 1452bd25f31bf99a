//! Method-level API contracts: what a route accepts and what it returns.
//!
//! Contracts feed two consumers. The request pipeline (or the server's
//! contract middleware) validates bodies against them, and the OpenAPI
//! document is rendered from them.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::error::PorterError;
use crate::schema::{Definitions, Schema};

/// JSON request body accepted by a route.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    pub schema: Schema,
    pub description: Option<String>,
}

impl RequestBody {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn render(&self, defs: &mut Definitions) -> Value {
        let mut out = Map::new();
        if let Some(description) = &self.description {
            out.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }
        out.insert(
            "content".to_string(),
            json!({"application/json": {"schema": self.schema.render(defs)}}),
        );
        out.insert("required".to_string(), Value::Bool(true));
        Value::Object(out)
    }
}

/// JSON body returned with a given status code.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBody {
    pub status: u16,
    pub schema: Schema,
    pub description: Option<String>,
}

impl ResponseBody {
    pub fn new(status: u16, schema: Schema) -> Self {
        Self {
            status,
            schema,
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn render(&self, defs: &mut Definitions) -> Value {
        // OpenAPI requires a description on every response object.
        let description = self
            .description
            .clone()
            .or_else(|| self.schema.description().map(str::to_string))
            .unwrap_or_default();
        json!({
            "description": description,
            "content": {"application/json": {"schema": self.schema.render(defs)}}
        })
    }
}

/// Contract of a single HTTP method on a route.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    method: String,
    request: Option<RequestBody>,
    responses: Vec<ResponseBody>,
    validate_request: bool,
    tags: Vec<String>,
}

impl Contract {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            request: None,
            responses: Vec::new(),
            validate_request: false,
            tags: Vec::new(),
        }
    }

    pub fn request(mut self, body: RequestBody) -> Self {
        self.request = Some(body);
        self
    }

    /// Add or replace the response documented for `body.status`.
    pub fn response(mut self, body: ResponseBody) -> Self {
        self.responses.retain(|existing| existing.status != body.status);
        self.responses.push(body);
        self
    }

    pub fn validate_request(mut self, validate: bool) -> Self {
        self.validate_request = validate;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn request_body(&self) -> Option<&RequestBody> {
        self.request.as_ref()
    }

    pub fn responses(&self) -> &[ResponseBody] {
        &self.responses
    }

    pub fn response_for(&self, status: u16) -> Option<&ResponseBody> {
        self.responses.iter().find(|r| r.status == status)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether request bodies must be validated before the handler runs.
    pub fn demands_request_validation(&self) -> bool {
        self.validate_request && self.request.is_some()
    }

    /// OpenAPI operation object.
    pub fn render_operation(&self, defs: &mut Definitions) -> Value {
        let mut out = Map::new();
        if !self.tags.is_empty() {
            out.insert("tags".to_string(), json!(self.tags));
        }
        if let Some(request) = &self.request {
            out.insert("requestBody".to_string(), request.render(defs));
        }
        let mut responses = Map::new();
        let mut ordered: Vec<&ResponseBody> = self.responses.iter().collect();
        ordered.sort_by_key(|r| r.status);
        for response in ordered {
            responses.insert(response.status.to_string(), response.render(defs));
        }
        out.insert("responses".to_string(), Value::Object(responses));
        Value::Object(out)
    }
}

/// Contracts of one route, keyed by HTTP method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contracts {
    by_method: BTreeMap<String, Contract>,
    validate_responses: bool,
}

impl Contracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, contract: Contract) -> Self {
        self.insert(contract);
        self
    }

    pub fn insert(&mut self, contract: Contract) {
        self.by_method.insert(contract.method.clone(), contract);
    }

    /// Turn on response validation. Costly; meant for development.
    pub fn validate_responses(mut self, validate: bool) -> Self {
        self.validate_responses = validate;
        self
    }

    pub fn validates_responses(&self) -> bool {
        self.validate_responses
    }

    pub fn get(&self, method: &str) -> Option<&Contract> {
        self.by_method.get(&method.to_ascii_uppercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contract> {
        self.by_method.values()
    }

    pub fn is_empty(&self) -> bool {
        self.by_method.is_empty()
    }

    pub fn demands_request_validation(&self, method: &str) -> bool {
        self.get(method)
            .is_some_and(Contract::demands_request_validation)
    }

    /// Validate a request body for `method`. Methods without a contract, or
    /// whose contract does not ask for validation, accept anything.
    pub fn validate_request(&self, method: &str, body: &Value) -> Result<(), PorterError> {
        let Some(contract) = self.get(method) else {
            return Ok(());
        };
        match &contract.request {
            Some(request) if contract.validate_request => request
                .schema
                .validate(body)
                .map_err(PorterError::request_failed_validation),
            _ => Ok(()),
        }
    }

    /// Validate a response body against the schema documented for `status`.
    /// A no-op unless response validation is turned on.
    pub fn validate_response(
        &self,
        method: &str,
        status: u16,
        body: &Value,
    ) -> Result<(), PorterError> {
        if !self.validate_responses {
            return Ok(());
        }
        match self.get(method).and_then(|c| c.response_for(status)) {
            Some(response) => response.schema.validate(body).map_err(PorterError::from),
            None => Ok(()),
        }
    }

    /// OpenAPI path item; operation keys are lower-case method names.
    pub fn render_path_item(&self, defs: &mut Definitions) -> Value {
        let mut item = Map::new();
        for (method, contract) in &self.by_method {
            item.insert(method.to_ascii_lowercase(), contract.render_operation(defs));
        }
        Value::Object(item)
    }
}
