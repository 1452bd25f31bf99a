//! Error types raised while configuring services and serving requests.
//!
//! Every failure in the request pipeline is a [`PorterError`]. The shaping
//! layer never inspects errors dynamically; it asks the error for its name,
//! status code, messages and causal chain.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::ModelContext;

/// Single schema violation with the JSON Pointer of the offending value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "(root): {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// A schema node rejected an instance.
#[derive(Debug, Clone, Error)]
#[error("schema validation failed with {} error(s)", issues.len())]
pub struct SchemaValidationError {
    pub issues: Vec<SchemaIssue>,
}

impl SchemaValidationError {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![SchemaIssue {
                path: path.into(),
                message: message.into(),
            }],
        }
    }
}

#[derive(Debug, Error)]
pub enum PorterError {
    /// Fatal problem in how the application was put together.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    BadRequest(String),

    /// The payload failed schema or column/null checks.
    #[error("{message}")]
    InvalidRequest { message: String, fields: Vec<String> },

    #[error(transparent)]
    SchemaValidation(#[from] SchemaValidationError),

    /// A model or processor failed; the cause is kept as the source.
    #[error("an error occurred during prediction")]
    Prediction(#[source] anyhow::Error),

    #[error("the requested URL {0} was not found on the server")]
    NotFound(String),

    #[error("the method {method} is not allowed for the requested URL {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl PorterError {
    /// Column/null check failure naming every violating field.
    pub fn column_violations(missing: Vec<String>, nulls: Vec<String>) -> Self {
        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!(
                "request payload is missing the following field(s): [{}]",
                missing.join(", ")
            ));
        }
        if !nulls.is_empty() {
            parts.push(format!(
                "request payload had null values in the following field(s): [{}]",
                nulls.join(", ")
            ));
        }
        let mut fields = missing;
        for field in nulls {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        PorterError::InvalidRequest {
            message: parts.join("; "),
            fields,
        }
    }

    /// Request body rejected by a request schema.
    pub fn request_failed_validation(error: SchemaValidationError) -> Self {
        let details: Vec<String> = error.issues.iter().map(|i| i.to_string()).collect();
        let mut fields: Vec<String> = Vec::new();
        for issue in &error.issues {
            if !fields.contains(&issue.path) {
                fields.push(issue.path.clone());
            }
        }
        PorterError::InvalidRequest {
            message: format!("request data failed validation: {}", details.join("; ")),
            fields,
        }
    }

    /// Name reported in the `error.name` field of the envelope.
    pub fn name(&self) -> &'static str {
        match self {
            PorterError::Configuration(_) => "ConfigurationError",
            PorterError::BadRequest(_) => "BadRequest",
            PorterError::InvalidRequest { .. } => "InvalidRequest",
            PorterError::SchemaValidation(_) => "SchemaValidationError",
            PorterError::Prediction(_) => "PredictionError",
            PorterError::NotFound(_) => "NotFound",
            PorterError::MethodNotAllowed { .. } => "MethodNotAllowed",
            PorterError::Internal(_) => "InternalServerError",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            PorterError::BadRequest(_) => 400,
            PorterError::NotFound(_) => 404,
            PorterError::MethodNotAllowed { .. } => 405,
            PorterError::InvalidRequest { .. } => 422,
            PorterError::Configuration(_)
            | PorterError::SchemaValidation(_)
            | PorterError::Prediction(_)
            | PorterError::Internal(_) => 500,
        }
    }

    /// Human readable messages for the envelope.
    pub fn messages(&self) -> Vec<String> {
        match self {
            PorterError::SchemaValidation(err) => {
                err.issues.iter().map(|issue| issue.to_string()).collect()
            },
            other => vec![other.to_string()],
        }
    }

    /// Fields named by a request error, empty for every other kind.
    pub fn fields(&self) -> &[String] {
        match self {
            PorterError::InvalidRequest { fields, .. } => fields,
            _ => &[],
        }
    }

    /// Causal chain of the error, outermost first.
    pub fn traceback(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.name(), self)];
        let mut last = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let text = err.to_string();
            if text != last {
                lines.push(format!("  caused by: {}", text));
                last = text;
            }
            source = err.source();
        }
        lines.join("\n")
    }
}

/// An error together with what the envelope may disclose about its origin.
#[derive(Debug)]
pub struct ErrorReport {
    pub error: PorterError,
    /// Set when the error arose inside a service's pipeline.
    pub context: Option<ModelContext>,
    pub request_id: Option<String>,
    pub user_data: Option<Value>,
}

impl ErrorReport {
    pub fn new(error: PorterError) -> Self {
        Self {
            error,
            context: None,
            request_id: None,
            user_data: None,
        }
    }

    pub fn with_context(mut self, context: ModelContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_user_data(mut self, user_data: Value) -> Self {
        self.user_data = Some(user_data);
        self
    }
}

impl From<PorterError> for ErrorReport {
    fn from(error: PorterError) -> Self {
        ErrorReport::new(error)
    }
}
