//! Composable request/response contracts.
//!
//! A [`Schema`] is a tree of typed nodes that renders itself into JSON Schema
//! (as used by OpenAPI) and validates instances against that rendering.
//! Nodes given a reference name are hoisted into a shared definitions table
//! and referenced with `$ref` at every use site.

pub mod builtins;
mod definitions;

pub use definitions::{Definitions, DEFINITIONS_PREFIX, OPENAPI_PREFIX};

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::error::{PorterError, SchemaIssue, SchemaValidationError};

/// Which properties of an object node are required.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Required {
    #[default]
    All,
    Only(Vec<String>),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    String,
    Number,
    Integer,
    Boolean,
    Array {
        items: Box<Schema>,
    },
    Object {
        properties: Vec<(String, Schema)>,
        required: Required,
        additional_properties: Option<Box<Schema>>,
    },
}

impl SchemaKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            SchemaKind::String => "string",
            SchemaKind::Number => "number",
            SchemaKind::Integer => "integer",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Array { .. } => "array",
            SchemaKind::Object { .. } => "object",
        }
    }
}

type CachedValidator = Arc<OnceLock<Result<jsonschema::Validator, String>>>;

#[derive(Clone)]
pub struct Schema {
    kind: SchemaKind,
    description: Option<String>,
    reference_name: Option<String>,
    keywords: Map<String, Value>,
    validator: CachedValidator,
}

impl Schema {
    fn of(kind: SchemaKind) -> Self {
        Self {
            kind,
            description: None,
            reference_name: None,
            keywords: Map::new(),
            validator: Arc::new(OnceLock::new()),
        }
    }

    pub fn string() -> Self {
        Self::of(SchemaKind::String)
    }

    pub fn number() -> Self {
        Self::of(SchemaKind::Number)
    }

    pub fn integer() -> Self {
        Self::of(SchemaKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(SchemaKind::Boolean)
    }

    pub fn array(items: Schema) -> Self {
        Self::of(SchemaKind::Array {
            items: Box::new(items),
        })
    }

    /// Object with the given properties, all of them required.
    pub fn object<I, K>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, Schema)>,
        K: Into<String>,
    {
        Self::of(SchemaKind::Object {
            properties: properties
                .into_iter()
                .map(|(name, schema)| (name.into(), schema))
                .collect(),
            required: Required::All,
            additional_properties: None,
        })
    }

    /// Free-form object whose values all follow `values`.
    pub fn map(values: Schema) -> Self {
        Self::of(SchemaKind::Object {
            properties: Vec::new(),
            required: Required::None,
            additional_properties: Some(Box::new(values)),
        })
    }

    // Builder methods drop any compiled validator since the shape changes.
    fn reshaped(mut self) -> Self {
        self.validator = Arc::new(OnceLock::new());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self.reshaped()
    }

    pub fn reference(mut self, name: impl Into<String>) -> Self {
        self.reference_name = Some(name.into());
        self.reshaped()
    }

    /// Merge a raw JSON Schema keyword into the rendered node.
    pub fn keyword(mut self, key: impl Into<String>, value: Value) -> Self {
        self.keywords.insert(key.into(), value);
        self.reshaped()
    }

    /// Set the required policy. No effect on non-object nodes.
    pub fn required(mut self, policy: Required) -> Self {
        if let SchemaKind::Object { required, .. } = &mut self.kind {
            *required = policy;
        }
        self.reshaped()
    }

    pub fn additional_properties(mut self, values: Schema) -> Self {
        if let SchemaKind::Object {
            additional_properties,
            ..
        } = &mut self.kind
        {
            *additional_properties = Some(Box::new(values));
        }
        self.reshaped()
    }

    pub fn kind(&self) -> &SchemaKind {
        &self.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn reference_name(&self) -> Option<&str> {
        self.reference_name.as_deref()
    }

    pub fn keywords(&self) -> &Map<String, Value> {
        &self.keywords
    }

    pub fn is_object(&self) -> bool {
        matches!(self.kind, SchemaKind::Object { .. })
    }

    pub fn properties(&self) -> &[(String, Schema)] {
        match &self.kind {
            SchemaKind::Object { properties, .. } => properties,
            _ => &[],
        }
    }

    /// Names of the required properties, resolved against the policy.
    pub fn required_names(&self) -> Vec<String> {
        match &self.kind {
            SchemaKind::Object {
                properties,
                required,
                ..
            } => match required {
                Required::All => properties.iter().map(|(name, _)| name.clone()).collect(),
                Required::Only(names) => names.clone(),
                Required::None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Render this node, registering named sub-schemas in `defs`.
    ///
    /// A named node renders to a `$ref` and its body is stored once in
    /// `defs`, however many times it is reached.
    pub fn render(&self, defs: &mut Definitions) -> Value {
        let body = self.render_body(defs);
        match &self.reference_name {
            Some(name) if !defs.is_inline() => {
                defs.register(name, body);
                let mut reference = Map::new();
                reference.insert("$ref".to_string(), Value::String(defs.reference(name)));
                Value::Object(reference)
            },
            _ => body,
        }
    }

    /// Render into a fresh accumulator, returning the document and the shared
    /// definitions it references.
    pub fn to_document(&self) -> Result<(Value, BTreeMap<String, Value>), PorterError> {
        let mut defs = Definitions::new();
        let document = self.render(&mut defs);
        Ok((document, defs.finish()?))
    }

    /// Self-contained rendering with every reference expanded in place.
    pub fn to_inline(&self) -> Value {
        self.render(&mut Definitions::inline())
    }

    fn render_body(&self, defs: &mut Definitions) -> Value {
        let mut out = Map::new();
        out.insert(
            "type".to_string(),
            Value::String(self.kind.type_name().to_string()),
        );
        if let Some(description) = &self.description {
            out.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }
        match &self.kind {
            SchemaKind::Array { items } => {
                out.insert("items".to_string(), items.render(defs));
            },
            SchemaKind::Object {
                properties,
                additional_properties,
                ..
            } => {
                let mut rendered = Map::new();
                for (name, schema) in properties {
                    rendered.insert(name.clone(), schema.render(defs));
                }
                out.insert("properties".to_string(), Value::Object(rendered));
                let required = self.required_names();
                if !required.is_empty() {
                    out.insert(
                        "required".to_string(),
                        Value::Array(required.into_iter().map(Value::String).collect()),
                    );
                }
                if let Some(values) = additional_properties {
                    out.insert("additionalProperties".to_string(), values.render(defs));
                }
            },
            _ => {},
        }
        for (key, value) in &self.keywords {
            out.insert(key.clone(), value.clone());
        }
        Value::Object(out)
    }

    fn validator(&self) -> Result<&jsonschema::Validator, SchemaValidationError> {
        let compiled = self.validator.get_or_init(|| {
            jsonschema::validator_for(&self.to_inline()).map_err(|e| e.to_string())
        });
        compiled
            .as_ref()
            .map_err(|message| SchemaValidationError::single("", format!("invalid schema: {}", message)))
    }

    /// Validate `instance` against this node, collecting every violation.
    pub fn validate(&self, instance: &Value) -> Result<(), SchemaValidationError> {
        let validator = self.validator()?;
        let issues: Vec<SchemaIssue> = validator
            .iter_errors(instance)
            .map(|e| SchemaIssue {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        if issues.is_empty() {
            Ok(())
        } else {
            Err(SchemaValidationError { issues })
        }
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.description == other.description
            && self.reference_name == other.reference_name
            && self.keywords == other.keywords
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("kind", &self.kind)
            .field("description", &self.description)
            .field("reference_name", &self.reference_name)
            .field("keywords", &self.keywords)
            .finish()
    }
}
