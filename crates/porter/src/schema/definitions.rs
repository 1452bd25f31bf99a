use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::PorterError;

/// Reference prefix for standalone JSON Schema documents.
pub const DEFINITIONS_PREFIX: &str = "#/definitions/";
/// Reference prefix for OpenAPI documents.
pub const OPENAPI_PREFIX: &str = "#/components/schemas/";

/// Shared-definition table threaded through one render call.
///
/// Every node reached during a render registers its named body here, so the
/// outermost caller ends up holding the complete table. One accumulator
/// belongs to exactly one render; concurrent renders each create their own.
#[derive(Debug, Clone)]
pub struct Definitions {
    prefix: String,
    inline: bool,
    schemas: BTreeMap<String, Value>,
    conflicts: BTreeSet<String>,
}

impl Definitions {
    pub fn new() -> Self {
        Self::with_prefix(DEFINITIONS_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            inline: false,
            schemas: BTreeMap::new(),
            conflicts: BTreeSet::new(),
        }
    }

    /// Accumulator that expands named nodes in place instead of hoisting them.
    pub fn inline() -> Self {
        Self {
            inline: true,
            ..Self::new()
        }
    }

    pub fn is_inline(&self) -> bool {
        self.inline
    }

    pub fn reference(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Record the body of a named node. A second, different body under the
    /// same name is remembered as a conflict.
    pub(crate) fn register(&mut self, name: &str, body: Value) {
        match self.schemas.get(name) {
            Some(existing) if *existing != body => {
                self.conflicts.insert(name.to_string());
            },
            Some(_) => {},
            None => {
                self.schemas.insert(name.to_string(), body);
            },
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schemas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn schemas(&self) -> &BTreeMap<String, Value> {
        &self.schemas
    }

    /// Names registered with more than one distinct body.
    pub fn conflicts(&self) -> impl Iterator<Item = &str> {
        self.conflicts.iter().map(String::as_str)
    }

    /// Consume the accumulator, failing if any reference name was bound to
    /// two different bodies.
    pub fn finish(self) -> Result<BTreeMap<String, Value>, PorterError> {
        if self.conflicts.is_empty() {
            return Ok(self.schemas);
        }
        let names: Vec<String> = self.conflicts.into_iter().collect();
        Err(PorterError::Configuration(format!(
            "reference name(s) [{}] are used for schemas with different definitions",
            names.join(", ")
        )))
    }
}

impl Default for Definitions {
    fn default() -> Self {
        Self::new()
    }
}
