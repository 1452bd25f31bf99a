use porter::{ModelApp, PorterError};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub app: Arc<ModelApp>,
    /// Rendered once at start-up; `None` unless docs are exposed.
    pub docs: Option<Arc<Value>>,
}

impl AppState {
    pub fn new(app: Arc<ModelApp>) -> Result<Self, PorterError> {
        let docs = if app.config().expose_docs {
            Some(Arc::new(app.openapi()?))
        } else {
            None
        };
        Ok(Self { app, docs })
    }
}
