//! OpenAPI document and the Swagger UI page that renders it.

use serde_json::{json, Map, Value};

use crate::contract::Contracts;
use crate::error::PorterError;
use crate::schema::{Definitions, OPENAPI_PREFIX};

pub const OPENAPI_VERSION: &str = "3.0.1";

/// Render an OpenAPI document over `routes`.
///
/// All routes share one definitions table, so a named schema used by several
/// services appears once under `components.schemas`. Two different schemas
/// registered under one name fail the whole document.
pub fn make_openapi_spec<'a, I>(
    title: &str,
    description: Option<&str>,
    version: &str,
    routes: I,
) -> Result<Value, PorterError>
where
    I: IntoIterator<Item = (&'a str, &'a Contracts)>,
{
    let mut defs = Definitions::with_prefix(OPENAPI_PREFIX);
    let mut paths = Map::new();
    for (path, contracts) in routes {
        if contracts.is_empty() {
            continue;
        }
        paths.insert(path.to_string(), contracts.render_path_item(&mut defs));
    }

    let mut info = Map::new();
    info.insert("title".to_string(), Value::String(title.to_string()));
    if let Some(description) = description {
        info.insert(
            "description".to_string(),
            Value::String(description.to_string()),
        );
    }
    info.insert("version".to_string(), Value::String(version.to_string()));

    let schemas: Map<String, Value> = defs.finish()?.into_iter().collect();
    Ok(json!({
        "openapi": OPENAPI_VERSION,
        "info": info,
        "paths": paths,
        "components": {"schemas": schemas}
    }))
}

pub fn make_docs_html(docs_json_url: &str) -> String {
    SWAGGER_HTML.replace("{{DOCS_JSON_URL}}", docs_json_url)
}

const SWAGGER_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8">
    <title>Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui.css">
    <style>
      html { box-sizing: border-box; overflow-y: scroll; }
      *, *:before, *:after { box-sizing: inherit; }
      body { margin: 0; background: #fafafa; }
    </style>
  </head>
  <body>
    <div id="swagger-ui"></div>
    <script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui-standalone-preset.js"></script>
    <script>
      window.onload = function() {
        window.ui = SwaggerUIBundle({
          url: "{{DOCS_JSON_URL}}",
          dom_id: "#swagger-ui",
          deepLinking: true,
          presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
          plugins: [SwaggerUIBundle.plugins.DownloadUrl],
          layout: "StandaloneLayout"
        });
      };
    </script>
  </body>
</html>
"##;
