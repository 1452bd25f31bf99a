//! Schemas of the envelopes porter itself produces.

use super::{Required, Schema};

pub fn request_id() -> Schema {
    Schema::string()
        .describe("Hex value of UUID assigned to the request.")
        .reference("RequestID")
}

pub fn model_context() -> Schema {
    Schema::object([
        ("model_name", Schema::string().describe("The name of the model.")),
        (
            "api_version",
            Schema::string().describe("The model API version."),
        ),
        (
            "model_meta",
            Schema::map(Schema::string()).describe("Arbitrary meta-data associated with the model."),
        ),
    ])
    .reference("ModelContext")
}

pub fn error_body() -> Schema {
    Schema::object([
        ("name", Schema::string().describe("Name of the error")),
        (
            "messages",
            Schema::array(Schema::string()).describe("An array of messages describing the error."),
        ),
        (
            "traceback",
            Schema::string().describe("Causal chain of the error."),
        ),
    ])
    .required(Required::Only(vec!["name".to_string()]))
    .reference("ErrorBody")
}

pub fn generic_error() -> Schema {
    Schema::object([("request_id", request_id()), ("error", error_body())])
        .required(Required::Only(vec!["error".to_string()]))
        .reference("GenericError")
}

pub fn model_context_error() -> Schema {
    Schema::object([
        ("request_id", request_id()),
        ("error", error_body()),
        ("model_context", model_context()),
    ])
    .required(Required::Only(vec!["error".to_string()]))
    .reference("ModelContextError")
}

pub fn health_check() -> Schema {
    let service = Schema::object([
        (
            "endpoint",
            Schema::string().describe("Endpoint the service is exposed on."),
        ),
        (
            "status",
            Schema::string().describe(
                "Status of the model. If the app is ready the value will be \"READY\". \
                 Otherwise the value will be a string indicating the status of the service.",
            ),
        ),
        ("model_context", model_context()),
    ]);

    Schema::object([
        (
            "porter_version",
            Schema::string().describe("The version of porter on the deployed application."),
        ),
        (
            "deployed_on",
            Schema::string().describe(
                "Start up time of the server. Format YYYY-MM-DDTHH:MM:SS.ffffff, e.g. 2020-04-01T19:00:31.518627",
            ),
        ),
        (
            "app_meta",
            Schema::map(Schema::string()).describe("Arbitrary meta-data associated with the application"),
        ),
        (
            "services",
            Schema::map(service).describe("All available services on the server"),
        ),
    ])
    .describe("Description of the application's status. Useful for load balancing and debugging")
    .reference("HealthCheck")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_context_error_shares_definitions() {
        let (document, definitions) = model_context_error().to_document().unwrap();
        assert_eq!(document, json!({"$ref": "#/definitions/ModelContextError"}));
        let names: Vec<&String> = definitions.keys().collect();
        assert_eq!(
            names,
            ["ErrorBody", "ModelContext", "ModelContextError", "RequestID"]
        );
    }

    #[test]
    fn error_envelope_validates_against_generic_error() {
        let body = json!({"error": {"name": "NotFound"}});
        assert!(generic_error().validate(&body).is_ok());
        assert!(generic_error().validate(&json!({"error": {}})).is_err());
    }

    #[test]
    fn health_check_accepts_snapshot_shape() {
        let snapshot = json!({
            "porter_version": "0.1.0",
            "deployed_on": "2024-01-01T00:00:00.000000",
            "app_meta": {},
            "services": {
                "a-model:1": {
                    "endpoint": "/a-model/1/prediction",
                    "status": "READY",
                    "model_context": {
                        "model_name": "a-model",
                        "api_version": "1",
                        "model_meta": {}
                    }
                }
            }
        });
        assert!(health_check().validate(&snapshot).is_ok());
    }
}
