//! Shared handler utilities used across RPC domains.

use crate::server::AppState;
use alchemist_core::{AlchemistError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

fn lookup<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .filter(|v| !v.is_null())
}

/// Extract an optional string parameter, supporting both snake_case and camelCase.
pub(crate) fn get_str_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a str> {
    lookup(params, snake, camel).and_then(|v| v.as_str())
}

/// Extract an optional bool parameter, supporting both snake_case and camelCase.
pub(crate) fn get_bool_param(params: &Value, snake: &str, camel: &str) -> Option<bool> {
    lookup(params, snake, camel).and_then(|v| v.as_bool())
}

/// Extract an optional u64 parameter, supporting both snake_case and camelCase.
pub(crate) fn get_u64_param(params: &Value, snake: &str, camel: &str) -> Option<u64> {
    lookup(params, snake, camel).and_then(|v| v.as_u64())
}

/// Deserialize an optional structured parameter.
pub(crate) fn parse_param<T: DeserializeOwned>(
    params: &Value,
    snake: &str,
    camel: &str,
) -> Result<Option<T>> {
    lookup(params, snake, camel)
        .map(|v| {
            serde_json::from_value(v.clone()).map_err(|e| AlchemistError::InvalidParams {
                message: format!("Invalid parameter {}: {}", snake, e),
            })
        })
        .transpose()
}

/// Deserialize a required structured parameter.
pub(crate) fn require_param<T: DeserializeOwned>(params: &Value, snake: &str, camel: &str) -> Result<T> {
    parse_param(params, snake, camel)?.ok_or_else(|| missing(snake))
}

/// Extract a required string parameter or return an error.
pub(crate) fn require_str_param(params: &Value, snake: &str, camel: &str) -> Result<String> {
    get_str_param(params, snake, camel)
        .map(String::from)
        .ok_or_else(|| missing(snake))
}

/// The image reference, given as a number or a string (id or page URL).
pub(crate) fn require_image_ref(params: &Value) -> Result<String> {
    match lookup(params, "image_id", "imageId").or_else(|| params.get("url")) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(AlchemistError::InvalidParams {
            message: "image_id must be a number or string".to_string(),
        }),
        None => Err(missing("image_id")),
    }
}

/// The credential for this call: the `api_key` parameter, else the server's
/// configured key. Missing both is an authentication error.
pub(crate) fn require_credential(state: &AppState, params: &Value) -> Result<String> {
    let supplied = get_str_param(params, "api_key", "apiKey");
    state
        .api
        .credential(supplied)
        .map(str::to_string)
        .ok_or_else(|| AlchemistError::Unauthorized {
            message: "No Civitai API key configured or supplied".to_string(),
        })
}

fn missing(name: &str) -> AlchemistError {
    AlchemistError::InvalidParams {
        message: format!("Missing required parameter: {}", name),
    }
}
