//! ABOUTME: The `{success, result}` / `{success: false, error}` tool response envelope (spec §6)
//! ABOUTME: Every dispatcher tool returns one of these, serialized to a JSON string, never a bare value

use serde::Serialize;
use serde_json::Value;

use ltmc_types::LtmcError;

/// The structured half of a failed [`ToolEnvelope`], built directly from
/// [`LtmcError::kind`] / [`LtmcError::retry_possible`] so a new error variant
/// never needs a matching case here.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retry_possible: bool,
}

impl From<&LtmcError> for ErrorPayload {
    fn from(err: &LtmcError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            details: None,
            retry_possible: err.retry_possible(),
        }
    }
}

/// Tagged `success`/`error` envelope every action tool resolves to.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolEnvelope {
    Success { success: bool, result: Value },
    Failure { success: bool, error: ErrorPayload },
}

impl ToolEnvelope {
    /// `result` must already be a JSON object (spec §6: "never bare strings or arrays").
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self::Success { success: true, result }
    }

    #[must_use]
    pub fn err(error: &LtmcError) -> Self {
        Self::Failure { success: false, error: error.into() }
    }

    /// Unknown/unvalidated action, rejected before dispatch (spec §4.7 "Validation").
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Failure {
            success: false,
            error: ErrorPayload {
                kind: "ValidationError",
                message: message.into(),
                details: None,
                retry_possible: false,
            },
        }
    }

    /// Render as the JSON text every `#[tool]` method returns as its `Ok(String)`.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":{"kind":"Internal","message":"envelope serialization failed"}}"#
                .to_string()
        })
    }
}

/// Lift a `Result<T, LtmcError>` into an envelope, given how to turn `T` into
/// the result object's fields.
pub fn from_result<T>(result: ltmc_types::Result<T>, to_value: impl FnOnce(T) -> Value) -> ToolEnvelope {
    match result {
        Ok(value) => ToolEnvelope::ok(to_value(value)),
        Err(e) => ToolEnvelope::err(&e),
    }
}
