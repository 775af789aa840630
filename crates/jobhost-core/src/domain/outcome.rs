//! Outcome model: the result of one function invocation.
//!
//! The listener only looks at `succeeded`. Everything else is carried for
//! logging and for whoever reads the host's results later.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::FunctionInstanceId;

/// Raised when a function invocation fails (returns an error or panics).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("function '{function_name}' ({instance_id}) failed: {message}")]
pub struct FunctionInvocationError {
    /// Correlates with the `instance_id` field in the host's logs.
    pub instance_id: FunctionInstanceId,
    pub function_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub instance_id: FunctionInstanceId,
    pub succeeded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FunctionInvocationError>,
}

impl FunctionResult {
    pub fn success(instance_id: FunctionInstanceId) -> Self {
        Self {
            instance_id,
            succeeded: true,
            error: None,
        }
    }

    pub fn failure(error: FunctionInvocationError) -> Self {
        Self {
            instance_id: error.instance_id,
            succeeded: false,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn failure_carries_instance_id() {
        let instance_id = FunctionInstanceId::from_ulid(Ulid::new());
        let result = FunctionResult::failure(FunctionInvocationError {
            instance_id,
            function_name: "ProcessOrder".to_string(),
            message: "boom".to_string(),
        });

        assert!(!result.succeeded);
        assert_eq!(result.instance_id, instance_id);
        let msg = result.error.unwrap().to_string();
        assert!(msg.contains("ProcessOrder"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn success_serializes_without_error_field() {
        let result = FunctionResult::success(FunctionInstanceId::from_ulid(Ulid::new()));
        let v = serde_json::to_value(&result).unwrap();

        assert_eq!(v["succeeded"], true);
        assert!(v.get("error").is_none());
    }
}
