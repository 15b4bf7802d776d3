//! Typed view over a raw TaskResult payload.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::vendor::PayloadSchema;

/// The payload does not have the shape a TaskResult must have.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid TaskResult response: {0}")]
pub struct InvalidResponseError(pub String);

impl InvalidResponseError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Vendor-reported outcome of a finished workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    Error,
    /// Any other vendor value, kept verbatim.
    Other(String),
}

impl CompletionStatus {
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("SUCCESS") {
            CompletionStatus::Success
        } else if raw.eq_ignore_ascii_case("ERROR") {
            CompletionStatus::Error
        } else {
            CompletionStatus::Other(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CompletionStatus::Success => "SUCCESS",
            CompletionStatus::Error => "ERROR",
            CompletionStatus::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated TaskResult.
///
/// Construction guarantees exactly one of terminated, in progress, or
/// completed holds.
#[derive(Debug, Clone)]
pub struct Response<'a> {
    terminated: bool,
    completion_status: Option<CompletionStatus>,
    body: &'a Map<String, Value>,
    schema: &'a PayloadSchema,
}

impl<'a> Response<'a> {
    pub fn parse(payload: &'a Value, schema: &'a PayloadSchema) -> Result<Self, InvalidResponseError> {
        let body = payload
            .as_object()
            .ok_or_else(|| InvalidResponseError::new("payload is not a JSON object"))?;

        let terminated = match body.get(&schema.terminated) {
            // Absent or null reads as false.
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(InvalidResponseError::new(format!(
                    "'{}' must be a boolean, got {other}",
                    schema.terminated
                )));
            }
        };

        let completion_status = match body.get(&schema.completion_status) {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) if !raw.trim().is_empty() => {
                Some(CompletionStatus::parse(raw.trim()))
            }
            Some(other) => {
                return Err(InvalidResponseError::new(format!(
                    "'{}' must be a non-empty string, got {other}",
                    schema.completion_status
                )));
            }
        };

        if terminated && completion_status.is_some() {
            return Err(InvalidResponseError::new(format!(
                "workflow is both terminated and completed ('{}' = {})",
                schema.completion_status,
                completion_status.as_ref().map(|s| s.as_str()).unwrap_or_default()
            )));
        }

        Ok(Self {
            terminated,
            completion_status,
            body,
            schema,
        })
    }

    pub fn terminated(&self) -> bool {
        self.terminated
    }

    pub fn completion_status(&self) -> Option<&CompletionStatus> {
        self.completion_status.as_ref()
    }

    pub fn is_in_progress(&self) -> bool {
        !self.terminated && self.completion_status.is_none()
    }

    pub(crate) fn body(&self) -> &'a Map<String, Value> {
        self.body
    }

    pub(crate) fn schema(&self) -> &'a PayloadSchema {
        self.schema
    }
}
