//! The JSON event the orchestrator passes to each invocation.
//!
//! The event carries far more than this unit needs; only the task result id
//! and the vendor's feature flag are read.

use serde_json::Value;
use thiserror::Error;

use crate::vendor::Vendor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("failed to find {0} in event")]
    Missing(String),

    #[error("{0} must be a non-empty string")]
    InvalidTaskId(String),

    #[error("{0} must be a boolean")]
    InvalidFlag(String),
}

/// What one invocation is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub task_id: String,
    /// When false the invocation completes without touching the network.
    pub enabled: bool,
}

impl InvocationRequest {
    pub fn new(task_id: impl Into<String>, enabled: bool) -> Self {
        Self {
            task_id: task_id.into(),
            enabled,
        }
    }
}

pub struct InvocationEvent<'a> {
    raw: &'a Value,
    vendor: Vendor,
}

impl<'a> InvocationEvent<'a> {
    pub fn new(raw: &'a Value, vendor: Vendor) -> Self {
        Self { raw, vendor }
    }

    /// Reads the feature flag first; a disabled invocation does not need a
    /// task id at all.
    pub fn into_request(self) -> Result<InvocationRequest, EventError> {
        if !self.state_enabled()? {
            return Ok(InvocationRequest::new(String::new(), false));
        }
        Ok(InvocationRequest::new(self.task_id()?, true))
    }

    fn task_id_path(&self) -> [&'static str; 3] {
        match self.vendor {
            Vendor::SailPoint => ["role", "sailpoint_launch_workflow", "taskresult_id"],
            Vendor::CyberArk => ["role", "cyberark_taskresult_id", "cyberark_taskresult_id"],
        }
    }

    pub fn task_id(&self) -> Result<String, EventError> {
        let path = self.task_id_path();
        let dotted = path.join(".");
        let value = path
            .iter()
            .try_fold(self.raw, |node, key| node.get(key))
            .ok_or_else(|| EventError::Missing(dotted.clone()))?;
        match value.as_str() {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(EventError::InvalidTaskId(dotted)),
        }
    }

    /// A missing flag means enabled; only test environments switch it off.
    pub fn state_enabled(&self) -> Result<bool, EventError> {
        let data = self
            .raw
            .get("base_configs")
            .and_then(|c| c.get("data"))
            .ok_or_else(|| EventError::Missing("base_configs.data".into()))?;
        let key = format!("{}_state_enabled", self.vendor.key());
        match data.get(&key) {
            None | Some(Value::Null) => Ok(true),
            Some(value) => str2bool(value).ok_or(EventError::InvalidFlag(key)),
        }
    }
}

/// Lenient boolean: JSON bools and the usual spellings of yes/no.
pub fn str2bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
