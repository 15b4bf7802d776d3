use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::state::DriverState;

/// Marker value the orchestrator checks for.
pub const COMPLETED: &str = "COMPLETED";

/// Structured record returned by a successful invocation.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationReport {
    pub role_onboarding_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub invocation_id: String,
    /// Empty when the invocation was bypassed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub state_transitions: Vec<DriverState>,
    /// Non-blocking messages the workflow reported alongside its success.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl InvocationReport {
    /// Report for an invocation whose feature flag was off.
    pub fn bypassed(invocation_id: String, started_at: DateTime<Utc>) -> Self {
        Self::finish(invocation_id, started_at, None, Vec::new(), Vec::new(), None)
    }

    pub fn completed(
        invocation_id: String,
        started_at: DateTime<Utc>,
        task_id: String,
        state_transitions: Vec<DriverState>,
        warnings: Vec<String>,
        payload: Value,
    ) -> Self {
        Self::finish(
            invocation_id,
            started_at,
            Some(task_id),
            state_transitions,
            warnings,
            Some(payload),
        )
    }

    fn finish(
        invocation_id: String,
        started_at: DateTime<Utc>,
        task_id: Option<String>,
        state_transitions: Vec<DriverState>,
        warnings: Vec<String>,
        payload: Option<Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            role_onboarding_status: COMPLETED,
            task_id,
            invocation_id,
            state_transitions,
            warnings,
            payload,
            started_at,
            completed_at: now,
            duration_ms: (now - started_at).num_milliseconds(),
        }
    }
}
