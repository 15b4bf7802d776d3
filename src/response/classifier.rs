//! Maps a TaskResult to one of five processing outcomes.
//!
//! Classification never fails: a payload that cannot be understood degrades
//! to [`ProcessingStatus::InvalidApiResponse`], which callers treat as
//! "try again later".

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::analyser::{ErrorDetails, ResponseAnalyser};
use super::model::{CompletionStatus, Response};
use crate::vendor::PayloadSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    InProgress,
    Terminated,
    Succeeded,
    Failed,
    InvalidApiResponse,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStatus::InProgress => write!(f, "IN_PROGRESS"),
            ProcessingStatus::Terminated => write!(f, "TERMINATED"),
            ProcessingStatus::Succeeded => write!(f, "SUCCEEDED"),
            ProcessingStatus::Failed => write!(f, "FAILED"),
            ProcessingStatus::InvalidApiResponse => write!(f, "INVALID_API_RESPONSE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingResult {
    pub status: ProcessingStatus,
    pub error_details: ErrorDetails,
}

impl ProcessingResult {
    fn bare(status: ProcessingStatus) -> Self {
        Self {
            status,
            error_details: ErrorDetails::default(),
        }
    }

    fn with_errors(status: ProcessingStatus, error_details: ErrorDetails) -> Self {
        Self {
            status,
            error_details,
        }
    }

    /// One human-readable line per entity.
    pub fn formatted_errors(&self) -> Vec<String> {
        self.error_details
            .iter()
            .map(|(entity, messages)| {
                let messages: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
                format!("{} with name '{}': {:?}", entity.kind, entity.name, messages)
            })
            .collect()
    }
}

/// Classifies a validated response. First matching rule wins: terminated,
/// in progress, then the completion status together with the failure records.
pub fn classify(response: &Response<'_>, analyser: &ResponseAnalyser<'_, '_>) -> ProcessingResult {
    if response.terminated() {
        error!("role onboarding workflow terminated");
        return ProcessingResult::bare(ProcessingStatus::Terminated);
    }
    if response.is_in_progress() {
        info!("role onboarding workflow still in progress");
        return ProcessingResult::bare(ProcessingStatus::InProgress);
    }

    let errors = match analyser.errors() {
        Ok(errors) => errors,
        Err(e) => {
            error!(error = %e, "invalid API response");
            return ProcessingResult::bare(ProcessingStatus::InvalidApiResponse);
        }
    };
    log_errors(&errors);
    let all_onboarded = !errors.has_blocking();

    match response.completion_status() {
        Some(CompletionStatus::Success) if all_onboarded => {
            info!("role onboarding workflow completed successfully");
            ProcessingResult::with_errors(ProcessingStatus::Succeeded, errors)
        }
        Some(CompletionStatus::Success) => {
            error!("role onboarding workflow completed but failed to onboard all roles");
            ProcessingResult::with_errors(ProcessingStatus::Failed, errors)
        }
        Some(status) => {
            if *status != CompletionStatus::Error {
                // Only ERROR is expected here; anything else is still a failure.
                warn!(
                    anomaly = "unexpected_completion_status",
                    completion_status = %status,
                    "received a completion status other than SUCCESS/ERROR"
                );
            }
            error!(completion_status = %status, "role onboarding workflow failed");
            ProcessingResult::with_errors(ProcessingStatus::Failed, errors)
        }
        // Unreachable for a parsed Response, which is either terminated,
        // in progress or completed.
        None => ProcessingResult::bare(ProcessingStatus::InvalidApiResponse),
    }
}

/// Parses and classifies a raw payload in one step.
pub fn process_payload(payload: &Value, schema: &PayloadSchema) -> ProcessingResult {
    match Response::parse(payload, schema) {
        Ok(response) => classify(&response, &ResponseAnalyser::new(&response)),
        Err(e) => {
            error!(error = %e, "invalid API response");
            ProcessingResult::bare(ProcessingStatus::InvalidApiResponse)
        }
    }
}

fn log_errors(errors: &ErrorDetails) {
    for (entity, messages) in errors.iter() {
        let messages: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
        error!(
            entity_type = %entity.kind,
            entity_name = %entity.name,
            ?messages,
            "entity error reported by workflow"
        );
    }
}
