//! Terminal output.
//!
//! stdout carries exactly one JSON document for the orchestrator. The styled
//! human summary goes to stderr so it never mixes with it.

use console::{Style, Term};
use serde::Serialize;
use serde_json::json;

use crate::error::InvocationError;
use crate::response::{ProcessingResult, ProcessingStatus};
use crate::state_machine::InvocationReport;

/// Machine-readable failure document printed on stdout.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDocument<'a> {
    pub error_type: &'static str,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<&'a [String]>,
}

impl<'a> FailureDocument<'a> {
    pub fn new(err: &'a InvocationError) -> Self {
        let errors = match err {
            InvocationError::WorkflowFailed { errors, .. } if !errors.is_empty() => {
                Some(errors.as_slice())
            }
            _ => None,
        };
        Self {
            error_type: err.error_type(),
            error_message: err.to_string(),
            errors,
        }
    }
}

pub struct Reporter {
    err: Term,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            err: Term::stderr(),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    pub fn report(&self, report: &InvocationReport) {
        print_json(report);
        let what = match &report.task_id {
            Some(id) => format!("task result {id} completed"),
            None => "vendor call disabled, nothing to poll".to_string(),
        };
        self.line(format!(
            "  {} {what} {}",
            self.green.apply_to("✓"),
            self.dim.apply_to(format!("({} ms)", report.duration_ms))
        ));
        for warning in &report.warnings {
            self.line(format!("    {} {warning}", self.yellow.apply_to("!")));
        }
    }

    pub fn failure(&self, err: &InvocationError) {
        print_json(&FailureDocument::new(err));
        let marker = if err.is_retriable() {
            self.yellow.apply_to("↻")
        } else {
            self.red.apply_to("✗")
        };
        self.line(format!(
            "  {marker} {}: {err}",
            self.dim.apply_to(err.error_type())
        ));
        if let InvocationError::WorkflowFailed { errors, .. } = err {
            for line in errors {
                self.line(format!("    {} {line}", self.red.apply_to("-")));
            }
        }
    }

    pub fn classification(&self, result: &ProcessingResult) {
        print_json(&json!({
            "status": result.status,
            "errorDetails": result.error_details,
            "formattedErrors": result.formatted_errors(),
        }));
        let style = match result.status {
            ProcessingStatus::Succeeded => &self.green,
            ProcessingStatus::InProgress | ProcessingStatus::InvalidApiResponse => &self.yellow,
            ProcessingStatus::Terminated | ProcessingStatus::Failed => &self.red,
        };
        self.line(format!(
            "  {} {} entities with errors",
            style.apply_to(result.status),
            result.error_details.len()
        ));
    }

    fn line(&self, text: String) {
        // stderr is best effort; the JSON on stdout is what matters.
        let _ = self.err.write_line(&text);
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string(value) {
        Ok(text) => println!("{text}"),
        Err(e) => println!(
            "{}",
            json!({"errorType": "NonRetriableInvocationError", "errorMessage": e.to_string()})
        ),
    }
}
