use std::cell::RefCell;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::PollerConfig;
use crate::error::InvocationError;
use crate::event::InvocationRequest;
use crate::response::{ProcessingStatus, process_payload};
use crate::retry::{JitterDelay, RetryPolicy, retry_with};
use crate::state_machine::{DriverState, InvocationReport, StateMachine, TransitionError};
use crate::vendor::{
    ApiError, ApiErrorCategory, AuthAcquisitionError, Authenticator, Credentials, PayloadSchema,
    StatusFetcher, Vendor,
};

/// Retry knobs for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    /// Inner engine: attempts per round.
    pub policy: RetryPolicy,
    /// Inner engine: sleep between attempts.
    pub jitter: JitterDelay,
    /// Fixed sleep after a non-auth retriable failure.
    pub wait_time: Duration,
    /// Re-authenticate-and-fetch rounds around the engine.
    pub outer_max_attempts: u32,
}

impl DriverSettings {
    pub fn from_config(config: &PollerConfig) -> Self {
        Self {
            policy: config.retry.policy(),
            jitter: config.retry.jitter(),
            wait_time: config.retry.wait_time(),
            outer_max_attempts: config.retry.outer_max_attempts,
        }
    }
}

/// Failure of a single fetch attempt, as seen by the retry engine.
#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Auth(AuthAcquisitionError),
    #[error(transparent)]
    Api(ApiError),
    #[error(transparent)]
    State(TransitionError),
}

impl AttemptError {
    /// Only retriable API errors go around again; authentication failures
    /// end the invocation.
    fn is_retriable(&self) -> bool {
        match self {
            AttemptError::Api(err) => err.is_retriable(),
            AttemptError::Auth(_) | AttemptError::State(_) => false,
        }
    }
}

/// Drives one invocation: authenticate, fetch, classify, decide.
pub struct InvocationDriver<A, F> {
    vendor: Vendor,
    schema: PayloadSchema,
    authenticator: A,
    fetcher: F,
    settings: DriverSettings,
}

impl<A: Authenticator, F: StatusFetcher> InvocationDriver<A, F> {
    pub fn new(
        vendor: Vendor,
        schema: PayloadSchema,
        authenticator: A,
        fetcher: F,
        settings: DriverSettings,
    ) -> Self {
        Self {
            vendor,
            schema,
            authenticator,
            fetcher,
            settings,
        }
    }

    /// Runs one invocation. The returned error is the only signal the
    /// orchestrator gets.
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationReport, InvocationError> {
        let invocation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "invocation",
            invocation_id = %invocation_id,
            task_id = %request.task_id,
            vendor = %self.vendor,
        );
        self.run(request, invocation_id).instrument(span).await
    }

    async fn run(
        &self,
        request: &InvocationRequest,
        invocation_id: String,
    ) -> Result<InvocationReport, InvocationError> {
        let started_at = Utc::now();

        // Checked before anything touches the network.
        if !request.enabled {
            info!("{} API call is not enabled, returning completed", self.vendor);
            return Ok(InvocationReport::bypassed(invocation_id, started_at));
        }
        let task_id = request.task_id.trim();
        if task_id.is_empty() {
            return Err(InvocationError::InvalidInput(
                "task result id must be a non-empty string".into(),
            ));
        }
        info!(task_id, "polling task result");

        let machine = RefCell::new(StateMachine::new());
        let payload = self.fetch(task_id, &machine).await?;

        let result = process_payload(&payload, &self.schema);
        enter(&machine, DriverState::Classifying).map_err(state_error)?;
        enter(&machine, DriverState::after_classification(result.status))
            .map_err(state_error)?;
        info!(status = %result.status, "task result classified");

        match result.status {
            ProcessingStatus::Succeeded => Ok(InvocationReport::completed(
                invocation_id,
                started_at,
                task_id.to_string(),
                machine.borrow().transitions(),
                result.formatted_errors(),
                payload,
            )),
            ProcessingStatus::InProgress => Err(InvocationError::NotCompleted(
                "workflow is still in progress".into(),
            )),
            ProcessingStatus::InvalidApiResponse => Err(InvocationError::NotCompleted(
                "invalid API response received for GET TaskResults, try again later".into(),
            )),
            ProcessingStatus::Terminated => Err(InvocationError::WorkflowFailed {
                reason: "workflow terminated (terminated flag is set)".into(),
                errors: Vec::new(),
            }),
            ProcessingStatus::Failed => Err(InvocationError::WorkflowFailed {
                reason: format!("{} role onboarding workflow failed", self.vendor),
                errors: result.formatted_errors(),
            }),
        }
    }

    /// Outer tier: rounds of the retry engine, re-authenticating in between.
    async fn fetch(
        &self,
        task_id: &str,
        machine: &RefCell<StateMachine>,
    ) -> Result<Value, InvocationError> {
        let session = RefCell::new(None);
        let session = &session;
        let rounds = self.settings.outer_max_attempts.max(1);

        for round in 1..=rounds {
            let final_round = round == rounds;
            let result = retry_with(
                &self.settings.policy,
                move |attempt| self.attempt(task_id, attempt, final_round, session, machine),
                |e: &AttemptError| e.is_retriable(),
                self.settings.jitter.as_fn(),
            )
            .await;

            let err = match result {
                Ok(payload) => return Ok(payload),
                Err(AttemptError::Auth(e)) => return Err(InvocationError::AuthAcquisition(e)),
                Err(AttemptError::State(e)) => return Err(state_error(e)),
                Err(AttemptError::Api(e)) => e,
            };

            match err.category() {
                ApiErrorCategory::NotFound => {
                    enter(machine, DriverState::Fail).map_err(state_error)?;
                    return Err(InvocationError::ResourceNotFound {
                        task_id: task_id.to_string(),
                    });
                }
                ApiErrorCategory::NonRetriable => {
                    enter(machine, DriverState::Fail).map_err(state_error)?;
                    return Err(InvocationError::NonRetriable(format!(
                        "failed to get task result: {err}"
                    )));
                }
                ApiErrorCategory::Auth | ApiErrorCategory::Retriable if round < rounds => {
                    warn!(
                        round,
                        rounds,
                        error = %err,
                        "fetch attempts exhausted, re-authenticating for another round"
                    );
                    *session.borrow_mut() = None;
                }
                ApiErrorCategory::Auth | ApiErrorCategory::Retriable => {
                    enter(machine, DriverState::Fail).map_err(state_error)?;
                    return Err(InvocationError::NonRetriable(format!(
                        "failed to get task result after {rounds} rounds: {err}"
                    )));
                }
            }
        }

        Err(InvocationError::NonRetriable(
            "no fetch attempt was made".into(),
        ))
    }

    /// One authenticate-if-needed + fetch. Decides, per error category,
    /// whether the next attempt needs fresh credentials or a coarse wait.
    /// Nothing waits after the very last attempt of the last round.
    async fn attempt(
        &self,
        task_id: &str,
        attempt: u32,
        final_round: bool,
        session: &RefCell<Option<Credentials>>,
        machine: &RefCell<StateMachine>,
    ) -> Result<Value, AttemptError> {
        let cached = session.borrow().clone();
        let credentials = match cached {
            Some(credentials) => credentials,
            None => {
                enter(machine, DriverState::Authenticating).map_err(AttemptError::State)?;
                match self.authenticator.authenticate().await {
                    Ok(credentials) => {
                        *session.borrow_mut() = Some(credentials.clone());
                        credentials
                    }
                    Err(e) => {
                        error!(error = %e, "authentication failed");
                        enter(machine, DriverState::Fail).map_err(AttemptError::State)?;
                        return Err(AttemptError::Auth(e));
                    }
                }
            }
        };

        enter(machine, DriverState::Fetching).map_err(AttemptError::State)?;
        let err = match self.fetcher.fetch_status(task_id, &credentials).await {
            Ok(payload) => return Ok(payload),
            Err(err) => err,
        };

        match err.category() {
            ApiErrorCategory::Auth => {
                warn!(attempt, error = %err, "GET TaskResults failed due to authentication error");
                *session.borrow_mut() = None;
            }
            ApiErrorCategory::Retriable => {
                error!(
                    attempt,
                    error = %err,
                    wait_secs = self.settings.wait_time.as_secs_f64(),
                    "GET TaskResults failed with retriable error"
                );
                let exhausted = final_round && attempt >= self.settings.policy.max_attempts();
                if !exhausted && !self.settings.wait_time.is_zero() {
                    sleep(self.settings.wait_time).await;
                }
                *session.borrow_mut() = None;
            }
            ApiErrorCategory::NotFound => {
                error!(attempt, error = %err, "GET TaskResults failed due to NotFound (404)");
            }
            ApiErrorCategory::NonRetriable => {
                error!(attempt, error = %err, "GET TaskResults failed with non-retriable error");
            }
        }
        Err(AttemptError::Api(err))
    }
}

/// Advances unless the machine is already in `next`.
fn enter(machine: &RefCell<StateMachine>, next: DriverState) -> Result<(), TransitionError> {
    let mut machine = machine.borrow_mut();
    if machine.state() == next {
        return Ok(());
    }
    machine.advance(next)
}

fn state_error(e: TransitionError) -> InvocationError {
    InvocationError::NonRetriable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;

    use serde_json::json;

    struct MockAuthenticator {
        calls: Cell<u32>,
        fail: bool,
    }

    impl MockAuthenticator {
        fn ok() -> Self {
            Self {
                calls: Cell::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Cell::new(0),
                fail: true,
            }
        }
    }

    impl Authenticator for MockAuthenticator {
        async fn authenticate(&self) -> Result<Credentials, AuthAcquisitionError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                Err(AuthAcquisitionError::GatewayRejected {
                    status: 500,
                    message: "gateway down".into(),
                })
            } else {
                Ok(Credentials::gateway_only(format!("token-{}", self.calls.get())))
            }
        }
    }

    /// Replays scripted responses; the last one repeats forever.
    struct ScriptedFetcher {
        script: RefCell<VecDeque<Result<Value, ApiError>>>,
        last: fn() -> Result<Value, ApiError>,
        calls: Cell<u32>,
        tokens: RefCell<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new(
            script: Vec<Result<Value, ApiError>>,
            last: fn() -> Result<Value, ApiError>,
        ) -> Self {
            Self {
                script: RefCell::new(script.into()),
                last,
                calls: Cell::new(0),
                tokens: RefCell::new(Vec::new()),
            }
        }

        fn always(last: fn() -> Result<Value, ApiError>) -> Self {
            Self::new(Vec::new(), last)
        }
    }

    impl StatusFetcher for ScriptedFetcher {
        async fn fetch_status(
            &self,
            _task_id: &str,
            credentials: &Credentials,
        ) -> Result<Value, ApiError> {
            self.calls.set(self.calls.get() + 1);
            self.tokens
                .borrow_mut()
                .push(credentials.gateway_token.clone());
            let next = self.script.borrow_mut().pop_front();
            next.unwrap_or_else(self.last)
        }
    }

    fn settings() -> DriverSettings {
        DriverSettings {
            policy: RetryPolicy::new(3),
            jitter: JitterDelay::new(Duration::ZERO, Duration::ZERO),
            wait_time: Duration::ZERO,
            outer_max_attempts: 2,
        }
    }

    fn driver(
        auth: MockAuthenticator,
        fetcher: ScriptedFetcher,
    ) -> InvocationDriver<MockAuthenticator, ScriptedFetcher> {
        driver_with(auth, fetcher, settings())
    }

    fn driver_with(
        auth: MockAuthenticator,
        fetcher: ScriptedFetcher,
        settings: DriverSettings,
    ) -> InvocationDriver<MockAuthenticator, ScriptedFetcher> {
        InvocationDriver::new(
            Vendor::SailPoint,
            PayloadSchema::default(),
            auth,
            fetcher,
            settings,
        )
    }

    fn coarse_wait(wait_time: Duration) -> DriverSettings {
        DriverSettings {
            wait_time,
            ..settings()
        }
    }

    fn request() -> InvocationRequest {
        InvocationRequest::new("tr-42", true)
    }

    fn success() -> Result<Value, ApiError> {
        Ok(json!({"terminated": false, "completionStatus": "SUCCESS"}))
    }

    fn running() -> Result<Value, ApiError> {
        Ok(json!({"terminated": false}))
    }

    fn server_error() -> Result<Value, ApiError> {
        Err(ApiError::from_status(503, "busy"))
    }

    fn unauthorized() -> Result<Value, ApiError> {
        Err(ApiError::from_status(401, "expired"))
    }

    fn not_found() -> Result<Value, ApiError> {
        Err(ApiError::from_status(404, "no such task"))
    }

    #[tokio::test]
    async fn success_payload_completes() {
        let d = driver(MockAuthenticator::ok(), ScriptedFetcher::always(success));
        let report = d.invoke(&request()).await.unwrap();

        assert_eq!(report.role_onboarding_status, "COMPLETED");
        assert_eq!(report.task_id.as_deref(), Some("tr-42"));
        assert!(report.warnings.is_empty());
        assert_eq!(
            report.state_transitions,
            vec![
                DriverState::Authenticating,
                DriverState::Fetching,
                DriverState::Classifying,
                DriverState::Done
            ]
        );
        assert_eq!(d.authenticator.calls.get(), 1);
        assert_eq!(d.fetcher.calls.get(), 1);
    }

    #[tokio::test]
    async fn running_workflow_is_not_completed() {
        let d = driver(MockAuthenticator::ok(), ScriptedFetcher::always(running));
        let err = d.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, InvocationError::NotCompleted(_)));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn invalid_payload_is_not_completed() {
        fn garbage() -> Result<Value, ApiError> {
            Ok(json!({"terminated": true, "completionStatus": "SUCCESS"}))
        }
        let d = driver(MockAuthenticator::ok(), ScriptedFetcher::always(garbage));
        let err = d.invoke(&request()).await.unwrap_err();
        assert_eq!(err.error_type(), "InvocationNotCompletedError");
    }

    #[tokio::test]
    async fn not_found_escalates_without_retry() {
        let d = driver(MockAuthenticator::ok(), ScriptedFetcher::always(not_found));
        let err = d.invoke(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            InvocationError::ResourceNotFound { ref task_id } if task_id == "tr-42"
        ));
        assert_eq!(d.fetcher.calls.get(), 1);
        assert_eq!(d.authenticator.calls.get(), 1);
    }

    #[tokio::test]
    async fn auth_error_reauthenticates_then_completes() {
        let fetcher = ScriptedFetcher::new(vec![unauthorized()], success);
        let d = driver(MockAuthenticator::ok(), fetcher);
        let report = d.invoke(&request()).await.unwrap();

        assert_eq!(report.role_onboarding_status, "COMPLETED");
        assert_eq!(d.authenticator.calls.get(), 2);
        assert_eq!(d.fetcher.calls.get(), 2);
        assert_eq!(*d.fetcher.tokens.borrow(), vec!["token-1", "token-2"]);
        assert_eq!(
            report.state_transitions,
            vec![
                DriverState::Authenticating,
                DriverState::Fetching,
                DriverState::Authenticating,
                DriverState::Fetching,
                DriverState::Classifying,
                DriverState::Done
            ]
        );
    }

    #[tokio::test]
    async fn retriable_error_refreshes_credentials_and_recovers() {
        let fetcher = ScriptedFetcher::new(vec![server_error()], success);
        let d = driver(MockAuthenticator::ok(), fetcher);
        d.invoke(&request()).await.unwrap();
        assert_eq!(d.authenticator.calls.get(), 2);
        assert_eq!(d.fetcher.calls.get(), 2);
    }

    #[tokio::test]
    async fn persistent_retriable_errors_exhaust_both_tiers() {
        let d = driver(MockAuthenticator::ok(), ScriptedFetcher::always(server_error));
        let err = d.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, InvocationError::NonRetriable(_)));
        // 3 engine attempts x 2 outer rounds.
        assert_eq!(d.fetcher.calls.get(), 6);
        assert_eq!(d.authenticator.calls.get(), 6);
    }

    #[tokio::test]
    async fn auth_error_surviving_engine_gets_one_more_round() {
        let fetcher = ScriptedFetcher::new(
            vec![unauthorized(), unauthorized(), unauthorized()],
            success,
        );
        let d = driver(MockAuthenticator::ok(), fetcher);
        d.invoke(&request()).await.unwrap();
        assert_eq!(d.fetcher.calls.get(), 4);
        assert_eq!(d.authenticator.calls.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_errors_skip_the_coarse_wait() {
        let fetcher = ScriptedFetcher::new(vec![unauthorized()], success);
        let d = driver_with(MockAuthenticator::ok(), fetcher, coarse_wait(Duration::from_secs(10)));
        let started = tokio::time::Instant::now();
        d.invoke(&request()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(d.authenticator.calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retriable_errors_sleep_the_coarse_wait() {
        let fetcher = ScriptedFetcher::new(vec![server_error()], success);
        let d = driver_with(MockAuthenticator::ok(), fetcher, coarse_wait(Duration::from_secs(10)));
        let started = tokio::time::Instant::now();
        d.invoke(&request()).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(11), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_escalates_without_a_trailing_wait() {
        let d = driver_with(
            MockAuthenticator::ok(),
            ScriptedFetcher::always(server_error),
            coarse_wait(Duration::from_secs(10)),
        );
        let started = tokio::time::Instant::now();
        let err = d.invoke(&request()).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, InvocationError::NonRetriable(_)));
        assert_eq!(d.fetcher.calls.get(), 6);
        // Six failures, five of them followed by another attempt.
        assert!(elapsed >= Duration::from_secs(50), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(60), "{elapsed:?}");
    }

    #[tokio::test]
    async fn non_retriable_api_error_escalates() {
        fn rejected() -> Result<Value, ApiError> {
            Err(ApiError::Rejected("bad url".into()))
        }
        let d = driver(MockAuthenticator::ok(), ScriptedFetcher::always(rejected));
        let err = d.invoke(&request()).await.unwrap_err();
        assert_eq!(err.error_type(), "NonRetriableInvocationError");
        assert_eq!(d.fetcher.calls.get(), 1);
    }

    #[tokio::test]
    async fn authentication_failure_is_fatal_without_fetching() {
        let d = driver(MockAuthenticator::failing(), ScriptedFetcher::always(success));
        let err = d.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, InvocationError::AuthAcquisition(_)));
        assert!(!err.is_retriable());
        assert_eq!(d.authenticator.calls.get(), 1);
        assert_eq!(d.fetcher.calls.get(), 0);
    }

    #[tokio::test]
    async fn duplicate_entity_failures_fail_the_workflow() {
        fn failed_roles() -> Result<Value, ApiError> {
            Ok(json!({
                "terminated": false,
                "completionStatus": "SUCCESS",
                "failures": [
                    {"entity": {"type": "ROLE", "name": "X"}, "message": "m1"},
                    {"entity": {"type": "ROLE", "name": "X"}, "message": "m2"}
                ]
            }))
        }
        let d = driver(MockAuthenticator::ok(), ScriptedFetcher::always(failed_roles));
        match d.invoke(&request()).await.unwrap_err() {
            InvocationError::WorkflowFailed { errors, .. } => {
                assert_eq!(errors, vec![r#"ROLE with name 'X': ["m1", "m2"]"#.to_string()]);
            }
            other => panic!("expected WorkflowFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminated_workflow_fails() {
        fn terminated() -> Result<Value, ApiError> {
            Ok(json!({"terminated": true}))
        }
        let d = driver(MockAuthenticator::ok(), ScriptedFetcher::always(terminated));
        let err = d.invoke(&request()).await.unwrap_err();
        assert_eq!(err.error_type(), "WorkflowFailedError");
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn success_with_warnings_reports_them() {
        fn warned() -> Result<Value, ApiError> {
            Ok(json!({
                "terminated": false,
                "completionStatus": "SUCCESS",
                "failures": [{"entity": {"type": "GROUP", "name": "G"}, "message": "slow", "severity": "WARNING"}]
            }))
        }
        let d = driver(MockAuthenticator::ok(), ScriptedFetcher::always(warned));
        let report = d.invoke(&request()).await.unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("GROUP with name 'G'"));
    }

    #[tokio::test]
    async fn disabled_invocation_bypasses_everything() {
        let d = driver(MockAuthenticator::ok(), ScriptedFetcher::always(success));
        let report = d
            .invoke(&InvocationRequest::new("", false))
            .await
            .unwrap();
        assert_eq!(report.role_onboarding_status, "COMPLETED");
        assert!(report.payload.is_none());
        assert_eq!(d.authenticator.calls.get(), 0);
        assert_eq!(d.fetcher.calls.get(), 0);
    }

    #[tokio::test]
    async fn empty_task_id_is_invalid_input() {
        let d = driver(MockAuthenticator::ok(), ScriptedFetcher::always(success));
        let err = d
            .invoke(&InvocationRequest::new("  ", true))
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::InvalidInput(_)));
        assert_eq!(d.authenticator.calls.get(), 0);
    }

    #[test]
    fn settings_follow_config() {
        let config = PollerConfig::default();
        let settings = DriverSettings::from_config(&config);
        assert_eq!(settings.policy.max_attempts(), 3);
        assert_eq!(settings.wait_time, Duration::from_secs(10));
        assert_eq!(settings.outer_max_attempts, 2);
    }
}
