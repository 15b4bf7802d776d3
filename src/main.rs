use std::io::Read;
use std::path::Path;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use rolepoll::cli::{Cli, Command};
use rolepoll::config::{LogFormat, PollerConfig};
use rolepoll::error::InvocationError;
use rolepoll::event::{InvocationEvent, InvocationRequest};
use rolepoll::logging::init_logging;
use rolepoll::orchestrator::{DriverSettings, InvocationDriver};
use rolepoll::response::process_payload;
use rolepoll::state_machine::InvocationReport;
use rolepoll::ui::Reporter;
use rolepoll::vendor::{HttpStatusFetcher, TokenAuthenticator};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let reporter = Reporter::new();

    match run(cli, &reporter).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error_type = err.error_type(), error = %err, "invocation failed");
            reporter.failure(&err);
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli, reporter: &Reporter) -> Result<(), InvocationError> {
    if cli.command.is_bypassed() {
        init_logging(if cli.verbose { "debug" } else { "info" }, LogFormat::Text);
        bypass(&cli.vendor.unwrap_or_default().to_string(), reporter);
        return Ok(());
    }

    let mut config = PollerConfig::load(cli.config.as_deref())
        .map_err(|e| InvocationError::NonRetriable(format!("configuration error: {e:#}")))?;
    if let Some(vendor) = cli.vendor {
        config.vendor = vendor;
    }
    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    init_logging(level, config.log_format);

    match cli.command {
        Command::Invoke { event } => {
            let raw = read_json(&event)?;
            let request = InvocationEvent::new(&raw, config.vendor)
                .into_request()
                .map_err(|e| InvocationError::InvalidInput(e.to_string()))?;
            invoke(&config, &request, reporter).await
        }
        Command::Poll { task_id, disabled } => {
            invoke(&config, &InvocationRequest::new(task_id, !disabled), reporter).await
        }
        Command::Classify { payload } => {
            let payload = read_json(&payload.to_string_lossy())?;
            let result = process_payload(&payload, &config.schema());
            reporter.classification(&result);
            Ok(())
        }
    }
}

async fn invoke(
    config: &PollerConfig,
    request: &InvocationRequest,
    reporter: &Reporter,
) -> Result<(), InvocationError> {
    // Disabled environments may carry no credentials at all.
    if !request.enabled {
        bypass(&config.vendor.to_string(), reporter);
        return Ok(());
    }

    config
        .validate()
        .map_err(|e| InvocationError::NonRetriable(format!("configuration error: {e:#}")))?;
    let authenticator = TokenAuthenticator::new(config.vendor, &config.gateway, &config.vendor_api)?;
    let fetcher = HttpStatusFetcher::new(config.vendor, &config.gateway, &config.vendor_api)
        .map_err(|e| InvocationError::NonRetriable(format!("failed to build HTTP client: {e}")))?;

    let driver = InvocationDriver::new(
        config.vendor,
        config.schema(),
        authenticator,
        fetcher,
        DriverSettings::from_config(config),
    );
    let report = driver.invoke(request).await?;
    reporter.report(&report);
    Ok(())
}

fn bypass(vendor: &str, reporter: &Reporter) {
    info!(vendor, "vendor API call is not enabled, returning completed");
    reporter.report(&InvocationReport::bypassed(
        Uuid::new_v4().to_string(),
        Utc::now(),
    ));
}

/// Reads a JSON document from a file, or from stdin when `source` is `-`.
fn read_json(source: &str) -> Result<Value, InvocationError> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| InvocationError::InvalidInput(format!("failed to read stdin: {e}")))?;
        buf
    } else {
        std::fs::read_to_string(Path::new(source))
            .map_err(|e| InvocationError::InvalidInput(format!("failed to read {source}: {e}")))?
    };
    serde_json::from_str(&text)
        .map_err(|e| InvocationError::InvalidInput(format!("{source} is not valid JSON: {e}")))
}
