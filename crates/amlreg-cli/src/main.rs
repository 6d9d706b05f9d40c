//! aml-registermodel - register a trained model from CI
//!
//! The `amlreg` command runs once per workflow step:
//!
//! - masks the service principal values in the runner log
//! - reads the parameter and workspace config files from the checkout
//! - resolves the run (or local file) that holds the model
//! - compares it against the production model and registers it
//! - exposes `model_name`, `model_version` and `model_id` as step outputs

mod inputs;
mod workflow;

use std::io::Write;
use std::process::ExitCode;

use amlreg_azure::AzureConnector;
use amlreg_core::{RegisterError, RegistrationPipeline, RegistrationReport};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, Level};

use crate::inputs::{build_config, mask_credentials, Cli};
use crate::workflow::WorkflowCommands;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut commands = WorkflowCommands::stdout(cli.output_file.clone());

    mask_credentials(&cli.azure_credentials, &mut commands)
        .context("Failed to write mask commands")?;

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    amlreg_core::init_tracing(cli.json, level);

    match register(&cli).await {
        Ok(report) => {
            publish(&report, &mut commands)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(category = e.category(), "{}", e);
            commands
                .error(&e.to_string())
                .context("Failed to write error command")?;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn register(cli: &Cli) -> Result<RegistrationReport, RegisterError> {
    let config = build_config(cli)?;
    info!(
        mode = config.mode.name(),
        model = %config.model_name(),
        parameters = %cli.parameters_path().display(),
        "Loaded configuration"
    );

    let connector = AzureConnector::new(cli.endpoints())
        .map_err(|e| RegisterError::from_provider("could not create HTTP client", e))?;
    RegistrationPipeline::run(&connector, &config).await
}

fn publish<W: Write>(report: &RegistrationReport, commands: &mut WorkflowCommands<W>) -> Result<()> {
    if let Ok(json) = serde_json::to_string(report) {
        debug!(report = %json, "Registration report");
    }
    for (name, value) in report.outputs() {
        commands
            .set_output(name, &value)
            .with_context(|| format!("Failed to set output {}", name))?;
    }
    info!(
        model = %report.result.name,
        version = report.result.version,
        run_id = report.run_id.as_deref().unwrap_or("-"),
        artifact = %report.artifact_path,
        "Successfully registered model"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use amlreg_core::{ComparisonOutcome, GateDecision, RegistrationResult};

    #[test]
    fn test_publish_writes_outputs() {
        let report = RegistrationReport {
            result: RegistrationResult {
                name: "churn".to_string(),
                version: 4,
                id: "churn:4".to_string(),
                created_at: None,
            },
            mode: "remote_run",
            run_id: Some("run-1".to_string()),
            gate: GateDecision::Compared {
                outcome: ComparisonOutcome::Passed,
            },
            artifact_path: "outputs/model.pkl".to_string(),
        };

        let mut commands = WorkflowCommands::new(Vec::new(), None);
        publish(&report, &mut commands).unwrap();
        let out = String::from_utf8(commands.into_inner()).unwrap();
        assert_eq!(
            out.lines().collect::<Vec<_>>(),
            vec![
                "::set-output name=model_name::churn",
                "::set-output name=model_version::4",
                "::set-output name=model_id::churn:4",
            ]
        );
    }
}
