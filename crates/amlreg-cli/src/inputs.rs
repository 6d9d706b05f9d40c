//! Action inputs and their assembly into a [`RegistrationConfig`].

use std::io::Write;
use std::path::{Path, PathBuf};

use amlreg_core::{
    load_workspace_location, parse_credentials, BuildContext, RegisterError, RegisterParameters,
    RegistrationConfig, RegistrationMode,
};
use amlreg_azure::{AzureEndpoints, DEFAULT_AUTHORITY_HOST, DEFAULT_MANAGEMENT_HOST};
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};
use serde_json::Value;

use crate::workflow::WorkflowCommands;

/// Keys of the credential JSON whose values are masked.
const MASKED_CREDENTIAL_KEYS: [&str; 4] = ["tenantId", "clientId", "clientSecret", "subscriptionId"];

const DEFAULT_PARAMETERS_FILE: &str = "registermodel.json";

#[derive(Parser)]
#[command(name = "amlreg")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Register a model in an Azure Machine Learning workspace, gated on its metrics",
    long_about = None
)]
pub struct Cli {
    /// Parameter file name inside the config directory
    #[arg(long, env = "INPUT_PARAMETERSFILE", default_value = DEFAULT_PARAMETERS_FILE)]
    pub parameters_file: String,

    /// Service principal JSON (`az ad sp create-for-rbac --sdk-auth`)
    #[arg(long, env = "INPUT_AZURECREDENTIALS", hide_env_values = true)]
    pub azure_credentials: String,

    /// Experiment of the run that produced the model
    #[arg(long, env = "INPUT_EXPERIMENTNAME")]
    pub experiment_name: Option<String>,

    /// Run that produced the model; without it a local file is registered
    #[arg(long, env = "INPUT_RUNID")]
    pub run_id: Option<String>,

    /// Repository checkout
    #[arg(long, env = "GITHUB_WORKSPACE", default_value = ".")]
    pub workspace_root: PathBuf,

    /// Config directory, relative to the checkout
    #[arg(long, default_value = ".ml/.azure")]
    pub config_dir: PathBuf,

    /// Workspace config written by the workspace action
    #[arg(long, default_value = "aml_arm_config.json")]
    pub workspace_config_file: String,

    #[arg(long, env = "GITHUB_ACTOR", default_value = "")]
    pub actor: String,

    /// `owner/repo`
    #[arg(long, env = "GITHUB_REPOSITORY", default_value = "")]
    pub repository: String,

    #[arg(long, env = "GITHUB_SHA", default_value = "")]
    pub sha: String,

    /// Full git ref, e.g. `refs/heads/main`
    #[arg(long, env = "GITHUB_REF", default_value = "")]
    pub git_ref: String,

    /// File receiving step outputs
    #[arg(long, env = "GITHUB_OUTPUT")]
    pub output_file: Option<PathBuf>,

    #[arg(long, env = "AZURE_AUTHORITY_HOST", default_value = DEFAULT_AUTHORITY_HOST)]
    pub authority_host: String,

    #[arg(long, env = "AZURE_RESOURCE_MANAGER_HOST", default_value = DEFAULT_MANAGEMENT_HOST)]
    pub management_host: String,

    /// Workspace data-plane host; derived from the workspace region when unset
    #[arg(long, env = "AMLREG_SERVICE_URL")]
    pub service_url: Option<String>,

    /// Enable verbose output; the runner sets `RUNNER_DEBUG=1` on debug reruns
    #[arg(
        short,
        long,
        env = "RUNNER_DEBUG",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    fn config_path(&self, file: &str) -> PathBuf {
        self.workspace_root.join(&self.config_dir).join(file)
    }

    pub fn parameters_path(&self) -> PathBuf {
        let file = match self.parameters_file.trim() {
            "" => DEFAULT_PARAMETERS_FILE,
            name => name,
        };
        self.config_path(file)
    }

    pub fn workspace_config_path(&self) -> PathBuf {
        self.config_path(&self.workspace_config_file)
    }

    pub fn build_context(&self) -> BuildContext {
        BuildContext {
            actor: self.actor.clone(),
            repository: self.repository.clone(),
            sha: self.sha.clone(),
            git_ref: self.git_ref.clone(),
        }
    }

    pub fn endpoints(&self) -> AzureEndpoints {
        AzureEndpoints {
            authority_host: self.authority_host.clone(),
            management_host: self.management_host.clone(),
            service_url: self.service_url.clone().filter(|u| !u.trim().is_empty()),
        }
    }
}

/// Announce every credential value to the runner's log masking.
///
/// Runs on the raw JSON so values are masked even when the credentials
/// turn out to be incomplete.
pub fn mask_credentials<W: Write>(
    json: &str,
    commands: &mut WorkflowCommands<W>,
) -> std::io::Result<()> {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(json) else {
        return Ok(());
    };
    for key in MASKED_CREDENTIAL_KEYS {
        if let Some(value) = object.get(key).and_then(Value::as_str) {
            commands.add_mask(value)?;
        }
    }
    Ok(())
}

/// Validate all inputs into one configuration.
///
/// Credentials must already have been masked.
pub fn build_config(cli: &Cli) -> Result<RegistrationConfig, RegisterError> {
    let credentials = parse_credentials(&cli.azure_credentials)?;
    let location = load_workspace_location(&cli.workspace_config_path(), &credentials.subscription_id)?;
    let parameters = RegisterParameters::load(&cli.parameters_path())?;
    let mode = RegistrationMode::determine(cli.experiment_name.as_deref(), cli.run_id.as_deref());

    Ok(RegistrationConfig {
        credentials,
        location,
        mode,
        parameters,
        build: cli.build_context(),
        workspace_root: absolute(&cli.workspace_root),
    })
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
