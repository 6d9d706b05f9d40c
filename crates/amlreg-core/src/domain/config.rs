//! Validated configuration for one registration.
//!
//! Built once at the process boundary from the environment, the credential
//! secret and the repository's config files, then handed to
//! [`RegistrationPipeline`](crate::RegistrationPipeline) by value.

use std::path::{Path, PathBuf};

use amlreg_state::{AzureCredentials, Tags, WorkspaceLocation};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;

use super::error::{RegisterError, Result};
use super::parameters::{RegisterParameters, MAX_MODEL_NAME_LEN};

/// Keys the credential JSON must contain.
const REQUIRED_CREDENTIAL_KEYS: [&str; 4] = ["tenantId", "clientId", "clientSecret", "subscriptionId"];

/// Where the model comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationMode {
    /// Register a file produced by a run in the workspace.
    RemoteRun { experiment: String, run_id: String },
    /// Register a file from the build's checkout.
    LocalArtifact,
}

impl RegistrationMode {
    /// Remote mode needs both inputs; blank values count as absent.
    pub fn determine(experiment: Option<&str>, run_id: Option<&str>) -> Self {
        fn present(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|v| !v.is_empty())
        }

        match (present(experiment), present(run_id)) {
            (Some(experiment), Some(run_id)) => RegistrationMode::RemoteRun {
                experiment: experiment.to_string(),
                run_id: run_id.to_string(),
            },
            _ => RegistrationMode::LocalArtifact,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RegistrationMode::RemoteRun { .. } => "remote_run",
            RegistrationMode::LocalArtifact => "local_artifact",
        }
    }
}

/// The CI build invoking the action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildContext {
    pub actor: String,
    /// `owner/repo`
    pub repository: String,
    pub sha: String,
    /// Full ref, e.g. `refs/heads/main`
    pub git_ref: String,
}

impl BuildContext {
    /// Tags describing the build, used when no run is attached.
    pub fn default_tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert("actor".to_string(), self.actor.clone());
        tags.insert("repository".to_string(), self.repository.clone());
        tags.insert("commit".to_string(), self.sha.clone());
        tags.insert("ref".to_string(), self.git_ref.clone());
        tags
    }

    pub fn default_model_name(&self) -> String {
        default_model_name(&self.repository, &self.git_ref)
    }
}

/// `<repository>-<branch>`, cut to the registry's name length limit.
///
/// The repository part drops the owner, the branch part drops the
/// `refs/heads/` or `refs/tags/` prefix. No other cleanup happens: a branch
/// such as `feature/x` or a ref such as `refs/pull/1/merge` keeps its `/`,
/// and an empty build context yields `-`. The registry rejects those names,
/// so such builds need an explicit `model_name`.
pub fn default_model_name(repository: &str, git_ref: &str) -> String {
    let repo = repository.rsplit('/').next().unwrap_or(repository);
    let branch = git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("refs/tags/"))
        .unwrap_or(git_ref);
    format!("{}-{}", repo, branch)
        .chars()
        .take(MAX_MODEL_NAME_LEN)
        .collect()
}

/// Parse the service principal JSON (`az ad sp create-for-rbac --sdk-auth`).
///
/// Error messages name keys only, never values.
pub fn parse_credentials(json: &str) -> Result<AzureCredentials> {
    let value: Value = serde_json::from_str(json).map_err(|_| {
        RegisterError::configuration(
            "azure credentials are not valid JSON; paste the output of \
             `az ad sp create-for-rbac --sdk-auth` as the AZURE_CREDENTIALS secret",
        )
    })?;

    let object = value.as_object().ok_or_else(|| {
        RegisterError::configuration("azure credentials must be a JSON object")
    })?;

    let field = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let missing: Vec<&str> = REQUIRED_CREDENTIAL_KEYS
        .iter()
        .copied()
        .filter(|key| field(*key).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(RegisterError::configuration(format!(
            "required parameter(s) not found in your azure credentials: {}",
            missing.join(", ")
        )));
    }

    Ok(AzureCredentials {
        tenant_id: field("tenantId").unwrap_or_default(),
        client_id: field("clientId").unwrap_or_default(),
        client_secret: SecretString::from(field("clientSecret").unwrap_or_default()),
        subscription_id: field("subscriptionId").unwrap_or_default(),
    })
}

#[derive(Deserialize)]
struct WorkspaceConfigFile {
    subscription_id: Option<String>,
    resource_group: Option<String>,
    workspace_name: Option<String>,
}

/// Read the workspace config file written by the workspace action.
///
/// `subscription_id` falls back to the credentials' subscription.
pub fn load_workspace_location(path: &Path, fallback_subscription: &str) -> Result<WorkspaceLocation> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        RegisterError::configuration(format!(
            "could not read workspace config {}: {}; run the workspace action first",
            path.display(),
            e
        ))
    })?;
    let file: WorkspaceConfigFile = serde_json::from_str(&json).map_err(|e| {
        RegisterError::configuration(format!(
            "workspace config {} is not valid: {}",
            path.display(),
            e
        ))
    })?;

    let require = |value: Option<String>, key: &str| {
        value.filter(|v| !v.is_empty()).ok_or_else(|| {
            RegisterError::configuration(format!(
                "workspace config {} is missing '{}'",
                path.display(),
                key
            ))
        })
    };

    Ok(WorkspaceLocation {
        subscription_id: file
            .subscription_id
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| fallback_subscription.to_string()),
        resource_group: require(file.resource_group, "resource_group")?,
        workspace_name: require(file.workspace_name, "workspace_name")?,
    })
}

/// Everything one registration needs.
#[derive(Debug)]
pub struct RegistrationConfig {
    pub credentials: AzureCredentials,
    pub location: WorkspaceLocation,
    pub mode: RegistrationMode,
    pub parameters: RegisterParameters,
    pub build: BuildContext,
    /// Checkout root; local artifacts are searched here.
    pub workspace_root: PathBuf,
}

impl RegistrationConfig {
    /// Configured model name or the one derived from the build.
    pub fn model_name(&self) -> String {
        self.parameters
            .model_name
            .clone()
            .unwrap_or_else(|| self.build.default_model_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_mode_requires_both_inputs() {
        assert_eq!(
            RegistrationMode::determine(Some("exp"), Some("run-1")),
            RegistrationMode::RemoteRun {
                experiment: "exp".to_string(),
                run_id: "run-1".to_string()
            }
        );
        assert_eq!(
            RegistrationMode::determine(Some("exp"), None),
            RegistrationMode::LocalArtifact
        );
        assert_eq!(
            RegistrationMode::determine(None, Some("run-1")),
            RegistrationMode::LocalArtifact
        );
        assert_eq!(
            RegistrationMode::determine(Some(""), Some("  ")),
            RegistrationMode::LocalArtifact
        );
    }

    #[test]
    fn test_default_model_name() {
        assert_eq!(
            default_model_name("octo/churn-model", "refs/heads/main"),
            "churn-model-main"
        );
        assert_eq!(default_model_name("octo/app", "refs/tags/v1"), "app-v1");
    }

    #[test]
    fn test_default_model_name_keeps_nested_refs() {
        assert_eq!(
            default_model_name("octo/app", "refs/heads/feature/x"),
            "app-feature/x"
        );
        assert_eq!(
            default_model_name("octo/app", "refs/pull/1/merge"),
            "app-refs/pull/1/merge"
        );
        assert_eq!(default_model_name("", ""), "-");
    }

    #[test]
    fn test_default_model_name_truncates_to_limit() {
        let repo = format!("octo/{}", "r".repeat(40));
        let name = default_model_name(&repo, "refs/heads/main");
        assert_eq!(name.chars().count(), MAX_MODEL_NAME_LEN);
        assert_eq!(name, default_model_name(&repo, "refs/heads/main"));
        assert!(name.starts_with("rrrr"));
    }

    #[test]
    fn test_build_context_default_tags() {
        let ctx = BuildContext {
            actor: "octocat".to_string(),
            repository: "octo/app".to_string(),
            sha: "abc123".to_string(),
            git_ref: "refs/heads/main".to_string(),
        };
        let tags = ctx.default_tags();
        assert_eq!(tags["actor"], "octocat");
        assert_eq!(tags["repository"], "octo/app");
        assert_eq!(tags["commit"], "abc123");
        assert_eq!(tags["ref"], "refs/heads/main");
        assert_eq!(ctx.default_model_name(), "app-main");
    }

    #[test]
    fn test_parse_credentials_ok() {
        let creds = parse_credentials(
            r#"{"tenantId":"t","clientId":"c","clientSecret":"s","subscriptionId":"sub"}"#,
        )
        .unwrap();
        assert_eq!(creds.tenant_id, "t");
        assert_eq!(creds.client_secret.expose_secret(), "s");
        assert_eq!(creds.subscription_id, "sub");
    }

    #[test]
    fn test_parse_credentials_missing_keys_named() {
        let err = parse_credentials(r#"{"tenantId":"t","clientSecret":"hunter2"}"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("clientId"));
        assert!(msg.contains("subscriptionId"));
        assert!(!msg.contains("hunter2"));
    }

    #[test]
    fn test_parse_credentials_malformed_does_not_echo() {
        let err = parse_credentials("{\"clientSecret\": \"hunter2\"").unwrap_err();
        assert!(matches!(err, RegisterError::Configuration(_)));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn test_load_workspace_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aml_arm_config.json");
        std::fs::write(
            &path,
            r#"{"resource_group":"rg","workspace_name":"ws"}"#,
        )
        .unwrap();

        let location = load_workspace_location(&path, "sub-from-creds").unwrap();
        assert_eq!(location.subscription_id, "sub-from-creds");
        assert_eq!(location.resource_group, "rg");
        assert_eq!(location.workspace_name, "ws");
    }

    #[test]
    fn test_load_workspace_location_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aml_arm_config.json");
        std::fs::write(&path, r#"{"subscription_id":"s","resource_group":"rg"}"#).unwrap();

        let err = load_workspace_location(&path, "x").unwrap_err();
        assert!(err.to_string().contains("workspace_name"));
    }

    #[test]
    fn test_load_workspace_location_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_workspace_location(&dir.path().join("nope.json"), "x").unwrap_err();
        assert!(matches!(err, RegisterError::Configuration(_)));
    }
}
