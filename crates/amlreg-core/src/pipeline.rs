//! Registration orchestration.
//!
//! `connect → mode → [resolve run → gate → model path] | [local model path]
//! → metadata → register`. Every step runs once, in order; the first
//! failure ends the invocation.

use std::path::PathBuf;

use amlreg_state::{
    ArtifactSource, RegistrationResult, RunHandle, SharedRun, WorkspaceConnector, WorkspaceHandle,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::comparator::MetricComparator;
use crate::domain::{ComparisonOutcome, RegisterError, RegistrationConfig, RegistrationMode, Result};
use crate::metadata::build_artifact;
use crate::model_path::ModelPathResolver;
use crate::resolver::RunTypeResolver;

/// What happened at the metric gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// `force_registration` was set.
    Forced,
    /// Local artifacts carry no metrics to compare.
    NotApplicable,
    /// The comparison ran and let the model through.
    Compared { outcome: ComparisonOutcome },
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationReport {
    pub result: RegistrationResult,
    /// `remote_run` or `local_artifact`
    pub mode: &'static str,
    /// Leaf run the model file came from (remote mode only).
    pub run_id: Option<String>,
    pub gate: GateDecision,
    /// Run-relative path or local filesystem path of the registered file.
    pub artifact_path: String,
}

impl RegistrationReport {
    /// Step outputs exposed to later workflow steps.
    pub fn outputs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("model_name", self.result.name.clone()),
            ("model_version", self.result.version.to_string()),
            ("model_id", self.result.id.clone()),
        ]
    }
}

/// Orchestrates one registration.
pub struct RegistrationPipeline;

impl RegistrationPipeline {
    /// Connect to the workspace and register the configured model.
    pub async fn run(
        connector: &dyn WorkspaceConnector,
        config: &RegistrationConfig,
    ) -> Result<RegistrationReport> {
        info!(
            workspace = %config.location.workspace_name,
            resource_group = %config.location.resource_group,
            "Connecting to workspace"
        );
        let workspace = connector
            .connect(&config.credentials, &config.location)
            .await
            .map_err(|e| {
                RegisterError::from_provider(
                    &format!(
                        "could not connect to workspace '{}'",
                        config.location.workspace_name
                    ),
                    e,
                )
            })?;

        Self::register(workspace.as_ref(), config).await
    }

    /// Register against an already connected workspace.
    pub async fn register(
        workspace: &dyn WorkspaceHandle,
        config: &RegistrationConfig,
    ) -> Result<RegistrationReport> {
        let model_name = config.model_name();
        info!(model = %model_name, mode = config.mode.name(), "Registering model");

        let (source, default_tags, run_id, gate) = match &config.mode {
            RegistrationMode::RemoteRun { experiment, run_id } => {
                let leaf = Self::resolve_run(workspace, config, experiment, run_id).await?;
                let gate = Self::gate(workspace, leaf.as_ref(), config, &model_name).await?;
                let source = Self::run_artifact(leaf.as_ref(), config).await?;
                let tags = leaf.tags().await.map_err(|e| {
                    RegisterError::from_provider(
                        &format!("could not load tags of run {}", leaf.id()),
                        e,
                    )
                })?;
                (source, tags, Some(leaf.id().to_string()), gate)
            }
            RegistrationMode::LocalArtifact => {
                let path = Self::local_artifact(config)?;
                (
                    ArtifactSource::Local { path },
                    config.build.default_tags(),
                    None,
                    GateDecision::NotApplicable,
                )
            }
        };

        let artifact_path = match &source {
            ArtifactSource::Run { path, .. } => path.clone(),
            ArtifactSource::Local { path } => path.display().to_string(),
        };

        let artifact = build_artifact(
            workspace,
            &config.parameters,
            &model_name,
            source,
            default_tags,
        )
        .await?;
        debug!(
            tags = artifact.tags.len(),
            properties = artifact.properties.len(),
            datasets = artifact.datasets.len(),
            "Built model metadata"
        );

        let result = workspace.register_model(artifact).await.map_err(|e| {
            RegisterError::from_provider(
                &format!("model registration failed for '{}'", model_name),
                e,
            )
        })?;

        info!(
            model = %result.name,
            version = result.version,
            id = %result.id,
            "Model registered"
        );

        Ok(RegistrationReport {
            result,
            mode: config.mode.name(),
            run_id,
            gate,
            artifact_path,
        })
    }

    async fn resolve_run(
        workspace: &dyn WorkspaceHandle,
        config: &RegistrationConfig,
        experiment: &str,
        run_id: &str,
    ) -> Result<SharedRun> {
        debug!(experiment = %experiment, run_id = %run_id, "Loading run");
        let run = workspace.get_run(experiment, run_id).await.map_err(|e| {
            if e.is_not_found() {
                RegisterError::configuration(format!(
                    "could not find run '{}' in experiment '{}'; check the experiment name and run id",
                    run_id, experiment
                ))
            } else {
                RegisterError::from_provider(&format!("could not load run '{}'", run_id), e)
            }
        })?;

        RunTypeResolver::resolve(run, config.parameters.pipeline_child_run_name.as_deref()).await
    }

    async fn gate(
        workspace: &dyn WorkspaceHandle,
        leaf: &dyn RunHandle,
        config: &RegistrationConfig,
        model_name: &str,
    ) -> Result<GateDecision> {
        if config.parameters.force_registration {
            warn!(model = %model_name, "force_registration is set, skipping metric comparison");
            return Ok(GateDecision::Forced);
        }

        let spec = config.parameters.metric_spec()?;
        let outcome = MetricComparator::compare(workspace, leaf, model_name, &spec)
            .await?
            .into_gate()?;
        Ok(GateDecision::Compared { outcome })
    }

    async fn run_artifact(leaf: &dyn RunHandle, config: &RegistrationConfig) -> Result<ArtifactSource> {
        let files = leaf.output_files().await.map_err(|e| {
            RegisterError::from_provider(&format!("could not list files of run {}", leaf.id()), e)
        })?;
        let path = ModelPathResolver::resolve(&config.parameters.model_file_name, &files)?;
        info!(run_id = %leaf.id(), path = %path, "Selected model file");
        Ok(ArtifactSource::Run {
            run: leaf.locator(),
            path,
        })
    }

    fn local_artifact(config: &RegistrationConfig) -> Result<PathBuf> {
        let path = ModelPathResolver::resolve_local(
            &config.parameters.model_file_name,
            &config.workspace_root,
        )?;
        if !path.is_file() {
            return Err(RegisterError::configuration(format!(
                "model file {} does not exist or is not a regular file",
                path.display()
            )));
        }
        info!(path = %path.display(), "Selected local model file");
        Ok(path)
    }
}
