//! Capability trait definitions for aml-registermodel
//!
//! These traits define what the registration logic consumes:
//! - `WorkspaceConnector`: credential exchange (produces a workspace)
//! - `WorkspaceHandle`: run lookup, model registry, dataset registry
//! - `RunHandle`: one run and its wrapper structure (steps, children)
//!
//! All traits are async and provider-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// Metric name → value as reported by the provider.
///
/// Values stay as JSON: a run may log strings, series or tables under a
/// metric name, and only the comparator decides what is comparable.
pub type Metrics = BTreeMap<String, serde_json::Value>;

/// String key-value tags.
pub type Tags = BTreeMap<String, String>;

/// Shared handle to a run.
pub type SharedRun = Arc<dyn RunHandle>;

/// Shared handle to an authenticated workspace.
pub type SharedWorkspace = Arc<dyn WorkspaceHandle>;

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Service principal credentials for the workspace.
///
/// `Debug` never prints any of the values.
pub struct AzureCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub subscription_id: String,
}

impl AzureCredentials {
    /// Every value that has to be masked in CI logs.
    pub fn mask_values(&self) -> Vec<&str> {
        vec![
            self.tenant_id.as_str(),
            self.client_id.as_str(),
            self.client_secret.expose_secret(),
            self.subscription_id.as_str(),
        ]
    }
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("tenant_id", &"[REDACTED]")
            .field("client_id", &"[REDACTED]")
            .field("client_secret", &"[REDACTED]")
            .field("subscription_id", &"[REDACTED]")
            .finish()
    }
}

/// Coordinates of the target workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceLocation {
    pub subscription_id: String,
    pub resource_group: String,
    pub workspace_name: String,
}

/// Exchanges credentials for an authenticated workspace handle.
#[async_trait]
pub trait WorkspaceConnector: Send + Sync {
    /// Authenticate and open the workspace.
    async fn connect(
        &self,
        credentials: &AzureCredentials,
        location: &WorkspaceLocation,
    ) -> ProviderResult<SharedWorkspace>;
}

// ---------------------------------------------------------------------------
// RunHandle: one run record
// ---------------------------------------------------------------------------

/// Structural kind of a run, resolved once from the provider's type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// A script or command run that produces outputs itself.
    Plain,
    /// A pipeline run made of named step runs.
    Pipeline,
    /// A hyperparameter sweep that fans out into child runs.
    HyperSweep,
    /// Anything else the provider reports.
    Unknown,
}

impl RunKind {
    /// Map the provider's run type string to a kind.
    pub fn from_provider_type(run_type: &str) -> Self {
        match run_type.to_ascii_lowercase().as_str() {
            "azureml.pipelinerun" | "azureml.pipeline" => RunKind::Pipeline,
            "hyperdrive" | "azureml.hyperdrive" => RunKind::HyperSweep,
            "azureml.scriptrun" | "azureml.steprun" | "azureml.stepcorerun"
            | "azureml.reusedsteprun" | "azureml.commandrun" => RunKind::Plain,
            _ => RunKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Plain => "plain",
            RunKind::Pipeline => "pipeline",
            RunKind::HyperSweep => "hyperdrive",
            RunKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Experiment + run id pair that addresses a run in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunLocator {
    pub experiment: String,
    pub run_id: String,
}

/// A run in the workspace.
///
/// Guarantees:
/// - `kind()` is stable for the lifetime of the handle.
/// - `children()` and `find_steps()` keep the provider's enumeration order.
#[async_trait]
pub trait RunHandle: Send + Sync + fmt::Debug {
    /// Provider run id.
    fn id(&self) -> &str;

    /// Experiment the run belongs to.
    fn experiment(&self) -> &str;

    /// Structural kind.
    fn kind(&self) -> RunKind;

    /// Metrics logged by the run.
    async fn metrics(&self) -> ProviderResult<Metrics>;

    /// Tags set on the run.
    async fn tags(&self) -> ProviderResult<Tags>;

    /// Paths of all files the run uploaded (e.g. `outputs/model.pkl`).
    async fn output_files(&self) -> ProviderResult<Vec<String>>;

    /// Direct child runs.
    async fn children(&self) -> ProviderResult<Vec<SharedRun>>;

    /// Step runs of a pipeline whose declared name equals `name`.
    async fn find_steps(&self, name: &str) -> ProviderResult<Vec<SharedRun>>;

    /// Child selected by the sweep's own primary metric, if one exists.
    async fn best_child_by_primary_metric(&self) -> ProviderResult<Option<SharedRun>>;

    /// Locator of this run.
    fn locator(&self) -> RunLocator {
        RunLocator {
            experiment: self.experiment().to_string(),
            run_id: self.id().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkspaceHandle: registries
// ---------------------------------------------------------------------------

/// A model version registered in the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub id: String,
    pub name: String,
    pub version: u32,
    /// Run the model was registered from, if any
    pub run: Option<RunLocator>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A registered dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub name: String,
    pub id: String,
    pub version: Option<String>,
}

/// Model framework recorded on the registered model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFramework {
    ScikitLearn,
    Onnx,
    TensorFlow,
    Keras,
    #[default]
    Custom,
}

impl ModelFramework {
    /// Name used by the model registry.
    pub fn registry_name(&self) -> &'static str {
        match self {
            ModelFramework::ScikitLearn => "ScikitLearn",
            ModelFramework::Onnx => "Onnx",
            ModelFramework::TensorFlow => "TensorFlow",
            ModelFramework::Keras => "TfKeras",
            ModelFramework::Custom => "Custom",
        }
    }
}

impl FromStr for ModelFramework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scikitlearn" => Ok(ModelFramework::ScikitLearn),
            "onnx" => Ok(ModelFramework::Onnx),
            "tensorflow" => Ok(ModelFramework::TensorFlow),
            "keras" => Ok(ModelFramework::Keras),
            "custom" => Ok(ModelFramework::Custom),
            other => Err(format!(
                "unsupported model framework '{}' (expected one of scikitlearn, onnx, tensorflow, keras, custom)",
                other
            )),
        }
    }
}

/// Resource allocation hint for deployments of the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfiguration {
    pub cpu_cores: f64,
    pub memory_gb: f64,
}

/// Where the model file comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactSource {
    /// A file uploaded by a run, addressed relative to the run's root.
    Run { run: RunLocator, path: String },
    /// A file on the local filesystem that has to be uploaded.
    Local { path: PathBuf },
}

/// A model file plus everything recorded with it in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    pub source: ArtifactSource,
    pub framework: ModelFramework,
    pub framework_version: Option<String>,
    pub description: Option<String>,
    pub tags: Tags,
    pub properties: Tags,
    pub datasets: Vec<DatasetRef>,
    pub sample_input_dataset: Option<DatasetRef>,
    pub sample_output_dataset: Option<DatasetRef>,
    pub resource_configuration: Option<ResourceConfiguration>,
}

/// What the registry returns for a new model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub name: String,
    pub version: u32,
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Authenticated workspace.
///
/// Semantics:
/// - `lookup_model` returns the latest version registered under a name.
/// - `register_model` creates a new version; versions are assigned by the
///   registry.
/// - `lookup_dataset` returns the latest version of a named dataset.
#[async_trait]
pub trait WorkspaceHandle: Send + Sync {
    /// Load a run by experiment and id.
    async fn get_run(&self, experiment: &str, run_id: &str) -> ProviderResult<SharedRun>;

    /// Latest model registered under `name`, if any.
    async fn lookup_model(&self, name: &str) -> ProviderResult<Option<RegisteredModel>>;

    /// Latest dataset registered under `name`, if any.
    async fn lookup_dataset(&self, name: &str) -> ProviderResult<Option<DatasetRef>>;

    /// Register a new model version.
    async fn register_model(&self, artifact: ModelArtifact) -> ProviderResult<RegistrationResult>;

    /// Run that produced a registered model, if it was registered from one.
    async fn incumbent_run(&self, model: &RegisteredModel) -> ProviderResult<Option<SharedRun>> {
        match &model.run {
            Some(locator) => self
                .get_run(&locator.experiment, &locator.run_id)
                .await
                .map(Some),
            None => Ok(None),
        }
    }
}
