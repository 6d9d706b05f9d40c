//! In-memory fakes for the workspace capabilities (testing only)
//!
//! Provides `MemoryRun`, `MemoryWorkspace` and `MemoryConnector` that satisfy
//! the trait contracts without any network access.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::capability::*;
use crate::error::{ProviderError, ProviderResult};

// ---------------------------------------------------------------------------
// MemoryRun
// ---------------------------------------------------------------------------

/// In-memory run with builder-style setup.
#[derive(Debug, Clone)]
pub struct MemoryRun {
    id: String,
    experiment: String,
    kind: RunKind,
    step_name: Option<String>,
    metrics: Metrics,
    tags: Tags,
    files: Vec<String>,
    children: Vec<Arc<MemoryRun>>,
    best_child: Option<String>,
}

impl MemoryRun {
    pub fn new(experiment: &str, id: &str, kind: RunKind) -> Self {
        Self {
            id: id.to_string(),
            experiment: experiment.to_string(),
            kind,
            step_name: None,
            metrics: Metrics::new(),
            tags: Tags::new(),
            files: Vec::new(),
            children: Vec::new(),
            best_child: None,
        }
    }

    /// Declared step name inside a pipeline.
    pub fn named(mut self, step_name: &str) -> Self {
        self.step_name = Some(step_name.to_string());
        self
    }

    pub fn with_metric(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(name.to_string(), value.into());
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_file(mut self, path: &str) -> Self {
        self.files.push(path.to_string());
        self
    }

    pub fn with_child(mut self, child: MemoryRun) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    /// Mark the child with `id` as the sweep's best run.
    pub fn with_best_child(mut self, id: &str) -> Self {
        self.best_child = Some(id.to_string());
        self
    }

    fn shared_children(&self) -> Vec<SharedRun> {
        self.children
            .iter()
            .map(|c| c.clone() as SharedRun)
            .collect()
    }
}

#[async_trait]
impl RunHandle for MemoryRun {
    fn id(&self) -> &str {
        &self.id
    }

    fn experiment(&self) -> &str {
        &self.experiment
    }

    fn kind(&self) -> RunKind {
        self.kind
    }

    async fn metrics(&self) -> ProviderResult<Metrics> {
        Ok(self.metrics.clone())
    }

    async fn tags(&self) -> ProviderResult<Tags> {
        Ok(self.tags.clone())
    }

    async fn output_files(&self) -> ProviderResult<Vec<String>> {
        Ok(self.files.clone())
    }

    async fn children(&self) -> ProviderResult<Vec<SharedRun>> {
        Ok(self.shared_children())
    }

    async fn find_steps(&self, name: &str) -> ProviderResult<Vec<SharedRun>> {
        Ok(self
            .children
            .iter()
            .filter(|c| c.step_name.as_deref() == Some(name))
            .map(|c| c.clone() as SharedRun)
            .collect())
    }

    async fn best_child_by_primary_metric(&self) -> ProviderResult<Option<SharedRun>> {
        let Some(best) = &self.best_child else {
            return Ok(None);
        };
        Ok(self
            .children
            .iter()
            .find(|c| &c.id == best)
            .map(|c| c.clone() as SharedRun))
    }
}

// ---------------------------------------------------------------------------
// MemoryWorkspace
// ---------------------------------------------------------------------------

/// In-memory workspace backed by `HashMap`s.
///
/// Records every model lookup and registration so tests can assert on the
/// calls the registration logic made.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    runs: Mutex<HashMap<(String, String), Arc<MemoryRun>>>,
    models: Mutex<HashMap<String, Vec<RegisteredModel>>>,
    datasets: Mutex<HashMap<String, DatasetRef>>,
    broken_datasets: Mutex<BTreeSet<String>>,
    registrations: Mutex<Vec<ModelArtifact>>,
    model_lookups: Mutex<Vec<String>>,
    rejection: Mutex<Option<String>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a run and, recursively, all of its children.
    pub fn insert_run(&self, run: MemoryRun) {
        let run = Arc::new(run);
        let mut runs = self.runs.lock().unwrap();
        let mut pending = vec![run];
        while let Some(next) = pending.pop() {
            pending.extend(next.children.iter().cloned());
            runs.insert((next.experiment.clone(), next.id.clone()), next);
        }
    }

    /// Add an existing model version directly.
    pub fn seed_model(&self, model: RegisteredModel) {
        let mut models = self.models.lock().unwrap();
        models.entry(model.name.clone()).or_default().push(model);
    }

    /// Add a dataset that resolves by name.
    pub fn insert_dataset(&self, name: &str) {
        let mut datasets = self.datasets.lock().unwrap();
        datasets.insert(
            name.to_string(),
            DatasetRef {
                name: name.to_string(),
                id: format!("ds-{}", name),
                version: Some("1".to_string()),
            },
        );
    }

    /// Make lookups of `name` fail with a transport error.
    pub fn break_dataset(&self, name: &str) {
        self.broken_datasets.lock().unwrap().insert(name.to_string());
    }

    /// Make every registration fail with `message`.
    pub fn reject_registrations(&self, message: &str) {
        *self.rejection.lock().unwrap() = Some(message.to_string());
    }

    /// Artifacts passed to `register_model`, in call order.
    pub fn registrations(&self) -> Vec<ModelArtifact> {
        self.registrations.lock().unwrap().clone()
    }

    /// Names passed to `lookup_model`, in call order.
    pub fn model_lookups(&self) -> Vec<String> {
        self.model_lookups.lock().unwrap().clone()
    }

    fn run_has_file(&self, locator: &RunLocator, path: &str) -> bool {
        let runs = self.runs.lock().unwrap();
        runs.get(&(locator.experiment.clone(), locator.run_id.clone()))
            .map(|r| r.files.iter().any(|f| f == path))
            .unwrap_or(false)
    }
}

#[async_trait]
impl WorkspaceHandle for MemoryWorkspace {
    async fn get_run(&self, experiment: &str, run_id: &str) -> ProviderResult<SharedRun> {
        let runs = self.runs.lock().unwrap();
        runs.get(&(experiment.to_string(), run_id.to_string()))
            .map(|r| r.clone() as SharedRun)
            .ok_or_else(|| ProviderError::not_found("run", format!("{}/{}", experiment, run_id)))
    }

    async fn lookup_model(&self, name: &str) -> ProviderResult<Option<RegisteredModel>> {
        self.model_lookups.lock().unwrap().push(name.to_string());
        let models = self.models.lock().unwrap();
        Ok(models.get(name).and_then(|versions| versions.last().cloned()))
    }

    async fn lookup_dataset(&self, name: &str) -> ProviderResult<Option<DatasetRef>> {
        if self.broken_datasets.lock().unwrap().contains(name) {
            return Err(ProviderError::Http(format!(
                "dataset service unavailable for {}",
                name
            )));
        }
        let datasets = self.datasets.lock().unwrap();
        Ok(datasets.get(name).cloned())
    }

    async fn register_model(&self, artifact: ModelArtifact) -> ProviderResult<RegistrationResult> {
        if let Some(message) = self.rejection.lock().unwrap().clone() {
            return Err(ProviderError::Rejected {
                status: 400,
                message,
            });
        }

        let run = match &artifact.source {
            ArtifactSource::Run { run, path } => {
                if !self.run_has_file(run, path) {
                    return Err(ProviderError::not_found("model path", path.clone()));
                }
                Some(run.clone())
            }
            ArtifactSource::Local { path } => {
                if !path.is_file() {
                    return Err(ProviderError::not_found(
                        "model path",
                        path.display().to_string(),
                    ));
                }
                None
            }
        };

        let mut models = self.models.lock().unwrap();
        let versions = models.entry(artifact.name.clone()).or_default();
        let version = versions.last().map(|m| m.version + 1).unwrap_or(1);
        let model = RegisteredModel {
            id: format!("{}:{}", artifact.name, version),
            name: artifact.name.clone(),
            version,
            run,
            created_at: Some(Utc::now()),
        };
        versions.push(model.clone());
        self.registrations.lock().unwrap().push(artifact);

        Ok(RegistrationResult {
            name: model.name,
            version: model.version,
            id: model.id,
            created_at: model.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryConnector
// ---------------------------------------------------------------------------

/// Connector that hands out a shared `MemoryWorkspace`.
#[derive(Debug)]
pub struct MemoryConnector {
    workspace: Arc<MemoryWorkspace>,
    denial: Option<String>,
    connections: Mutex<Vec<WorkspaceLocation>>,
}

impl MemoryConnector {
    pub fn new(workspace: Arc<MemoryWorkspace>) -> Self {
        Self {
            workspace,
            denial: None,
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Connector whose credential exchange always fails.
    pub fn denying(message: &str) -> Self {
        Self {
            workspace: Arc::new(MemoryWorkspace::new()),
            denial: Some(message.to_string()),
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Locations successfully connected to.
    pub fn connections(&self) -> Vec<WorkspaceLocation> {
        self.connections.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkspaceConnector for MemoryConnector {
    async fn connect(
        &self,
        _credentials: &AzureCredentials,
        location: &WorkspaceLocation,
    ) -> ProviderResult<SharedWorkspace> {
        if let Some(message) = &self.denial {
            return Err(ProviderError::Unauthorized(message.clone()));
        }
        self.connections.lock().unwrap().push(location.clone());
        Ok(self.workspace.clone() as SharedWorkspace)
    }
}
