//! Capability implementations over the workspace REST APIs.

use std::path::Path;
use std::sync::Arc;

use amlreg_state::{
    ArtifactSource, AzureCredentials, DatasetRef, Metrics, ModelArtifact, ProviderError,
    ProviderResult, RegisteredModel, RegistrationResult, RunHandle, RunKind, SharedRun,
    SharedWorkspace, Tags, WorkspaceConnector, WorkspaceHandle, WorkspaceLocation,
};
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{ServicePrincipalToken, DEFAULT_AUTHORITY_HOST};
use crate::client::{
    error_message, http_client, service_url_for_region, workspace_scope, AmlClient,
    DEFAULT_MANAGEMENT_HOST, WORKSPACE_API_VERSION,
};
use crate::dto::{
    collect_metrics, local_upload_url, run_artifact_url, ArtifactDto, DatasetDto, MetricDto,
    ModelCreateDto, ModelDto, Page, RunDto, UploadPathDto, UploadRequestDto, UploadResponseDto,
    WorkspaceDto,
};
use crate::error::AzureError;

const HISTORY_API: &str = "history/v1.0";
const ARTIFACT_API: &str = "artifact/v2.0";
const MODEL_API: &str = "modelmanagement/v1.0";
const DATASET_API: &str = "dataset/v1.0";

/// Hosts the connector talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureEndpoints {
    pub authority_host: String,
    pub management_host: String,
    /// Data-plane host; derived from the workspace region when unset.
    pub service_url: Option<String>,
}

impl Default for AzureEndpoints {
    fn default() -> Self {
        Self {
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            management_host: DEFAULT_MANAGEMENT_HOST.to_string(),
            service_url: None,
        }
    }
}

/// Resource manager answer to a failed workspace lookup.
fn workspace_lookup_error(workspace_name: &str, status: u16, body: &str) -> AzureError {
    AzureError::Status {
        resource: "workspace",
        name: workspace_name.to_string(),
        status,
        message: error_message(body),
    }
}

/// Opens workspaces with a service principal.
#[derive(Debug, Clone)]
pub struct AzureConnector {
    http: reqwest::Client,
    endpoints: AzureEndpoints,
}

impl AzureConnector {
    pub fn new(endpoints: AzureEndpoints) -> ProviderResult<Self> {
        Ok(Self {
            http: http_client()?,
            endpoints,
        })
    }
}

#[async_trait]
impl WorkspaceConnector for AzureConnector {
    async fn connect(
        &self,
        credentials: &AzureCredentials,
        location: &WorkspaceLocation,
    ) -> ProviderResult<SharedWorkspace> {
        let token =
            ServicePrincipalToken::new(self.http.clone(), &self.endpoints.authority_host, credentials);
        token.ensure_token().await?;

        let service_url = match &self.endpoints.service_url {
            Some(url) => url.clone(),
            None => {
                let url = format!(
                    "{}{}",
                    self.endpoints.management_host.trim_end_matches('/'),
                    workspace_scope(location)
                );
                let request = self
                    .http
                    .get(&url)
                    .query(&[("api-version", WORKSPACE_API_VERSION)]);
                let response = token.authorize(request).await?.send().await.map_err(AzureError::from)?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(
                        workspace_lookup_error(&location.workspace_name, status.as_u16(), &body)
                            .into(),
                    );
                }
                let bytes = response.bytes().await.map_err(AzureError::from)?;
                let workspace: WorkspaceDto = serde_json::from_slice(&bytes)?;
                service_url_for_region(&workspace.location)
            }
        };

        info!(
            workspace = %location.workspace_name,
            service_url = %service_url,
            "Connected to workspace"
        );
        let client = AmlClient::new(self.http.clone(), token, &service_url, location);
        Ok(Arc::new(AzureWorkspace {
            client: Arc::new(client),
        }))
    }
}

/// Workspace backed by the REST APIs.
#[derive(Debug)]
pub struct AzureWorkspace {
    client: Arc<AmlClient>,
}

impl AzureWorkspace {
    async fn artifact_url(&self, artifact: &ModelArtifact) -> ProviderResult<String> {
        match &artifact.source {
            ArtifactSource::Run { run, path } => {
                let files = AzureRun::list_files(&self.client, &run.run_id).await?;
                if !files.iter().any(|f| f == path) {
                    return Err(ProviderError::not_found(
                        "model path",
                        format!("{} in run {}", path, run.run_id),
                    ));
                }
                Ok(run_artifact_url(&run.run_id, path))
            }
            ArtifactSource::Local { path } => self.upload_local(&artifact.name, path).await,
        }
    }

    /// Upload a local file into a fresh local-upload container.
    async fn upload_local(&self, model_name: &str, path: &Path) -> ProviderResult<String> {
        if !path.is_file() {
            return Err(ProviderError::not_found(
                "model path",
                path.display().to_string(),
            ));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ProviderError::not_found("model path", path.display().to_string()))?;
        let container = format!("{}-{}", model_name, Uuid::new_v4());

        let url = self.client.url(
            ARTIFACT_API,
            &format!("/artifacts/batch/metadata/LocalUpload/{}", container),
        );
        let request = UploadRequestDto {
            paths: vec![UploadPathDto {
                path: file_name.clone(),
            }],
        };
        let response: UploadResponseDto = self
            .client
            .post_json(&url, &request, "artifact", &file_name)
            .await?;
        let target = response
            .artifact_content_information
            .get(&file_name)
            .ok_or(AzureError::MissingField("artifactContentInformation"))?;

        let bytes = tokio::fs::read(path).await?;
        debug!(file = %file_name, size = bytes.len(), container = %container, "Uploading model file");
        let upload = self
            .client
            .http()
            .put(&target.content_uri)
            .header("x-ms-blob-type", "BlockBlob")
            .body(bytes)
            .send()
            .await
            .map_err(AzureError::from)?;
        if !upload.status().is_success() {
            return Err(AzureError::Status {
                resource: "artifact",
                name: file_name,
                status: upload.status().as_u16(),
                message: "blob upload failed".to_string(),
            }
            .into());
        }

        Ok(local_upload_url(&container, &file_name))
    }
}

#[async_trait]
impl WorkspaceHandle for AzureWorkspace {
    async fn get_run(&self, experiment: &str, run_id: &str) -> ProviderResult<SharedRun> {
        let run = AzureRun::load(&self.client, experiment, run_id).await?;
        Ok(Arc::new(run))
    }

    async fn lookup_model(&self, name: &str) -> ProviderResult<Option<RegisteredModel>> {
        let url = self.client.url(MODEL_API, "/models");
        let query = [("name", name), ("orderBy", "CreatedAtDesc"), ("$top", "1")];
        let page: Option<Page<ModelDto>> =
            self.client.get_optional(&url, &query, "model", name).await?;
        Ok(page
            .and_then(|p| p.value.into_iter().find(|m| m.name == name))
            .map(ModelDto::into_registered))
    }

    async fn lookup_dataset(&self, name: &str) -> ProviderResult<Option<DatasetRef>> {
        let url = self.client.url(DATASET_API, "/datasets");
        let query = [("datasetNames", name)];
        let page: Option<Page<DatasetDto>> =
            self.client.get_optional(&url, &query, "dataset", name).await?;
        Ok(page
            .and_then(|p| p.value.into_iter().find(|d| d.name == name))
            .map(DatasetDto::into_ref))
    }

    async fn register_model(&self, artifact: ModelArtifact) -> ProviderResult<RegistrationResult> {
        let artifact_url = self.artifact_url(&artifact).await?;
        let name = artifact.name.clone();
        let request = ModelCreateDto::from_artifact(artifact, artifact_url);

        let url = self.client.url(MODEL_API, "/models");
        let model: ModelDto = self.client.post_json(&url, &request, "model", &name).await?;
        Ok(model.into_result())
    }
}

/// A run loaded from run history.
#[derive(Debug)]
pub struct AzureRun {
    client: Arc<AmlClient>,
    experiment: String,
    dto: RunDto,
}

impl AzureRun {
    async fn load(client: &Arc<AmlClient>, experiment: &str, run_id: &str) -> ProviderResult<Self> {
        let url = client.url(
            HISTORY_API,
            &format!("/experiments/{}/runs/{}", experiment, run_id),
        );
        let dto: RunDto = client.get_json(&url, &[], "run", run_id).await?;
        Ok(Self::from_dto(client, experiment, dto))
    }

    fn from_dto(client: &Arc<AmlClient>, experiment: &str, dto: RunDto) -> Self {
        Self {
            client: client.clone(),
            experiment: experiment.to_string(),
            dto,
        }
    }

    fn run_url(&self, suffix: &str) -> String {
        self.client.url(
            HISTORY_API,
            &format!(
                "/experiments/{}/runs/{}{}",
                self.experiment, self.dto.run_id, suffix
            ),
        )
    }

    async fn list_files(client: &AmlClient, run_id: &str) -> ProviderResult<Vec<String>> {
        let url = client.url(
            ARTIFACT_API,
            &format!("/artifacts/origins/ExperimentRun/containers/dcid.{}", run_id),
        );
        let artifacts: Vec<ArtifactDto> = client.get_all(&url, &[], "run artifacts", run_id).await?;
        Ok(artifacts.into_iter().map(|a| a.path).collect())
    }

    async fn child_dtos(&self) -> ProviderResult<Vec<RunDto>> {
        let url = self.run_url("/children");
        Ok(self
            .client
            .get_all(&url, &[], "child runs", &self.dto.run_id)
            .await?)
    }

    fn wrap(&self, dtos: Vec<RunDto>) -> Vec<SharedRun> {
        dtos.into_iter()
            .map(|dto| Arc::new(Self::from_dto(&self.client, &self.experiment, dto)) as SharedRun)
            .collect()
    }
}

#[async_trait]
impl RunHandle for AzureRun {
    fn id(&self) -> &str {
        &self.dto.run_id
    }

    fn experiment(&self) -> &str {
        &self.experiment
    }

    fn kind(&self) -> RunKind {
        self.dto.kind()
    }

    async fn metrics(&self) -> ProviderResult<Metrics> {
        let url = self.run_url("/metrics");
        let entries: Vec<MetricDto> = self
            .client
            .get_all(&url, &[], "run metrics", &self.dto.run_id)
            .await?;
        Ok(collect_metrics(entries))
    }

    async fn tags(&self) -> ProviderResult<Tags> {
        Ok(self.dto.tags())
    }

    async fn output_files(&self) -> ProviderResult<Vec<String>> {
        Self::list_files(&self.client, &self.dto.run_id).await
    }

    async fn children(&self) -> ProviderResult<Vec<SharedRun>> {
        Ok(self.wrap(self.child_dtos().await?))
    }

    async fn find_steps(&self, name: &str) -> ProviderResult<Vec<SharedRun>> {
        let steps = self
            .child_dtos()
            .await?
            .into_iter()
            .filter(|dto| dto.step_name() == Some(name))
            .collect();
        Ok(self.wrap(steps))
    }

    async fn best_child_by_primary_metric(&self) -> ProviderResult<Option<SharedRun>> {
        let Some(best_id) = self.dto.best_child_id() else {
            return Ok(None);
        };
        match Self::load(&self.client, &self.experiment, best_id).await {
            Ok(run) => Ok(Some(Arc::new(run) as SharedRun)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
