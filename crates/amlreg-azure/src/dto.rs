//! Wire types of the workspace REST APIs and their conversions.

use std::collections::BTreeMap;

use amlreg_state::{
    ArtifactSource, DatasetRef, Metrics, ModelArtifact, RegisteredModel, RegistrationResult,
    RunKind, RunLocator, Tags,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run property set on sweep parents once a best child is known.
pub const BEST_CHILD_PROPERTY: &str = "best_child_run_id";

/// One page of a list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(default, alias = "nextLink")]
    pub continuation_token: Option<String>,
}

/// ARM view of a workspace.
#[derive(Debug, Deserialize)]
pub struct WorkspaceDto {
    pub location: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDto {
    pub run_id: String,
    #[serde(default)]
    pub run_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub properties: BTreeMap<String, Option<String>>,
}

fn flatten(map: &BTreeMap<String, Option<String>>) -> Tags {
    map.iter()
        .map(|(k, v)| (k.clone(), v.clone().unwrap_or_default()))
        .collect()
}

impl RunDto {
    pub fn kind(&self) -> RunKind {
        self.run_type
            .as_deref()
            .map(RunKind::from_provider_type)
            .unwrap_or(RunKind::Unknown)
    }

    /// Name a pipeline step was declared with.
    pub fn step_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.display_name.as_deref())
            .filter(|n| !n.is_empty())
    }

    pub fn tags(&self) -> Tags {
        flatten(&self.tags)
    }

    pub fn best_child_id(&self) -> Option<&str> {
        self.properties
            .get(BEST_CHILD_PROPERTY)
            .and_then(|v| v.as_deref())
            .filter(|v| !v.is_empty())
    }
}

/// One metric logging call; `cells` rows map metric name to value.
#[derive(Debug, Deserialize)]
pub struct MetricDto {
    pub name: String,
    #[serde(default)]
    pub cells: Vec<BTreeMap<String, Value>>,
}

/// Collapse logging calls into one value per metric.
///
/// A metric logged once keeps its value; logged repeatedly it becomes a
/// list of all values in logging order.
pub fn collect_metrics(entries: Vec<MetricDto>) -> Metrics {
    let mut series: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for entry in entries {
        let values = series.entry(entry.name.clone()).or_default();
        for mut cell in entry.cells {
            if let Some(value) = cell.remove(&entry.name) {
                values.push(value);
            }
        }
    }

    series
        .into_iter()
        .filter_map(|(name, mut values)| match values.len() {
            0 => None,
            1 => values.pop().map(|v| (name, v)),
            _ => Some((name, Value::Array(values))),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct ArtifactDto {
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDto {
    pub id: String,
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub experiment_name: Option<String>,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
}

impl ModelDto {
    pub fn into_registered(self) -> RegisteredModel {
        let run = match (self.experiment_name, self.run_id) {
            (Some(experiment), Some(run_id)) if !experiment.is_empty() && !run_id.is_empty() => {
                Some(RunLocator { experiment, run_id })
            }
            _ => None,
        };
        RegisteredModel {
            id: self.id,
            name: self.name,
            version: self.version,
            run,
            created_at: self.created_time,
        }
    }

    pub fn into_result(self) -> RegistrationResult {
        RegistrationResult {
            name: self.name,
            version: self.version,
            id: self.id,
            created_at: self.created_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetVersionDto {
    #[serde(default)]
    pub version_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetDto {
    pub dataset_id: String,
    pub name: String,
    #[serde(default)]
    pub latest: Option<DatasetVersionDto>,
}

impl DatasetDto {
    pub fn into_ref(self) -> DatasetRef {
        DatasetRef {
            name: self.name,
            id: self.dataset_id,
            version: self.latest.and_then(|l| l.version_id),
        }
    }
}

/// Batch upload request for local files.
#[derive(Debug, Serialize)]
pub struct UploadRequestDto {
    pub paths: Vec<UploadPathDto>,
}

#[derive(Debug, Serialize)]
pub struct UploadPathDto {
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadContentDto {
    pub content_uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponseDto {
    #[serde(default)]
    pub artifact_content_information: BTreeMap<String, UploadContentDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetReferenceDto {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsDto {
    pub cpu: f64,
    #[serde(rename = "memoryInGB")]
    pub memory_in_gb: f64,
}

/// Model registration request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCreateDto {
    pub name: String,
    pub url: String,
    pub mime_type: &'static str,
    pub framework: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kv_tags: Tags,
    pub properties: Tags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_name: Option<String>,
    pub datasets: Vec<DatasetReferenceDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_input_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_output_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_requirements: Option<ResourceRequirementsDto>,
}

/// Artifact URL of a file a run uploaded.
pub fn run_artifact_url(run_id: &str, path: &str) -> String {
    format!(
        "aml://artifact/ExperimentRun/dcid.{}/{}",
        run_id,
        path.trim_start_matches('/')
    )
}

/// Artifact URL of a file uploaded into a local-upload container.
pub fn local_upload_url(container: &str, file_name: &str) -> String {
    format!("aml://artifact/LocalUpload/{}/{}", container, file_name)
}

impl ModelCreateDto {
    /// Build the request; `url` addresses the already uploaded file.
    pub fn from_artifact(artifact: ModelArtifact, url: String) -> Self {
        let (run_id, experiment_name) = match &artifact.source {
            ArtifactSource::Run { run, .. } => {
                (Some(run.run_id.clone()), Some(run.experiment.clone()))
            }
            ArtifactSource::Local { .. } => (None, None),
        };

        Self {
            name: artifact.name,
            url,
            mime_type: "application/octet-stream",
            framework: artifact.framework.registry_name(),
            framework_version: artifact.framework_version,
            description: artifact.description,
            kv_tags: artifact.tags,
            properties: artifact.properties,
            run_id,
            experiment_name,
            datasets: artifact
                .datasets
                .into_iter()
                .map(|d| DatasetReferenceDto {
                    name: d.name,
                    id: d.id,
                })
                .collect(),
            sample_input_data: artifact.sample_input_dataset.map(|d| d.id),
            sample_output_data: artifact.sample_output_dataset.map(|d| d.id),
            resource_requirements: artifact.resource_configuration.map(|r| {
                ResourceRequirementsDto {
                    cpu: r.cpu_cores,
                    memory_in_gb: r.memory_gb,
                }
            }),
        }
    }
}
