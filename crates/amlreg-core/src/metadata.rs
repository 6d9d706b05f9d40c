//! Registry metadata for a model file.

use std::fs::File;
use std::io;
use std::path::Path;

use amlreg_state::{ArtifactSource, DatasetRef, ModelArtifact, Tags, WorkspaceHandle};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::domain::{RegisterError, RegisterParameters, Result};

/// Property recording the digest of an uploaded local file.
pub const ARTIFACT_SHA256_PROPERTY: &str = "artifact_sha256";

/// Default tags overlaid with the configured ones; configured keys win.
pub fn merge_tags(defaults: Tags, explicit: Tags) -> Tags {
    let mut merged = defaults;
    merged.extend(explicit);
    merged
}

/// Hex SHA-256 of a file.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        RegisterError::configuration(format!("could not read model file {}: {}", path.display(), e))
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| {
        RegisterError::configuration(format!("could not read model file {}: {}", path.display(), e))
    })?;
    Ok(hex::encode(hasher.finalize()))
}

/// Look up a dataset by name; anything short of a hit is dropped.
async fn resolve_dataset(workspace: &dyn WorkspaceHandle, name: &str) -> Option<DatasetRef> {
    match workspace.lookup_dataset(name).await {
        Ok(Some(dataset)) => {
            debug!(dataset = %name, id = %dataset.id, "Resolved dataset");
            Some(dataset)
        }
        Ok(None) => {
            warn!(dataset = %name, "Dataset not found, it will not be linked to the model");
            None
        }
        Err(e) => {
            warn!(
                dataset = %name,
                "Could not load dataset, it will not be linked to the model: {}", e
            );
            None
        }
    }
}

async fn resolve_optional(
    workspace: &dyn WorkspaceHandle,
    name: Option<&str>,
) -> Option<DatasetRef> {
    match name.filter(|n| !n.is_empty()) {
        Some(name) => resolve_dataset(workspace, name).await,
        None => None,
    }
}

/// Assemble the artifact handed to the registry.
///
/// Configured tags override `default_tags`. Local files get an
/// `artifact_sha256` property unless one is configured.
pub async fn build_artifact(
    workspace: &dyn WorkspaceHandle,
    parameters: &RegisterParameters,
    model_name: &str,
    source: ArtifactSource,
    default_tags: Tags,
) -> Result<ModelArtifact> {
    let tags = merge_tags(default_tags, parameters.tags());

    let mut properties = parameters.properties();
    if let ArtifactSource::Local { path } = &source {
        if !properties.contains_key(ARTIFACT_SHA256_PROPERTY) {
            properties.insert(ARTIFACT_SHA256_PROPERTY.to_string(), file_sha256(path)?);
        }
    }

    let mut datasets = Vec::with_capacity(parameters.datasets.len());
    for name in &parameters.datasets {
        if let Some(dataset) = resolve_dataset(workspace, name).await {
            datasets.push(dataset);
        }
    }

    let sample_input_dataset =
        resolve_optional(workspace, parameters.sample_input_dataset.as_deref()).await;
    let sample_output_dataset =
        resolve_optional(workspace, parameters.sample_output_dataset.as_deref()).await;

    Ok(ModelArtifact {
        name: model_name.to_string(),
        source,
        framework: parameters.model_framework,
        framework_version: parameters.model_framework_version.clone(),
        description: parameters.model_description.clone(),
        tags,
        properties,
        datasets,
        sample_input_dataset,
        sample_output_dataset,
        resource_configuration: parameters.resource_configuration(),
    })
}
