//! The registration parameter file.
//!
//! A JSON object checked into the repository (by default
//! `.ml/.azure/registermodel.json`). Every key is optional; unknown keys are
//! ignored. A missing file means "all defaults".

use std::path::Path;

use amlreg_state::{ModelFramework, ResourceConfiguration, Tags};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::error::{RegisterError, Result};
use super::metrics::MetricSpec;

/// Longest model name the registry accepts.
pub const MAX_MODEL_NAME_LEN: usize = 32;

/// Model file searched for when none is configured.
pub const DEFAULT_MODEL_FILE_NAME: &str = "model.pkl";

/// Contents of the parameter file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterParameters {
    /// File name (substring match) or explicit path of the model file.
    #[serde(default = "default_model_file_name")]
    pub model_file_name: String,

    /// Registry name; derived from repository and branch when absent.
    #[serde(default)]
    pub model_name: Option<String>,

    #[serde(default, deserialize_with = "deserialize_framework")]
    pub model_framework: ModelFramework,

    #[serde(default)]
    pub model_framework_version: Option<String>,

    #[serde(default)]
    pub model_tags: Map<String, Value>,

    #[serde(default)]
    pub model_properties: Map<String, Value>,

    #[serde(default)]
    pub model_description: Option<String>,

    /// Dataset names to link; unresolvable names are skipped.
    #[serde(default)]
    pub datasets: Vec<String>,

    #[serde(default)]
    pub sample_input_dataset: Option<String>,

    #[serde(default)]
    pub sample_output_dataset: Option<String>,

    /// Step that produced the model when the run id names a pipeline run.
    #[serde(default)]
    pub pipeline_child_run_name: Option<String>,

    #[serde(default)]
    pub cpu_cores: Option<f64>,

    #[serde(default)]
    pub memory_gb: Option<f64>,

    #[serde(default)]
    pub metrics_max: Vec<String>,

    #[serde(default)]
    pub metrics_min: Vec<String>,

    /// Register without comparing against the production model.
    #[serde(default)]
    pub force_registration: bool,
}

fn default_model_file_name() -> String {
    DEFAULT_MODEL_FILE_NAME.to_string()
}

fn deserialize_framework<'de, D>(deserializer: D) -> std::result::Result<ModelFramework, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

impl Default for RegisterParameters {
    fn default() -> Self {
        Self {
            model_file_name: default_model_file_name(),
            model_name: None,
            model_framework: ModelFramework::default(),
            model_framework_version: None,
            model_tags: Map::new(),
            model_properties: Map::new(),
            model_description: None,
            datasets: Vec::new(),
            sample_input_dataset: None,
            sample_output_dataset: None,
            pipeline_child_run_name: None,
            cpu_cores: None,
            memory_gb: None,
            metrics_max: Vec::new(),
            metrics_min: Vec::new(),
            force_registration: false,
        }
    }
}

impl RegisterParameters {
    /// Parse and validate parameter JSON. `source` names the file in errors.
    pub fn from_json(json: &str, source: &str) -> Result<Self> {
        let parameters: Self = serde_json::from_str(json).map_err(|e| {
            RegisterError::configuration(format!(
                "parameters file {} does not match the expected schema: {}",
                source, e
            ))
        })?;
        parameters.validate(source)?;
        Ok(parameters)
    }

    /// Load the parameter file, falling back to defaults when it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                path = %path.display(),
                "Parameters file not found, using default parameters"
            );
            return Ok(Self::default());
        }

        debug!(path = %path.display(), "Loading parameters file");
        let json = std::fs::read_to_string(path).map_err(|e| {
            RegisterError::configuration(format!(
                "could not read parameters file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json, &path.display().to_string())
    }

    /// Check value constraints that serde cannot express.
    pub fn validate(&self, source: &str) -> Result<()> {
        let mut violations = Vec::new();

        if self.model_file_name.trim().is_empty() {
            violations.push("model_file_name must not be empty".to_string());
        }

        if let Some(name) = &self.model_name {
            let len = name.chars().count();
            if len == 0 || len > MAX_MODEL_NAME_LEN {
                violations.push(format!(
                    "model_name must be between 1 and {} characters (got {})",
                    MAX_MODEL_NAME_LEN, len
                ));
            }
        }

        if let Some(cpu) = self.cpu_cores {
            if cpu <= 0.0 {
                violations.push(format!("cpu_cores must be greater than 0 (got {})", cpu));
            }
        }

        if let Some(memory) = self.memory_gb {
            if memory <= 0.0 {
                violations.push(format!("memory_gb must be greater than 0 (got {})", memory));
            }
        }

        if !violations.is_empty() {
            return Err(RegisterError::configuration(format!(
                "invalid parameters file {}: {}",
                source,
                violations.join("; ")
            )));
        }

        self.metric_spec().map(|_| ())
    }

    /// Metrics gate built from `metrics_max` / `metrics_min`.
    pub fn metric_spec(&self) -> Result<MetricSpec> {
        MetricSpec::new(self.metrics_max.clone(), self.metrics_min.clone())
    }

    /// Resource hint, only when both halves are configured.
    pub fn resource_configuration(&self) -> Option<ResourceConfiguration> {
        match (self.cpu_cores, self.memory_gb) {
            (Some(cpu_cores), Some(memory_gb)) => Some(ResourceConfiguration {
                cpu_cores,
                memory_gb,
            }),
            _ => None,
        }
    }

    pub fn tags(&self) -> Tags {
        stringify_map(&self.model_tags)
    }

    pub fn properties(&self) -> Tags {
        stringify_map(&self.model_properties)
    }
}

/// Flatten a JSON object into string pairs; non-string values keep their
/// JSON rendering.
fn stringify_map(map: &Map<String, Value>) -> Tags {
    map.iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_minimal_parameters() {
        let json = r#"{
            "model_name": "model-name",
            "model_file_name": "model-file-name",
            "model_framework": "onnx"
        }"#;
        let params = RegisterParameters::from_json(json, "registermodel.json").unwrap();
        assert_eq!(params.model_name.as_deref(), Some("model-name"));
        assert_eq!(params.model_framework, ModelFramework::Onnx);
        assert!(!params.force_registration);
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let params = RegisterParameters::from_json("{}", "registermodel.json").unwrap();
        assert_eq!(params, RegisterParameters::default());
        assert_eq!(params.model_file_name, DEFAULT_MODEL_FILE_NAME);
        assert_eq!(params.model_framework, ModelFramework::Custom);
    }

    #[test]
    fn test_wrong_type_is_configuration_error() {
        let err = RegisterParameters::from_json(r#"{ "cpu_cores": "0.1" }"#, "p.json").unwrap_err();
        assert!(matches!(err, RegisterError::Configuration(_)));
        assert!(err.to_string().contains("p.json"));
    }

    #[test]
    fn test_unknown_framework_rejected() {
        let err =
            RegisterParameters::from_json(r#"{ "model_framework": "pytorch" }"#, "p.json").unwrap_err();
        assert!(err.to_string().contains("pytorch"));
    }

    #[test]
    fn test_model_name_too_long_rejected() {
        let json = format!(r#"{{ "model_name": "{}" }}"#, "x".repeat(33));
        let err = RegisterParameters::from_json(&json, "p.json").unwrap_err();
        assert!(err.to_string().contains("model_name"));
    }

    #[test]
    fn test_non_positive_resources_rejected() {
        let err = RegisterParameters::from_json(r#"{ "cpu_cores": 0, "memory_gb": -1 }"#, "p.json")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cpu_cores"));
        assert!(msg.contains("memory_gb"));
    }

    #[test]
    fn test_metric_overlap_rejected() {
        let json = r#"{ "metrics_max": ["f1"], "metrics_min": ["f1"] }"#;
        assert!(RegisterParameters::from_json(json, "p.json").is_err());
    }

    #[test]
    fn test_resource_configuration_requires_both() {
        let mut params = RegisterParameters {
            cpu_cores: Some(2.0),
            ..Default::default()
        };
        assert!(params.resource_configuration().is_none());

        params.memory_gb = Some(4.0);
        assert_eq!(
            params.resource_configuration(),
            Some(ResourceConfiguration {
                cpu_cores: 2.0,
                memory_gb: 4.0
            })
        );
    }

    #[test]
    fn test_tags_are_stringified() {
        let json = r#"{ "model_tags": { "team": "risk", "epochs": 10, "prod": true } }"#;
        let params = RegisterParameters::from_json(json, "p.json").unwrap();
        let tags = params.tags();
        assert_eq!(tags["team"], "risk");
        assert_eq!(tags["epochs"], "10");
        assert_eq!(tags["prod"], "true");
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let params = RegisterParameters::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(params, RegisterParameters::default());
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registermodel.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(RegisterParameters::load(&path).is_err());
    }
}
