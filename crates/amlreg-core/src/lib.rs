//! aml-registermodel core
//!
//! Registers a trained model into a workspace model registry from CI:
//! - Resolves a run id down to the run that actually produced the model
//!   (pipeline step → sweep child → best run)
//! - Gates registration on a metric comparison against the production model
//! - Picks the model file, assembles registry metadata and registers it

pub mod comparator;
pub mod domain;
pub mod metadata;
pub mod model_path;
pub mod pipeline;
pub mod resolver;
pub mod telemetry;

// Re-export key types
pub use comparator::MetricComparator;
pub use domain::{
    default_model_name, load_workspace_location, parse_credentials, BuildContext,
    ComparisonOutcome, MetricDirection, MetricSpec, RegisterError, RegisterParameters,
    RegistrationConfig, RegistrationMode, Result,
};
pub use metadata::{build_artifact, merge_tags, ARTIFACT_SHA256_PROPERTY};
pub use model_path::ModelPathResolver;
pub use pipeline::{GateDecision, RegistrationPipeline, RegistrationReport};
pub use resolver::RunTypeResolver;
pub use telemetry::init_tracing;

pub use amlreg_state::{
    ArtifactSource, AzureCredentials, DatasetRef, ModelArtifact, ModelFramework,
    RegistrationResult, ResourceConfiguration, RunKind, RunLocator, WorkspaceLocation,
};
