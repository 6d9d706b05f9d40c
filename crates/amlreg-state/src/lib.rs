//! amlreg-state: workspace capabilities for aml-registermodel
//!
//! This crate defines the seams between the registration logic and the
//! remote Machine Learning workspace. Nothing in here talks to a network;
//! concrete bindings live in `amlreg-azure`, in-memory fakes in [`fakes`].
//!
//! ## Layer 0 - Capabilities
//!
//! Focus: what the registration logic needs from a workspace, expressed as
//! async traits over plain data.
//!
//! ## Key Components
//!
//! - `WorkspaceConnector`: exchanges credentials for an authenticated workspace
//! - `WorkspaceHandle`: runs, model registry, dataset registry
//! - `RunHandle`: one run record (kind, metrics, tags, files, children)

pub mod capability;
mod error;
pub mod fakes;

pub use capability::{
    ArtifactSource, AzureCredentials, DatasetRef, Metrics, ModelArtifact, ModelFramework,
    RegisteredModel, RegistrationResult, ResourceConfiguration, RunHandle, RunKind, RunLocator,
    SharedRun, SharedWorkspace, Tags, WorkspaceConnector, WorkspaceHandle, WorkspaceLocation,
};
pub use error::{ProviderError, ProviderResult};
