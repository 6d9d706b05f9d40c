//! Azure Machine Learning binding for aml-registermodel
//!
//! Implements the capability traits from `amlreg-state` over the workspace
//! REST APIs:
//! - Service principal token exchange (client credentials)
//! - Run history: runs, child runs, metrics
//! - Artifacts: run file listings and local file uploads
//! - Model management and dataset lookups

pub mod auth;
pub mod client;
pub mod dto;
pub mod error;
pub mod workspace;

pub use auth::{ServicePrincipalToken, DEFAULT_AUTHORITY_HOST};
pub use client::{AmlClient, DEFAULT_MANAGEMENT_HOST};
pub use error::{AzureError, Result};
pub use workspace::{AzureConnector, AzureEndpoints, AzureRun, AzureWorkspace};
