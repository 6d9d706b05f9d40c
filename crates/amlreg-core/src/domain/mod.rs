//! Domain model for model registration.

pub mod config;
pub mod error;
pub mod metrics;
pub mod parameters;

pub use config::{
    default_model_name, load_workspace_location, parse_credentials, BuildContext,
    RegistrationConfig, RegistrationMode,
};
pub use error::{RegisterError, Result};
pub use metrics::{ComparisonOutcome, MetricDirection, MetricSpec};
pub use parameters::{RegisterParameters, DEFAULT_MODEL_FILE_NAME, MAX_MODEL_NAME_LEN};
