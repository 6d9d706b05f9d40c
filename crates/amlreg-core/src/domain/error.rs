//! Error taxonomy for model registration.

use amlreg_state::ProviderError;

use super::metrics::MetricDirection;

/// Fatal outcomes of one registration attempt.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    /// User-fixable misconfiguration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credential exchange with the identity provider failed.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The candidate run did not pass the metric gate.
    #[error(
        "new model does not perform better than production model for metric '{metric}' \
         ({direction}: candidate {candidate}, production {incumbent})"
    )]
    ModelPerformance {
        metric: String,
        candidate: f64,
        incumbent: f64,
        direction: MetricDirection,
    },
}

impl RegisterError {
    pub fn configuration(message: impl Into<String>) -> Self {
        RegisterError::Configuration(message.into())
    }

    /// Map a provider failure into the taxonomy.
    ///
    /// Authorization failures stay authentication errors; everything else is
    /// reported as configuration with `context` prefixed.
    pub fn from_provider(context: &str, err: ProviderError) -> Self {
        match err {
            ProviderError::Unauthorized(message) => {
                RegisterError::Authentication(format!("{}: {}", context, message))
            }
            other => RegisterError::Configuration(format!("{}: {}", context, other)),
        }
    }

    /// Short category label for CI annotations.
    pub fn category(&self) -> &'static str {
        match self {
            RegisterError::Configuration(_) => "configuration",
            RegisterError::Authentication(_) => "authentication",
            RegisterError::ModelPerformance { .. } => "model_performance",
        }
    }
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegisterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_display() {
        let err = RegisterError::configuration("missing key model_name");
        assert_eq!(err.to_string(), "configuration error: missing key model_name");
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_model_performance_display() {
        let err = RegisterError::ModelPerformance {
            metric: "accuracy".to_string(),
            candidate: 0.8,
            incumbent: 0.9,
            direction: MetricDirection::Maximize,
        };
        let msg = err.to_string();
        assert!(msg.contains("accuracy"));
        assert!(msg.contains("0.8"));
        assert!(msg.contains("0.9"));
        assert!(msg.contains("maximize"));
    }

    #[test]
    fn test_from_provider_unauthorized_is_authentication() {
        let err = RegisterError::from_provider(
            "could not open workspace",
            ProviderError::Unauthorized("AADSTS7000215".to_string()),
        );
        assert!(matches!(err, RegisterError::Authentication(_)));
        assert!(err.to_string().contains("AADSTS7000215"));
    }

    #[test]
    fn test_from_provider_other_is_configuration() {
        let err = RegisterError::from_provider(
            "could not load run",
            ProviderError::not_found("run", "exp/abc"),
        );
        assert!(matches!(err, RegisterError::Configuration(_)));
        assert!(err.to_string().contains("could not load run"));
    }
}
