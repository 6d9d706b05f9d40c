//! Metric gate: candidate run vs. the run behind the production model.

use amlreg_state::{Metrics, RunHandle, WorkspaceHandle};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{ComparisonOutcome, MetricSpec, RegisterError, Result};

/// Compares a candidate run against the currently registered model.
pub struct MetricComparator;

impl MetricComparator {
    /// Compare `candidate` against the latest model registered as `model_name`.
    ///
    /// Gate rule:
    /// - No model under that name, or a model without a linked run →
    ///   `NoIncumbent` (nothing to compare against, never blocks)
    /// - Maximize metrics fail when `candidate < incumbent`
    /// - Minimize metrics fail when `candidate > incumbent`
    /// - Ties pass
    /// - A configured metric missing or non-numeric on either side is a
    ///   configuration error
    pub async fn compare(
        workspace: &dyn WorkspaceHandle,
        candidate: &dyn RunHandle,
        model_name: &str,
        spec: &MetricSpec,
    ) -> Result<ComparisonOutcome> {
        debug!(model = %model_name, "Loading production model");
        let incumbent = match workspace.lookup_model(model_name).await {
            Ok(Some(model)) => model,
            Ok(None) => {
                info!(
                    model = %model_name,
                    "No model with the same name registered, assuming first registration"
                );
                return Ok(ComparisonOutcome::NoIncumbent);
            }
            Err(e) if e.is_not_found() => {
                info!(model = %model_name, "Production model not found: {}", e);
                return Ok(ComparisonOutcome::NoIncumbent);
            }
            Err(e) => {
                return Err(RegisterError::from_provider(
                    &format!("could not load production model '{}'", model_name),
                    e,
                ))
            }
        };

        debug!(model = %incumbent.id, "Loading run of production model");
        let incumbent_run = match workspace.incumbent_run(&incumbent).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                info!(
                    model = %incumbent.id,
                    "Production model was not registered from a run, skipping comparison"
                );
                return Ok(ComparisonOutcome::NoIncumbent);
            }
            Err(e) if e.is_not_found() => {
                warn!(
                    model = %incumbent.id,
                    "Run of production model no longer exists, skipping comparison: {}", e
                );
                return Ok(ComparisonOutcome::NoIncumbent);
            }
            Err(e) => {
                return Err(RegisterError::from_provider(
                    &format!("could not load run of production model '{}'", incumbent.id),
                    e,
                ))
            }
        };

        let candidate_metrics = candidate.metrics().await.map_err(|e| {
            RegisterError::from_provider(
                &format!("could not load metrics of run {}", candidate.id()),
                e,
            )
        })?;
        let incumbent_metrics = incumbent_run.metrics().await.map_err(|e| {
            RegisterError::from_provider(
                &format!("could not load metrics of run {}", incumbent_run.id()),
                e,
            )
        })?;

        let outcome = Self::evaluate(&candidate_metrics, &incumbent_metrics, spec)?;
        info!(
            model = %incumbent.id,
            candidate = %candidate.id(),
            passed = outcome.is_pass(),
            "Compared metrics against production model"
        );
        Ok(outcome)
    }

    /// Apply the gate rule to two metric maps.
    ///
    /// Metrics are checked in configuration order (maximize first); the first
    /// regression is reported.
    pub fn evaluate(
        candidate: &Metrics,
        incumbent: &Metrics,
        spec: &MetricSpec,
    ) -> Result<ComparisonOutcome> {
        for (metric, direction) in spec.iter() {
            let candidate_value = numeric_metric(candidate, metric, "new")?;
            let incumbent_value = numeric_metric(incumbent, metric, "production")?;

            debug!(
                metric = %metric,
                %direction,
                candidate = candidate_value,
                incumbent = incumbent_value,
                "Comparing metric"
            );

            if direction.is_regression(candidate_value, incumbent_value) {
                return Ok(ComparisonOutcome::Failed {
                    metric: metric.to_string(),
                    candidate: candidate_value,
                    incumbent: incumbent_value,
                    direction,
                });
            }
        }

        Ok(ComparisonOutcome::Passed)
    }
}

fn numeric_metric(metrics: &Metrics, name: &str, side: &str) -> Result<f64> {
    match metrics.get(name) {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
            RegisterError::configuration(format!(
                "metric comparison failed for metric name '{}': value on the {} model is out of range",
                name, side
            ))
        }),
        Some(other) => Err(RegisterError::configuration(format!(
            "metric comparison failed for metric name '{}': value on the {} model is not a number ({})",
            name,
            side,
            json_type(other)
        ))),
        None => Err(RegisterError::configuration(format!(
            "metric comparison failed for metric name '{}': metric was not logged by the {} model's run",
            name, side
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
