//! Metric gate specification and outcomes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{RegisterError, Result};

/// Which way a metric has to move for the candidate to be acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    /// Larger is better (accuracy, AUC).
    Maximize,
    /// Smaller is better (loss, error rate).
    Minimize,
}

impl MetricDirection {
    /// Whether `candidate` is worse than `incumbent`. Ties are never worse.
    pub fn is_regression(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            MetricDirection::Maximize => candidate < incumbent,
            MetricDirection::Minimize => candidate > incumbent,
        }
    }
}

impl fmt::Display for MetricDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricDirection::Maximize => f.write_str("maximize"),
            MetricDirection::Minimize => f.write_str("minimize"),
        }
    }
}

/// Metrics the candidate must not regress on.
///
/// A name may appear in only one of the two lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMetricSpec")]
pub struct MetricSpec {
    maximize: Vec<String>,
    minimize: Vec<String>,
}

#[derive(Deserialize)]
struct RawMetricSpec {
    #[serde(default)]
    maximize: Vec<String>,
    #[serde(default)]
    minimize: Vec<String>,
}

impl TryFrom<RawMetricSpec> for MetricSpec {
    type Error = RegisterError;

    fn try_from(raw: RawMetricSpec) -> Result<Self> {
        MetricSpec::new(raw.maximize, raw.minimize)
    }
}

impl MetricSpec {
    pub fn new(maximize: Vec<String>, minimize: Vec<String>) -> Result<Self> {
        let max_names: BTreeSet<&str> = maximize.iter().map(String::as_str).collect();
        let conflicts: Vec<&str> = minimize
            .iter()
            .map(String::as_str)
            .filter(|name| max_names.contains(name))
            .collect();

        if !conflicts.is_empty() {
            return Err(RegisterError::configuration(format!(
                "metric(s) listed in both metrics_max and metrics_min: {}",
                conflicts.join(", ")
            )));
        }

        Ok(Self { maximize, minimize })
    }

    pub fn maximize(&self) -> &[String] {
        &self.maximize
    }

    pub fn minimize(&self) -> &[String] {
        &self.minimize
    }

    pub fn is_empty(&self) -> bool {
        self.maximize.is_empty() && self.minimize.is_empty()
    }

    /// All configured metrics in evaluation order, maximize first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, MetricDirection)> {
        self.maximize
            .iter()
            .map(|m| (m.as_str(), MetricDirection::Maximize))
            .chain(
                self.minimize
                    .iter()
                    .map(|m| (m.as_str(), MetricDirection::Minimize)),
            )
    }
}

/// Result of comparing a candidate run against the production model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ComparisonOutcome {
    /// Nothing to compare against; registration proceeds.
    NoIncumbent,
    /// Every configured metric held or improved.
    Passed,
    /// First metric that regressed.
    Failed {
        metric: String,
        candidate: f64,
        incumbent: f64,
        direction: MetricDirection,
    },
}

impl ComparisonOutcome {
    pub fn is_pass(&self) -> bool {
        !matches!(self, ComparisonOutcome::Failed { .. })
    }

    /// Turn a failed comparison into `RegisterError::ModelPerformance`.
    pub fn into_gate(self) -> Result<Self> {
        match self {
            ComparisonOutcome::Failed {
                metric,
                candidate,
                incumbent,
                direction,
            } => Err(RegisterError::ModelPerformance {
                metric,
                candidate,
                incumbent,
                direction,
            }),
            passed => Ok(passed),
        }
    }
}
