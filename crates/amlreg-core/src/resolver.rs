//! Run resolution: from the run id a user supplied to the run that wrote the
//! model files.

use amlreg_state::{RunKind, SharedRun};
use tracing::{debug, info};

use crate::domain::{RegisterError, Result};

/// Walks pipeline and sweep wrappers down to the leaf run.
pub struct RunTypeResolver;

impl RunTypeResolver {
    /// Resolve `run` to the run that produced the model.
    ///
    /// Resolution rules:
    /// - `Pipeline`: the single step named `pipeline_child_run_name` replaces
    ///   the run; if that step has children, its first child replaces it.
    /// - `HyperSweep` (at the top or reached through a step): replaced by the
    ///   provider's best child by primary metric.
    /// - Anything else is already the leaf.
    pub async fn resolve(run: SharedRun, pipeline_child_run_name: Option<&str>) -> Result<SharedRun> {
        let mut working = run;

        if working.kind() == RunKind::Pipeline {
            working = Self::select_step(&working, pipeline_child_run_name).await?;

            let children = working.children().await.map_err(|e| {
                RegisterError::from_provider(
                    &format!("could not list child runs of step {}", working.id()),
                    e,
                )
            })?;
            if let Some(first) = children.into_iter().next() {
                debug!(
                    step = %working.id(),
                    child = %first.id(),
                    "Step has child runs, using the first one"
                );
                working = first;
            }
        }

        if working.kind() == RunKind::HyperSweep {
            let best = working.best_child_by_primary_metric().await.map_err(|e| {
                RegisterError::from_provider(
                    &format!("could not load best run of sweep {}", working.id()),
                    e,
                )
            })?;
            working = best.ok_or_else(|| {
                RegisterError::configuration(format!(
                    "hyperparameter sweep {} has no best run by primary metric; \
                     make sure at least one child run completed and logged the primary metric",
                    working.id()
                ))
            })?;
        }

        info!(
            run_id = %working.id(),
            kind = %working.kind(),
            "Resolved run that produced the model"
        );
        Ok(working)
    }

    async fn select_step(pipeline: &SharedRun, step_name: Option<&str>) -> Result<SharedRun> {
        let name = step_name.filter(|n| !n.is_empty()).ok_or_else(|| {
            RegisterError::configuration(format!(
                "run {} is a pipeline run; set pipeline_child_run_name in the parameters file \
                 to the step that produced the model",
                pipeline.id()
            ))
        })?;

        let mut steps = pipeline.find_steps(name).await.map_err(|e| {
            RegisterError::from_provider(
                &format!("could not list steps of pipeline {}", pipeline.id()),
                e,
            )
        })?;

        match steps.len() {
            0 => Err(RegisterError::configuration(format!(
                "found no step in the pipeline with the name '{}'",
                name
            ))),
            1 => Ok(steps.remove(0)),
            n => Err(RegisterError::configuration(format!(
                "found {} steps in the pipeline with the name '{}'; all step names should be \
                 unique in the pipeline",
                n, name
            ))),
        }
    }
}
