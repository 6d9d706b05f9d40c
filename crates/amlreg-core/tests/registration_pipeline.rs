//! End-to-end registration flows against the in-memory workspace.

use std::path::PathBuf;
use std::sync::Arc;

use amlreg_core::{
    ArtifactSource, BuildContext, ComparisonOutcome, GateDecision, RegisterError,
    RegisterParameters, RegistrationConfig, RegistrationMode, RegistrationPipeline, RunKind,
    RunLocator, WorkspaceLocation, ARTIFACT_SHA256_PROPERTY,
};
use amlreg_state::fakes::{MemoryConnector, MemoryRun, MemoryWorkspace};
use amlreg_state::{AzureCredentials, RegisteredModel};
use secrecy::SecretString;
use serde_json::json;

fn credentials() -> AzureCredentials {
    AzureCredentials {
        tenant_id: "tenant".to_string(),
        client_id: "client".to_string(),
        client_secret: SecretString::from("secret".to_string()),
        subscription_id: "sub".to_string(),
    }
}

fn build() -> BuildContext {
    BuildContext {
        actor: "octocat".to_string(),
        repository: "octo/churn-model".to_string(),
        sha: "abc123".to_string(),
        git_ref: "refs/heads/main".to_string(),
    }
}

fn config(mode: RegistrationMode, parameters: serde_json::Value) -> RegistrationConfig {
    RegistrationConfig {
        credentials: credentials(),
        location: WorkspaceLocation {
            subscription_id: "sub".to_string(),
            resource_group: "rg".to_string(),
            workspace_name: "ws".to_string(),
        },
        mode,
        parameters: RegisterParameters::from_json(&parameters.to_string(), "registermodel.json")
            .unwrap(),
        build: build(),
        workspace_root: PathBuf::from("."),
    }
}

fn remote(run_id: &str) -> RegistrationMode {
    RegistrationMode::RemoteRun {
        experiment: "exp".to_string(),
        run_id: run_id.to_string(),
    }
}

fn training_run(id: &str, accuracy: f64) -> MemoryRun {
    MemoryRun::new("exp", id, RunKind::Plain)
        .with_metric("accuracy", accuracy)
        .with_tag("trainer", "sklearn")
        .with_file("outputs/model.pkl")
        .with_file("outputs/readme.txt")
}

fn seed_incumbent(workspace: &MemoryWorkspace, name: &str, run_id: &str) {
    workspace.seed_model(RegisteredModel {
        id: format!("{}:1", name),
        name: name.to_string(),
        version: 1,
        run: Some(RunLocator {
            experiment: "exp".to_string(),
            run_id: run_id.to_string(),
        }),
        created_at: None,
    });
}

fn setup() -> (Arc<MemoryWorkspace>, MemoryConnector) {
    let workspace = Arc::new(MemoryWorkspace::new());
    let connector = MemoryConnector::new(workspace.clone());
    (workspace, connector)
}

// ===========================================================================
// Remote run mode
// ===========================================================================

#[tokio::test]
async fn remote_run_better_than_production_is_registered() {
    let (workspace, connector) = setup();
    workspace.insert_run(training_run("prod", 0.80));
    workspace.insert_run(training_run("cand", 0.90));
    seed_incumbent(&workspace, "churn", "prod");

    let cfg = config(
        remote("cand"),
        json!({ "model_name": "churn", "metrics_max": ["accuracy"], "model_tags": { "team": "risk" } }),
    );
    let report = RegistrationPipeline::run(&connector, &cfg).await.unwrap();

    assert_eq!(report.result.name, "churn");
    assert_eq!(report.result.version, 2);
    assert_eq!(report.mode, "remote_run");
    assert_eq!(report.run_id.as_deref(), Some("cand"));
    assert_eq!(report.artifact_path, "outputs/model.pkl");
    assert_eq!(
        report.gate,
        GateDecision::Compared {
            outcome: ComparisonOutcome::Passed
        }
    );

    let registered = workspace.registrations();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].tags["trainer"], "sklearn");
    assert_eq!(registered[0].tags["team"], "risk");
    assert!(!registered[0].tags.contains_key("actor"));
    assert_eq!(connector.connections().len(), 1);
}

#[tokio::test]
async fn regression_blocks_registration() {
    let (workspace, connector) = setup();
    workspace.insert_run(training_run("prod", 0.90));
    workspace.insert_run(training_run("cand", 0.85));
    seed_incumbent(&workspace, "churn", "prod");

    let cfg = config(
        remote("cand"),
        json!({ "model_name": "churn", "metrics_max": ["accuracy"] }),
    );
    let err = RegistrationPipeline::run(&connector, &cfg).await.unwrap_err();

    match err {
        RegisterError::ModelPerformance {
            metric,
            candidate,
            incumbent,
            ..
        } => {
            assert_eq!(metric, "accuracy");
            assert_eq!(candidate, 0.85);
            assert_eq!(incumbent, 0.90);
        }
        other => panic!("expected model performance error, got {:?}", other),
    }
    assert!(workspace.registrations().is_empty());
}

#[tokio::test]
async fn force_registration_skips_comparison() {
    let (workspace, connector) = setup();
    workspace.insert_run(training_run("prod", 0.90));
    workspace.insert_run(training_run("cand", 0.10));
    seed_incumbent(&workspace, "churn", "prod");

    let cfg = config(
        remote("cand"),
        json!({ "model_name": "churn", "metrics_max": ["accuracy"], "force_registration": true }),
    );
    let report = RegistrationPipeline::run(&connector, &cfg).await.unwrap();

    assert_eq!(report.gate, GateDecision::Forced);
    assert!(workspace.model_lookups().is_empty());
    assert_eq!(workspace.registrations().len(), 1);
}

#[tokio::test]
async fn first_registration_has_no_incumbent() {
    let (workspace, connector) = setup();
    workspace.insert_run(training_run("cand", 0.01));

    let cfg = config(
        remote("cand"),
        json!({ "model_name": "churn", "metrics_max": ["accuracy"] }),
    );
    let report = RegistrationPipeline::run(&connector, &cfg).await.unwrap();

    assert_eq!(
        report.gate,
        GateDecision::Compared {
            outcome: ComparisonOutcome::NoIncumbent
        }
    );
    assert_eq!(report.result.version, 1);
    assert_eq!(workspace.model_lookups(), vec!["churn".to_string()]);
}

#[tokio::test]
async fn production_model_without_run_is_not_compared() {
    let (workspace, connector) = setup();
    workspace.insert_run(training_run("cand", 0.01));
    workspace.seed_model(RegisteredModel {
        id: "churn:1".to_string(),
        name: "churn".to_string(),
        version: 1,
        run: None,
        created_at: None,
    });

    let cfg = config(
        remote("cand"),
        json!({ "model_name": "churn", "metrics_max": ["accuracy"] }),
    );
    let report = RegistrationPipeline::run(&connector, &cfg).await.unwrap();

    assert_eq!(
        report.gate,
        GateDecision::Compared {
            outcome: ComparisonOutcome::NoIncumbent
        }
    );
    assert_eq!(report.result.version, 2);
    assert_eq!(workspace.registrations().len(), 1);
}

#[tokio::test]
async fn production_model_with_deleted_run_is_not_compared() {
    let (workspace, connector) = setup();
    workspace.insert_run(training_run("cand", 0.01));
    seed_incumbent(&workspace, "churn", "purged-run");

    let cfg = config(
        remote("cand"),
        json!({ "model_name": "churn", "metrics_max": ["accuracy"] }),
    );
    let report = RegistrationPipeline::run(&connector, &cfg).await.unwrap();

    assert_eq!(
        report.gate,
        GateDecision::Compared {
            outcome: ComparisonOutcome::NoIncumbent
        }
    );
    assert_eq!(report.result.version, 2);
    assert_eq!(workspace.registrations().len(), 1);
}

#[tokio::test]
async fn reregistering_same_run_ties_and_passes() {
    let (workspace, connector) = setup();
    workspace.insert_run(training_run("cand", 0.9).with_metric("loss", 0.2));

    let cfg = config(
        remote("cand"),
        json!({ "model_name": "churn", "metrics_max": ["accuracy"], "metrics_min": ["loss"] }),
    );
    let first = RegistrationPipeline::run(&connector, &cfg).await.unwrap();
    let second = RegistrationPipeline::run(&connector, &cfg).await.unwrap();

    assert_eq!(first.result.version, 1);
    assert_eq!(second.result.version, 2);
    assert_eq!(
        second.gate,
        GateDecision::Compared {
            outcome: ComparisonOutcome::Passed
        }
    );
}

#[tokio::test]
async fn pipeline_step_is_resolved_before_gating() {
    let (workspace, connector) = setup();
    workspace.insert_run(
        MemoryRun::new("exp", "pipe", RunKind::Pipeline)
            .with_child(MemoryRun::new("exp", "prep", RunKind::Plain).named("prep"))
            .with_child(training_run("train-step", 0.9).named("train")),
    );

    let cfg = config(
        remote("pipe"),
        json!({ "model_name": "churn", "pipeline_child_run_name": "train" }),
    );
    let report = RegistrationPipeline::run(&connector, &cfg).await.unwrap();

    assert_eq!(report.run_id.as_deref(), Some("train-step"));
    match &workspace.registrations()[0].source {
        ArtifactSource::Run { run, path } => {
            assert_eq!(run.run_id, "train-step");
            assert_eq!(path, "outputs/model.pkl");
        }
        other => panic!("expected run source, got {:?}", other),
    }
}

#[tokio::test]
async fn ambiguous_pipeline_step_is_configuration_error() {
    let (workspace, connector) = setup();
    workspace.insert_run(
        MemoryRun::new("exp", "pipe", RunKind::Pipeline)
            .with_child(training_run("t1", 0.9).named("train"))
            .with_child(training_run("t2", 0.9).named("train")),
    );

    let cfg = config(
        remote("pipe"),
        json!({ "model_name": "churn", "pipeline_child_run_name": "train" }),
    );
    let err = RegistrationPipeline::run(&connector, &cfg).await.unwrap_err();
    assert!(matches!(err, RegisterError::Configuration(_)));
    assert!(workspace.registrations().is_empty());
}

#[tokio::test]
async fn sweep_registers_best_child() {
    let (workspace, connector) = setup();
    workspace.insert_run(
        MemoryRun::new("exp", "hd", RunKind::HyperSweep)
            .with_child(training_run("hd_0", 0.7))
            .with_child(training_run("hd_1", 0.9))
            .with_best_child("hd_1"),
    );

    let cfg = config(remote("hd"), json!({ "model_name": "churn" }));
    let report = RegistrationPipeline::run(&connector, &cfg).await.unwrap();
    assert_eq!(report.run_id.as_deref(), Some("hd_1"));
}

#[tokio::test]
async fn unknown_run_is_configuration_error() {
    let (_workspace, connector) = setup();
    let cfg = config(remote("ghost"), json!({}));
    let err = RegistrationPipeline::run(&connector, &cfg).await.unwrap_err();
    assert!(matches!(err, RegisterError::Configuration(_)));
    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn missing_model_file_in_run_is_configuration_error() {
    let (workspace, connector) = setup();
    workspace.insert_run(MemoryRun::new("exp", "cand", RunKind::Plain).with_file("outputs/log.txt"));

    let cfg = config(remote("cand"), json!({ "model_name": "churn" }));
    let err = RegistrationPipeline::run(&connector, &cfg).await.unwrap_err();
    assert!(matches!(err, RegisterError::Configuration(_)));
    assert!(err.to_string().contains("model.pkl"));
}

#[tokio::test]
async fn explicit_path_missing_at_registration_is_configuration_error() {
    let (workspace, connector) = setup();
    workspace.insert_run(training_run("cand", 0.9));

    let cfg = config(
        remote("cand"),
        json!({ "model_name": "churn", "model_file_name": "outputs/missing.onnx" }),
    );
    let err = RegistrationPipeline::run(&connector, &cfg).await.unwrap_err();
    assert!(matches!(err, RegisterError::Configuration(_)));
}

#[tokio::test]
async fn unresolvable_datasets_are_dropped() {
    let (workspace, connector) = setup();
    workspace.insert_run(training_run("cand", 0.9));
    workspace.insert_dataset("churn-train");

    let cfg = config(
        remote("cand"),
        json!({ "model_name": "churn", "datasets": ["churn-train", "does-not-exist"] }),
    );
    RegistrationPipeline::run(&connector, &cfg).await.unwrap();

    let registered = workspace.registrations();
    assert_eq!(registered[0].datasets.len(), 1);
    assert_eq!(registered[0].datasets[0].name, "churn-train");
}

#[tokio::test]
async fn registry_rejection_is_configuration_error() {
    let (workspace, connector) = setup();
    workspace.insert_run(training_run("cand", 0.9));
    workspace.reject_registrations("model name contains invalid characters");

    let cfg = config(remote("cand"), json!({ "model_name": "churn" }));
    let err = RegistrationPipeline::run(&connector, &cfg).await.unwrap_err();
    assert!(matches!(err, RegisterError::Configuration(_)));
    assert!(err.to_string().contains("invalid characters"));
}

#[tokio::test]
async fn denied_credentials_are_authentication_error() {
    let connector = MemoryConnector::denying("AADSTS7000215: invalid client secret");
    let cfg = config(remote("cand"), json!({}));
    let err = RegistrationPipeline::run(&connector, &cfg).await.unwrap_err();
    assert!(matches!(err, RegisterError::Authentication(_)));
    assert!(err.to_string().contains("'ws'"));
}

// ===========================================================================
// Local artifact mode
// ===========================================================================

#[tokio::test]
async fn local_artifact_uses_build_tags_and_default_name() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("models")).unwrap();
    std::fs::write(dir.path().join("models/model.pkl"), b"abc").unwrap();

    let (workspace, connector) = setup();
    let mut cfg = config(
        RegistrationMode::LocalArtifact,
        json!({ "model_tags": { "commit": "override" }, "metrics_max": ["accuracy"] }),
    );
    cfg.workspace_root = dir.path().to_path_buf();

    let report = RegistrationPipeline::run(&connector, &cfg).await.unwrap();

    assert_eq!(report.result.name, "churn-model-main");
    assert_eq!(report.mode, "local_artifact");
    assert_eq!(report.gate, GateDecision::NotApplicable);
    assert!(report.run_id.is_none());
    assert!(workspace.model_lookups().is_empty());

    let registered = &workspace.registrations()[0];
    assert_eq!(registered.tags["actor"], "octocat");
    assert_eq!(registered.tags["repository"], "octo/churn-model");
    assert_eq!(registered.tags["ref"], "refs/heads/main");
    assert_eq!(registered.tags["commit"], "override");
    assert_eq!(
        registered.properties[ARTIFACT_SHA256_PROPERTY],
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_eq!(
        registered.source,
        ArtifactSource::Local {
            path: dir.path().join("models/model.pkl")
        }
    );
}

#[tokio::test]
async fn local_artifact_missing_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let (workspace, connector) = setup();
    let mut cfg = config(
        RegistrationMode::LocalArtifact,
        json!({ "model_file_name": "models/model.pkl" }),
    );
    cfg.workspace_root = dir.path().to_path_buf();

    let err = RegistrationPipeline::run(&connector, &cfg).await.unwrap_err();
    assert!(matches!(err, RegisterError::Configuration(_)));
    assert!(workspace.registrations().is_empty());
}

#[tokio::test]
async fn report_outputs_name_version_and_id() {
    let (workspace, connector) = setup();
    workspace.insert_run(training_run("cand", 0.9));
    let cfg = config(remote("cand"), json!({ "model_name": "churn" }));

    let report = RegistrationPipeline::run(&connector, &cfg).await.unwrap();
    assert_eq!(
        report.outputs(),
        vec![
            ("model_name", "churn".to_string()),
            ("model_version", "1".to_string()),
            ("model_id", "churn:1".to_string()),
        ]
    );
}
