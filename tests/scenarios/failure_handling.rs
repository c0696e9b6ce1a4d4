//! Test: a failure stops the run and blocks everything after it

use crate::helpers::*;
use async_trait::async_trait;
use stageline::core::{
    BuildEnvironment, ExecutionStatus, PipelineError, StackRef, StagePhase, StepDescriptor,
    StepState,
};
use stageline::endpoint::{self, default_source};
use stageline::execution::{ExecutionEvent, SchedulingStrategy};
use stageline::runner::{RunnerError, StepRunner};
use std::collections::HashMap;

/// Runner that panics instead of running one named step
struct PanicRunner {
    inner: RecordingRunner,
    panic_on: &'static str,
}

#[async_trait]
impl StepRunner for PanicRunner {
    async fn run_step(
        &self,
        stage: &str,
        step: &StepDescriptor,
        environment: &BuildEnvironment,
        env: &HashMap<String, String>,
    ) -> Result<String, RunnerError> {
        if step.name() == self.panic_on {
            panic!("runner crashed on {}", step.name());
        }
        self.inner.run_step(stage, step, environment, env).await
    }

    async fn deploy(
        &self,
        stage: &str,
        stack: &StackRef,
        environment: &BuildEnvironment,
    ) -> Result<HashMap<String, String>, RunnerError> {
        self.inner.deploy(stage, stack, environment).await
    }
}

#[tokio::test]
async fn test_unit_test_failure_blocks_deploy() {
    let pipeline = endpoint::endpoint_pipeline(default_source()).unwrap();
    let runner = RecordingRunner::new().failing("UnitTest");
    let log = runner.log.clone();

    let (run, events) = run_auto(runner, &pipeline, SchedulingStrategy::Sequential).await;

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(run.failed_step(), Some("UnitTest"));
    assert!(!log.contains("deploy:TestStage-EndpointStack"));
    assert!(!log.contains("start:ProdStage/UnitTest"));

    let test_stage = run.stage("TestStage").unwrap();
    assert_eq!(test_stage.phase, StagePhase::Failed);
    for name in ["UploadModel", "SetEndpointNameInParameterStore", "IntegrationTest"] {
        assert_eq!(
            test_stage.step(name).unwrap().state,
            StepState::Skipped {
                reason: "blocked by failed step 'UnitTest'".to_string()
            }
        );
    }
    assert_eq!(run.stage("ProdStage").unwrap().phase, StagePhase::Pending);

    let skipped = events
        .events()
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::StepSkipped { .. }))
        .count();
    assert_eq!(skipped, 3);
}

#[tokio::test]
async fn test_post_failure_skips_dependents_only() {
    let pipeline = endpoint::endpoint_pipeline(default_source()).unwrap();
    let runner = RecordingRunner::new().failing("UploadModel");
    let log = runner.log.clone();

    let (run, _) = run_auto(runner, &pipeline, SchedulingStrategy::Parallel).await;

    assert_eq!(run.failed_step(), Some("UploadModel"));
    assert!(log.contains("deploy:TestStage-EndpointStack"));
    // Started in the same batch, so it still ran to completion
    assert!(log.contains("run:TestStage/SetEndpointNameInParameterStore"));
    assert!(!log.contains("start:TestStage/IntegrationTest"));

    let stage = run.stage("TestStage").unwrap();
    assert!(stage.step("SetEndpointNameInParameterStore").unwrap().state.is_completed());
    assert!(matches!(
        stage.step("IntegrationTest").unwrap().state,
        StepState::Skipped { .. }
    ));
    // Outputs from the successful deploy are kept on the record
    assert_eq!(stage.outputs.len(), 2);
}

#[tokio::test]
async fn test_deploy_failure() {
    let pipeline = endpoint::endpoint_pipeline(default_source()).unwrap();
    let runner = RecordingRunner::new().failing_deploy("TestStage-EndpointStack");
    let log = runner.log.clone();

    let (run, _) = run_auto(runner, &pipeline, SchedulingStrategy::Sequential).await;

    assert!(matches!(
        run.error,
        Some(PipelineError::DeployFailed { ref stack, .. }) if stack == "TestStage-EndpointStack"
    ));
    assert_eq!(run.failed_step(), None);
    assert!(!log.contains("start:TestStage/UploadModel"));

    let stage = run.stage("TestStage").unwrap();
    assert_eq!(stage.phase, StagePhase::Failed);
    assert!(stage.step("UnitTest").unwrap().state.is_completed());
    assert!(matches!(
        stage.step("UploadModel").unwrap().state,
        StepState::Skipped { .. }
    ));
}

#[tokio::test]
async fn test_synth_failure_runs_no_stage() {
    let pipeline = endpoint::endpoint_pipeline(default_source()).unwrap();
    let runner = RecordingRunner::new().failing("Synth");
    let log = runner.log.clone();

    let (run, events) = run_auto(runner, &pipeline, SchedulingStrategy::Sequential).await;

    assert_eq!(run.failed_step(), Some("Synth"));
    assert_eq!(log.entries(), vec!["start:Build/Synth", "run:Build/Synth"]);
    assert!(run.stages.iter().all(|s| s.phase == StagePhase::Pending));
    assert!(matches!(
        events.events().last(),
        Some(ExecutionEvent::PipelineCompleted {
            status: ExecutionStatus::Failed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_panicking_runner_fails_its_step() {
    let pipeline = endpoint::endpoint_pipeline(default_source()).unwrap();
    let inner = RecordingRunner::new();
    let log = inner.log.clone();
    let runner = PanicRunner {
        inner,
        panic_on: "UploadModel",
    };

    let (run, events) = run_auto(runner, &pipeline, SchedulingStrategy::Sequential).await;

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(run.failed_step(), Some("UploadModel"));

    let stage = run.stage("TestStage").unwrap();
    assert_eq!(stage.phase, StagePhase::Failed);
    match &stage.step("UploadModel").unwrap().state {
        StepState::Failed { error, .. } => assert!(error.contains("panicked"), "{}", error),
        other => panic!("expected UploadModel to fail, got {:?}", other),
    }
    assert_eq!(
        stage.step("IntegrationTest").unwrap().state,
        StepState::Skipped {
            reason: "blocked by failed step 'UploadModel'".to_string()
        }
    );
    assert!(!log.contains("start:TestStage/IntegrationTest"));
    assert!(events.events().iter().any(|e| matches!(
        e,
        ExecutionEvent::StepFailed { step, .. } if step == "UploadModel"
    )));
}
