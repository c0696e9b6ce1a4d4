//! Test: deployed stack outputs reach the steps bound to them

use crate::helpers::*;
use stageline::core::{
    OutputRef, PipelineDefinition, PipelineError, SourceRef, StackRef, StageDefinition,
    StagePhase, StepDescriptor, StepGraph, StepState,
};
use stageline::endpoint::{self, default_source};
use stageline::execution::SchedulingStrategy;

#[tokio::test]
async fn test_post_steps_receive_own_stack_outputs() {
    let pipeline = endpoint::endpoint_pipeline(default_source()).unwrap();
    let runner = RecordingRunner::new()
        .with_outputs(
            "TestStage-EndpointStack",
            &[("ModelBucketName", "models-test"), ("EndpointName", "endpoint-test")],
        )
        .with_outputs(
            "ProdStage-EndpointStack",
            &[("ModelBucketName", "models-prod"), ("EndpointName", "endpoint-prod")],
        );
    let recorder = runner.clone();

    let (run, _) = run_auto(runner, &pipeline, SchedulingStrategy::Parallel).await;
    assert!(run.is_success());

    let upload = recorder.env_of("TestStage/UploadModel").unwrap();
    assert_eq!(upload.get("model_bucket_name").map(String::as_str), Some("models-test"));

    let register = recorder.env_of("ProdStage/SetEndpointNameInParameterStore").unwrap();
    assert_eq!(register.get("endpoint_name").map(String::as_str), Some("endpoint-prod"));
    assert_eq!(register.get("production").map(String::as_str), Some("True"));

    let test_register = recorder.env_of("TestStage/SetEndpointNameInParameterStore").unwrap();
    assert_eq!(test_register.get("production").map(String::as_str), Some("False"));

    assert_eq!(
        run.stage("ProdStage").unwrap().outputs.get("EndpointName").map(String::as_str),
        Some("endpoint-prod")
    );
}

fn two_stage_pipeline() -> PipelineDefinition {
    let first = StageDefinition::compose(
        "Shared",
        StackRef::new("SharedStack", ["BucketName"]),
        StepGraph::default(),
        StepGraph::default(),
        None,
    )
    .unwrap();

    let smoke = StepDescriptor::new("Smoke", ["./smoke.sh"])
        .bind("bucket", OutputRef::new("SharedStack", "BucketName"));
    let second = StageDefinition::compose(
        "App",
        StackRef::new("AppStack", Vec::<String>::new()),
        StepGraph::from_steps([smoke]).unwrap(),
        StepGraph::default(),
        None,
    )
    .unwrap();

    PipelineDefinition::new(
        "two-stage",
        SourceRef::new("acme/app", "main"),
        StepDescriptor::new("Synth", ["make synth"]),
    )
    .unwrap()
    .with_stage(first, vec![])
    .unwrap()
    .with_stage(second, vec![])
    .unwrap()
}

#[tokio::test]
async fn test_pre_step_reads_earlier_stage_output() {
    let pipeline = two_stage_pipeline();
    let runner = RecordingRunner::new().with_outputs("SharedStack", &[("BucketName", "shared-bucket")]);
    let recorder = runner.clone();

    let (run, _) = run_auto(runner, &pipeline, SchedulingStrategy::Sequential).await;
    assert!(run.is_success());

    let env = recorder.env_of("App/Smoke").unwrap();
    assert_eq!(env.get("bucket").map(String::as_str), Some("shared-bucket"));
}

#[tokio::test]
async fn test_missing_output_fails_bound_step() {
    let pipeline = two_stage_pipeline();
    // The stack deploys but never emits the declared output
    let runner = RecordingRunner::new().with_outputs("SharedStack", &[]);
    let log = runner.log.clone();

    let (run, _) = run_auto(runner, &pipeline, SchedulingStrategy::Sequential).await;

    assert!(!run.is_success());
    assert_eq!(run.failed_step(), Some("Smoke"));
    assert!(matches!(
        run.error,
        Some(PipelineError::UnresolvedBinding { ref env_var, .. }) if env_var == "bucket"
    ));

    // The step never reached the runner
    assert!(!log.contains("start:App/Smoke"));
    assert!(!log.contains("deploy:AppStack"));
    let app = run.stage("App").unwrap();
    assert_eq!(app.phase, StagePhase::Failed);
    assert!(matches!(app.step("Smoke").unwrap().state, StepState::Failed { .. }));
}

#[test]
fn test_binding_to_later_stage_is_rejected() {
    let early = StepDescriptor::new("Early", ["true"])
        .bind("endpoint", OutputRef::new("ProdStage-EndpointStack", "EndpointName"));
    let stage = StageDefinition::compose(
        "TestStage",
        endpoint::endpoint_stack("TestStage"),
        StepGraph::from_steps([early]).unwrap(),
        StepGraph::default(),
        None,
    )
    .unwrap();

    let err = PipelineDefinition::new("p", default_source(), endpoint::synth())
        .unwrap()
        .with_stage(stage, vec![])
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnresolvedBinding { ref step, .. } if step == "Early"));
}
