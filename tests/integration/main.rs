//! Integration tests running real commands through a POSIX shell
//!
//! These tests are tagged with `#[ignore]` and should be run explicitly with:
//!
//!     cargo test --test integration -- --ignored

use stageline::core::config::PipelineConfig;
use stageline::core::{PipelineError, StepState};
use stageline::execution::{ExecutionEngine, SchedulingStrategy};
use stageline::runner::{AutoApprove, RunnerConfig, ShellRunner};

const YAML: &str = r#"
name: "shell-pipeline"
source:
  repo: "acme/endpoint"
  branch: "main"
synth:
  name: "Synth"
  commands: ["echo synth"]
stages:
  - name: "TestStage"
    stack:
      id: "TestStage-EndpointStack"
      outputs: ["ModelBucketName", "EndpointName"]
    pre:
      - name: "UnitTest"
        commands: ["echo unit"]
    post:
      - name: "UploadModel"
        commands: ["echo \"bucket=$model_bucket_name\""]
        env_from_outputs:
          model_bucket_name:
            stack: "TestStage-EndpointStack"
            output: "ModelBucketName"
      - name: "SetEndpointNameInParameterStore"
        commands: ["echo \"endpoint=$endpoint_name production=$production\""]
        env:
          production: "False"
        env_from_outputs:
          endpoint_name:
            stack: "TestStage-EndpointStack"
            output: "EndpointName"
      - name: "IntegrationTest"
        commands: ["test -n \"$PATH\""]
        depends_on: ["UploadModel", "SetEndpointNameInParameterStore"]
local_outputs:
  TestStage-EndpointStack:
    ModelBucketName: "models-test"
    EndpointName: "endpoint-test"
"#;

fn runner_for(config: &PipelineConfig) -> ShellRunner {
    let mut runner_config = RunnerConfig::new().with_timeout(30);
    for (stack, outputs) in &config.local_outputs {
        runner_config = runner_config.with_stack_outputs(stack, outputs.clone());
    }
    ShellRunner::new(runner_config)
}

fn output_of(state: &StepState) -> &str {
    match state {
        StepState::Completed { output, .. } => output.trim(),
        other => panic!("step did not complete: {:?}", other),
    }
}

#[tokio::test]
#[ignore] // Requires a POSIX shell
async fn test_shell_pipeline_passes_outputs_to_env() {
    let config = PipelineConfig::from_yaml(YAML).unwrap();
    let pipeline = config.to_definition().unwrap();
    let engine = ExecutionEngine::new(runner_for(&config), AutoApprove, SchedulingStrategy::Parallel);

    let run = engine.execute(&pipeline).await;
    assert!(run.is_success(), "run failed: {:?}", run.error);

    let stage = run.stage("TestStage").unwrap();
    assert_eq!(output_of(&stage.step("UploadModel").unwrap().state), "bucket=models-test");
    assert_eq!(
        output_of(&stage.step("SetEndpointNameInParameterStore").unwrap().state),
        "endpoint=endpoint-test production=False"
    );
}

#[tokio::test]
#[ignore] // Requires a POSIX shell
async fn test_shell_failure_stops_pipeline() {
    let yaml = YAML.replace("echo unit", "exit 2");
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    let pipeline = config.to_definition().unwrap();
    let engine = ExecutionEngine::new(runner_for(&config), AutoApprove, SchedulingStrategy::Sequential);

    let run = engine.execute(&pipeline).await;

    assert!(matches!(
        run.error,
        Some(PipelineError::StepExecution { ref step, .. }) if step == "UnitTest"
    ));
    assert!(run.stage("TestStage").unwrap().outputs.is_empty());
}
