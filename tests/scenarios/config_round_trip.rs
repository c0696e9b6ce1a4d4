//! Test: pipelines survive the trip through YAML and run the same way

use crate::helpers::*;
use stageline::core::config::PipelineConfig;
use stageline::core::Phase;
use stageline::endpoint::{self, default_source};
use stageline::execution::SchedulingStrategy;

#[test]
fn test_endpoint_pipeline_round_trip() {
    let original = endpoint::endpoint_pipeline(default_source()).unwrap();

    let yaml = original.to_config().to_yaml().unwrap();
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    assert_eq!(config, original.to_config());

    let rebuilt = config.to_definition().unwrap();
    assert_eq!(rebuilt.defaults(), original.defaults());
    assert_eq!(rebuilt.synth(), original.synth());
    for ((name, phase, graph), (_, _, expected)) in rebuilt.step_graphs().zip(original.step_graphs()) {
        assert_eq!(graph.edges(), expected.edges(), "{} {} edges differ", name, phase);
        let steps: Vec<_> = graph.steps().map(|(_, s)| s.clone()).collect();
        let expected_steps: Vec<_> = expected.steps().map(|(_, s)| s.clone()).collect();
        assert_eq!(steps, expected_steps);
    }
}

#[tokio::test]
async fn test_yaml_pipeline_runs_like_builtin() {
    let yaml = endpoint::endpoint_pipeline(default_source())
        .unwrap()
        .to_config()
        .to_yaml()
        .unwrap();
    let pipeline = PipelineConfig::from_yaml(&yaml).unwrap().to_definition().unwrap();

    let runner = RecordingRunner::new();
    let log = runner.log.clone();
    let (run, _) = run_auto(runner, &pipeline, SchedulingStrategy::Sequential).await;

    assert!(run.is_success());
    assert_eq!(log.count("deploy:TestStage-EndpointStack"), 1);
    assert_eq!(log.count("deploy:ProdStage-EndpointStack"), 1);
}

#[test]
fn test_yaml_cycle_is_rejected() {
    let yaml = r#"
name: "cyclic"
source:
  repo: "acme/app"
  branch: "main"
synth:
  name: "Synth"
  commands: ["make synth"]
stages:
  - name: "Dev"
    stack:
      id: "DevStack"
    post:
      - name: "A"
        commands: ["true"]
        depends_on: ["B"]
      - name: "B"
        commands: ["true"]
        depends_on: ["A"]
"#;

    let err = PipelineConfig::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("Cycle"), "unexpected error: {}", err);
}

#[test]
fn test_pre_and_post_phase_lookup() {
    let pipeline = endpoint::endpoint_pipeline(default_source()).unwrap();
    let stage = &pipeline.stage("TestStage").unwrap().stage;
    assert_eq!(stage.graph(Phase::Pre).len(), 1);
    assert_eq!(stage.graph(Phase::Post).len(), 3);
    assert_eq!(pipeline.step_count(), 9);
}
