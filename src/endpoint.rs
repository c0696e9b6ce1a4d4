//! The built-in release pipeline for the diffusion model endpoint
//!
//! Synth, then a test stage and a production stage. Each stage runs unit
//! tests, deploys one endpoint stack, and then tests the live endpoint.

use crate::core::{
    BuildDefaults, BuildEnvironment, CacheMode, ComputeProfile, Gate, OutputRef,
    PipelineDefinition, PipelineResult, SourceRef, StackRef, StageDefinition, StepDescriptor,
    StepGraph,
};

pub const DEFAULT_REPO: &str = "Duncan-Haywood/diffusion-endpoint";
pub const DEFAULT_BRANCH: &str = "main";

pub const PIPELINE_NAME: &str = "Pipeline";
pub const TEST_STAGE: &str = "TestStage";
pub const PROD_STAGE: &str = "ProdStage";
pub const PROMOTE_GATE: &str = "PromoteToProd";

pub const MODEL_BUCKET_NAME: &str = "ModelBucketName";
pub const ENDPOINT_NAME: &str = "EndpointName";

pub fn default_source() -> SourceRef {
    SourceRef::new(DEFAULT_REPO, DEFAULT_BRANCH)
}

/// Stack id deployed by `stage`
pub fn stack_id(stage: &str) -> String {
    format!("{}-EndpointStack", stage)
}

pub fn endpoint_stack(stage: &str) -> StackRef {
    StackRef::new(stack_id(stage), [MODEL_BUCKET_NAME, ENDPOINT_NAME])
}

pub fn unit_tests() -> StepDescriptor {
    StepDescriptor::new("UnitTest", ["pytest --docker-local --upload-model -n $(nproc)"])
        .with_environment(BuildEnvironment::new(ComputeProfile::Large).privileged())
}

pub fn integration_tests() -> StepDescriptor {
    StepDescriptor::new(
        "IntegrationTest",
        ["pytest --local-integration --integration -n $(nproc)"],
    )
    .with_environment(BuildEnvironment::new(ComputeProfile::Large).privileged())
}

/// Publishes the deployed endpoint name for `production` or test clients
pub fn set_endpoint_in_parameter_store(production: bool, endpoint_name: OutputRef) -> StepDescriptor {
    let production = if production { "True" } else { "False" };

    StepDescriptor::new(
        "SetEndpointNameInParameterStore",
        ["python ./endpoint/param_store_endpoint_name.py"],
    )
    .with_environment(BuildEnvironment::new(ComputeProfile::Medium))
    .with_env("production", production)
    .bind("endpoint_name", endpoint_name)
}

pub fn upload_model(model_bucket_name: OutputRef) -> StepDescriptor {
    StepDescriptor::new("UploadModel", ["python ./endpoint/upload_model.py"])
        .with_environment(BuildEnvironment::new(ComputeProfile::Large))
        .bind("model_bucket_name", model_bucket_name)
}

/// One endpoint stage: unit tests, deploy, then upload and registration
/// in parallel, then integration tests
pub fn endpoint_stage(name: &str, production: bool) -> PipelineResult<StageDefinition> {
    let stack = endpoint_stack(name);

    let pre = StepGraph::from_steps([unit_tests()])?;

    let integration = integration_tests();
    let upload = upload_model(OutputRef::new(&stack.id, MODEL_BUCKET_NAME));
    let register = set_endpoint_in_parameter_store(production, OutputRef::new(&stack.id, ENDPOINT_NAME));
    let post = StepGraph::builder()
        .step(upload.clone())?
        .step(register.clone())?
        .step(integration.clone())?
        .depends_on(integration.name(), register.name())?
        .depends_on(integration.name(), upload.name())?
        .build()?;

    Ok(StageDefinition::compose(name, stack, pre, post, None)?.production(production))
}

pub fn synth() -> StepDescriptor {
    StepDescriptor::new("Synth", ["poetry run cdk synth --output ../cdk.out"]).with_install_commands([
        "pip install poetry",
        "poetry install",
        "npm install -g aws-cdk",
    ])
}

pub fn build_defaults() -> BuildDefaults {
    BuildDefaults {
        general: BuildEnvironment::new(ComputeProfile::Medium).with_cache(CacheMode::DockerLayer),
        synth: BuildEnvironment::new(ComputeProfile::Medium),
        asset_publishing: BuildEnvironment::new(ComputeProfile::Large).with_cache(CacheMode::DockerLayer),
    }
}

/// The full release pipeline pulling from `source`
pub fn endpoint_pipeline(source: SourceRef) -> PipelineResult<PipelineDefinition> {
    PipelineDefinition::new(PIPELINE_NAME, source, synth())?
        .with_defaults(build_defaults())
        .with_stage(endpoint_stage(TEST_STAGE, false)?, vec![])?
        .with_stage(
            endpoint_stage(PROD_STAGE, true)?,
            vec![Gate::manual_approval(PROMOTE_GATE)],
        )
}
