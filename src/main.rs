use anyhow::{bail, Context, Result};
use stageline::cli::commands::{ExportCommand, PlanCommand, RunCommand, ValidateCommand};
use stageline::cli::output::*;
use stageline::cli::{Cli, Command};
use stageline::core::config::PipelineConfig;
use stageline::core::{PipelineDefinition, PipelineRun, SourceRef, StepGraph};
use stageline::endpoint;
use stageline::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use stageline::runner::{
    AutoApprove, ConsoleApproval, DryRunRunner, GateKeeper, RunnerConfig, ShellRunner, StepRunner,
};
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plan(cmd) => plan_pipeline(cmd)?,
        Command::Export(cmd) => export_pipeline(cmd)?,
    }

    Ok(())
}

fn load(file: &str) -> Result<(PipelineConfig, PipelineDefinition)> {
    let config = PipelineConfig::from_file(file).context("Failed to load pipeline config")?;
    let definition = config
        .to_definition()
        .with_context(|| format!("Invalid pipeline '{}'", config.name))?;
    Ok((config, definition))
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let (mut config, _) = load(&cmd.file)?;
    if let Some(branch) = &cmd.branch {
        config.source.branch = branch.clone();
    }
    let pipeline = config.to_definition()?;

    println!(
        "{} Loaded pipeline: {} ({}@{})",
        INFO,
        style(pipeline.name()).bold(),
        pipeline.source().repo,
        pipeline.source().branch
    );

    let strategy = cmd.strategy.into_strategy(cmd.max_parallel);
    let interactive = !cmd.yes && !cmd.dry_run;

    let run = if cmd.dry_run {
        execute(DryRunRunner, AutoApprove, &pipeline, strategy, interactive).await
    } else {
        let mut runner_config = RunnerConfig::new();
        if let Some(dir) = &cmd.working_dir {
            runner_config = runner_config.with_working_dir(dir);
        }
        for (stack, outputs) in &config.local_outputs {
            runner_config = runner_config.with_stack_outputs(stack, outputs.clone());
        }
        let runner = ShellRunner::new(runner_config);
        if cmd.yes {
            execute(runner, AutoApprove, &pipeline, strategy, interactive).await
        } else {
            execute(runner, ConsoleApproval::new(), &pipeline, strategy, interactive).await
        }
    };

    println!("\n{}", format_run_summary(&run));

    match run.into_result() {
        Ok(run) => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&run.pipeline_name).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        Err(err) => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(pipeline.name()).bold(),
                style("failed").red()
            );
            error!("{}", err);
            std::process::exit(1);
        }
    }
}

async fn execute<R, G>(
    runner: R,
    gates: G,
    pipeline: &PipelineDefinition,
    strategy: SchedulingStrategy,
    interactive: bool,
) -> PipelineRun
where
    R: StepRunner + 'static,
    G: GateKeeper + 'static,
{
    // A ticking bar would garble approval prompts.
    let progress = (!interactive).then(|| create_progress_bar(pipeline.step_count()));
    let bar = progress.clone();

    let engine = ExecutionEngine::new(runner, gates, strategy).with_event_handler(move |event| {
        let line = format_execution_event(&event);
        match &bar {
            Some(bar) => {
                if matches!(
                    event,
                    ExecutionEvent::StepCompleted { .. }
                        | ExecutionEvent::StepFailed { .. }
                        | ExecutionEvent::StepSkipped { .. }
                ) {
                    bar.inc(1);
                }
                bar.println(line);
            }
            None => println!("{}", line),
        }
    });

    println!();
    let run = engine.execute(pipeline).await;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }
    run
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match load(&cmd.file) {
        Ok((config, definition)) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(definition.name()).bold());
            println!(
                "  Source: {}@{}",
                style(&definition.source().repo).cyan(),
                style(&definition.source().branch).cyan()
            );
            println!("  Stages: {}", style(definition.stages().len()).cyan());
            println!("  Steps: {}", style(definition.step_count()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn plan_pipeline(cmd: &PlanCommand) -> Result<()> {
    let (_, pipeline) = load(&cmd.file)?;

    println!("{} Plan for {}", INFO, style(pipeline.name()).bold());
    println!(
        "  {} {} {}",
        style("synth").dim(),
        pipeline.synth().name(),
        style(format!("[{}]", pipeline.effective_environment(pipeline.synth()))).dim()
    );

    for entry in pipeline.stages() {
        let stage = &entry.stage;
        println!(
            "\n  {} [{}]{}",
            style(stage.name()).bold(),
            style(&stage.stack().id).dim(),
            if stage.is_production() { " (production)" } else { "" }
        );
        for gate in &entry.pre_gates {
            println!("    {}{}", LOCK, gate.name());
        }
        print_phase(&pipeline, "pre", stage.pre())?;
        if let Some(gate) = stage.gate() {
            println!("    {}{}", LOCK, gate.name());
        }
        println!(
            "    {} deploy {} {}",
            ROCKET,
            stage.stack().id,
            style(format!("[assets: {}]", pipeline.deploy_environment())).dim()
        );
        print_phase(&pipeline, "post", stage.post())?;
    }

    Ok(())
}

fn print_phase(pipeline: &PipelineDefinition, label: &str, graph: &StepGraph) -> Result<()> {
    for step in graph.ordered()? {
        let environment = style(format!("[{}]", pipeline.effective_environment(step))).dim();
        let deps = graph.dependency_names(step.name());
        if deps.is_empty() {
            println!("    {:<4} {} {}", style(label).dim(), step.name(), environment);
        } else {
            println!(
                "    {:<4} {} {} {}",
                style(label).dim(),
                step.name(),
                environment,
                style(format!("(after {})", deps.join(", "))).dim()
            );
        }
    }
    Ok(())
}

fn export_pipeline(cmd: &ExportCommand) -> Result<()> {
    if cmd.repo.trim().is_empty() {
        bail!("--repo must not be empty");
    }
    let pipeline = endpoint::endpoint_pipeline(SourceRef::new(&cmd.repo, &cmd.branch))?;
    print!("{}", pipeline.to_config().to_yaml()?);
    Ok(())
}
