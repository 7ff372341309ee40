use anyhow::{Context, Result};
use elt_pipeline::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use elt_pipeline::cli::output::*;
use elt_pipeline::cli::{Cli, Command};
use elt_pipeline::core::{ExecutionStatus, HostPaths, PipelineConfig, PipelineRun};
use elt_pipeline::execution::{ExecutionEngine, ExecutionEvent, Scheduler};
use elt_pipeline::persistence::{InMemoryPersistence, PersistenceBackend, RunSummary};
use elt_pipeline::runtime::Runtime;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd, cli.verbose).await?,
    }

    Ok(())
}

fn load_config(file: Option<&str>) -> Result<PipelineConfig> {
    match file {
        Some(path) => PipelineConfig::from_file(path),
        None => Ok(PipelineConfig::elt_and_dbt()),
    }
}

#[cfg(feature = "sqlite")]
async fn open_store() -> Result<Arc<dyn PersistenceBackend>> {
    let store = elt_pipeline::persistence::SqliteRunStore::with_default_path()
        .await
        .context("Failed to open run history")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let config = load_config(cmd.file.as_deref()).context("Failed to load pipeline config")?;
    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let host = HostPaths::from_env();
    for warning in config.host_path_warnings(&host) {
        println!("{} {}", WARN, style(warning).yellow());
    }

    let overrides: BTreeMap<String, String> = cmd.var.iter().cloned().collect();
    for (key, value) in &overrides {
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let pipeline = config
        .build_with_vars(&host, &Runtime::local(), &overrides)
        .context("Failed to build pipeline")?;
    let pipeline_name = pipeline.name().to_string();

    let progress = create_progress_bar(pipeline.len());
    let mut engine = ExecutionEngine::new();
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        bar.println(format_execution_event(&event));
        match &event {
            ExecutionEvent::StepStarted { step_name, .. } => bar.set_message(step_name.clone()),
            ExecutionEvent::StepSucceeded { .. }
            | ExecutionEvent::StepNotAttempted { .. }
            | ExecutionEvent::StepFailed {
                will_retry: false, ..
            } => bar.inc(1),
            _ => {}
        }
    });

    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_store().await?
    };

    let scheduler = Arc::new(Scheduler::new(engine).with_store(store));
    scheduler.register(pipeline).await?;

    // Ctrl-C cancels the run instead of killing the process outright
    let interrupt = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling active runs");
                scheduler.cancel_all().await;
            }
        })
    };

    println!();
    let run = scheduler.trigger(&pipeline_name).await;
    interrupt.abort();
    progress.finish_and_clear();
    let run = run?;

    println!();
    for result in run.results() {
        println!("  {}", format_step_result(result));
    }

    if !cmd.no_history {
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(run.run_id()).dim()
        );
    }

    if run.status() == ExecutionStatus::Succeeded {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&pipeline_name).bold(),
            style("successfully").green()
        );
        Ok(())
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&pipeline_name).bold(),
            style("failed").red()
        );
        std::process::exit(1);
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match load_config(cmd.file.as_deref()) {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            for step in &config.steps {
                println!("    {} ({})", style(step.id()).bold(), step.kind());
            }
            println!("  Max active runs: {}", style(config.max_active_runs).cyan());
            println!(
                "  Retries: {} (delay {})",
                style(config.default_args.retries).cyan(),
                format_duration(config.default_args.retry_policy().retry_delay)
            );

            for warning in config.host_path_warnings(&HostPaths::from_env()) {
                println!("{} {}", WARN, style(warning).yellow());
            }

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

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_store().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    let mut counts = Vec::new();
    for name in &pipelines {
        let runs = store.list_runs(name).await?;
        let succeeded = runs
            .iter()
            .filter(|r| r.status() == ExecutionStatus::Succeeded)
            .count();
        let failed = runs
            .iter()
            .filter(|r| r.status() == ExecutionStatus::Failed)
            .count();
        counts.push((name, runs.len(), succeeded, failed));
    }

    if cmd.json {
        let data: Vec<_> = counts
            .iter()
            .map(|(name, total, succeeded, failed)| {
                serde_json::json!({
                    "name": name,
                    "run_count": total,
                    "succeeded": succeeded,
                    "failed": failed,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "pipelines": data }))?
        );
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);
    for (name, total, succeeded, failed) in &counts {
        if cmd.with_counts {
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(name).bold(),
                style(total).cyan(),
                style(succeeded).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand, verbose: bool) -> Result<()> {
    let store = open_store().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(run) if cmd.json => println!("{}", serde_json::to_string_pretty(&run)?),
            Some(run) => print_run_details(&run, verbose),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let mut runs = match &cmd.pipeline {
        Some(name) => store.list_runs(name).await?,
        None => {
            let mut all = Vec::new();
            for name in store.list_pipelines().await? {
                all.extend(store.list_runs(&name).await?);
            }
            all.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
            all
        }
    };
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let summaries: Vec<RunSummary> = runs.iter().map(RunSummary::from).collect();
        let data = serde_json::json!({ "runs": summaries });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for run in &runs {
        println!("  {}", format_run_summary(run));
        if verbose {
            for result in run.results() {
                println!("      {}", format_step_result(result));
            }
        }
    }

    Ok(())
}

fn print_run_details(run: &PipelineRun, verbose: bool) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(run.run_id()).cyan());
    println!("  Pipeline: {}", style(run.pipeline_name()).bold());
    println!("  Status: {}", format_status(run.status()));
    if let Some(started) = run.started_at() {
        println!("  Started: {}", style(started.to_rfc3339()).dim());
    }
    if let Some(finished) = run.finished_at() {
        println!("  Finished: {}", style(finished.to_rfc3339()).dim());
    }
    if let Some(duration) = run.duration() {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }

    println!("\n  {}", style("Steps:").bold());
    for result in run.results() {
        println!("    {}", format_step_result(result));
        if verbose {
            if !result.stdout().is_empty() {
                println!("      stdout:\n{}", indent(&format_output(result.stdout(), 20)));
            }
            if !result.stderr().is_empty() {
                println!("      stderr:\n{}", indent(&format_output(result.stderr(), 20)));
            }
        }
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("        {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}
