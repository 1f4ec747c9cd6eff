// src/lib.rs

pub mod archive;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod foreman;
pub mod logging;
pub mod manager;
pub mod memo;
pub mod pipeline;
pub mod run;
pub mod types;
pub mod worker;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, WorkerPhaseArg};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::exec::backend_from_config;
use crate::manager::{Manager, ManagerOptions};
use crate::pipeline::Transformation;
use crate::run::{RunState, progress_string};
use crate::worker::WorkerPhase;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Run {
            pipeline,
            inputs,
            user,
            priority,
        } => {
            let cfg = load_and_validate(PathBuf::from(&args.config))
                .with_context(|| format!("loading {}", args.config))?;
            let user = user
                .or_else(|| std::env::var("USER").ok())
                .unwrap_or_else(|| "pipefleet".to_string());
            run_pipeline(&cfg, &pipeline, inputs, &user, priority).await
        }
        Command::Check => {
            let cfg = load_and_validate(PathBuf::from(&args.config))
                .with_context(|| format!("loading {}", args.config))?;
            print_library(&cfg);
            Ok(())
        }
        Command::Worker { phase, descriptor } => {
            let phase = match phase {
                WorkerPhaseArg::Setup => WorkerPhase::Setup,
                WorkerPhaseArg::Bookkeeping => WorkerPhase::Bookkeeping,
                WorkerPhaseArg::Cable => WorkerPhase::Cable,
            };
            worker::run_worker(phase, &descriptor)
                .with_context(|| format!("{} worker on {:?}", phase.as_arg(), descriptor))
        }
    }
}

/// Register the inputs, enqueue one run and drive the manager until idle.
async fn run_pipeline(
    cfg: &ConfigFile,
    pipeline: &str,
    inputs: Vec<PathBuf>,
    user: &str,
    priority: u32,
) -> Result<()> {
    let definition = cfg.library.pipeline(pipeline)?;
    if inputs.len() != definition.inputs.len() {
        bail!(
            "pipeline '{}' takes {} inputs ({:?}), got {}",
            pipeline,
            definition.inputs.len(),
            definition.inputs,
            inputs.len()
        );
    }

    let backend = backend_from_config(&cfg.scheduler)?;
    let mut manager = Manager::new(cfg, backend)?.with_options(ManagerOptions {
        exit_when_idle: true,
    });

    let mut datasets = Vec::with_capacity(inputs.len());
    for (name, path) in definition.inputs.iter().zip(inputs.iter()) {
        let id = manager
            .register_dataset(name, path)
            .with_context(|| format!("registering input {:?}", path))?;
        datasets.push(id);
    }
    let run_id = manager.enqueue_run(pipeline, datasets, user, priority)?;

    // Ctrl-C → stop every active run, then leave the loop.
    {
        let handle = manager.handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = handle.shutdown().await;
        });
    }

    manager.run().await?;

    let run = manager.archive().run(run_id)?;
    let progress = progress_string(manager.archive(), run_id)?;
    println!("{run_id} {} {progress}", run.state);
    for (output, ds) in run
        .pipeline
        .outputs
        .iter()
        .zip(run.output_datasets().unwrap_or_default())
    {
        if let Ok(d) = manager.archive().dataset(ds) {
            match &d.location {
                Some(path) => println!("  {} -> {}", output.name, path.display()),
                None => println!("  {} -> (symbolic, {})", output.name, d.checksum),
            }
        }
    }

    info!(run_id = %run_id, state = %run.state, "run finished");
    if run.state != RunState::Successful {
        bail!("{run_id} ended {}", run.state);
    }
    Ok(())
}

/// Dry-run output: methods, pipelines and their steps.
fn print_library(cfg: &ConfigFile) {
    println!("pipefleet check");
    println!("  scheduler.kind = {}", cfg.scheduler.kind);
    println!(
        "  manager.poll_interval_ms = {}",
        cfg.manager.poll_interval_ms
    );
    println!();

    println!("methods:");
    for method in cfg.library.methods() {
        println!("  - {}", method.name);
        println!("      driver: {}", method.driver.display());
        println!("      inputs: {:?}", method.inputs);
        println!("      outputs: {:?}", method.outputs);
        if method.threads > 1 {
            println!("      threads: {}", method.threads);
        }
        println!("      reusable: {:?}", method.reusable);
    }
    println!();

    println!("pipelines:");
    for pipeline in cfg.library.pipelines() {
        println!("  - {} (inputs: {:?})", pipeline.name, pipeline.inputs);
        for step in pipeline.steps.iter() {
            let kind = match &step.transformation {
                Transformation::Method(_) => "method",
                Transformation::Pipeline(_) => "pipeline",
            };
            println!(
                "      step {}: {} {}",
                step.name,
                kind,
                step.transformation.name()
            );
        }
        for output in pipeline.outputs.iter() {
            println!("      output {}", output.name);
        }
    }

    debug!("check complete (no execution)");
}
