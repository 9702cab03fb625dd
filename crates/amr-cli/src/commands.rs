use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use amr_core::{
    current_unix_timestamp_ms, elapsed_ms_since, read_json_if_exists, write_json_atomic,
};
use amr_orchestrator::{DispatchSummary, FleetDispatchConfig, FleetOrchestrator};
use amr_store::{CostModelSnapshot, FleetRegistry, TrafficCostModel};
use amr_types::WorkflowState;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli_args::{CheckConfigArgs, CliCommand, RunArgs};
use crate::scenario::Scenario;
use crate::simulator::SimulatedDispatcher;

/// Persisted result of one `run` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RunReport {
    pub(crate) started_unix_ms: u64,
    pub(crate) elapsed_ms: u64,
    pub(crate) summary: DispatchSummary,
    pub(crate) workflows: Vec<WorkflowState>,
    pub(crate) cost_model: CostModelSnapshot,
}

pub(crate) async fn execute(command: CliCommand) -> Result<()> {
    match command {
        CliCommand::Run(args) => {
            let report = run_scenario(&args).await?;
            println!("{}", serde_json::to_string_pretty(&report.summary)?);
            Ok(())
        }
        CliCommand::CheckConfig(args) => {
            let config = check_config(&args)?;
            println!(
                "config ok: {} (worker_limit={}, assignment_retry_limit={})",
                args.config.display(),
                config.worker_limit,
                config.assignment_retry_limit
            );
            Ok(())
        }
    }
}

pub(crate) async fn run_scenario(args: &RunArgs) -> Result<RunReport> {
    let started_unix_ms = current_unix_timestamp_ms();
    let config = match &args.config {
        Some(path) => FleetDispatchConfig::load_from_path(path)?,
        None => FleetDispatchConfig::default(),
    };
    let scenario = Scenario::load(&args.scenario)?;
    let cost_model = match &args.cost_model {
        Some(path) => load_cost_model(path)?,
        None => TrafficCostModel::new(),
    };

    let registry =
        FleetRegistry::from_agents(scenario.fleet).context("failed to register scenario fleet")?;
    let dispatcher =
        SimulatedDispatcher::new(scenario.outcomes, Duration::from_millis(args.latency_ms));
    let orchestrator = FleetOrchestrator::new(
        &config,
        Arc::new(registry),
        Arc::new(cost_model),
        Arc::new(dispatcher),
    )
    .context("invalid dispatch configuration")?;

    let summary = orchestrator.run(scenario.tasks).await?;
    let report = RunReport {
        started_unix_ms,
        elapsed_ms: elapsed_ms_since(started_unix_ms, current_unix_timestamp_ms()),
        summary,
        workflows: orchestrator.ledger().all(),
        cost_model: orchestrator.cost_model().snapshot(),
    };

    if let Some(path) = &args.cost_model {
        write_json_atomic(path, &report.cost_model)?;
        tracing::info!(path = %path.display(), routes = report.cost_model.entries.len(), "cost model saved");
    }
    if let Some(path) = &args.report {
        write_json_atomic(path, &report)?;
        tracing::info!(path = %path.display(), "run report written");
    }
    Ok(report)
}

pub(crate) fn check_config(args: &CheckConfigArgs) -> Result<FleetDispatchConfig> {
    if !args.config.exists() {
        bail!("config file {} does not exist", args.config.display());
    }
    FleetDispatchConfig::load_from_path(&args.config)
}

fn load_cost_model(path: &Path) -> Result<TrafficCostModel> {
    match read_json_if_exists::<CostModelSnapshot>(path)? {
        Some(snapshot) => TrafficCostModel::from_snapshot(snapshot)
            .with_context(|| format!("invalid cost model {}", path.display())),
        None => Ok(TrafficCostModel::new()),
    }
}
