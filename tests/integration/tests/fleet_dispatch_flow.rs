use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use amr_algorithm::{ConstraintConfig, PlanGenerator, RoutingConfig};
use amr_orchestrator::{FleetDispatchConfig, FleetOrchestrator};
use amr_runner::{DispatchCollaborator, DispatchCompletion};
use amr_store::{FleetRegistry, TrafficCostModel};
use amr_types::{
    AmrState, AssignmentPlan, Capability, FailureReason, Position, PredictionSource,
    ProductionTask, WorkflowPhase,
};
use async_trait::async_trait;

/// Completes every plan in `actual_time_s` (or the predicted time) and records
/// how many plans held each agent at the same time.
struct RecordingFleet {
    actual_time_s: Option<f64>,
    hold: Duration,
    active: Mutex<HashMap<String, usize>>,
    peak_per_agent: AtomicUsize,
    completed: Mutex<Vec<(String, String)>>,
}

impl RecordingFleet {
    fn new(actual_time_s: Option<f64>, hold: Duration) -> Self {
        Self {
            actual_time_s,
            hold,
            active: Mutex::new(HashMap::new()),
            peak_per_agent: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
        }
    }

    fn completed_pairs(&self) -> Vec<(String, String)> {
        self.completed.lock().expect("completed lock").clone()
    }
}

#[async_trait]
impl DispatchCollaborator for RecordingFleet {
    async fn dispatch(&self, plan: &AssignmentPlan) -> anyhow::Result<DispatchCompletion> {
        {
            let mut active = self.active.lock().expect("active lock");
            let holders = active.entry(plan.agent_id.clone()).or_default();
            *holders += 1;
            self.peak_per_agent.fetch_max(*holders, Ordering::SeqCst);
        }
        tokio::time::sleep(self.hold).await;
        {
            let mut active = self.active.lock().expect("active lock");
            if let Some(holders) = active.get_mut(&plan.agent_id) {
                *holders -= 1;
            }
        }
        self.completed
            .lock()
            .expect("completed lock")
            .push((plan.task_id.clone(), plan.agent_id.clone()));
        Ok(DispatchCompletion::completed(
            self.actual_time_s.unwrap_or(plan.predicted_time_s),
        ))
    }
}

fn transport_task(task_id: &str, origin: Position, destination: Position) -> ProductionTask {
    ProductionTask::new(task_id, Capability::Transport, 40.0, origin, destination)
}

fn orchestrator(
    config: FleetDispatchConfig,
    fleet: Vec<AmrState>,
    cost_model: Arc<TrafficCostModel>,
    dispatcher: Arc<RecordingFleet>,
) -> FleetOrchestrator {
    FleetOrchestrator::new(
        &config,
        Arc::new(FleetRegistry::from_agents(fleet).expect("fleet registers")),
        cost_model,
        dispatcher,
    )
    .expect("valid configuration")
}

#[test]
fn capability_mismatch_leaves_exactly_one_candidate() {
    let agent_x = AmrState::new("amr-x", Capability::Lift, 400.0, Position::new(0.0, 0.0), 0.8)
        .with_lift_height(3.0);
    let agent_y = AmrState::new("amr-y", Capability::Transport, 400.0, Position::new(1.0, 0.0), 0.8);
    let task = ProductionTask::new(
        "pallet-1",
        Capability::Lift,
        120.0,
        Position::new(5.0, 5.0),
        Position::new(15.0, 5.0),
    )
    .with_lift_height(1.5);

    let planner = PlanGenerator::new(
        ConstraintConfig::default(),
        RoutingConfig::default(),
        Arc::new(TrafficCostModel::new()),
    )
    .expect("planner");
    let plans = planner.generate_plans(&task, &[agent_x, agent_y]);

    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].agent_id, "amr-x");
    assert_eq!(plans[0].task_id, "pallet-1");
    assert_eq!(plans[0].prediction_source, PredictionSource::Geometric);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_agent_is_never_committed_twice() {
    let fleet = Arc::new(RecordingFleet::new(None, Duration::from_millis(15)));
    let orchestrator = orchestrator(
        FleetDispatchConfig {
            worker_limit: 1,
            ..FleetDispatchConfig::default()
        },
        vec![AmrState::new(
            "amr-z",
            Capability::Transport,
            250.0,
            Position::new(0.0, 0.0),
            0.95,
        )],
        Arc::new(TrafficCostModel::new()),
        fleet.clone(),
    );
    let tasks = (1..=3)
        .map(|index| {
            transport_task(
                &format!("tote-{index}"),
                Position::new(10.0, 0.0),
                Position::new(10.0, 10.0),
            )
        })
        .collect();

    let summary = orchestrator.run(tasks).await.expect("run");

    assert_eq!(summary.total_tasks, 3);
    assert_eq!(fleet.peak_per_agent.load(Ordering::SeqCst), 1);
    let first = orchestrator.ledger().get("tote-1").expect("tote-1 recorded");
    assert_eq!(first.phase, WorkflowPhase::Completed);
    assert_eq!(first.agent_id.as_deref(), Some("amr-z"));
    for state in orchestrator.ledger().all() {
        match state.phase {
            WorkflowPhase::Completed => assert_eq!(state.agent_id.as_deref(), Some("amr-z")),
            WorkflowPhase::Failed => assert_eq!(state.failure, Some(FailureReason::NoCandidate)),
            other => panic!("task {} stuck in {}", state.task_id, other.as_str()),
        }
    }
    assert!(orchestrator.registry().is_available("amr-z").expect("agent"));
}

#[tokio::test]
async fn realized_time_is_smoothed_into_cost_model() {
    let agent = AmrState::new("amr-1", Capability::Transport, 200.0, Position::new(0.0, 0.0), 0.9);
    let task = transport_task("bin-7", Position::new(20.0, 0.0), Position::new(20.0, 20.0));
    let route_key = RoutingConfig::default().route_key(&agent, &task);
    let cost_model = Arc::new(TrafficCostModel::new());
    cost_model.seed(route_key, 10.0).expect("seed");

    let fleet = Arc::new(RecordingFleet::new(Some(14.0), Duration::ZERO));
    let orchestrator = orchestrator(
        FleetDispatchConfig::default(),
        vec![agent],
        Arc::clone(&cost_model),
        fleet,
    );
    let summary = orchestrator.run(vec![task]).await.expect("run");

    assert_eq!(summary.completed, 1);
    let state = orchestrator.ledger().get("bin-7").expect("recorded");
    assert_eq!(state.predicted_time_s, Some(10.0));
    assert_eq!(state.actual_time_s, Some(14.0));
    let estimate = cost_model.estimate(&route_key).expect("learned");
    assert!((estimate - 11.2).abs() < 1e-9, "estimate {estimate}");
    assert!(summary
        .mean_abs_prediction_error_s
        .is_some_and(|error| (error - 4.0).abs() < 1e-9));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_fleet_keeps_every_agent_exclusive() {
    let fleet: Vec<AmrState> = (1..=3)
        .map(|index| {
            AmrState::new(
                format!("amr-{index}"),
                Capability::Transport,
                300.0,
                Position::new(index as f64 * 12.0, 0.0),
                0.9,
            )
        })
        .collect();
    let tasks: Vec<ProductionTask> = (1..=12)
        .map(|index| {
            transport_task(
                &format!("kit-{index}"),
                Position::new(index as f64 * 3.0, 4.0),
                Position::new(index as f64 * 3.0, 24.0),
            )
        })
        .collect();
    let recorder = Arc::new(RecordingFleet::new(None, Duration::from_millis(10)));
    let orchestrator = orchestrator(
        FleetDispatchConfig {
            worker_limit: 6,
            release_wait_ms: Some(10_000),
            assignment_retry_limit: 12,
            ..FleetDispatchConfig::default()
        },
        fleet,
        Arc::new(TrafficCostModel::new()),
        recorder.clone(),
    );

    let summary = orchestrator.run(tasks).await.expect("run");

    assert_eq!(summary.total_tasks, 12);
    assert_eq!(summary.completed, 12);
    assert_eq!(recorder.peak_per_agent.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.completed_pairs().len(), 12);
    for agent_id in ["amr-1", "amr-2", "amr-3"] {
        assert!(orchestrator.registry().is_available(agent_id).expect("agent"));
    }
}

#[tokio::test]
async fn repeated_and_duplicate_admissions_are_stable() {
    let fleet = vec![
        AmrState::new("amr-a", Capability::Transport, 200.0, Position::new(0.0, 0.0), 0.9),
        AmrState::new("amr-b", Capability::Transport, 200.0, Position::new(0.0, 0.0), 0.9),
    ];
    let task = transport_task("crate-1", Position::new(5.0, 0.0), Position::new(5.0, 5.0));
    let config = FleetDispatchConfig::default();
    let pipeline = config
        .build_pipeline(Arc::new(TrafficCostModel::new()))
        .expect("pipeline");

    let first = pipeline.plan(&task, &fleet).expect("plan");
    let second = pipeline.plan(&task, &fleet).expect("plan");
    assert_eq!(first.agent_id, "amr-a");
    assert_eq!(first.agent_id, second.agent_id);
    assert_eq!(first.route_key, second.route_key);
    assert_eq!(first.composite_score(), second.composite_score());

    let recorder = Arc::new(RecordingFleet::new(None, Duration::ZERO));
    let orchestrator = orchestrator(
        config,
        fleet,
        Arc::new(TrafficCostModel::new()),
        recorder.clone(),
    );
    let summary = orchestrator
        .run(vec![task.clone(), task])
        .await
        .expect("run");

    assert_eq!(summary.total_tasks, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(recorder.completed_pairs().len(), 1);
}
