use std::sync::Arc;

use roundtable_core::{
    ActionKind, ArtifactStore, BudgetGuard, Recipients, Role, RunContext, ScriptStep,
    ScriptedGenerator, SnapshotStore, StopReason, Team, TeamConfig, TeamError, TeamSnapshot,
};
use roundtable_state::fakes::{MemoryArtifactStore, MemorySnapshotStore};

const PLAN: &str = r#"```json
[
  {"task_id": "1", "dependent_task_ids": [], "instruction": "load the csv", "task_type": "io", "file_name": "load.py"},
  {"task_id": "2", "dependent_task_ids": ["1"], "instruction": "fit a model", "task_type": "ml", "file_name": "train.py"}
]
```"#;

const REVISED_PLAN: &str = r#"Revised after feedback:
```json
[
  {"task_id": "1", "dependent_task_ids": [], "instruction": "load and validate the csv", "task_type": "io", "file_name": "load.py"},
  {"task_id": "2", "dependent_task_ids": ["1"], "instruction": "fit and score a model", "task_type": "ml", "file_name": "train.py"}
]
```"#;

struct Harness {
    team: Team,
    generator: Arc<ScriptedGenerator>,
    artifacts: Arc<MemoryArtifactStore>,
    snapshots: Arc<MemorySnapshotStore>,
}

fn harness(generator: ScriptedGenerator, investment: f64) -> Harness {
    let generator = Arc::new(generator);
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let snapshots = Arc::new(MemorySnapshotStore::new());
    let config = TeamConfig {
        investment,
        ..TeamConfig::default()
    };
    let team = Team::from_config(
        &config,
        generator.clone(),
        artifacts.clone(),
        snapshots.clone(),
    )
    .unwrap();
    Harness {
        team,
        generator,
        artifacts,
        snapshots,
    }
}

fn requirements_and_plan() -> ScriptedGenerator {
    ScriptedGenerator::new()
        .then(
            ActionKind::WriteRequirements,
            ScriptStep::reply_with_usage("# PRD\nPredict customer churn.", 1000, 500),
        )
        .reply(ActionKind::WritePlan, PLAN)
}

fn feedback_to_code(generator: ScriptedGenerator) -> ScriptedGenerator {
    generator
        .reply(ActionKind::ProvideFeedback, "validate the input first")
        .reply(ActionKind::ProvideFeedback, "looks fine")
        .reply(ActionKind::PublishPlan, REVISED_PLAN)
        .reply(ActionKind::WriteCode, "```python\nprint('one')\n```")
        .reply(ActionKind::WriteCode, "```python\nprint('two')\n```")
}

#[tokio::test]
async fn project_runs_from_idea_to_code_and_goes_quiet() {
    let mut h = harness(feedback_to_code(requirements_and_plan()), 10.0);
    h.team.run_project("churn predictor", None).await.unwrap();

    let summary = h.team.run(10).await.unwrap();

    assert_eq!(summary.stop, StopReason::Quiescent);
    assert_eq!(summary.rounds_run, 7);
    let produced: Vec<Vec<ActionKind>> = summary
        .reports
        .iter()
        .map(|r| r.produced.iter().map(|m| m.cause).collect())
        .collect();
    assert_eq!(
        produced,
        vec![
            vec![ActionKind::WriteRequirements],
            vec![ActionKind::WritePlan],
            vec![ActionKind::ProvideFeedback, ActionKind::ProvideFeedback],
            vec![ActionKind::PublishPlan],
            vec![ActionKind::WriteCode],
            vec![ActionKind::WriteCode],
            vec![],
        ]
    );
    assert!(summary.reports.iter().all(|r| r.failures.is_empty()));

    // feedback goes back to the planner only
    for m in &summary.reports[2].produced {
        assert_eq!(m.recipients, Recipients::to(["planner"]));
    }

    // the dependent task starts only after its dependency is finished
    assert_eq!(summary.reports[4].produced[0].sender, "engineer-1");
    assert_eq!(summary.reports[5].produced[0].sender, "engineer-2");
    let env = h.team.environment();
    for name in ["engineer-1", "engineer-2"] {
        let plan = env.role(name).unwrap().plan();
        assert_eq!(plan.tasks().len(), 2);
        plan.validate().unwrap();
        assert!(plan.is_complete());
        assert_eq!(plan.task("2").unwrap().assignee.as_deref(), Some("engineer-2"));
    }
    let planner = env.role("planner").unwrap();
    assert_eq!(planner.plan().goal, "churn predictor");
    assert_eq!(
        planner.plan().tasks()[0].instruction,
        "load and validate the csv"
    );
    assert!(planner.working_memory().is_empty());

    assert_eq!(
        h.artifacts.get("load.py").await.unwrap().as_deref(),
        Some("print('one')")
    );
    assert_eq!(
        h.artifacts.get("train.py").await.unwrap().as_deref(),
        Some("print('two')")
    );
    assert!(h.artifacts.get("requirements.md").await.unwrap().is_some());
    assert!(h.artifacts.get("plan.json").await.unwrap().is_some());

    assert_eq!(h.team.history().len(), 8);
    assert_eq!(h.generator.total_calls(), 7);
    assert!((h.team.budget().total_spent() - 0.0025).abs() < 1e-12);

    let labels: Vec<String> = h
        .snapshots
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.label)
        .collect();
    assert_eq!(labels.first().map(String::as_str), Some("round-0"));
    assert_eq!(labels.last().map(String::as_str), Some("round-7"));
}

#[tokio::test]
async fn exhausted_budget_halts_before_any_round() {
    let mut h = harness(requirements_and_plan(), 10.0);
    h.team.run_project("churn predictor", None).await.unwrap();
    h.team.budget().charge(10.0).unwrap();

    let err = h.team.run(1).await.unwrap_err();

    assert!(matches!(err, TeamError::BudgetExceeded(e) if e.spent == 10.0 && e.cap == 10.0));
    assert_eq!(h.generator.total_calls(), 0);
    assert_eq!(h.team.environment().round(), 0);
    assert_eq!(h.team.last_snapshot().unwrap().label, "round-0");
    assert_eq!(h.snapshots.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn overspend_inside_a_round_is_fatal_and_commits_nothing() {
    let generator = ScriptedGenerator::new()
        .then(
            ActionKind::WriteRequirements,
            ScriptStep::reply_with_usage("# PRD", 1_000_000, 0),
        )
        .reply(ActionKind::WriteRequirements, "# PRD, cheaper");
    let mut h = harness(generator, 1.0);
    h.team.run_project("churn predictor", None).await.unwrap();

    let err = h.team.run(3).await.unwrap_err();

    assert!(matches!(err, TeamError::BudgetExceeded(_)));
    assert_eq!(h.team.environment().round(), 0);
    assert_eq!(h.team.history().len(), 1);
    assert!(h.artifacts.list().await.unwrap().is_empty());
    let committed = h.team.last_snapshot().unwrap().clone();
    assert_eq!(committed.label, "round-0");
    let stored = TeamSnapshot::from_bytes(&h.snapshots.load(&committed.id).await.unwrap()).unwrap();
    assert_eq!(h.team.environment().snapshot(), stored.environment);

    // more money lets the same process pick up where the failed round began
    h.team.invest(10.0);
    let summary = h.team.run(1).await.unwrap();
    assert_eq!(summary.reports[0].produced.len(), 1);
    assert_eq!(summary.reports[0].produced[0].content, "# PRD, cheaper");
    assert_eq!(h.team.history().len(), 2);
}

#[tokio::test]
async fn silent_team_stops_after_one_round() {
    let mut h = harness(ScriptedGenerator::new(), 10.0);
    let summary = h.team.run(5).await.unwrap();
    assert_eq!(summary.rounds_run, 1);
    assert_eq!(summary.stop, StopReason::Quiescent);
    assert_eq!(summary.reports[0].idle.len(), 4);
    assert_eq!(summary.last_snapshot.unwrap().label, "round-1");
}

#[tokio::test]
async fn round_limit_is_honoured() {
    let mut h = harness(feedback_to_code(requirements_and_plan()), 10.0);
    h.team.run_project("churn predictor", None).await.unwrap();
    let summary = h.team.run(2).await.unwrap();
    assert_eq!(summary.stop, StopReason::RoundsExhausted);
    assert_eq!(summary.rounds_run, 2);
    assert_eq!(h.team.environment().round(), 2);
}

#[tokio::test]
async fn snapshot_resumes_byte_for_byte_and_continues() {
    let mut h = harness(requirements_and_plan(), 10.0);
    h.team.run_project("churn predictor", None).await.unwrap();
    h.team.run(2).await.unwrap();

    let record = h.snapshots.latest().await.unwrap().unwrap();
    assert_eq!(record.label, "round-2");
    let stored = h.snapshots.load(&record.id).await.unwrap();
    assert_eq!(stored, h.team.snapshot_bytes().unwrap());

    let decoded = TeamSnapshot::from_bytes(&stored).unwrap();
    assert_eq!(decoded.to_bytes().unwrap(), stored);
    assert_eq!(decoded.environment.roles.len(), 4);

    let generator = Arc::new(feedback_to_code(ScriptedGenerator::new()));
    let ctx = RunContext::new(
        generator.clone(),
        Arc::new(BudgetGuard::new(0.0)),
        h.artifacts.clone(),
    );
    let mut resumed = Team::resume(ctx, h.snapshots.clone(), None).await.unwrap();

    assert_eq!(resumed.snapshot_bytes().unwrap(), stored);
    assert_eq!(resumed.budget().cap(), 10.0);
    assert_eq!(resumed.project().unwrap().idea, "churn predictor");
    assert_eq!(resumed.last_snapshot(), Some(&record));

    let summary = resumed.run(10).await.unwrap();
    assert_eq!(summary.stop, StopReason::Quiescent);
    assert_eq!(summary.rounds_run, 5);
    assert_eq!(resumed.environment().round(), 7);
    assert_eq!(generator.total_calls(), 5);
    assert_eq!(resumed.history().len(), 8);
}

#[tokio::test]
async fn resume_by_explicit_id_picks_older_snapshot() {
    let mut h = harness(requirements_and_plan(), 10.0);
    let first = h.team.run_project("churn predictor", None).await.unwrap();
    h.team.run(1).await.unwrap();

    let ctx = RunContext::new(
        Arc::new(ScriptedGenerator::new()),
        Arc::new(BudgetGuard::new(0.0)),
        h.artifacts.clone(),
    );
    let resumed = Team::resume(ctx, h.snapshots.clone(), Some(&first.id))
        .await
        .unwrap();
    assert_eq!(resumed.environment().round(), 0);
    assert_eq!(resumed.history().len(), 1);
    assert_eq!(resumed.last_snapshot().unwrap().label, "round-0");
}

#[tokio::test]
async fn idea_can_be_addressed_to_one_role() {
    let mut h = harness(ScriptedGenerator::new(), 10.0);
    h.team.hire(Role::stakeholder("second-opinion")).unwrap();
    h.team
        .run_project("churn predictor", Some("second-opinion"))
        .await
        .unwrap();

    // both stakeholders watch user requirements; only one is addressed
    let env = h.team.environment();
    assert_eq!(env.role("second-opinion").unwrap().inbox_len(), 1);
    assert_eq!(env.role("stakeholder").unwrap().inbox_len(), 1);
    assert_eq!(env.role("planner").unwrap().inbox_len(), 0);
}
