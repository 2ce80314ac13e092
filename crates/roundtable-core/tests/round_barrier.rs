use std::sync::Arc;
use std::time::Duration;

use roundtable_core::{
    ActionKind, ArtifactStore, BudgetGuard, Environment, EnvironmentError, GenerationConfig,
    GenerationError, Message, Recipients, RetryPolicy, Role, RoleError, RoleSettings, RunContext,
    ScriptStep, ScriptedGenerator,
};
use roundtable_state::fakes::MemoryArtifactStore;

fn context(generator: &Arc<ScriptedGenerator>, cap: f64) -> RunContext {
    RunContext::new(
        generator.clone(),
        Arc::new(BudgetGuard::new(cap)),
        Arc::new(MemoryArtifactStore::new()),
    )
}

fn retry(max_attempts: u32) -> GenerationConfig {
    GenerationConfig {
        timeout_ms: 1_000,
        retry: RetryPolicy {
            max_attempts,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        },
    }
}

fn draft_plan() -> Message {
    Message::new("draft plan", "planner", ActionKind::WritePlan)
}

fn two_engineers() -> Environment {
    let mut env = Environment::new();
    env.add_role(Role::engineer("engineer-1")).unwrap();
    env.add_role(Role::engineer("engineer-2")).unwrap();
    env
}

#[tokio::test]
async fn publications_are_visible_only_next_round() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .reply(ActionKind::WriteRequirements, "# PRD")
            .reply(ActionKind::WritePlan, r#"[{"task_id": "1"}, {"task_id": "2"}]"#),
    );
    let ctx = context(&generator, 10.0);
    let mut env = Environment::new();
    env.add_role(Role::stakeholder("stakeholder")).unwrap();
    env.add_role(Role::planner("planner")).unwrap();
    env.publish(Message::human("an idea"));

    let first = env.run_round(&ctx).await.unwrap();
    assert_eq!(first.round, 1);
    assert_eq!(first.produced.len(), 1);
    assert_eq!(first.idle, vec!["planner"]);
    assert_eq!(generator.call_count(ActionKind::WritePlan), 0);
    assert_eq!(env.role("planner").unwrap().inbox_len(), 1);

    let second = env.run_round(&ctx).await.unwrap();
    assert_eq!(second.produced[0].cause, ActionKind::WritePlan);
    assert_eq!(second.produced[0].sender, "planner");
    assert_eq!(env.round(), 2);
    assert_eq!(env.history().len(), 3);
}

#[tokio::test]
async fn news_keeps_publish_order_and_is_never_repeated() {
    let generator = Arc::new(ScriptedGenerator::new().reply(ActionKind::ProvideFeedback, "ok"));
    let ctx = context(&generator, 10.0);
    let mut env = Environment::new();
    env.add_role(Role::engineer("engineer-1")).unwrap();

    let first = Message::new("plan a", "planner-a", ActionKind::WritePlan);
    env.publish(first.clone());
    env.publish(Message::new("plan b", "planner-b", ActionKind::WritePlan));

    let report = env.run_round(&ctx).await.unwrap();
    let eng = env.role("engineer-1").unwrap();
    let news: Vec<_> = eng.news().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(news, vec!["plan a", "plan b"]);
    // reply goes to whoever sent the latest news item
    assert_eq!(report.produced[0].recipients, Recipients::to(["planner-b"]));
    let remembered = eng.memory().len();

    env.publish(first);
    let report = env.run_round(&ctx).await.unwrap();
    assert!(report.is_quiescent());
    let eng = env.role("engineer-1").unwrap();
    assert_eq!(eng.memory().len(), remembered);
    assert!(eng.news().is_empty());
    assert_eq!(generator.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeouts_and_rate_limits_are_retried_with_backoff() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .then(
                ActionKind::WriteRequirements,
                ScriptStep::Stall {
                    ms: 5_000,
                    text: "too late".into(),
                },
            )
            .then(
                ActionKind::WriteRequirements,
                ScriptStep::RateLimited {
                    retry_after_ms: Some(2_000),
                },
            )
            .reply(ActionKind::WriteRequirements, "# PRD"),
    );
    let ctx = context(&generator, 10.0).with_generation(retry(3));
    let mut env = Environment::new();
    env.add_role(Role::stakeholder("stakeholder")).unwrap();
    env.publish(Message::human("an idea"));

    let started = tokio::time::Instant::now();
    let report = env.run_round(&ctx).await.unwrap();
    let elapsed = started.elapsed();

    // 1s timeout + 0.5s backoff + 2s server hint
    assert!(elapsed >= Duration::from_millis(3_500), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(4_000), "{elapsed:?}");
    assert_eq!(report.acted[0].1.attempts, 3);
    assert_eq!(report.produced[0].content, "# PRD");
    let attempts: Vec<u32> = generator.calls().iter().map(|c| c.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_only_that_role() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .then(ActionKind::ProvideFeedback, ScriptStep::Timeout)
            .reply(ActionKind::ProvideFeedback, "looks fine")
            .reply(ActionKind::ProvideFeedback, "sorry, here it is"),
    );
    let ctx = context(&generator, 10.0).with_generation(retry(1));
    let mut env = two_engineers();
    env.publish(draft_plan());

    let report = env.run_round(&ctx).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.produced.len(), 1);
    assert!(!report.is_quiescent());
    let failed = report.failures[0].role.clone();
    assert_ne!(report.produced[0].sender, failed);
    assert!(matches!(
        &report.failures[0].error,
        RoleError::GenerationFailed {
            attempts: 1,
            last: GenerationError::Timeout { .. },
            ..
        }
    ));
    let failed_role = env.role(&failed).unwrap();
    assert!(failed_role.is_interrupted());
    let memory_before = failed_role.memory().len();

    // next round resumes from the remembered trigger
    let report = env.run_round(&ctx).await.unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(report.produced.len(), 1);
    assert_eq!(report.produced[0].sender, failed);
    assert_eq!(report.produced[0].content, "sorry, here it is");
    let recovered = env.role(&failed).unwrap();
    assert!(!recovered.is_interrupted());
    assert_eq!(recovered.memory().len(), memory_before);
}

#[tokio::test(start_paused = true)]
async fn overspend_cancels_siblings_and_discards_the_batch() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .then(
                ActionKind::ProvideFeedback,
                ScriptStep::Stall {
                    ms: 120_000,
                    text: "slow feedback".into(),
                },
            )
            .then(
                ActionKind::ProvideFeedback,
                ScriptStep::reply_with_usage("expensive feedback", 2_000_000, 0),
            ),
    );
    let ctx = context(&generator, 1.0).with_generation(GenerationConfig {
        timeout_ms: 600_000,
        ..GenerationConfig::default()
    });
    let mut env = two_engineers();
    env.publish(draft_plan());

    let started = tokio::time::Instant::now();
    let err = env.run_round(&ctx).await.unwrap_err();

    assert!(matches!(err, EnvironmentError::BudgetExceeded(_)));
    assert!(started.elapsed() < Duration::from_secs(120));
    assert_eq!(env.round(), 0);
    assert_eq!(env.history().len(), 1);
    assert_eq!(generator.total_calls(), 2);
    for role in env.roles() {
        assert!(!role.is_interrupted());
        assert_eq!(role.inbox_len(), 1);
        assert!(role.memory().is_empty());
    }
}

#[tokio::test]
async fn fatal_round_rolls_back_siblings_that_finished() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .reply(ActionKind::ProvideFeedback, "cheap feedback")
            .then(
                ActionKind::ProvideFeedback,
                ScriptStep::reply_with_usage("expensive feedback", 2_000_000, 0),
            )
            .reply(ActionKind::ProvideFeedback, "feedback again")
            .reply(ActionKind::ProvideFeedback, "feedback again"),
    );
    let ctx = context(&generator, 1.0);
    let mut env = two_engineers();
    env.publish(draft_plan());
    let before = env.snapshot();

    let err = env.run_round(&ctx).await.unwrap_err();
    assert!(matches!(err, EnvironmentError::BudgetExceeded(_)));
    assert_eq!(env.snapshot(), before);
    for role in env.roles() {
        assert_eq!(role.counters().acts_completed, 0);
    }

    ctx.budget.set_cap(100.0);
    let report = env.run_round(&ctx).await.unwrap();
    let senders: Vec<&str> = report.produced.iter().map(|m| m.sender.as_str()).collect();
    assert_eq!(senders, vec!["engineer-1", "engineer-2"]);
    assert!(report.produced.iter().all(|m| m.content == "feedback again"));
    assert_eq!(env.history().len(), 3);
    assert_eq!(env.round(), 1);
}

#[tokio::test]
async fn malformed_plan_output_is_rejected_without_touching_the_plan() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .reply(ActionKind::WritePlan, "I would start by loading data.")
            .reply(ActionKind::WritePlan, "```json\n[]\n```")
            .reply(
                ActionKind::WritePlan,
                r#"```json
[{"task_id": "1", "instruction": "load"}, {"task_id": "1", "instruction": "again"}]
```"#,
            )
            .reply(
                ActionKind::WritePlan,
                r#"```json
[{"task_id": "1", "instruction": "load"}, {"task_id": "2", "dependent_task_ids": ["1"], "instruction": "train"}]
```"#,
            ),
    );
    let ctx = context(&generator, 10.0).with_generation(GenerationConfig {
        retry: RetryPolicy {
            initial_delay_ms: 0,
            ..RetryPolicy::default()
        },
        ..GenerationConfig::default()
    });
    let mut env = Environment::new();
    env.add_role(Role::planner("planner")).unwrap();
    env.publish(Message::new("# PRD", "stakeholder", ActionKind::WriteRequirements));

    let report = env.run_round(&ctx).await.unwrap();
    assert!(report.produced.is_empty());
    assert!(matches!(
        &report.failures[0].error,
        RoleError::PlanUpdateRejected(_)
    ));
    assert!(env.role("planner").unwrap().plan().is_empty());

    let report = env.run_round(&ctx).await.unwrap();
    assert_eq!(report.produced.len(), 1);
    let plan = env.role("planner").unwrap().plan();
    assert_eq!(plan.tasks().len(), 2);
    assert_eq!(plan.current_task_id(), Some("1"));
    let published: Vec<serde_json::Value> =
        serde_json::from_value(report.produced[0].instruct_content.clone().unwrap()).unwrap();
    assert_eq!(published.len(), 2);
}

#[tokio::test]
async fn configured_artifacts_are_read_into_the_context() {
    let generator = Arc::new(ScriptedGenerator::new().reply(
        ActionKind::WritePlan,
        r#"[{"task_id": "1"}, {"task_id": "2"}]"#,
    ));
    let artifacts = Arc::new(MemoryArtifactStore::new().with_artifact("requirements.md", "# PRD v2"));
    let ctx = RunContext::new(
        generator.clone(),
        Arc::new(BudgetGuard::new(10.0)),
        artifacts.clone(),
    );
    let planner = Role::planner("planner").with_settings(RoleSettings {
        reads_artifacts: vec!["requirements.md".into(), "notes.md".into()],
        ..RoleSettings::default()
    });
    let mut env = Environment::new();
    env.add_role(planner).unwrap();
    env.publish(Message::new("# PRD", "stakeholder", ActionKind::WriteRequirements));

    let report = env.run_round(&ctx).await.unwrap();
    assert!(report.failures.is_empty());

    let call = &generator.calls()[0];
    assert!(call
        .directives
        .contains(&"## Artifact: requirements.md\n# PRD v2".to_string()));
    assert!(call
        .directives
        .contains(&"## Artifact: notes.md\n".to_string()));
    assert_eq!(call.context.len(), 1);
    assert!(artifacts.get("plan.json").await.unwrap().is_some());
}

#[tokio::test]
async fn retired_roles_stop_acting() {
    let generator = Arc::new(ScriptedGenerator::new().reply(ActionKind::ProvideFeedback, "ok"));
    let ctx = context(&generator, 10.0);
    let mut env = two_engineers();
    assert!(env.retire("engineer-2"));
    env.publish(draft_plan());

    let report = env.run_round(&ctx).await.unwrap();
    assert_eq!(report.produced.len(), 1);
    assert_eq!(report.produced[0].sender, "engineer-1");
    assert!(report.idle.contains(&"engineer-2".to_string()));
}
