//! The act step: generate with bounded retry, then commit and publish.
//!
//! Nothing on the role changes until a generation has been accepted. A
//! failed act leaves memory, plan and counters as they were and marks the
//! role interrupted so the next observe can resume from `latest_observed`.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{instrument, warn};

use super::error::{RoleError, RoleResult};
use super::kind::{action_directive, RoleState};
use super::{PendingAction, Role};
use crate::context::RunContext;
use crate::environment::BusHandle;
use crate::generation::{GenerateOptions, GenerationError};
use crate::message::{ActionKind, Message};
use crate::metrics::METRICS;
use crate::obs;
use crate::plan::{extract_code, Plan, PlanError, PlanUpdate, TaskStatus};

/// Summary of a successful act.
#[derive(Debug, Clone, PartialEq)]
pub struct ActReport {
    pub action: ActionKind,
    pub attempts: u32,
    pub charged: f64,
}

/// Generation output accepted for a given action.
enum Accepted {
    Text(String),
    Plan { plan: Plan, update: PlanUpdate },
    Code(String),
}

/// Why an attempt was not accepted.
enum Rejection {
    Generation(GenerationError),
    Malformed(String),
    Plan(PlanError),
}

/// Resolves once the round's cancel flag is raised. Never resolves if the
/// sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Role {
    /// Run the pending action and stage its message on `bus`.
    #[instrument(skip_all, fields(role = %self.profile.name))]
    pub async fn act(
        &mut self,
        ctx: &RunContext,
        bus: &BusHandle,
        cancel: watch::Receiver<bool>,
    ) -> RoleResult<ActReport> {
        let pending = self.pending.take().ok_or_else(|| RoleError::NoPendingAction {
            role: self.profile.name.clone(),
        })?;
        if !self.profile.kind.can_run(pending.action) {
            self.state = RoleState::Idle;
            return Err(RoleError::UnsupportedAction {
                role: self.profile.name.clone(),
                action: pending.action,
            });
        }

        self.state = RoleState::Acting;
        let result = self.perform(ctx, bus, cancel, &pending).await;
        self.state = RoleState::Idle;
        match &result {
            Ok(report) => {
                self.interrupted = false;
                self.counters.acts_completed += 1;
                obs::emit_role_acted(&self.profile.name, report.action.as_str(), report.attempts);
            }
            Err(_) => self.interrupted = true,
        }
        result
    }

    async fn perform(
        &mut self,
        ctx: &RunContext,
        bus: &BusHandle,
        mut cancel: watch::Receiver<bool>,
        pending: &PendingAction,
    ) -> RoleResult<ActReport> {
        let context = self.assemble_context(ctx.max_context_messages);
        let directives = self.directives(ctx, pending).await;
        let policy = &ctx.generation.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut charged = 0.0;
        let mut last: Option<Rejection> = None;

        for attempt in 1..=max_attempts {
            ctx.budget.ensure_available()?;
            let options = GenerateOptions {
                action: pending.action,
                role: self.profile.name.clone(),
                attempt,
            };
            let call = tokio::time::timeout(
                ctx.generation.timeout(),
                ctx.generator.generate(&context, &directives, &options),
            );
            let outcome = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Err(RoleError::Cancelled),
                r = call => r,
            };

            let rejection = match outcome {
                Err(_elapsed) => Rejection::Generation(GenerationError::Timeout {
                    after_ms: ctx.generation.timeout_ms,
                }),
                Ok(Err(e)) => Rejection::Generation(e),
                Ok(Ok(generation)) => {
                    let cost = ctx.cost.price(&generation.usage);
                    ctx.budget.charge(cost)?;
                    charged += cost;
                    match self.accept(pending.action, &generation.text) {
                        Ok(accepted) => {
                            let message = self.commit(ctx, pending, accepted, generation.text).await;
                            bus.publish(message).await;
                            return Ok(ActReport {
                                action: pending.action,
                                attempts: attempt,
                                charged,
                            });
                        }
                        Err(rejection) => rejection,
                    }
                }
            };

            let delay = match &rejection {
                Rejection::Generation(e) => {
                    warn!(attempt, max_attempts, error = %e, "generation attempt failed");
                    e.retry_after().unwrap_or_else(|| policy.delay_after(attempt))
                }
                Rejection::Malformed(detail) => {
                    warn!(attempt, max_attempts, detail = %detail, "generation output rejected");
                    policy.delay_after(attempt)
                }
                Rejection::Plan(e) => {
                    obs::emit_plan_rejected(&self.profile.name, e);
                    METRICS.inc_plan_updates_rejected();
                    policy.delay_after(attempt)
                }
            };
            last = Some(rejection);

            if attempt < max_attempts {
                METRICS.inc_generation_retries();
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => return Err(RoleError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(match last {
            Some(Rejection::Malformed(detail)) => RoleError::MalformedGenerationOutput {
                action: pending.action,
                detail,
            },
            Some(Rejection::Plan(e)) => RoleError::PlanUpdateRejected(e),
            Some(Rejection::Generation(e)) => RoleError::GenerationFailed {
                action: pending.action,
                attempts: max_attempts,
                last: e,
            },
            None => RoleError::GenerationFailed {
                action: pending.action,
                attempts: 0,
                last: GenerationError::Unavailable {
                    detail: "no attempt made".to_string(),
                },
            },
        })
    }

    /// Recent memory followed by working memory, without repeats.
    fn assemble_context(&self, max_messages: usize) -> Vec<Arc<Message>> {
        let mut context: Vec<Arc<Message>> = self.memory.recent(max_messages).to_vec();
        for m in self.working_memory.messages() {
            if !context.iter().any(|c| c == m) {
                context.push(Arc::clone(m));
            }
        }
        context
    }

    async fn directives(&self, ctx: &RunContext, pending: &PendingAction) -> Vec<String> {
        let mut directives = Vec::new();
        let who = if self.profile.description.is_empty() {
            format!("You are {}, the team's {}.", self.profile.name, self.profile.kind)
        } else {
            format!("You are {}, {}.", self.profile.name, self.profile.description)
        };
        directives.push(who);
        directives.push(action_directive(pending.action).to_string());

        match pending.action {
            ActionKind::WritePlan | ActionKind::PublishPlan if !self.plan.is_empty() => {
                if let Ok(current) = serde_json::to_string_pretty(self.plan.tasks()) {
                    directives.push(format!("Current plan:\n{current}"));
                }
            }
            ActionKind::WriteCode => {
                if let Some(task) = pending.task.as_deref().and_then(|id| self.plan.task(id)) {
                    let mut d = format!("Task {}: {}", task.id, task.instruction);
                    if let Some(file) = &task.target_file {
                        d.push_str(&format!("\nTarget file: {file}"));
                    }
                    directives.push(d);
                }
            }
            _ => {}
        }

        for name in &self.settings.reads_artifacts {
            let content = match ctx.artifacts.get(name).await {
                Ok(Some(content)) => content,
                Ok(None) => {
                    warn!(role = %self.profile.name, artifact = %name, "artifact missing; using empty input");
                    String::new()
                }
                Err(e) => {
                    warn!(role = %self.profile.name, artifact = %name, error = %e, "artifact unreadable; using empty input");
                    String::new()
                }
            };
            directives.push(format!("## Artifact: {name}\n{content}"));
        }
        directives
    }

    /// Parse generated text for `action` without touching role state.
    fn accept(&self, action: ActionKind, text: &str) -> Result<Accepted, Rejection> {
        if action.yields_task_list() {
            let mut staged = self.plan.clone();
            if staged.goal.is_empty() {
                if let Some(idea) = self.memory.by_cause(ActionKind::UserRequirement).last() {
                    staged.goal = idea.content.clone();
                }
            }
            return match staged.apply_text(text) {
                Ok(update) => Ok(Accepted::Plan {
                    plan: staged,
                    update,
                }),
                Err(e @ (PlanError::MalformedProposal { .. } | PlanError::EmptyProposal)) => {
                    Err(Rejection::Malformed(e.to_string()))
                }
                Err(e) => Err(Rejection::Plan(e)),
            };
        }

        if action == ActionKind::WriteCode {
            let code = extract_code(text);
            if code.is_empty() {
                return Err(Rejection::Malformed("no code in output".to_string()));
            }
            return Ok(Accepted::Code(code.to_string()));
        }

        let body = text.trim();
        if body.is_empty() {
            return Err(Rejection::Malformed("empty output".to_string()));
        }
        Ok(Accepted::Text(body.to_string()))
    }

    /// Apply accepted output to role state and build the outgoing message.
    async fn commit(
        &mut self,
        ctx: &RunContext,
        pending: &PendingAction,
        accepted: Accepted,
        raw: String,
    ) -> Message {
        let recipients = self.route(pending);
        let name = self.profile.name.clone();

        let message = match accepted {
            Accepted::Text(text) => {
                match pending.action {
                    ActionKind::WriteRequirements => {
                        if pending.trigger.cause == ActionKind::ReviewRequirements {
                            self.counters.revisions_done += 1;
                        }
                        self.working_memory.clear();
                        self.save_artifact(ctx, "requirements.md", &text).await;
                    }
                    ActionKind::ReviewRequirements => self.counters.reviews_done += 1,
                    _ => {}
                }
                Message::new(text, name, pending.action)
            }
            Accepted::Plan { mut plan, update } => {
                if pending.action == ActionKind::PublishPlan {
                    plan.assign_round_robin(&self.settings.engineers);
                    self.working_memory.clear();
                }
                let kind = match &update {
                    PlanUpdate::Replaced { .. } => "replaced",
                    PlanUpdate::Appended { .. } => "appended",
                    PlanUpdate::Rewritten { .. } => "rewritten",
                };
                obs::emit_plan_updated(&name, kind, plan.tasks().len());
                self.plan = plan;

                let tasks = serde_json::to_value(self.plan.tasks()).ok();
                if let Ok(doc) = serde_json::to_string_pretty(self.plan.tasks()) {
                    self.save_artifact(ctx, "plan.json", &doc).await;
                }
                let mut message = Message::new(raw, name, pending.action);
                message.instruct_content = tasks;
                message
            }
            Accepted::Code(code) => {
                let task_id = pending.task.clone();
                let target = task_id
                    .as_deref()
                    .and_then(|id| self.plan.task(id))
                    .and_then(|t| t.target_file.clone());
                let result = match &target {
                    Some(file) if self.save_artifact(ctx, file, &code).await => {
                        format!("saved to {file}")
                    }
                    Some(file) => format!("generated; saving {file} failed"),
                    None => "generated".to_string(),
                };
                if let Some(id) = task_id.as_deref() {
                    let finished = self
                        .plan
                        .record_output(id, code.clone(), result)
                        .and_then(|()| self.plan.set_task_status(id, TaskStatus::Finished));
                    if let Err(e) = finished {
                        warn!(role = %name, task_id = %id, error = %e, "task left open");
                    }
                }
                let progress = self.plan.progress();

                Message::new(code, name, pending.action).with_instruct_content(serde_json::json!({
                    "task_id": task_id,
                    "target_file": target,
                    "remaining": progress.total_tasks - progress.finished_tasks,
                }))
            }
        };
        message.to(recipients)
    }

    /// Save through the artifact store. Failures are logged, never raised.
    async fn save_artifact(&self, ctx: &RunContext, name: &str, content: &str) -> bool {
        match ctx.artifacts.save(name, content).await {
            Ok(_) => true,
            Err(e) => {
                warn!(role = %self.profile.name, artifact = %name, error = %e, "artifact save failed");
                false
            }
        }
    }
}
