//! Dependency-ordered task plans and their transactional update algorithm.
//!
//! # Module layout
//!
//! - [`task`]: `Task`, `TaskStatus`
//! - [`proposal`]: `parse_task_proposal`, `extract_code`
//! - [`error`]: `PlanError`, `PlanResult`
//!
//! A [`Plan`] is only mutated through its own methods. Proposals go through
//! [`Plan::apply_proposal`], which runs the update against a copy first and
//! commits only when it succeeds.

pub mod error;
pub mod proposal;
pub mod task;

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::warn;

pub use error::{PlanError, PlanResult};
pub use proposal::{extract_block, extract_code, parse_task_proposal};
pub use task::{Task, TaskStatus};

/// What an accepted proposal did to the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanUpdate {
    /// One task replaced in place; dependents were reset.
    Replaced {
        task_id: String,
        reset_dependents: Vec<String>,
        discarded: usize,
    },
    /// One task appended to the end of the order.
    Appended { task_id: String, discarded: usize },
    /// Task order replaced wholesale by the proposal.
    Rewritten { task_count: usize },
}

impl PlanUpdate {
    /// Number of proposed tasks dropped by a single-task merge.
    pub fn discarded(&self) -> usize {
        match self {
            PlanUpdate::Replaced { discarded, .. } | PlanUpdate::Appended { discarded, .. } => {
                *discarded
            }
            PlanUpdate::Rewritten { .. } => 0,
        }
    }
}

/// Progress report over task execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub total_tasks: usize,
    pub finished_tasks: usize,
    pub running_tasks: usize,
    pub failed_tasks: usize,
    pub pending_tasks: usize,
    pub completion_ratio: f32,
    pub current_task_id: Option<String>,
}

/// Ordered task sequence plus a cursor at the first unfinished task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    current_task_id: Option<String>,
}

impl Plan {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Self::default()
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn has_task(&self, id: &str) -> bool {
        self.task(id).is_some()
    }

    pub fn current_task_id(&self) -> Option<&str> {
        self.current_task_id.as_deref()
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current_task_id.as_deref().and_then(|id| self.task(id))
    }

    fn current_task_mut(&mut self) -> Option<&mut Task> {
        let id = self.current_task_id.clone()?;
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// True when every task is finished (vacuously true for an empty plan).
    pub fn is_complete(&self) -> bool {
        self.current_task_id.is_none()
    }

    // -----------------------------------------------------------------------
    // Proposal handling
    // -----------------------------------------------------------------------

    /// Run the update against a copy of this plan. `self` is never touched.
    pub fn precheck(&self, proposal: &[Task]) -> PlanResult<PlanUpdate> {
        let mut scratch = self.clone();
        scratch.update_from_proposal(proposal.to_vec())
    }

    /// Precheck, then commit. On error the plan is left exactly as it was.
    pub fn apply_proposal(&mut self, proposal: Vec<Task>) -> PlanResult<PlanUpdate> {
        let mut staged = self.clone();
        let update = staged.update_from_proposal(proposal)?;
        *self = staged;
        Ok(update)
    }

    /// Parse generated text and apply it transactionally.
    pub fn apply_text(&mut self, text: &str) -> PlanResult<PlanUpdate> {
        let proposal = parse_task_proposal(text)?;
        self.apply_proposal(proposal)
    }

    /// The update algorithm proper. May leave `self` half-updated on error,
    /// so callers go through `precheck` or `apply_proposal`.
    ///
    /// A proposal of exactly one task, or whose first task declares
    /// dependencies, is a single-task merge: replace the task with the same id
    /// in place or append it. Extra tasks in that case are dropped with a
    /// warning. Anything else replaces the task order verbatim.
    fn update_from_proposal(&mut self, mut proposal: Vec<Task>) -> PlanResult<PlanUpdate> {
        if proposal.is_empty() {
            return Err(PlanError::EmptyProposal);
        }

        let single = proposal.len() == 1 || !proposal[0].dependent_task_ids.is_empty();
        let update = if single {
            let discarded = proposal.len() - 1;
            if discarded > 0 {
                warn!(
                    kept = %proposal[0].id,
                    discarded,
                    "partial proposal carries several tasks; only the first is applied"
                );
            }
            proposal.truncate(1);
            let task = proposal.remove(0);
            check_task(&task, 0)?;
            let task_id = task.id.clone();
            if self.has_task(&task_id) {
                let reset_dependents = self.replace_task(task)?;
                PlanUpdate::Replaced {
                    task_id,
                    reset_dependents,
                    discarded,
                }
            } else {
                self.append_task(task)?;
                PlanUpdate::Appended { task_id, discarded }
            }
        } else {
            let task_count = proposal.len();
            self.add_tasks(proposal)?;
            PlanUpdate::Rewritten { task_count }
        };

        self.update_current_task();
        Ok(update)
    }

    // -----------------------------------------------------------------------
    // Direct mutations
    // -----------------------------------------------------------------------

    /// Replace the whole task order with `tasks`, verbatim.
    pub fn add_tasks(&mut self, tasks: Vec<Task>) -> PlanResult<()> {
        let mut seen = HashSet::new();
        for (position, task) in tasks.iter().enumerate() {
            check_task(task, position)?;
            if !seen.insert(task.id.as_str()) {
                return Err(PlanError::DuplicateTaskId {
                    task_id: task.id.clone(),
                });
            }
        }
        self.tasks = tasks;
        self.update_current_task();
        Ok(())
    }

    /// Replace an existing task in place. Every task that transitively
    /// depends on it is reset; their ids are returned in plan order.
    pub fn replace_task(&mut self, task: Task) -> PlanResult<Vec<String>> {
        check_task(&task, 0)?;
        let slot = self
            .tasks
            .iter()
            .position(|t| t.id == task.id)
            .ok_or_else(|| PlanError::UnknownTask {
                task_id: task.id.clone(),
            })?;
        let task_id = task.id.clone();
        self.tasks[slot] = task;

        let dependents = self.transitive_dependents(&task_id);
        let mut reset = Vec::new();
        for t in self.tasks.iter_mut() {
            if dependents.contains(&t.id) {
                t.reset();
                reset.push(t.id.clone());
            }
        }
        self.update_current_task();
        Ok(reset)
    }

    /// Append a task with a fresh id. Dependencies on ids not yet in the plan
    /// are tolerated; [`Plan::validate`] reports them.
    pub fn append_task(&mut self, task: Task) -> PlanResult<()> {
        check_task(&task, self.tasks.len())?;
        if self.has_task(&task.id) {
            return Err(PlanError::DuplicateTaskId { task_id: task.id });
        }
        self.tasks.push(task);
        self.update_current_task();
        Ok(())
    }

    pub fn reset_task(&mut self, id: &str) -> PlanResult<()> {
        let task = self.task_mut(id)?;
        task.reset();
        self.update_current_task();
        Ok(())
    }

    pub fn set_task_status(&mut self, id: &str, status: TaskStatus) -> PlanResult<()> {
        self.task_mut(id)?.status = status;
        self.update_current_task();
        Ok(())
    }

    pub fn assign(&mut self, id: &str, assignee: impl Into<String>) -> PlanResult<()> {
        self.task_mut(id)?.assignee = Some(assignee.into());
        Ok(())
    }

    /// Give every unassigned task to the next of `assignees` in turn.
    /// Returns how many tasks were assigned.
    pub fn assign_round_robin(&mut self, assignees: &[String]) -> usize {
        if assignees.is_empty() {
            return 0;
        }
        let mut next = assignees.iter().cycle();
        let mut assigned = 0;
        for task in self.tasks.iter_mut().filter(|t| t.assignee.is_none()) {
            if let Some(who) = next.next() {
                task.assignee = Some(who.clone());
                assigned += 1;
            }
        }
        assigned
    }

    /// Record output on task `id`.
    pub fn record_output(&mut self, id: &str, code: String, result: String) -> PlanResult<()> {
        let task = self.task_mut(id)?;
        task.code = code;
        task.result = result;
        Ok(())
    }

    /// First unfinished task assigned to `assignee` whose dependencies are
    /// all finished. Dependencies missing from the plan count as unmet.
    pub fn ready_task_for(&self, assignee: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| {
            !t.is_finished()
                && t.assignee.as_deref() == Some(assignee)
                && t.dependent_task_ids
                    .iter()
                    .all(|d| self.task(d).is_some_and(Task::is_finished))
        })
    }

    /// Mark the current task finished and advance the cursor. Returns the id
    /// of the task that was finished.
    pub fn finish_current_task(&mut self) -> Option<String> {
        let task = self.current_task_mut()?;
        task.status = TaskStatus::Finished;
        let id = task.id.clone();
        self.update_current_task();
        Some(id)
    }

    fn task_mut(&mut self, id: &str) -> PlanResult<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| PlanError::UnknownTask {
                task_id: id.to_string(),
            })
    }

    fn update_current_task(&mut self) {
        self.current_task_id = self
            .tasks
            .iter()
            .find(|t| !t.is_finished())
            .map(|t| t.id.clone());
    }

    fn transitive_dependents(&self, root: &str) -> HashSet<String> {
        let mut found: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            for t in &self.tasks {
                if t.dependent_task_ids.iter().any(|d| d == id) && found.insert(t.id.clone()) {
                    queue.push_back(t.id.as_str());
                }
            }
        }
        found.remove(root);
        found
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Check that the plan is fully formed: every dependency resolves and the
    /// dependency graph is acyclic.
    pub fn validate(&self) -> PlanResult<()> {
        let ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        for task in &self.tasks {
            for dep in &task.dependent_task_ids {
                if !ids.contains(dep.as_str()) {
                    return Err(PlanError::MissingDependency {
                        task_id: task.id.clone(),
                        missing_dependency: dep.clone(),
                    });
                }
            }
        }

        let mut indegree: BTreeMap<&str, usize> = ids.iter().map(|id| (*id, 0usize)).collect();
        let mut edges: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for task in &self.tasks {
            for dep in &task.dependent_task_ids {
                edges.entry(dep.as_str()).or_default().push(task.id.as_str());
                if let Some(d) = indegree.get_mut(task.id.as_str()) {
                    *d += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut visited = 0usize;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            for &next in edges.get(node).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        if visited != ids.len() {
            return Err(PlanError::CycleDetected);
        }
        Ok(())
    }

    pub fn progress(&self) -> PlanProgress {
        let count = |s: TaskStatus| self.tasks.iter().filter(|t| t.status == s).count();
        let total = self.tasks.len();
        let finished = count(TaskStatus::Finished);
        PlanProgress {
            total_tasks: total,
            finished_tasks: finished,
            running_tasks: count(TaskStatus::Running),
            failed_tasks: count(TaskStatus::Failed),
            pending_tasks: count(TaskStatus::NotStarted),
            completion_ratio: if total == 0 {
                0.0
            } else {
                finished as f32 / total as f32
            },
            current_task_id: self.current_task_id.clone(),
        }
    }
}

fn check_task(task: &Task, position: usize) -> PlanResult<()> {
    if task.id.trim().is_empty() {
        return Err(PlanError::EmptyTaskId { position });
    }
    if task.dependent_task_ids.iter().any(|d| *d == task.id) {
        return Err(PlanError::SelfDependency {
            task_id: task.id.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_of(tasks: Vec<Task>) -> Plan {
        let mut plan = Plan::new("goal");
        plan.add_tasks(tasks).unwrap();
        plan
    }

    #[test]
    fn single_task_merge_replaces_in_place() {
        let mut plan = plan_of(vec![
            Task::new("T1", "load").with_status(TaskStatus::Finished),
            Task::new("T2", "train"),
        ]);

        let update = plan
            .apply_proposal(vec![Task::new("T2", "X").depends_on(["T1"])])
            .unwrap();

        assert!(matches!(update, PlanUpdate::Replaced { ref task_id, .. } if task_id == "T2"));
        let ids: Vec<_> = plan.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
        assert_eq!(plan.tasks()[0].status, TaskStatus::Finished);
        assert_eq!(plan.tasks()[0].instruction, "load");
        assert_eq!(plan.task("T2").unwrap().instruction, "X");
        assert_eq!(plan.current_task_id(), Some("T2"));
    }

    #[test]
    fn single_unknown_task_is_appended() {
        let mut plan = plan_of(vec![Task::new("1", "a"), Task::new("2", "b")]);
        let update = plan.apply_proposal(vec![Task::new("3", "c")]).unwrap();
        assert_eq!(
            update,
            PlanUpdate::Appended {
                task_id: "3".into(),
                discarded: 0
            }
        );
        assert_eq!(plan.tasks().last().unwrap().id, "3");
    }

    #[test]
    fn dependent_first_task_keeps_only_the_first() {
        let mut plan = plan_of(vec![Task::new("1", "a"), Task::new("2", "b")]);
        let update = plan
            .apply_proposal(vec![
                Task::new("2", "b2").depends_on(["1"]),
                Task::new("3", "c"),
                Task::new("4", "d"),
            ])
            .unwrap();

        assert_eq!(update.discarded(), 2);
        assert_eq!(plan.tasks().len(), 2);
        assert!(!plan.has_task("3"));
        assert_eq!(plan.task("2").unwrap().instruction, "b2");
    }

    #[test]
    fn full_replace_is_verbatim() {
        let mut plan = plan_of(vec![
            Task::new("T1", "a").with_status(TaskStatus::Finished),
            Task::new("T2", "b"),
        ]);
        let update = plan
            .apply_proposal(vec![Task::new("A", ""), Task::new("B", ""), Task::new("C", "")])
            .unwrap();

        assert_eq!(update, PlanUpdate::Rewritten { task_count: 3 });
        let ids: Vec<_> = plan.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(plan.current_task_id(), Some("A"));
    }

    #[test]
    fn full_replace_does_not_carry_over_finished_results() {
        let mut t1 = Task::new("T1", "a").with_status(TaskStatus::Finished);
        t1.code = "done()".into();
        let mut plan = plan_of(vec![t1, Task::new("T2", "b")]);

        plan.apply_proposal(vec![Task::new("T1", "a"), Task::new("T2", "b")])
            .unwrap();

        let t1 = plan.task("T1").unwrap();
        assert_eq!(t1.status, TaskStatus::NotStarted);
        assert!(t1.code.is_empty());
        assert_eq!(plan.current_task_id(), Some("T1"));
    }

    #[test]
    fn replace_resets_transitive_dependents() {
        let mut plan = plan_of(vec![
            Task::new("1", "a").with_status(TaskStatus::Finished),
            Task::new("2", "b")
                .depends_on(["1"])
                .with_status(TaskStatus::Finished),
            Task::new("3", "c")
                .depends_on(["2"])
                .with_status(TaskStatus::Finished),
            Task::new("4", "d").with_status(TaskStatus::Finished),
        ]);

        let reset = plan.replace_task(Task::new("1", "a2")).unwrap();

        assert_eq!(reset, vec!["2", "3"]);
        assert_eq!(plan.task("4").unwrap().status, TaskStatus::Finished);
        assert_eq!(plan.current_task_id(), Some("1"));
    }

    #[test]
    fn rejected_update_leaves_plan_untouched() {
        let plan = plan_of(vec![Task::new("1", "a"), Task::new("2", "b")]);
        let before = serde_json::to_vec(&plan).unwrap();

        let mut live = plan.clone();
        let dup = vec![Task::new("x", ""), Task::new("y", ""), Task::new("x", "")];
        assert!(matches!(
            live.precheck(&dup),
            Err(PlanError::DuplicateTaskId { .. })
        ));
        assert!(matches!(
            live.apply_proposal(dup),
            Err(PlanError::DuplicateTaskId { .. })
        ));
        assert!(live.apply_text("not json at all").is_err());
        assert!(matches!(
            live.apply_proposal(vec![Task::new("", "blank")]),
            Err(PlanError::EmptyTaskId { position: 0 })
        ));
        assert!(matches!(
            live.apply_proposal(vec![Task::new("9", "").depends_on(["9"])]),
            Err(PlanError::SelfDependency { .. })
        ));

        assert_eq!(serde_json::to_vec(&live).unwrap(), before);
    }

    #[test]
    fn precheck_reports_outcome_without_committing() {
        let plan = plan_of(vec![Task::new("1", "a")]);
        let outcome = plan.precheck(&[Task::new("2", "b")]).unwrap();
        assert!(matches!(outcome, PlanUpdate::Appended { .. }));
        assert_eq!(plan.tasks().len(), 1);
    }

    #[test]
    fn cursor_walks_to_completion() {
        let mut plan = plan_of(vec![Task::new("1", "a"), Task::new("2", "b")]);
        assert_eq!(plan.finish_current_task().as_deref(), Some("1"));
        assert_eq!(plan.current_task_id(), Some("2"));
        assert_eq!(plan.finish_current_task().as_deref(), Some("2"));
        assert!(plan.is_complete());
        assert!(plan.finish_current_task().is_none());

        plan.reset_task("1").unwrap();
        assert_eq!(plan.current_task_id(), Some("1"));
    }

    #[test]
    fn ready_task_waits_for_dependencies() {
        let mut plan = plan_of(vec![
            Task::new("1", "load").assigned_to("a"),
            Task::new("2", "train").depends_on(["1"]).assigned_to("b"),
            Task::new("3", "report").depends_on(["9"]).assigned_to("b"),
        ]);
        assert_eq!(plan.ready_task_for("a").map(|t| t.id.as_str()), Some("1"));
        assert!(plan.ready_task_for("b").is_none());

        plan.record_output("1", "df = load()".into(), "ok".into())
            .unwrap();
        plan.set_task_status("1", TaskStatus::Finished).unwrap();
        assert_eq!(plan.task("1").unwrap().code, "df = load()");
        assert!(plan.ready_task_for("a").is_none());
        assert_eq!(plan.ready_task_for("b").map(|t| t.id.as_str()), Some("2"));
        assert!(plan.record_output("7", String::new(), String::new()).is_err());
    }

    #[test]
    fn validate_flags_missing_dependency_and_cycles() {
        let mut plan = plan_of(vec![Task::new("1", "a")]);
        plan.append_task(Task::new("2", "b").depends_on(["7"]))
            .unwrap();
        assert_eq!(
            plan.validate(),
            Err(PlanError::MissingDependency {
                task_id: "2".into(),
                missing_dependency: "7".into()
            })
        );

        let cyclic = plan_of(vec![
            Task::new("a", "").depends_on(["b"]),
            Task::new("b", "").depends_on(["a"]),
        ]);
        assert_eq!(cyclic.validate(), Err(PlanError::CycleDetected));

        let ok = plan_of(vec![Task::new("a", ""), Task::new("b", "").depends_on(["a"])]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn progress_counts_statuses() {
        let plan = plan_of(vec![
            Task::new("1", "").with_status(TaskStatus::Finished),
            Task::new("2", "").with_status(TaskStatus::Failed),
            Task::new("3", ""),
            Task::new("4", "").with_status(TaskStatus::Running),
        ]);
        let p = plan.progress();
        assert_eq!(p.total_tasks, 4);
        assert_eq!(p.finished_tasks, 1);
        assert_eq!(p.failed_tasks, 1);
        assert_eq!(p.pending_tasks, 1);
        assert_eq!(p.running_tasks, 1);
        assert!((p.completion_ratio - 0.25).abs() < f32::EPSILON);
        assert_eq!(p.current_task_id.as_deref(), Some("2"));
    }

    #[test]
    fn round_robin_skips_assigned_tasks() {
        let mut plan = plan_of(vec![
            Task::new("1", ""),
            Task::new("2", ""),
            Task::new("3", ""),
            Task::new("4", ""),
        ]);
        plan.assign("2", "lead").unwrap();
        let engineers = vec!["e1".to_string(), "e2".to_string()];

        assert_eq!(plan.assign_round_robin(&engineers), 3);
        let who: Vec<_> = plan
            .tasks()
            .iter()
            .map(|t| t.assignee.as_deref().unwrap())
            .collect();
        assert_eq!(who, vec!["e1", "lead", "e2", "e1"]);
        assert_eq!(plan.assign_round_robin(&[]), 0);
    }

    #[test]
    fn set_status_on_unknown_task_fails() {
        let mut plan = Plan::new("g");
        assert!(matches!(
            plan.set_task_status("nope", TaskStatus::Running),
            Err(PlanError::UnknownTask { .. })
        ));
    }
}
