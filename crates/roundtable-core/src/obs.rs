//! Structured lifecycle events for rounds, roles, plans and snapshots.
//!
//! Every event carries an `event` field with a dotted name
//! (`round.started`, `message.published`, ...) so logs can be filtered
//! without parsing messages. Failures are emitted at `warn!`.

use tracing::{info, warn};

use crate::message::Message;

pub fn emit_round_started(round: u64, roles: usize) {
    info!(event = "round.started", round = round, roles = roles);
}

pub fn emit_round_finished(round: u64, produced: usize, idle: usize, failed: usize) {
    info!(
        event = "round.finished",
        round = round,
        produced = produced,
        idle = idle,
        failed = failed,
    );
}

pub fn emit_message_published(message: &Message) {
    info!(
        event = "message.published",
        cause = %message.cause,
        sender = %message.sender,
        bytes = message.content.len(),
    );
}

pub fn emit_role_acted(role: &str, action: &str, attempts: u32) {
    info!(event = "role.acted", role = %role, action = %action, attempts = attempts);
}

pub fn emit_role_act_failed(role: &str, error: &dyn std::fmt::Display) {
    warn!(event = "role.act_failed", role = %role, error = %error);
}

pub fn emit_plan_updated(role: &str, kind: &str, tasks: usize) {
    info!(event = "plan.updated", role = %role, kind = %kind, tasks = tasks);
}

pub fn emit_plan_rejected(role: &str, error: &dyn std::fmt::Display) {
    warn!(event = "plan.rejected", role = %role, error = %error);
}

pub fn emit_budget_charged(amount: f64, spent: f64, cap: f64) {
    info!(event = "budget.charged", amount = amount, spent = spent, cap = cap);
}

pub fn emit_snapshot_committed(label: &str, snapshot: &str, bytes: u64) {
    info!(
        event = "snapshot.committed",
        label = %label,
        snapshot = %snapshot,
        bytes = bytes,
    );
}

pub fn emit_team_halted(reason: &dyn std::fmt::Display) {
    warn!(event = "team.halted", reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ActionKind;

    #[test]
    fn events_do_not_panic_without_subscriber() {
        emit_round_started(1, 3);
        emit_message_published(&Message::new("x", "planner", ActionKind::WritePlan));
        emit_role_act_failed("planner", &"boom");
        emit_round_finished(1, 1, 2, 0);
    }
}
