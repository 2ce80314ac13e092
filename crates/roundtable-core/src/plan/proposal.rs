//! Extracting task-list proposals and code from generated text.

use std::sync::OnceLock;

use regex::Regex;

use super::error::{PlanError, PlanResult};
use super::task::Task;

fn fenced_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```([A-Za-z0-9_+.-]*)[ \t]*\r?\n(.*?)```").expect("static regex is valid")
    })
}

/// Body of the first fenced block tagged `lang`, if any.
pub fn extract_block<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    fenced_block()
        .captures_iter(text)
        .find(|c| c.get(1).is_some_and(|m| m.as_str().eq_ignore_ascii_case(lang)))
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().trim())
}

/// Body of the first fenced block of any language, falling back to the
/// whole text when there is none.
pub fn extract_code(text: &str) -> &str {
    fenced_block()
        .captures(text)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| text.trim())
}

/// Parse a task list out of generated text.
///
/// Looks for a ```json block first and falls back to the raw text. Structural
/// validation (ids, duplicates) happens when the proposal is applied.
pub fn parse_task_proposal(text: &str) -> PlanResult<Vec<Task>> {
    let body = extract_block(text, "json").unwrap_or_else(|| text.trim());
    if body.is_empty() {
        return Err(PlanError::MalformedProposal {
            reason: "no task list found in output".to_string(),
        });
    }
    let tasks: Vec<Task> =
        serde_json::from_str(body).map_err(|e| PlanError::MalformedProposal {
            reason: e.to_string(),
        })?;
    if tasks.is_empty() {
        return Err(PlanError::EmptyProposal);
    }
    Ok(tasks)
}
