//! Metadata rule engine: finds a document's leading `key: value` block and
//! turns each field into transform/insert tasks according to the rule set.

use std::path::Path;

use crate::model::{InsertPosition, MetadataChange, ScanStatistics, TaskKind};
use crate::plan::rules::{Action, Field, RuleSet};

/// How many leading lines are searched for the first metadata field.
pub const METADATA_SEARCH_LINES: usize = 10;
const SEPARATOR: &str = "---";

/// Planned effect of the rule set on a single metadata line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEdit {
    /// No rule matched the key.
    NoRule,
    /// Rule matched but the line stays as written.
    Keep,
    Delete,
    Replace(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinePlan {
    pub field: Field,
    pub edit: LineEdit,
    pub inserts: Vec<(InsertPosition, String)>,
    /// Values that a `modify_value` direct map did not cover.
    pub unmapped: Vec<String>,
}

/// Locate the metadata block: the first of the leading lines whose key is a
/// configured rule key, expanded outward to every adjacent `key: value`
/// line until a blank line or `---`. Lines come back trimmed.
pub fn read_metadata_block(lines: &[&str], rules: &RuleSet) -> Vec<String> {
    let start = lines
        .iter()
        .take(METADATA_SEARCH_LINES)
        .position(|line| {
            let trimmed = line.trim();
            if trimmed.starts_with('#') {
                return false;
            }
            match line.split_once(": ") {
                Some((key, _)) => rules.is_rule_key(key.trim()),
                None => false,
            }
        });

    let Some(start) = start else {
        return Vec::new();
    };

    let is_boundary = |line: &str| line.is_empty() || line == SEPARATOR;

    let mut before = Vec::new();
    for line in lines[..=start].iter().rev().map(|l| l.trim()) {
        if is_boundary(line) {
            break;
        }
        if line.contains(": ") {
            before.push(line.to_string());
        }
    }
    before.reverse();

    let after = lines[start + 1..]
        .iter()
        .map(|l| l.trim())
        .take_while(|line| !is_boundary(line))
        .filter(|line| line.contains(": "))
        .map(str::to_string);

    before.into_iter().chain(after).collect()
}

/// Evaluate the rule set against one metadata line.
pub fn plan_line(line: &str, rules: &RuleSet) -> Option<LinePlan> {
    let field = Field::parse(line)?;

    let Some(rule) = rules.resolve(&field.key) else {
        return Some(LinePlan {
            field,
            edit: LineEdit::NoRule,
            inserts: Vec::new(),
            unmapped: Vec::new(),
        });
    };

    if rule.deletes() || rule.retain_only() {
        // The value is still reported even though no pipeline runs.
        let unmapped = if rule.value_maps().any(|map| !map.covers(&field.value)) {
            vec![field.value.clone()]
        } else {
            Vec::new()
        };
        let edit = if rule.deletes() {
            LineEdit::Delete
        } else {
            LineEdit::Keep
        };
        return Some(LinePlan {
            field,
            edit,
            inserts: Vec::new(),
            unmapped,
        });
    }

    let inserts = rule
        .inserts()
        .map(|(position, content)| (position, content.to_string()))
        .collect();

    let mut unmapped = Vec::new();
    let mut current = Some(field.clone());
    for action in rule.pipeline() {
        let Some(step) = current.take() else {
            break;
        };
        if let Action::ModifyValue(map) = action
            && !map.covers(&step.value)
        {
            unmapped.push(step.value.clone());
        }
        current = action.apply(step);
    }

    let edit = match current {
        None => LineEdit::Delete,
        Some(result) if result == field => LineEdit::Keep,
        Some(result) => LineEdit::Replace(result.to_line()),
    };

    Some(LinePlan {
        field,
        edit,
        inserts,
        unmapped,
    })
}

/// Task payloads for one document's metadata block, in generation order.
/// The returned flag marks pre-tasks.
pub fn metadata_tasks(
    file: &Path,
    block: &[String],
    rules: &RuleSet,
    stats: &mut ScanStatistics,
) -> Vec<(TaskKind, bool)> {
    let mut tasks = Vec::new();
    // Block lines as they read once the tasks planned so far have run.
    let mut settled: Vec<String> = Vec::with_capacity(block.len());

    for line in block {
        let occurrence = settled.iter().filter(|done| *done == line).count();
        let Some(plan) = plan_line(line, rules) else {
            settled.push(line.clone());
            continue;
        };
        let key = plan.field.key.clone();
        match &plan.edit {
            LineEdit::Delete => {}
            LineEdit::Replace(new_line) => settled.push(new_line.clone()),
            LineEdit::NoRule | LineEdit::Keep => settled.push(line.clone()),
        }

        for value in &plan.unmapped {
            if stats.record_unmapped(&key, value) {
                log::debug!("unmapped metadata value {key}: {value}");
            }
        }

        match plan.edit {
            LineEdit::NoRule => {
                log::warn!("{}: no rule for metadata key '{key}'", file.display());
                stats.unknown_fields.insert(key);
                continue;
            }
            LineEdit::Delete => {
                tasks.push((
                    TaskKind::TransformMetadata {
                        file: file.to_path_buf(),
                        key,
                        change: MetadataChange::Delete { line: line.clone() },
                        occurrence,
                    },
                    false,
                ));
                continue;
            }
            LineEdit::Keep | LineEdit::Replace(_) => {}
        }

        for (position, content) in plan.inserts {
            tasks.push((
                TaskKind::InsertContent {
                    file: file.to_path_buf(),
                    key: key.clone(),
                    position,
                    content,
                },
                true,
            ));
        }

        if let LineEdit::Replace(new_line) = plan.edit {
            tasks.push((
                TaskKind::TransformMetadata {
                    file: file.to_path_buf(),
                    key,
                    change: MetadataChange::Replace {
                        old_line: line.clone(),
                        new_line,
                    },
                    occurrence,
                },
                false,
            ));
        }
    }

    tasks
}
