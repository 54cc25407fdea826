use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

use crate::build_info;
use crate::error::Result;
use crate::exec::ExecutionSummary;
use crate::model::{ScanStatistics, Task, TaskKind, TaskStatus};
use crate::plan::ScanOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
}

/// Task counts keyed by kind label, in label order.
pub fn count_by_kind(tasks: &[Task]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for task in tasks {
        *counts.entry(task.kind.label()).or_insert(0) += 1;
    }
    counts
}

pub fn count_by_status(tasks: &[Task]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for task in tasks {
        *counts.entry(task.status().to_string()).or_insert(0) += 1;
    }
    counts
}

#[derive(Serialize)]
struct StatisticsView<'a> {
    root: &'a Path,
    statistics: &'a ScanStatistics,
    task_counts: BTreeMap<&'static str, usize>,
    pre_tasks: usize,
    total_tasks: usize,
}

fn branch(last: bool) -> &'static str {
    if last { "└─" } else { "├─" }
}

pub fn print_statistics(outcome: &ScanOutcome, format: Format) -> Result<()> {
    let stats = &outcome.stats;
    let pending_pre: Vec<&Task> = outcome
        .tasks
        .iter()
        .filter(|t| t.is_pre_task && t.status() == TaskStatus::Todo)
        .collect();
    let counts = count_by_kind(&outcome.tasks);

    match format {
        Format::Json => {
            let view = StatisticsView {
                root: &outcome.root,
                statistics: stats,
                task_counts: counts,
                pre_tasks: pending_pre.len(),
                total_tasks: outcome.tasks.len(),
            };
            println!("{}", serde_json::to_string(&view)?);
        }
        Format::Pretty => {
            println!("{}", format!("Import statistics for {}", outcome.root.display()).bold());
            println!("├─ {}", "Summary".bold());
            let rows = [
                ("Processed documents", stats.documents),
                ("Processed attachments", stats.attachments),
                ("Metadata conversion tasks", stats.metadata_tasks),
                ("Preprocessing tasks", pending_pre.len()),
                ("Unmapped metadata entries", stats.unmapped_entries()),
                ("Rename conflicts", stats.conflicts),
                ("Scanning errors", stats.errors),
                ("Total tasks generated", outcome.tasks.len()),
            ];
            for (i, (label, value)) in rows.iter().enumerate() {
                let value = if *label == "Scanning errors" && *value > 0 {
                    value.to_string().red().to_string()
                } else {
                    value.to_string()
                };
                println!("│  {} {:28}: {}", branch(i == rows.len() - 1), label, value);
            }

            if !counts.is_empty() {
                println!("├─ {}", "Details".bold());
                for (i, (kind, count)) in counts.iter().enumerate() {
                    println!(
                        "│  {} {:28}: {} tasks",
                        branch(i == counts.len() - 1),
                        kind,
                        count
                    );
                }
            }

            if !pending_pre.is_empty() {
                print_pre_tasks(&pending_pre);
            }

            if !stats.issues.is_empty() {
                println!("├─ {}", "Scan issues".yellow().bold());
                for (i, issue) in stats.issues.iter().enumerate() {
                    println!(
                        "│  {} {}: {}",
                        branch(i == stats.issues.len() - 1),
                        issue.document.display(),
                        issue.detail
                    );
                }
            }

            if !stats.unknown_fields.is_empty() {
                let fields: Vec<&str> = stats.unknown_fields.iter().map(String::as_str).collect();
                println!("├─ {} {}", "Fields without rules:".yellow(), fields.join(", "));
            }

            if stats.unmapped_metadata.is_empty() {
                println!("└─ {}", "No unmapped metadata".dimmed());
            } else {
                println!("└─ {}", "Unmapped metadata".yellow().bold());
                let total = stats.unmapped_metadata.len();
                for (i, (key, values)) in stats.unmapped_metadata.iter().enumerate() {
                    let values: Vec<&str> = values.iter().map(String::as_str).collect();
                    println!(
                        "   {} {}: {}",
                        branch(i == total - 1),
                        key.cyan(),
                        values.join(", ")
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_pre_tasks(pre: &[&Task]) {
    println!("├─ {}", "Preprocessing tasks".bold());
    let inserts = pre
        .iter()
        .filter(|t| matches!(t.kind, TaskKind::InsertContent { .. }))
        .count();
    let others: Vec<&&Task> = pre
        .iter()
        .filter(|t| !matches!(t.kind, TaskKind::InsertContent { .. }))
        .collect();

    if inserts > 0 {
        println!("│  {} {:28}: {} tasks", branch(others.is_empty()), "insert_content", inserts);
    }
    for (i, task) in others.iter().enumerate() {
        let name = task
            .kind
            .subject()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "│  {} [{}] {} {}",
            branch(i == others.len() - 1),
            task.id,
            task.kind,
            name
        );
    }
}

#[derive(Serialize)]
struct ExecutionView<'a> {
    #[serde(flatten)]
    summary: &'a ExecutionSummary,
    statuses: BTreeMap<String, usize>,
}

pub fn print_execution(summary: &ExecutionSummary, tasks: &[Task], format: Format) -> Result<()> {
    let statuses = count_by_status(tasks);
    match format {
        Format::Json => {
            let view = ExecutionView { summary, statuses };
            println!("{}", serde_json::to_string(&view)?);
        }
        Format::Pretty => {
            println!("{}", "Execution".bold());
            println!("├─ done    : {}", summary.done.to_string().green());
            let failed = if summary.failed > 0 {
                summary.failed.to_string().red()
            } else {
                summary.failed.to_string().normal()
            };
            println!("├─ failed  : {failed}");
            println!("├─ skipped : {}", summary.skipped);
            println!("├─ todo    : {}", statuses.get("todo").copied().unwrap_or(0));
            println!("└─ elapsed : {}", format_elapsed(summary.elapsed));

            let failures: Vec<&Task> = tasks
                .iter()
                .filter(|t| t.status() == TaskStatus::Fail)
                .collect();
            if !failures.is_empty() {
                println!("{}", "Failed tasks".red().bold());
                for task in failures {
                    println!(
                        "  [{}] {} {}: {}",
                        task.id,
                        task.kind,
                        task.kind.subject().display(),
                        task.error().unwrap_or("unknown error")
                    );
                }
            }
        }
    }
    Ok(())
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", elapsed.as_millis())
    } else if secs < 60.0 {
        format!("{secs:.2}s")
    } else {
        format!("{}m{:02}s", elapsed.as_secs() / 60, elapsed.as_secs() % 60)
    }
}

/// Machine-readable record of one run.
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub generated_at: DateTime<Utc>,
    pub git_sha: Option<&'static str>,
    pub root: PathBuf,
    pub statistics: &'a ScanStatistics,
    pub tasks: &'a [Task],
    pub execution: Option<ExecutionSummary>,
}

impl<'a> RunReport<'a> {
    pub fn new(outcome: &'a ScanOutcome, execution: Option<ExecutionSummary>) -> Self {
        Self {
            generated_at: Utc::now(),
            git_sha: build_info::git_sha(),
            root: outcome.root.clone(),
            statistics: &outcome.stats,
            tasks: &outcome.tasks,
            execution,
        }
    }
}

pub fn write_report(path: &Path, report: &RunReport<'_>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json)?;
    log::info!("report written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_id::TaskId;
    use tempfile::tempdir;

    fn outcome() -> ScanOutcome {
        let mut done = Task::new(
            TaskId::from(1),
            TaskKind::RenameDocument {
                src: "/v/a 0123.md".into(),
                dest: "/v/a.md".into(),
            },
        );
        done.mark_done();
        let copy = Task::pre(
            TaskId::from(2),
            TaskKind::CopyAttachment {
                src: "/v/x.png".into(),
                dest: "/v/Resource/a.png".into(),
            },
        );
        ScanOutcome {
            root: "/v".into(),
            tasks: vec![done, copy],
            stats: ScanStatistics::default(),
        }
    }

    #[test]
    fn counts_group_by_kind_and_status() {
        let outcome = outcome();
        let kinds = count_by_kind(&outcome.tasks);
        assert_eq!(kinds["rename_document"], 1);
        assert_eq!(kinds["copy_attachment"], 1);
        let statuses = count_by_status(&outcome.tasks);
        assert_eq!(statuses["done"], 1);
        assert_eq!(statuses["todo"], 1);
    }

    #[test]
    fn elapsed_formats_by_magnitude() {
        assert_eq!(format_elapsed(Duration::from_millis(250)), "250ms");
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m05s");
    }

    #[test]
    fn report_serializes_tasks_and_summary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        let outcome = outcome();
        let summary = ExecutionSummary {
            done: 1,
            ..ExecutionSummary::default()
        };
        write_report(&path, &RunReport::new(&outcome, Some(summary))).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["tasks"].as_array().unwrap().len(), 2);
        assert_eq!(value["tasks"][0]["kind"], "rename_document");
        assert_eq!(value["tasks"][0]["status"], "done");
        assert_eq!(value["tasks"][1]["is_pre_task"], true);
        assert_eq!(value["execution"]["done"], 1);
        assert!(value["generated_at"].is_string());
    }
}
