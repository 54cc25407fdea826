use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::task_id::TaskId;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    Done,
    Fail,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Todo)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Todo => write!(f, "todo"),
            Self::Done => write!(f, "done"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPosition {
    #[default]
    Before,
    After,
}

impl fmt::Display for InsertPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
        }
    }
}

/// Line-level edit recorded by a metadata transform task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum MetadataChange {
    Replace { old_line: String, new_line: String },
    Delete { line: String },
}

impl MetadataChange {
    /// The literal line the change applies to.
    pub fn target_line(&self) -> &str {
        match self {
            Self::Replace { old_line, .. } => old_line,
            Self::Delete { line } => line,
        }
    }
}

/// Per-document table from old (percent-encoded) reference to new relative path.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathMapping(BTreeMap<String, String>);

impl PathMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.0.insert(old.into(), new.into());
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.0.get(old).map(String::as_str)
    }

    pub fn contains(&self, old: &str) -> bool {
        self.0.contains_key(old)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries ordered longest old path first, so a key that is a suffix of
    /// another key is never substituted inside it.
    pub fn longest_first(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
        entries
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    RenameDocument {
        src: PathBuf,
        dest: PathBuf,
    },
    MoveAttachment {
        src: PathBuf,
        dest: PathBuf,
    },
    CopyAttachment {
        src: PathBuf,
        dest: PathBuf,
    },
    UpdateReferences {
        file: PathBuf,
        mapping: PathMapping,
    },
    /// `occurrence` counts the lines above the target that will carry the
    /// same text once earlier edits to the block have run.
    TransformMetadata {
        file: PathBuf,
        key: String,
        #[serde(flatten)]
        change: MetadataChange,
        #[serde(default)]
        occurrence: usize,
    },
    InsertContent {
        file: PathBuf,
        key: String,
        position: InsertPosition,
        content: String,
    },
    /// Delete `target`, or move it to `trash_to` when some of its content
    /// was never accounted for.
    Cleanup {
        target: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trash_to: Option<PathBuf>,
    },
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RenameDocument { .. } => "rename_document",
            Self::MoveAttachment { .. } => "move_attachment",
            Self::CopyAttachment { .. } => "copy_attachment",
            Self::UpdateReferences { .. } => "update_references",
            Self::TransformMetadata { .. } => "transform_metadata",
            Self::InsertContent { .. } => "insert_content",
            Self::Cleanup { .. } => "cleanup",
        }
    }

    /// The path the task primarily acts on, for summaries.
    pub fn subject(&self) -> &Path {
        match self {
            Self::RenameDocument { src, .. }
            | Self::MoveAttachment { src, .. }
            | Self::CopyAttachment { src, .. } => src,
            Self::UpdateReferences { file, .. }
            | Self::TransformMetadata { file, .. }
            | Self::InsertContent { file, .. } => file,
            Self::Cleanup { target, .. } => target,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(flatten)]
    pub kind: TaskKind,
    status: TaskStatus,
    pub is_pre_task: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Task {
    pub fn new(id: TaskId, kind: TaskKind) -> Self {
        Self {
            id,
            kind,
            status: TaskStatus::Todo,
            is_pre_task: false,
            error: None,
        }
    }

    pub fn pre(id: TaskId, kind: TaskKind) -> Self {
        Self {
            is_pre_task: true,
            ..Self::new(id, kind)
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// `todo -> done`. Returns false if the task had already settled.
    pub fn mark_done(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Done;
        true
    }

    /// `todo -> fail`. Returns false if the task had already settled.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Fail;
        self.error = Some(message.into());
        true
    }
}

/// A recoverable problem found while planning one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub document: PathBuf,
    pub detail: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub documents: usize,
    pub attachments: usize,
    pub metadata_tasks: usize,
    pub conflicts: usize,
    pub errors: usize,
    /// Field name -> values no direct mapping covered.
    pub unmapped_metadata: BTreeMap<String, BTreeSet<String>>,
    /// Field names seen in a metadata block that no rule matched.
    pub unknown_fields: BTreeSet<String>,
    pub issues: Vec<ScanIssue>,
}

impl ScanStatistics {
    pub fn record_issue(&mut self, document: &Path, detail: impl Into<String>) {
        let detail = detail.into();
        log::warn!("{}: {}", document.display(), detail);
        self.errors += 1;
        self.issues.push(ScanIssue {
            document: document.to_path_buf(),
            detail,
        });
    }

    /// Returns true the first time a `(key, value)` pair is recorded.
    pub fn record_unmapped(&mut self, key: &str, value: &str) -> bool {
        self.unmapped_metadata
            .entry(key.to_string())
            .or_default()
            .insert(value.to_string())
    }

    pub fn unmapped_entries(&self) -> usize {
        self.unmapped_metadata.values().map(BTreeSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rename_task() -> Task {
        Task::new(
            TaskId::from(1),
            TaskKind::RenameDocument {
                src: "a 0123.md".into(),
                dest: "a.md".into(),
            },
        )
    }

    #[test]
    fn status_only_moves_forward() {
        let mut task = rename_task();
        assert_eq!(task.status(), TaskStatus::Todo);
        assert!(task.mark_done());
        assert!(!task.mark_failed("late failure"));
        assert_eq!(task.status(), TaskStatus::Done);
        assert_eq!(task.error(), None);

        let mut task = rename_task();
        assert!(task.mark_failed("boom"));
        assert!(!task.mark_done());
        assert_eq!(task.status(), TaskStatus::Fail);
        assert_eq!(task.error(), Some("boom"));
    }

    #[test]
    fn task_serializes_kind_tag_and_payload() {
        let json = serde_json::to_value(rename_task()).unwrap();
        assert_eq!(json["kind"], "rename_document");
        assert_eq!(json["status"], "todo");
        assert_eq!(json["dest"], "a.md");
        assert_eq!(json["is_pre_task"], false);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn metadata_change_flattens_into_task() {
        let task = Task::new(
            TaskId::from(2),
            TaskKind::TransformMetadata {
                file: "doc.md".into(),
                key: "Status".into(),
                change: MetadataChange::Delete {
                    line: "Status: Draft".into(),
                },
                occurrence: 1,
            },
        );
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["change"], "delete");
        assert_eq!(json["line"], "Status: Draft");
        assert_eq!(json["occurrence"], 1);
        let parsed: Task = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn longest_first_orders_by_key_length() {
        let mut mapping = PathMapping::new();
        mapping.insert("a.png", "Resource/x.png");
        mapping.insert("dir/a.png", "Resource/y.png");
        let keys: Vec<&str> = mapping.longest_first().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["dir/a.png", "a.png"]);
    }

    #[test]
    fn unmapped_registry_deduplicates_pairs() {
        let mut stats = ScanStatistics::default();
        assert!(stats.record_unmapped("Status", "Draft"));
        assert!(!stats.record_unmapped("Status", "Draft"));
        assert!(stats.record_unmapped("Status", "Final"));
        assert_eq!(stats.unmapped_entries(), 2);
    }

    #[test]
    fn record_issue_counts_errors() {
        let mut stats = ScanStatistics::default();
        stats.record_issue(Path::new("doc.md"), "attachment not found: a.png");
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.issues[0].detail, "attachment not found: a.png");
    }
}
