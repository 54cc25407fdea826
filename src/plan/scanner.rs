//! Document scanner: walks the export tree and plans every task for the run.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::config::{Config, SectionPosition, SectionRule};
use crate::error::{ImportError, Result};
use crate::model::{InsertPosition, ScanStatistics, Task, TaskKind};
use crate::plan::attachments;
use crate::plan::metadata::{metadata_tasks, read_metadata_block};
use crate::plan::naming::{
    DOCUMENT_EXTENSION, is_document, strip_identifier, to_slash, unique_name,
};
use crate::task_id::TaskIdAllocator;

/// Everything the planning phase hands to execution and reporting.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub root: PathBuf,
    pub tasks: Vec<Task>,
    pub stats: ScanStatistics,
}

/// Mutable state threaded through one scan.
pub struct ScanContext<'a> {
    root: PathBuf,
    config: &'a Config,
    stats: ScanStatistics,
    ids: TaskIdAllocator,
    tasks: Vec<Task>,
    current_document: Option<PathBuf>,
    planned_stems: HashSet<String>,
    reserved: HashSet<PathBuf>,
}

impl<'a> ScanContext<'a> {
    pub fn new(root: &Path, config: &'a Config, ids: TaskIdAllocator) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            stats: ScanStatistics::default(),
            ids,
            tasks: Vec::new(),
            current_document: None,
            planned_stems: HashSet::new(),
            reserved: HashSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn resource_dir(&self) -> PathBuf {
        self.root.join(&self.config.attachment_output_path)
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.root.join(&self.config.trash_output_path)
    }

    pub fn current_document(&self) -> Option<&Path> {
        self.current_document.as_deref()
    }

    /// Record a scan error against the current document.
    pub fn record_issue(&mut self, detail: impl Into<String>) {
        let document = self
            .current_document
            .clone()
            .unwrap_or_else(|| self.root.clone());
        self.stats.record_issue(&document, detail);
    }

    /// Claim a free `<base>.<ext>` inside the resource directory.
    pub fn reserve_resource(&mut self, base: &str, ext: &str) -> PathBuf {
        let dir = self.resource_dir();
        self.reserve_in(&dir, base, ext)
    }

    /// Claim a free trash destination for an attachment directory.
    pub fn reserve_trash(&mut self, dir: &Path) -> PathBuf {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachments".to_string());
        let trash = self.trash_dir();
        self.reserve_in(&trash, &name, "")
    }

    fn reserve_in(&mut self, dir: &Path, base: &str, ext: &str) -> PathBuf {
        let reserved = &self.reserved;
        let (name, _) = unique_name(base, ext, |candidate| {
            let path = dir.join(candidate);
            reserved.contains(&path) || path.exists()
        });
        let path = dir.join(name);
        self.reserved.insert(path.clone());
        path
    }

    /// Root-relative, slash-separated form of a path inside the resource directory.
    pub fn resource_relative(&self, dest: &Path) -> String {
        match dest.strip_prefix(&self.root) {
            Ok(relative) => to_slash(relative),
            Err(_) => to_slash(dest),
        }
    }

    /// Allocate an id and append a task in generation order.
    pub fn push(&mut self, kind: TaskKind, pre: bool) -> Result<()> {
        let id = self.ids.allocate()?;
        log::debug!("task {id} added: {kind} {}", kind.subject().display());
        let task = if pre {
            Task::pre(id, kind)
        } else {
            Task::new(id, kind)
        };
        self.tasks.push(task);
        Ok(())
    }

    pub fn finish(self) -> ScanOutcome {
        ScanOutcome {
            root: self.root,
            tasks: self.tasks,
            stats: self.stats,
        }
    }
}

pub fn scan_directory(root: &Path, config: &Config) -> Result<ScanOutcome> {
    scan_directory_with(root, config, TaskIdAllocator::new())
}

/// Plan the whole run. The filesystem is read but never written.
pub fn scan_directory_with(
    root: &Path,
    config: &Config,
    ids: TaskIdAllocator,
) -> Result<ScanOutcome> {
    if !root.is_dir() {
        return Err(ImportError::DirectoryNotFound(root.to_path_buf()));
    }

    let mut ctx = ScanContext::new(root, config, ids);
    let documents = discover_documents(&mut ctx);
    log::info!("scanning {} documents under {}", documents.len(), root.display());

    for document in documents {
        scan_document(&mut ctx, &document)?;
    }
    ctx.current_document = None;

    let outcome = ctx.finish();
    log::info!(
        "scan complete: {} tasks, {} errors",
        outcome.tasks.len(),
        outcome.stats.errors
    );
    Ok(outcome)
}

fn discover_documents(ctx: &mut ScanContext<'_>) -> Vec<PathBuf> {
    let skipped = [ctx.resource_dir(), ctx.trash_dir()];
    let walker = WalkDir::new(&ctx.root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry: &DirEntry| {
            !skipped.iter().any(|dir| entry.path() == dir.as_path())
        });

    let mut documents = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() && is_document(entry.path()) => {
                documents.push(entry.into_path());
            }
            Ok(_) => {}
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                ctx.stats.record_issue(&path, format!("cannot walk: {err}"));
            }
        }
    }
    documents
}

fn scan_document(ctx: &mut ScanContext<'_>, document: &Path) -> Result<()> {
    log::debug!("scanning {}", document.display());
    ctx.current_document = Some(document.to_path_buf());
    ctx.stats.documents += 1;

    let content = match fs::read_to_string(document) {
        Ok(content) => content,
        Err(err) => {
            ctx.record_issue(format!("unreadable document: {err}"));
            return Ok(());
        }
    };

    let (stem, rename) = plan_rename(ctx, document);

    let lines: Vec<&str> = content.lines().collect();
    let block = read_metadata_block(&lines, &ctx.config.rules);
    let meta = metadata_tasks(document, &block, &ctx.config.rules, &mut ctx.stats);
    if !meta.is_empty() {
        ctx.stats.metadata_tasks += meta.len();
        for kind in section_inserts(ctx.config, document, &meta) {
            ctx.push(kind, true)?;
        }
        for (kind, pre) in meta {
            ctx.push(kind, pre)?;
        }
    }

    let plan = attachments::resolve(ctx, document, &stem, &content);
    ctx.stats.attachments += plan.attachments;
    for (kind, pre) in plan.tasks {
        ctx.push(kind, pre)?;
    }
    if !plan.mapping.is_empty() {
        ctx.push(
            TaskKind::UpdateReferences {
                file: document.to_path_buf(),
                mapping: plan.mapping,
            },
            false,
        )?;
    }

    if let Some(kind) = rename {
        ctx.push(kind, false)?;
    }
    Ok(())
}

/// Final stem for a document, and the rename task if it has to move.
fn plan_rename(ctx: &mut ScanContext<'_>, document: &Path) -> (String, Option<TaskKind>) {
    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = strip_identifier(&stem);

    let root = &ctx.root;
    let planned = &ctx.planned_stems;
    let (name, rejected) = unique_name(base, "", |candidate| {
        if planned.contains(candidate) {
            return true;
        }
        let dest = root.join(format!("{candidate}.{DOCUMENT_EXTENSION}"));
        dest != document && dest.exists()
    });

    if rejected > 0 {
        log::info!("{}: '{base}' taken, using '{name}'", document.display());
        ctx.stats.conflicts += rejected;
    }
    ctx.planned_stems.insert(name.clone());

    let dest = ctx.root.join(format!("{name}.{DOCUMENT_EXTENSION}"));
    let rename = (dest != document).then(|| TaskKind::RenameDocument {
        src: document.to_path_buf(),
        dest,
    });
    (name, rename)
}

/// Section boundary inserts anchored on the first and last metadata task keys.
fn section_inserts(config: &Config, document: &Path, meta: &[(TaskKind, bool)]) -> Vec<TaskKind> {
    let key_of = |kind: &TaskKind| match kind {
        TaskKind::TransformMetadata { key, .. } | TaskKind::InsertContent { key, .. } => {
            Some(key.clone())
        }
        _ => None,
    };
    let first = meta.iter().find_map(|(kind, _)| key_of(kind));
    let last = meta.iter().rev().find_map(|(kind, _)| key_of(kind));

    config
        .section_rules
        .iter()
        .filter_map(|rule| {
            let SectionRule::Insert { position, content } = rule;
            let (key, position) = match position {
                SectionPosition::First => (first.clone()?, InsertPosition::Before),
                SectionPosition::Last => (last.clone()?, InsertPosition::After),
            };
            Some(TaskKind::InsertContent {
                file: document.to_path_buf(),
                key,
                position,
                content: content.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const UID_A: &str = "0123456789abcdef0123456789abcdef";
    const UID_B: &str = "fedcba9876543210fedcba9876543210";

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn scan(root: &Path, config: &Config) -> ScanOutcome {
        scan_directory_with(root, config, TaskIdAllocator::sequential()).unwrap()
    }

    fn rename_dests(outcome: &ScanOutcome) -> Vec<String> {
        outcome
            .tasks
            .iter()
            .filter_map(|t| match &t.kind {
                TaskKind::RenameDocument { dest, .. } => {
                    Some(dest.file_name().unwrap().to_string_lossy().into_owned())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let err = scan_directory(&dir.path().join("absent"), &Config::default()).unwrap_err();
        assert_eq!(err.code(), "directory_not_found");
    }

    #[test]
    fn identical_bases_get_counter_suffixes_in_scan_order() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join(format!("Notes {UID_A}.md")), "a");
        write(&root.join(format!("Notes {UID_B}.md")), "b");
        write(&root.join("sub").join(format!("Notes {UID_A}.md")), "c");

        let outcome = scan(root, &Config::default());
        assert_eq!(
            rename_dests(&outcome),
            vec!["Notes.md", "Notes_1.md", "Notes_2.md"]
        );
        assert_eq!(outcome.stats.conflicts, 1 + 2);
        assert_eq!(outcome.stats.documents, 3);
    }

    #[test]
    fn document_already_in_place_keeps_its_name_reserved() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("Plan.md"), "x");
        write(&root.join(format!("Plan {UID_A}.md")), "y");

        let outcome = scan(root, &Config::default());
        // "Plan <uid>.md" sorts first but "Plan.md" already exists on disk.
        assert_eq!(rename_dests(&outcome), vec!["Plan_1.md"]);
    }

    #[test]
    fn resource_and_trash_directories_are_not_scanned() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("Resource/old.md"), "x");
        write(&root.join("Trash/older.md"), "y");
        write(&root.join("Top.md"), "z");

        let outcome = scan(root, &Config::default());
        assert_eq!(outcome.stats.documents, 1);
        assert!(outcome.tasks.is_empty());
    }

    #[test]
    fn tasks_follow_document_pipeline_order() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let yaml = r#"
metadata_rules:
  Status:
    actions:
      - type: rename
        new_name: state
metadata_section_rules:
  - type: insert
    position: first
    content: "---"
"#;
        let config = Config::from_yaml_str(yaml, Path::new("t.yaml")).unwrap();
        write(&root.join(format!("Doc {UID_A}/pic.png")), "png");
        write(
            &root.join(format!("Doc {UID_A}.md")),
            &format!("Status: open\n\n![p](Doc%20{UID_A}/pic.png)\n"),
        );

        let outcome = scan(root, &config);
        let labels: Vec<&str> = outcome.tasks.iter().map(|t| t.kind.label()).collect();
        assert_eq!(
            labels,
            vec![
                "insert_content",
                "transform_metadata",
                "move_attachment",
                "cleanup",
                "update_references",
                "rename_document",
            ]
        );
        assert!(outcome.tasks[0].is_pre_task);
        assert_eq!(outcome.stats.metadata_tasks, 1);
        assert_eq!(outcome.stats.attachments, 1);

        let ids: HashSet<_> = outcome.tasks.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids.len(), outcome.tasks.len());
    }

    #[test]
    fn empty_document_is_still_renamed() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join(format!("Blank {UID_A}.md")), "");

        let outcome = scan(root, &Config::default());
        assert_eq!(rename_dests(&outcome), vec!["Blank.md"]);
        assert_eq!(outcome.stats.errors, 0);
    }
}
