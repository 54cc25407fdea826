//! Executor: runs planned tasks in order through an [`Effects`] implementation.

pub mod text;

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{ImportError, Result};
use crate::model::{Task, TaskKind, TaskStatus};
use crate::store::effects::{Effects, PathKind};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub done: usize,
    pub failed: usize,
    /// Tasks that were already settled before this run.
    pub skipped: usize,
    #[serde(serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

/// Indices of `tasks` in execution order: pre-tasks, then main tasks, each
/// in generation order.
pub fn execution_order(tasks: &[Task]) -> Vec<usize> {
    let (pre, main): (Vec<usize>, Vec<usize>) =
        (0..tasks.len()).partition(|&index| tasks[index].is_pre_task);
    pre.into_iter().chain(main).collect()
}

pub struct Executor<E: Effects> {
    effects: E,
    stop_on_error: bool,
}

impl<E: Effects> Executor<E> {
    pub fn new(effects: E) -> Self {
        Self {
            effects,
            stop_on_error: false,
        }
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Execute every unsettled task. A failing task is marked and the batch
    /// continues, unless stop-on-error is set.
    pub fn run(&self, tasks: &mut [Task]) -> Result<ExecutionSummary> {
        let started = Instant::now();
        let mut summary = ExecutionSummary::default();

        for index in execution_order(tasks) {
            let task = &mut tasks[index];
            if task.status() != TaskStatus::Todo {
                log::trace!("task {} already {}; skipped", task.id, task.status());
                summary.skipped += 1;
                continue;
            }

            match self.apply(&task.kind) {
                Ok(()) => {
                    log::debug!(
                        "task {} {} done: {}",
                        task.id,
                        task.kind,
                        task.kind.subject().display()
                    );
                    task.mark_done();
                    summary.done += 1;
                }
                Err(err) => {
                    log::error!("task {} {} failed: {err}", task.id, task.kind);
                    let message = err.to_string();
                    task.mark_failed(message.clone());
                    summary.failed += 1;
                    if self.stop_on_error {
                        return Err(ImportError::TaskFailed {
                            id: task.id.clone(),
                            kind: task.kind.label().to_string(),
                            message,
                        });
                    }
                }
            }
        }

        summary.elapsed = started.elapsed();
        log::info!(
            "execution finished: {} done, {} failed, {} skipped",
            summary.done,
            summary.failed,
            summary.skipped
        );
        Ok(summary)
    }

    fn apply(&self, kind: &TaskKind) -> Result<()> {
        let fx = &self.effects;
        match kind {
            TaskKind::RenameDocument { src, dest } | TaskKind::MoveAttachment { src, dest } => {
                self.ensure_parent(dest)?;
                fx.rename(src, dest)
            }
            TaskKind::CopyAttachment { src, dest } => {
                self.ensure_parent(dest)?;
                fx.copy(src, dest)
            }
            TaskKind::UpdateReferences { file, mapping } => {
                let content = fx.read_text(file)?;
                let rewritten = text::rewrite_references(&content, mapping)?;
                if rewritten != content {
                    fx.write_text(file, &rewritten)?;
                }
                Ok(())
            }
            TaskKind::TransformMetadata {
                file,
                change,
                occurrence,
                ..
            } => {
                let content = fx.read_text(file)?;
                let updated = text::apply_metadata_change(&content, change, *occurrence)
                    .ok_or_else(|| ImportError::MetadataLineNotFound {
                        file: file.clone(),
                        line: change.target_line().to_string(),
                    })?;
                fx.write_text(file, &updated)
            }
            TaskKind::InsertContent {
                file,
                key,
                position,
                content: inserted,
            } => {
                let content = fx.read_text(file)?;
                let updated = text::insert_content(&content, key, *position, inserted)
                    .ok_or_else(|| ImportError::AnchorNotFound {
                        file: file.clone(),
                        key: key.clone(),
                    })?;
                fx.write_text(file, &updated)
            }
            TaskKind::Cleanup { target, trash_to } => self.cleanup(target, trash_to.as_deref()),
        }
    }

    fn ensure_parent(&self, path: &Path) -> Result<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !self.effects.exists(parent) => {
                self.effects.create_dir_all(parent)
            }
            _ => Ok(()),
        }
    }

    fn cleanup(&self, target: &Path, trash_to: Option<&Path>) -> Result<()> {
        let fx = &self.effects;
        match (fx.kind(target), trash_to) {
            (PathKind::Missing, _) => Err(ImportError::CleanupTargetMissing(target.to_path_buf())),
            (_, Some(trash)) => {
                self.ensure_parent(trash)?;
                fx.rename(target, trash)
            }
            (PathKind::File, None) => fx.remove_file(target),
            (PathKind::Dir, None) => match fx.remove_dir(target) {
                Ok(()) => Ok(()),
                Err(err) => {
                    log::debug!("{} not empty ({err}); removing recursively", target.display());
                    fx.remove_dir_all(target)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InsertPosition, MetadataChange, PathMapping};
    use crate::store::memory::MemEffects;
    use crate::task_id::TaskId;
    use std::path::PathBuf;

    fn task(n: u64, kind: TaskKind) -> Task {
        Task::new(TaskId::from(n), kind)
    }

    fn pre(n: u64, kind: TaskKind) -> Task {
        Task::pre(TaskId::from(n), kind)
    }

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn pre_tasks_run_before_main_tasks() {
        let tasks = vec![
            task(1, TaskKind::Cleanup { target: p("/a"), trash_to: None }),
            pre(2, TaskKind::Cleanup { target: p("/b"), trash_to: None }),
            task(3, TaskKind::Cleanup { target: p("/c"), trash_to: None }),
            pre(4, TaskKind::Cleanup { target: p("/d"), trash_to: None }),
        ];
        assert_eq!(execution_order(&tasks), vec![1, 3, 0, 2]);
    }

    #[test]
    fn copy_runs_before_the_owner_moves_the_file() {
        let fx = MemEffects::new()
            .with_file("/v/A/pic.png", "png")
            .with_file("/v/B.md", "![p](A/pic.png)");
        let mut tasks = vec![
            task(
                1,
                TaskKind::MoveAttachment {
                    src: p("/v/A/pic.png"),
                    dest: p("/v/Resource/A.png"),
                },
            ),
            pre(
                2,
                TaskKind::CopyAttachment {
                    src: p("/v/A/pic.png"),
                    dest: p("/v/Resource/B.png"),
                },
            ),
        ];

        let summary = Executor::new(&fx).run(&mut tasks).unwrap();
        assert_eq!(summary.done, 2);
        assert_eq!(fx.read(Path::new("/v/Resource/A.png")).as_deref(), Some("png"));
        assert_eq!(fx.read(Path::new("/v/Resource/B.png")).as_deref(), Some("png"));
    }

    #[test]
    fn failures_are_isolated_and_recorded() {
        let fx = MemEffects::new()
            .with_file("/v/a.md", "x")
            .with_file("/v/b.md", "y");
        fx.fail_on("/v/a.md");
        let mut tasks = vec![
            task(1, TaskKind::RenameDocument { src: p("/v/a.md"), dest: p("/v/A.md") }),
            task(2, TaskKind::RenameDocument { src: p("/v/b.md"), dest: p("/v/B.md") }),
        ];

        let summary = Executor::new(&fx).run(&mut tasks).unwrap();
        assert_eq!((summary.done, summary.failed), (1, 1));
        assert_eq!(tasks[0].status(), TaskStatus::Fail);
        assert!(tasks[0].error().unwrap().contains("injected failure"));
        assert_eq!(tasks[1].status(), TaskStatus::Done);
    }

    #[test]
    fn stop_on_error_aborts_remaining_tasks() {
        let fx = MemEffects::new().with_file("/v/b.md", "y");
        let mut tasks = vec![
            task(1, TaskKind::RenameDocument { src: p("/v/missing.md"), dest: p("/v/A.md") }),
            task(2, TaskKind::RenameDocument { src: p("/v/b.md"), dest: p("/v/B.md") }),
        ];

        let err = Executor::new(&fx)
            .stop_on_error(true)
            .run(&mut tasks)
            .unwrap_err();
        assert_eq!(err.code(), "task_failed");
        assert_eq!(tasks[1].status(), TaskStatus::Todo);
        assert!(fx.exists(Path::new("/v/b.md")));
    }

    #[test]
    fn settled_tasks_are_not_retried() {
        let fx = MemEffects::new().with_file("/v/b.md", "y");
        let mut tasks = vec![task(
            1,
            TaskKind::RenameDocument { src: p("/v/b.md"), dest: p("/v/B.md") },
        )];
        let executor = Executor::new(&fx);
        executor.run(&mut tasks).unwrap();
        let again = executor.run(&mut tasks).unwrap();
        assert_eq!((again.done, again.skipped), (0, 1));
    }

    #[test]
    fn text_tasks_rewrite_the_live_file() {
        let fx = MemEffects::new()
            .with_file("/v/d.md", "Status: Done\nOwner: Ann\n\n![i](Old%20Dir/i.png)\n");
        let mut mapping = PathMapping::new();
        mapping.insert("Old%20Dir/i.png", "Resource/d i.png");
        let mut tasks = vec![
            pre(
                1,
                TaskKind::InsertContent {
                    file: p("/v/d.md"),
                    key: "Owner".into(),
                    position: InsertPosition::After,
                    content: "reviewed: false".into(),
                },
            ),
            task(
                2,
                TaskKind::TransformMetadata {
                    file: p("/v/d.md"),
                    key: "Status".into(),
                    change: MetadataChange::Replace {
                        old_line: "Status: Done".into(),
                        new_line: "state: finished".into(),
                    },
                    occurrence: 0,
                },
            ),
            task(3, TaskKind::UpdateReferences { file: p("/v/d.md"), mapping }),
        ];

        Executor::new(&fx).run(&mut tasks).unwrap();
        assert_eq!(
            fx.read(Path::new("/v/d.md")).unwrap(),
            "state: finished\nOwner: Ann\nreviewed: false\n\n![i](Resource/d%20i.png)\n"
        );
    }

    #[test]
    fn missing_metadata_line_fails_the_task() {
        let fx = MemEffects::new().with_file("/v/d.md", "Other: 1\n");
        let mut tasks = vec![task(
            1,
            TaskKind::TransformMetadata {
                file: p("/v/d.md"),
                key: "Status".into(),
                change: MetadataChange::Delete { line: "Status: x".into() },
                occurrence: 0,
            },
        )];
        let summary = Executor::new(&fx).run(&mut tasks).unwrap();
        assert_eq!(summary.failed, 1);
        assert!(tasks[0].error().unwrap().contains("Status: x"));
    }

    #[test]
    fn cleanup_deletes_or_trashes() {
        let fx = MemEffects::new()
            .with_dir("/v/empty")
            .with_file("/v/full/left.txt", "t");
        let mut tasks = vec![
            task(1, TaskKind::Cleanup { target: p("/v/empty"), trash_to: None }),
            task(
                2,
                TaskKind::Cleanup {
                    target: p("/v/full"),
                    trash_to: Some(p("/v/Trash/full")),
                },
            ),
            task(3, TaskKind::Cleanup { target: p("/v/gone"), trash_to: None }),
        ];

        let summary = Executor::new(&fx).run(&mut tasks).unwrap();
        assert_eq!((summary.done, summary.failed), (2, 1));
        assert!(!fx.exists(Path::new("/v/empty")));
        assert_eq!(
            fx.read(Path::new("/v/Trash/full/left.txt")).as_deref(),
            Some("t")
        );
        assert!(tasks[2].error().unwrap().contains("does not exist"));
    }
}
