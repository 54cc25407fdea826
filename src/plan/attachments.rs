use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::AttachmentStrategy;
use crate::model::{PathMapping, TaskKind};
use crate::plan::naming::{
    decode_reference, document_identifier, encode_reference, extension_of, is_document, to_slash,
};
use crate::plan::scanner::ScanContext;

// `[label](target)` and `![alt](target)`; targets may hold one level of
// balanced parentheses, e.g. `Image%20(1).png`.
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?\[[^\]]*\]\(((?:[^()\n]|\([^()\n]*\))*)\)").unwrap());

static REMOTE_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[A-Za-z][A-Za-z0-9+.\-]*://|mailto:|data:|tel:)").unwrap());

// Link target followed by a quoted title.
static TITLED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(.*?)\s+(?:"[^"]*"|'[^']*')$"#).unwrap());

/// The link target without an optional trailing title or angle brackets.
/// Spaces inside the target are kept.
fn link_target(raw: &str) -> &str {
    let target = TITLED
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or(raw, |m| m.as_str())
        .trim();
    target
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .unwrap_or(target)
}

/// Path mapping plus the move/copy/cleanup task payloads for one document.
/// The flag on each task marks pre-tasks.
#[derive(Debug, Default)]
pub struct AttachmentPlan {
    pub mapping: PathMapping,
    pub tasks: Vec<(TaskKind, bool)>,
    pub attachments: usize,
}

impl AttachmentPlan {
    fn push(&mut self, kind: TaskKind, pre: bool) {
        if matches!(
            kind,
            TaskKind::MoveAttachment { .. } | TaskKind::CopyAttachment { .. }
        ) {
            self.attachments += 1;
        }
        self.tasks.push((kind, pre));
    }
}

/// Every link target in `content` that is not a remote URL or an in-page
/// anchor, in order of first appearance, without duplicates.
pub fn local_references(content: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in LINK.captures_iter(content) {
        let target = link_target(caps.get(1).map_or("", |m| m.as_str()).trim());
        if target.is_empty() || target.starts_with('#') {
            continue;
        }
        if REMOTE_SCHEME.is_match(target) {
            log::trace!("ignoring remote reference {target}");
            continue;
        }
        if !seen.iter().any(|s: &String| s == target) {
            seen.push(target.to_string());
        }
    }
    seen
}

/// The sibling directory whose name carries the document's identifier.
pub fn find_attachment_dir(document: &Path) -> Option<PathBuf> {
    let stem = document.file_stem()?.to_str()?;
    let uid = document_identifier(stem)?;
    let parent = document.parent()?;

    let mut dirs: Vec<PathBuf> = fs::read_dir(parent)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.contains(uid))
        })
        .collect();
    dirs.sort();
    dirs.into_iter().next()
}

/// Plan attachment consolidation for one document whose final stem is `stem`.
pub fn resolve(
    ctx: &mut ScanContext<'_>,
    document: &Path,
    stem: &str,
    content: &str,
) -> AttachmentPlan {
    let attachment_dir = find_attachment_dir(document);
    if let Some(dir) = &attachment_dir {
        log::trace!("attachment directory for {}: {}", document.display(), dir.display());
    }

    let mut plan = AttachmentPlan::default();
    let moved = match ctx.config().attachment_strategy {
        AttachmentStrategy::Reference => {
            resolve_references(ctx, document, stem, content, attachment_dir.as_deref(), &mut plan)
        }
        AttachmentStrategy::Directory => match &attachment_dir {
            Some(dir) => resolve_directory(ctx, document, stem, dir, &mut plan),
            None => 0,
        },
    };

    if let Some(dir) = attachment_dir {
        plan_cleanup(ctx, &dir, moved, &mut plan);
    }

    plan
}

struct Resolved {
    key: String,
    path: PathBuf,
    own: bool,
}

/// Resolve each local reference on its own. Returns how many files were
/// moved out of the document's attachment directory.
fn resolve_references(
    ctx: &mut ScanContext<'_>,
    document: &Path,
    stem: &str,
    content: &str,
    attachment_dir: Option<&Path>,
    plan: &mut AttachmentPlan,
) -> usize {
    let references = local_references(content);
    if references.is_empty() {
        return 0;
    }

    let doc_dir = document.parent().unwrap_or(ctx.root()).to_path_buf();
    let resource_dir = ctx.resource_dir();
    let mut resolved: Vec<Resolved> = Vec::new();

    for reference in references {
        let decoded = decode_reference(&reference).replace('\\', "/");
        let candidates = [doc_dir.join(&decoded), ctx.root().join(&decoded)];
        let Some(path) = candidates.into_iter().find(|p| p.exists()) else {
            ctx.record_issue(format!("attachment not found: {reference}"));
            continue;
        };
        if path.is_dir() {
            log::debug!("reference {reference} is a directory; skipped");
            continue;
        }
        if path.starts_with(&resource_dir) {
            log::trace!("reference {reference} already consolidated");
            continue;
        }
        if is_document(&path) {
            log::trace!("reference {reference} links another document");
            continue;
        }
        let ext = extension_of(&path).unwrap_or_default();
        if !ctx.config().is_supported_extension(&ext) {
            ctx.record_issue(format!(
                "unsupported attachment extension '.{ext}': {reference}"
            ));
            continue;
        }

        // Prefer the canonical escaped form; fall back to the text as written.
        let canonical = encode_reference(&decoded);
        let key = if content.contains(&canonical) {
            canonical
        } else {
            reference.replace('\\', "/")
        };
        let own = attachment_dir.is_some_and(|dir| path.parent() == Some(dir));
        resolved.push(Resolved { key, path, own });
    }

    let distinct: Vec<&PathBuf> = {
        let mut paths: Vec<&PathBuf> = Vec::new();
        for r in &resolved {
            if !paths.contains(&&r.path) {
                paths.push(&r.path);
            }
        }
        paths
    };
    let count = distinct.len();

    let mut assigned: HashMap<PathBuf, String> = HashMap::new();
    let mut moved = 0;
    for r in &resolved {
        if let Some(new_path) = assigned.get(&r.path) {
            plan.mapping.insert(r.key.clone(), new_path.clone());
            continue;
        }

        let seq = distinct.iter().position(|p| **p == r.path).unwrap_or(0) + 1;
        let ext = extension_of(&r.path).unwrap_or_default();
        let base = if count == 1 {
            stem.to_string()
        } else if r.own {
            let original = r.path.file_stem().map(|s| s.to_string_lossy().into_owned());
            format!("{stem}_{}", original.unwrap_or_default())
        } else {
            format!("{stem}_{seq}")
        };

        let dest = ctx.reserve_resource(&base, &ext);
        let new_path = ctx.resource_relative(&dest);
        plan.mapping.insert(r.key.clone(), new_path.clone());
        assigned.insert(r.path.clone(), new_path);

        if r.own {
            moved += 1;
            plan.push(
                TaskKind::MoveAttachment {
                    src: r.path.clone(),
                    dest,
                },
                false,
            );
        } else {
            plan.push(
                TaskKind::CopyAttachment {
                    src: r.path.clone(),
                    dest,
                },
                true,
            );
        }
    }

    moved
}

/// Take every supported file in the attachment directory, numbered in name
/// order. Returns how many files were moved.
fn resolve_directory(
    ctx: &mut ScanContext<'_>,
    document: &Path,
    stem: &str,
    dir: &Path,
    plan: &mut AttachmentPlan,
) -> usize {
    let doc_dir = document.parent().unwrap_or(ctx.root()).to_path_buf();
    let files = match sorted_entries(dir) {
        Ok(entries) => entries.into_iter().filter(|p| p.is_file()).collect::<Vec<_>>(),
        Err(err) => {
            ctx.record_issue(format!("cannot list {}: {err}", dir.display()));
            return 0;
        }
    };

    let mut supported = Vec::new();
    for file in files {
        let ext = extension_of(&file).unwrap_or_default();
        if ctx.config().is_supported_extension(&ext) {
            supported.push((file, ext));
        } else {
            ctx.record_issue(format!(
                "unsupported attachment extension '.{ext}': {}",
                file.display()
            ));
        }
    }

    let count = supported.len();
    for (index, (file, ext)) in supported.iter().enumerate() {
        let base = if count == 1 {
            stem.to_string()
        } else {
            format!("{stem}_{}", index + 1)
        };
        let dest = ctx.reserve_resource(&base, ext);
        let relative = file.strip_prefix(&doc_dir).unwrap_or(file);
        plan.mapping
            .insert(encode_reference(&to_slash(relative)), ctx.resource_relative(&dest));
        plan.push(
            TaskKind::MoveAttachment {
                src: file.clone(),
                dest,
            },
            false,
        );
    }

    count
}

/// Delete the attachment directory when everything in it was moved out,
/// otherwise send it to the trash so unaccounted files survive.
fn plan_cleanup(ctx: &mut ScanContext<'_>, dir: &Path, moved: usize, plan: &mut AttachmentPlan) {
    let entries = match sorted_entries(dir) {
        Ok(entries) => entries.len(),
        Err(err) => {
            ctx.record_issue(format!("cannot list {}: {err}", dir.display()));
            return;
        }
    };
    // Nothing left this directory, so it stays unless it is already empty.
    if moved == 0 && entries > 0 {
        return;
    }

    let trash_to = if moved == entries {
        None
    } else {
        log::info!(
            "{}: {} of {} entries unaccounted for; moving to trash",
            dir.display(),
            entries - moved.min(entries),
            entries
        );
        Some(ctx.reserve_trash(dir))
    };

    plan.push(
        TaskKind::Cleanup {
            target: dir.to_path_buf(),
            trash_to,
        },
        false,
    );
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}
