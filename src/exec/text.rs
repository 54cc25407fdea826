//! Pure text rewrites applied to document content during execution.

use regex::{Captures, Regex};

use crate::error::{ImportError, Result};
use crate::model::{InsertPosition, MetadataChange, PathMapping};
use crate::plan::naming::encode_reference;

fn split_ending(segment: &str) -> (&str, &str) {
    if let Some(body) = segment.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = segment.strip_suffix('\n') {
        (body, "\n")
    } else {
        (segment, "")
    }
}

/// Replace every mapped old reference with its percent-encoded new path.
///
/// Keys are matched in a single pass, longest first, so replaced text is
/// never matched again and a key contained in another cannot split it.
pub fn rewrite_references(content: &str, mapping: &PathMapping) -> Result<String> {
    if mapping.is_empty() {
        return Ok(content.to_string());
    }
    let alternation = mapping
        .longest_first()
        .into_iter()
        .map(|(old, _)| regex::escape(old))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = Regex::new(&alternation).map_err(|source| ImportError::InvalidRegex {
        key: "references".to_string(),
        pattern: alternation.clone(),
        source,
    })?;

    let rewritten = pattern.replace_all(content, |caps: &Captures| {
        let old = &caps[0];
        mapping
            .get(old)
            .map(encode_reference)
            .unwrap_or_else(|| old.to_string())
    });
    Ok(rewritten.into_owned())
}

/// Replace or drop the `occurrence`-th (0-based) line whose trimmed text
/// equals the change's target line. `None` if there is no such line.
pub fn apply_metadata_change(
    content: &str,
    change: &MetadataChange,
    occurrence: usize,
) -> Option<String> {
    let target = change.target_line();
    let mut segments: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();
    let index = segments
        .iter()
        .enumerate()
        .filter(|(_, segment)| split_ending(segment).0.trim() == target)
        .nth(occurrence)
        .map(|(index, _)| index)?;

    match change {
        MetadataChange::Replace { new_line, .. } => {
            let ending = split_ending(&segments[index]).1.to_string();
            segments[index] = format!("{new_line}{ending}");
        }
        MetadataChange::Delete { .. } => {
            segments.remove(index);
        }
    }
    Some(segments.concat())
}

/// Index of the first line whose key (text before the first `:`) equals `key`.
pub fn anchor_line(content: &str, key: &str) -> Option<usize> {
    content.split_inclusive('\n').position(|segment| {
        split_ending(segment)
            .0
            .split_once(':')
            .is_some_and(|(line_key, _)| line_key.trim() == key)
    })
}

/// Splice `inserted` as its own line before or after the anchor line.
/// `None` if no line carries the anchor key.
pub fn insert_content(
    content: &str,
    key: &str,
    position: InsertPosition,
    inserted: &str,
) -> Option<String> {
    let index = anchor_line(content, key)?;
    let mut segments: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();
    let ending = match split_ending(&segments[index]).1 {
        "" => "\n".to_string(),
        ending => ending.to_string(),
    };

    match position {
        InsertPosition::Before => {
            segments.insert(index, format!("{inserted}{ending}"));
        }
        InsertPosition::After => {
            if split_ending(&segments[index]).1.is_empty() {
                segments[index].push_str(&ending);
                segments.insert(index + 1, inserted.to_string());
            } else {
                segments.insert(index + 1, format!("{inserted}{ending}"));
            }
        }
    }
    Some(segments.concat())
}
