use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;

pub const DOCUMENT_EXTENSION: &str = "md";

static IDENTIFIER_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" ([0-9a-fA-F]{32})$").unwrap());

/// The 32-hex identifier trailing a document stem, if any.
pub fn document_identifier(stem: &str) -> Option<&str> {
    IDENTIFIER_SUFFIX
        .captures(stem)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Drop a trailing `" <32 hex>"` from a stem, leaving the rest verbatim.
pub fn strip_identifier(stem: &str) -> &str {
    match IDENTIFIER_SUFFIX.find(stem) {
        Some(m) => &stem[..m.start()],
        None => stem,
    }
}

pub fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
}

/// Lowercased extension with no leading dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Relative path rendered with forward slashes.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-encode each segment of a slash-separated path, keeping the slashes.
pub fn encode_reference(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-decode a link target; targets that are not valid escapes stay as written.
pub fn decode_reference(reference: &str) -> String {
    urlencoding::decode(reference)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| reference.to_string())
}

/// First of `base`, `base_1`, `base_2`, ... for which `taken` is false,
/// with `ext` (no dot, may be empty) appended. Also returns how many
/// candidates were rejected.
pub fn unique_name<F>(base: &str, ext: &str, mut taken: F) -> (String, usize)
where
    F: FnMut(&str) -> bool,
{
    let render = |stem: &str| {
        if ext.is_empty() {
            stem.to_string()
        } else {
            format!("{stem}.{ext}")
        }
    };

    let mut candidate = render(base);
    let mut counter = 1;
    while taken(&candidate) {
        candidate = render(&format!("{base}_{counter}"));
        counter += 1;
    }
    (candidate, counter - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    const UID: &str = "0123456789abcdef0123456789ABCDEF";

    #[test]
    fn strip_identifier_keeps_name_verbatim() {
        let stem = format!("Meeting notes  (draft) {UID}");
        assert_eq!(strip_identifier(&stem), "Meeting notes  (draft)");
        assert_eq!(document_identifier(&stem), Some(UID));
    }

    #[test]
    fn strip_identifier_ignores_short_or_unspaced_suffixes() {
        assert_eq!(strip_identifier("Plain"), "Plain");
        assert_eq!(strip_identifier("abc 0123"), "abc 0123");
        let glued = format!("abc{UID}");
        assert_eq!(strip_identifier(&glued), glued);
        assert_eq!(document_identifier("Plain"), None);
    }

    #[test]
    fn encode_reference_keeps_slashes() {
        assert_eq!(
            encode_reference("Resource Old/my img.png"),
            "Resource%20Old/my%20img.png"
        );
        assert_eq!(decode_reference("Resource%20Old/img.png"), "Resource Old/img.png");
        assert_eq!(decode_reference("bad%ZZ"), "bad%ZZ");
    }

    #[test]
    fn to_slash_joins_components() {
        let path: PathBuf = ["Resource", "a b.png"].iter().collect();
        assert_eq!(to_slash(&path), "Resource/a b.png");
    }

    #[test]
    fn unique_name_counts_up_until_free() {
        let used: HashSet<&str> = ["doc.png", "doc_1.png"].into_iter().collect();
        let (name, rejected) = unique_name("doc", "png", |c| used.contains(c));
        assert_eq!(name, "doc_2.png");
        assert_eq!(rejected, 2);

        let (name, rejected) = unique_name("fresh", "", |_| false);
        assert_eq!(name, "fresh");
        assert_eq!(rejected, 0);
    }

    #[test]
    fn document_extension_is_case_insensitive() {
        assert!(is_document(Path::new("a/b.md")));
        assert!(is_document(Path::new("B.MD")));
        assert!(!is_document(Path::new("b.markdown")));
        assert_eq!(extension_of(Path::new("x.JPG")), Some("jpg".into()));
    }
}
