use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{ImportError, Result};
use crate::store::effects::{Effects, PathKind};

/// In-memory file tree for exercising the executor without touching disk.
///
/// `RefCell` is enough here: execution never shares effects across threads.
#[derive(Debug, Default)]
pub struct MemEffects {
    files: RefCell<BTreeMap<PathBuf, String>>,
    dirs: RefCell<BTreeSet<PathBuf>>,
    failing: RefCell<BTreeSet<PathBuf>>,
}

impl MemEffects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, creating its parent directories.
    pub fn with_file(self, path: impl Into<PathBuf>, content: &str) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            self.add_dirs(parent);
        }
        self.files.borrow_mut().insert(path, content.to_string());
        self
    }

    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        self.add_dirs(&path.into());
        self
    }

    /// Any operation that touches `path` fails from now on.
    pub fn fail_on(&self, path: impl Into<PathBuf>) {
        self.failing.borrow_mut().insert(path.into());
    }

    pub fn read(&self, path: &Path) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.files.borrow().keys().cloned().collect()
    }

    fn add_dirs(&self, path: &Path) {
        let mut dirs = self.dirs.borrow_mut();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            dirs.insert(ancestor.to_path_buf());
        }
    }

    fn check(&self, paths: &[&Path]) -> Result<()> {
        let failing = self.failing.borrow();
        match paths.iter().find(|p| failing.contains(**p)) {
            Some(path) => Err(ImportError::Io(io::Error::other(format!(
                "injected failure on {}",
                path.display()
            )))),
            None => Ok(()),
        }
    }

    fn missing(path: &Path) -> ImportError {
        ImportError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        ))
    }

    fn has_children(&self, path: &Path) -> bool {
        let files = self.files.borrow();
        let dirs = self.dirs.borrow();
        files.keys().any(|f| f.parent() == Some(path))
            || dirs.iter().any(|d| d.parent() == Some(path))
    }
}

impl Effects for MemEffects {
    fn kind(&self, path: &Path) -> PathKind {
        if self.files.borrow().contains_key(path) {
            PathKind::File
        } else if self.dirs.borrow().contains(path) {
            PathKind::Dir
        } else {
            PathKind::Missing
        }
    }

    fn rename(&self, src: &Path, dest: &Path) -> Result<()> {
        self.check(&[src, dest])?;
        if self.exists(dest) {
            return Err(ImportError::DestinationExists(dest.to_path_buf()));
        }
        match self.kind(src) {
            PathKind::Missing => Err(Self::missing(src)),
            PathKind::File => {
                let content = self.files.borrow_mut().remove(src).unwrap_or_default();
                self.files.borrow_mut().insert(dest.to_path_buf(), content);
                Ok(())
            }
            PathKind::Dir => {
                let mut files = self.files.borrow_mut();
                let moved: Vec<PathBuf> =
                    files.keys().filter(|p| p.starts_with(src)).cloned().collect();
                for old in moved {
                    if let (Some(content), Ok(rest)) = (files.remove(&old), old.strip_prefix(src)) {
                        files.insert(dest.join(rest), content);
                    }
                }
                let mut dirs = self.dirs.borrow_mut();
                let moved: Vec<PathBuf> =
                    dirs.iter().filter(|p| p.starts_with(src)).cloned().collect();
                for old in moved {
                    dirs.remove(&old);
                    if let Ok(rest) = old.strip_prefix(src) {
                        dirs.insert(dest.join(rest));
                    }
                }
                Ok(())
            }
        }
    }

    fn copy(&self, src: &Path, dest: &Path) -> Result<()> {
        self.check(&[src, dest])?;
        if self.exists(dest) {
            return Err(ImportError::DestinationExists(dest.to_path_buf()));
        }
        let content = self.read(src).ok_or_else(|| Self::missing(src))?;
        self.files.borrow_mut().insert(dest.to_path_buf(), content);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.check(&[path])?;
        self.files
            .borrow_mut()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Self::missing(path))
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        self.check(&[path])?;
        if self.has_children(path) {
            return Err(ImportError::Io(io::Error::other(format!(
                "{} is not empty",
                path.display()
            ))));
        }
        if self.dirs.borrow_mut().remove(path) {
            Ok(())
        } else {
            Err(Self::missing(path))
        }
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.check(&[path])?;
        if !self.dirs.borrow().contains(path) {
            return Err(Self::missing(path));
        }
        self.files.borrow_mut().retain(|p, _| !p.starts_with(path));
        self.dirs.borrow_mut().retain(|p| !p.starts_with(path));
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.check(&[path])?;
        self.add_dirs(path);
        Ok(())
    }

    fn read_text(&self, path: &Path) -> Result<String> {
        self.check(&[path])?;
        self.read(path).ok_or_else(|| Self::missing(path))
    }

    fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        self.check(&[path])?;
        self.files
            .borrow_mut()
            .insert(path.to_path_buf(), content.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_directory_moves_its_contents() {
        let fx = MemEffects::new().with_file("/v/a/x.png", "x");
        fx.rename(Path::new("/v/a"), Path::new("/v/t/a")).unwrap();
        assert_eq!(fx.read(Path::new("/v/t/a/x.png")).as_deref(), Some("x"));
        assert_eq!(fx.kind(Path::new("/v/a")), PathKind::Missing);
    }

    #[test]
    fn remove_dir_requires_empty_directory() {
        let fx = MemEffects::new().with_file("/v/a/x.png", "x");
        assert!(fx.remove_dir(Path::new("/v/a")).is_err());
        fx.remove_dir_all(Path::new("/v/a")).unwrap();
        assert!(!fx.exists(Path::new("/v/a/x.png")));
    }

    #[test]
    fn injected_failures_surface_as_io_errors() {
        let fx = MemEffects::new().with_file("/v/doc.md", "text");
        fx.fail_on("/v/doc.md");
        let err = fx.read_text(Path::new("/v/doc.md")).unwrap_err();
        assert_eq!(err.code(), "io_error");
    }
}
