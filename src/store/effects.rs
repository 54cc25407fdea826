use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Missing,
    File,
    Dir,
}

/// Filesystem side effects the executor is allowed to perform.
///
/// Every method takes `&self`; implementations that keep state use interior
/// mutability, since execution is single-threaded.
pub trait Effects {
    fn kind(&self, path: &Path) -> PathKind;

    /// Move `src` to `dest`. `dest` must not exist.
    fn rename(&self, src: &Path, dest: &Path) -> Result<()>;

    fn copy(&self, src: &Path, dest: &Path) -> Result<()>;

    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> Result<()>;

    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    fn read_text(&self, path: &Path) -> Result<String>;

    /// Replace the whole file content.
    fn write_text(&self, path: &Path, content: &str) -> Result<()>;

    fn exists(&self, path: &Path) -> bool {
        self.kind(path) != PathKind::Missing
    }
}

impl<T: Effects + ?Sized> Effects for &T {
    fn kind(&self, path: &Path) -> PathKind {
        (**self).kind(path)
    }

    fn rename(&self, src: &Path, dest: &Path) -> Result<()> {
        (**self).rename(src, dest)
    }

    fn copy(&self, src: &Path, dest: &Path) -> Result<()> {
        (**self).copy(src, dest)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        (**self).remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        (**self).remove_dir(path)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        (**self).remove_dir_all(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        (**self).create_dir_all(path)
    }

    fn read_text(&self, path: &Path) -> Result<String> {
        (**self).read_text(path)
    }

    fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        (**self).write_text(path, content)
    }
}
