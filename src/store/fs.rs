use std::fs;
use std::path::Path;

use uuid::Uuid;

use crate::error::{ImportError, Result};
use crate::store::effects::{Effects, PathKind};

/// Effects against the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsEffects;

impl FsEffects {
    pub fn new() -> Self {
        Self
    }
}

impl Effects for FsEffects {
    fn kind(&self, path: &Path) -> PathKind {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => PathKind::Dir,
            Ok(_) => PathKind::File,
            Err(_) => PathKind::Missing,
        }
    }

    fn rename(&self, src: &Path, dest: &Path) -> Result<()> {
        if self.exists(dest) {
            return Err(ImportError::DestinationExists(dest.to_path_buf()));
        }
        fs::rename(src, dest)?;
        Ok(())
    }

    fn copy(&self, src: &Path, dest: &Path) -> Result<()> {
        if self.exists(dest) {
            return Err(ImportError::DestinationExists(dest.to_path_buf()));
        }
        fs::copy(src, dest)?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path)?;
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn read_text(&self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(path)?)
    }

    /// Write to a nonce-named sibling first, then swap it into place.
    fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Err(ImportError::PathNotFound(path.to_path_buf()));
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = parent.join(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));

        fs::write(&staging, content)?;
        if let Err(err) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_text_replaces_content_without_leftovers() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("doc.md");
        fs::write(&file, "old").unwrap();

        FsEffects.write_text(&file, "new").unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "new");
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn rename_refuses_existing_destination() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        let err = FsEffects.rename(&a, &b).unwrap_err();
        assert_eq!(err.code(), "destination_exists");
        assert_eq!(fs::read_to_string(&b).unwrap(), "b");
        assert!(a.exists());
    }

    #[test]
    fn kind_distinguishes_files_and_directories() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "").unwrap();
        assert_eq!(FsEffects.kind(dir.path()), PathKind::Dir);
        assert_eq!(FsEffects.kind(&file), PathKind::File);
        assert_eq!(FsEffects.kind(&dir.path().join("nope")), PathKind::Missing);
    }
}
