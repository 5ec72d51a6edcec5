use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::foundation::error::GpucapResult;

pub fn ensure_parent_dir(path: &Path) -> GpucapResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Write `bytes` to `path` so readers never observe a partial file.
///
/// Data goes to a sibling temp file that is synced and then renamed over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> GpucapResult<()> {
    ensure_parent_dir(path)?;
    let guard = TempFileGuard(partial_path(path));

    let mut file = std::fs::File::create(&guard.0)
        .with_context(|| format!("failed to create '{}'", guard.0.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write '{}'", guard.0.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync '{}'", guard.0.display()))?;
    drop(file);

    std::fs::rename(&guard.0, path).with_context(|| {
        format!(
            "failed to move '{}' into place at '{}'",
            guard.0.display(),
            path.display()
        )
    })?;
    guard.disarm();
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_owned());
    path.with_file_name(format!(".{name}.partial-{}", std::process::id()))
}

/// Removes the temp file unless disarmed.
struct TempFileGuard(PathBuf);

impl TempFileGuard {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gpucap_output_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn write_atomic_creates_parents_and_leaves_no_temp() {
        let dir = scratch_dir("atomic");
        let path = dir.join("nested").join("out.gif");
        write_atomic(&path, b"abc").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");

        write_atomic(&path, b"replaced").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"replaced");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".partial-"))
            .collect();
        assert!(leftovers.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_write_removes_temp_file() {
        let dir = scratch_dir("fail");
        // Target is an existing directory, so the final rename fails.
        let path = dir.join("taken");
        std::fs::create_dir_all(path.join("child")).unwrap();
        assert!(write_atomic(&path, b"x").is_err());
        assert!(!partial_path(&path).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn partial_path_is_hidden_sibling() {
        let p = partial_path(Path::new("/tmp/a/b.gif"));
        assert_eq!(p.parent(), Some(Path::new("/tmp/a")));
        assert!(p.file_name().unwrap().to_string_lossy().starts_with(".b.gif.partial-"));
    }
}
