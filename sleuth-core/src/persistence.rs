//! Shared persistence utilities: atomic file writes.
//!
//! Every write goes to a uniquely named temporary file in the target's
//! directory and is then renamed over the target, so readers observe either
//! the previous complete document or the new one.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Atomically write raw bytes to a file.
///
/// Writes and syncs a temporary sibling, then renames it over `path`.
/// The temporary file is removed if any step fails.
/// Creates parent directories if they don't exist.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path_for(path);

    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(data)?;
        file.sync_all()
    });
    if let Err(e) = written {
        cleanup_temp(&tmp);
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&tmp, path) {
        cleanup_temp(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Unique temp name: `<file name>.<pid>.<uuid>.tmp` in the same directory.
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    let tmp_name = format!(
        "{file_name}.{}.{}.tmp",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    path.with_file_name(tmp_name)
}

fn cleanup_temp(tmp: &Path) {
    if tmp.exists() {
        if let Err(e) = std::fs::remove_file(tmp) {
            tracing::warn!(path = %tmp.display(), error = %e, "Failed to clean up temporary file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tmp_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "tmp").unwrap_or(false))
            .collect()
    }

    #[test]
    fn test_atomic_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.json");

        atomic_write(&path, br#"{"name":"hello"}"#).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"name":"hello"}"#);
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("dir").join("test.json");

        atomic_write(&path, b"nested").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_atomic_write_replaces_whole_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("replace.json");

        atomic_write(&path, b"a much longer first payload").unwrap();
        atomic_write(&path, b"short").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "short");
    }

    #[test]
    fn test_atomic_write_no_tmp_leftover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clean.json");

        atomic_write(&path, b"test").unwrap();
        assert!(tmp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_temp_names_are_unique_siblings() {
        let path = Path::new("/data/sessions/abc.json");
        let a = temp_path_for(path);
        let b = temp_path_for(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        assert!(a.to_string_lossy().ends_with(".tmp"));
    }

    #[test]
    fn test_failed_rename_cleans_up_temp() {
        let dir = TempDir::new().unwrap();
        // A directory at the target path makes the rename fail.
        let path = dir.path().join("occupied.json");
        std::fs::create_dir_all(path.join("child")).unwrap();

        assert!(atomic_write(&path, b"data").is_err());
        assert!(tmp_files(dir.path()).is_empty());
    }
}
