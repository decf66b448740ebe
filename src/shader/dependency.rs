//! Shader Source Freshness
//!
//! [`ShaderDependency`] is one source file's freshness signal: its last
//! modification time, stat'ed on first use and memoized for the process
//! lifetime. The memo keeps repeated loads of the same source from hitting
//! the filesystem once per shader permutation; [`refresh`] drops it for
//! live-editing loops that need a fresh stat per load.
//!
//! Only the top-level source file is watched, not its transitive includes.
//!
//! [`refresh`]: ShaderDependency::refresh

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Freshness stamp for one absolute source path.
#[derive(Debug)]
pub struct ShaderDependency {
    path: PathBuf,
    last_write_time: Option<SystemTime>,
}

impl ShaderDependency {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        debug_assert!(path.is_absolute(), "dependency paths must be absolute");
        Self {
            path,
            last_write_time: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The source's last modification time, memoized after the first query.
    /// A missing or unreadable file reads as `UNIX_EPOCH`, which makes any
    /// existing cache artifact count as fresh.
    pub fn last_write_time(&mut self) -> SystemTime {
        if let Some(stamp) = self.last_write_time {
            return stamp;
        }
        let stamp = Self::stat(&self.path);
        self.last_write_time = Some(stamp);
        stamp
    }

    /// Drops the memoized stamp so the next query re-stats the file.
    pub fn refresh(&mut self) {
        self.last_write_time = None;
    }

    fn stat(path: &Path) -> SystemTime {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("talos_dep_{}_{name}", std::process::id()));
        let mut file = fs::File::create(&path).expect("create temp file");
        file.write_all(b"void main() {}").expect("write temp file");
        path
    }

    #[test]
    fn test_memoizes_first_stat() {
        let path = temp_file("memo");
        let mut dep = ShaderDependency::new(path.clone());
        let first = dep.last_write_time();
        assert_ne!(first, SystemTime::UNIX_EPOCH);

        // Deleting the file does not change the memoized answer.
        fs::remove_file(&path).unwrap();
        assert_eq!(dep.last_write_time(), first);

        // A refresh does.
        dep.refresh();
        assert_eq!(dep.last_write_time(), SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn test_missing_file_reads_as_epoch() {
        let mut dep = ShaderDependency::new(std::env::temp_dir().join("talos_dep_missing"));
        assert_eq!(dep.last_write_time(), SystemTime::UNIX_EPOCH);
    }
}
