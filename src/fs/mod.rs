// src/fs/mod.rs

//! Filesystem seam.
//!
//! Pid-file checks, hosts-file cleanup and the worker-side file tools go
//! through [`FileSystem`] so they can run against [`mock::MockFileSystem`].

use std::fmt::Debug;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub mod mock;

pub trait FileSystem: Send + Sync + Debug {
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Streaming read, for callers that only need the head of a file.
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    /// Replace the file's contents, creating missing parent directories.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Follows symlinks.
    fn is_dir(&self, path: &Path) -> bool;

    /// Whether `path` itself is a symbolic link.
    fn is_symlink(&self, _path: &Path) -> bool {
        false
    }

    /// Full paths of the directory's entries, sorted.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// `std::fs` on the host.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

fn io_context<'a>(action: &'static str, path: &'a Path) -> impl FnOnce() -> String + 'a {
    move || format!("{action} {}", path.display())
}

impl FileSystem for RealFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(io_context("reading", path))
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(io_context("reading", path))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(path).with_context(io_context("opening", path))?;
        Ok(Box::new(file))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(io_context("creating", parent))?;
        }
        fs::write(path, contents).with_context(io_context("writing", path))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_symlink(&self, path: &Path) -> bool {
        path.is_symlink()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path)
            .with_context(io_context("listing", path))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(io_context("listing", path))?;
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_creates_parents_and_listing_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;
        fs.write(&dir.path().join("b/2.txt"), b"two").unwrap();
        fs.write(&dir.path().join("a.txt"), b"one").unwrap();

        assert_eq!(
            fs.read_dir(dir.path()).unwrap(),
            vec![dir.path().join("a.txt"), dir.path().join("b")]
        );
        assert_eq!(fs.read_to_string(&dir.path().join("b/2.txt")).unwrap(), "two");
        assert!(fs.read(&dir.path().join("missing")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_reported_without_following() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;
        let link = dir.path().join("up");
        std::os::unix::fs::symlink(dir.path(), &link).unwrap();

        assert!(fs.is_symlink(&link));
        assert!(fs.is_dir(&link));
        assert!(!fs.is_symlink(dir.path()));
    }
}
