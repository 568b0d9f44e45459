// src/fs/mock.rs

use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use super::FileSystem;

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir(BTreeSet<String>),
}

/// In-memory tree for tests. Clones share the same tree; `/` always exists.
#[derive(Debug, Clone)]
pub struct MockFileSystem {
    nodes: Arc<Mutex<HashMap<PathBuf, Node>>>,
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFileSystem {
    pub fn new() -> Self {
        let nodes = HashMap::from([(PathBuf::from("/"), Node::Dir(BTreeSet::new()))]);
        Self {
            nodes: Arc::new(Mutex::new(nodes)),
        }
    }

    fn nodes(&self) -> MutexGuard<'_, HashMap<PathBuf, Node>> {
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create or overwrite a file; missing parent directories appear too.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        let mut nodes = self.nodes();
        nodes.insert(path.to_path_buf(), Node::File(content.into()));
        attach(&mut nodes, path);
    }

    /// Raw bytes of a file, if present.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.nodes().get(path.as_ref()) {
            Some(Node::File(content)) => Some(content.clone()),
            _ => None,
        }
    }
}

/// Register `child` with its parent directory, creating ancestors as needed.
fn attach(nodes: &mut HashMap<PathBuf, Node>, child: &Path) {
    let (Some(parent), Some(name)) = (child.parent(), child.file_name()) else {
        return;
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new("/")
    } else {
        parent
    };
    let fresh = !nodes.contains_key(parent);
    if fresh {
        nodes.insert(parent.to_path_buf(), Node::Dir(BTreeSet::new()));
    }
    if let Some(Node::Dir(children)) = nodes.get_mut(parent) {
        children.insert(name.to_string_lossy().into_owned());
    }
    if fresh {
        attach(nodes, parent);
    }
}

impl FileSystem for MockFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        match self.nodes().get(path) {
            Some(Node::File(content)) => Ok(content.clone()),
            Some(Node::Dir(_)) => Err(anyhow!("{} is a directory", path.display())),
            None => Err(anyhow!("{} does not exist", path.display())),
        }
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        String::from_utf8(self.read(path)?)
            .map_err(|e| anyhow!("{} is not UTF-8: {e}", path.display()))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.read(path)?)))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.nodes().contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.nodes().get(path), Some(Node::Dir(_)))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        match self.nodes().get(path) {
            Some(Node::Dir(children)) => Ok(children.iter().map(|name| path.join(name)).collect()),
            _ => Err(anyhow!("{} is not a directory", path.display())),
        }
    }
}
