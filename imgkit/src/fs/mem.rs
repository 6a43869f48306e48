use super::{clean, not_found, FileInfo, FileKind, FileSystem};
use crate::error::*;
use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, mode: u32 },
    Dir { entries: BTreeMap<String, Node>, mode: u32 },
    Symlink { target: PathBuf },
    CharDevice { rdev: u64 },
    /// Hides the same path of a lower layer in [super::OverlayFs]
    Mask,
}

impl Node {
    fn dir() -> Self {
        Node::Dir {
            entries: BTreeMap::new(),
            mode: 0o755,
        }
    }

    fn info(&self, name: &str) -> FileInfo {
        let (kind, size, mode) = match self {
            Node::File { data, mode } => (FileKind::File, data.len() as u64, *mode),
            Node::Dir { mode, .. } => (FileKind::Dir, 0, *mode),
            Node::Symlink { target } => (
                FileKind::Symlink,
                target.as_os_str().len() as u64,
                0o777,
            ),
            Node::CharDevice { rdev } => (FileKind::CharDevice { rdev: *rdev }, 0, 0o644),
            Node::Mask => (FileKind::Other, 0, 0),
        };
        FileInfo {
            name: name.to_string(),
            kind,
            size,
            mode,
        }
    }
}

/// In-memory file tree
///
/// Used for the virtual side of overlays and for layers unpacked from tar archives.
/// Parent directories are created on insertion.
#[derive(Debug, Clone)]
pub struct MemFs {
    root: Node,
    xattrs: BTreeMap<PathBuf, BTreeMap<String, Vec<u8>>>,
}

impl Default for MemFs {
    fn default() -> Self {
        MemFs {
            root: Node::dir(),
            xattrs: BTreeMap::new(),
        }
    }
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
        self.add_file_with_mode(path, data, 0o644)
    }

    pub fn add_file_with_mode(
        &mut self,
        path: impl AsRef<Path>,
        data: &[u8],
        mode: u32,
    ) -> Result<()> {
        self.insert(
            path.as_ref(),
            Node::File {
                data: data.to_vec(),
                mode,
            },
        )
    }

    /// Create a directory, keeping its entries when it already exists
    pub fn add_dir(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = clean(path.as_ref());
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        let (parent, name) = self.parent_mut(&path)?;
        parent.entry(name).or_insert_with(Node::dir);
        Ok(())
    }

    pub fn add_symlink(&mut self, path: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<()> {
        self.insert(
            path.as_ref(),
            Node::Symlink {
                target: target.as_ref().to_path_buf(),
            },
        )
    }

    pub fn add_char_device(&mut self, path: impl AsRef<Path>, rdev: u64) -> Result<()> {
        self.insert(path.as_ref(), Node::CharDevice { rdev })
    }

    /// Hide `path` of the lower layer when used as the upper side of an overlay
    pub fn add_mask(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.insert(path.as_ref(), Node::Mask)
    }

    pub fn set_xattr(&mut self, path: impl AsRef<Path>, name: &str, value: &[u8]) -> Result<()> {
        let path = clean(path.as_ref());
        self.node(&path)?;
        self.xattrs
            .entry(path)
            .or_default()
            .insert(name.to_string(), value.to_vec());
        Ok(())
    }

    /// `true` when `path` or one of its ancestors is a mask
    pub fn is_masked(&self, path: &Path) -> bool {
        let mut node = &self.root;
        for name in clean(path).iter() {
            match node {
                Node::Dir { entries, .. } => match entries.get(&*name.to_string_lossy()) {
                    Some(Node::Mask) => return true,
                    Some(child) => node = child,
                    None => return false,
                },
                _ => return false,
            }
        }
        false
    }

    /// `true` when a non-mask entry exists at `path`
    pub fn contains(&self, path: &Path) -> bool {
        self.node(&clean(path)).is_ok()
    }

    /// Masked names directly below the directory `path`
    pub fn masks_in(&self, path: &Path) -> Vec<String> {
        match self.lookup(&clean(path)) {
            Some(Node::Dir { entries, .. }) => entries
                .iter()
                .filter(|(_, node)| matches!(node, Node::Mask))
                .map(|(name, _)| name.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn insert(&mut self, path: &Path, node: Node) -> Result<()> {
        let path = clean(path);
        if path.as_os_str().is_empty() {
            return Err(Error::Unsupported("replacing the root directory".to_string()));
        }
        let (parent, name) = self.parent_mut(&path)?;
        parent.insert(name, node);
        Ok(())
    }

    /// Entries of the parent directory of `path`, creating missing directories
    fn parent_mut(&mut self, path: &Path) -> Result<(&mut BTreeMap<String, Node>, String)> {
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => return Err(not_found(path)),
        };
        let mut node = &mut self.root;
        for component in path.parent().into_iter().flat_map(Path::iter) {
            let entries = match node {
                Node::Dir { entries, .. } => entries,
                _ => {
                    return Err(Error::invalid_field(
                        "path",
                        format!("{} is not a directory", path.display()),
                    ))
                }
            };
            let child = entries
                .entry(component.to_string_lossy().to_string())
                .or_insert_with(Node::dir);
            if matches!(child, Node::Mask) {
                *child = Node::dir();
            }
            node = child;
        }
        match node {
            Node::Dir { entries, .. } => Ok((entries, name)),
            _ => Err(Error::invalid_field(
                "path",
                format!("{} is not a directory", path.display()),
            )),
        }
    }

    fn lookup(&self, path: &Path) -> Option<&Node> {
        let mut node = &self.root;
        for name in path.iter() {
            node = match node {
                Node::Dir { entries, .. } => entries.get(&*name.to_string_lossy())?,
                _ => return None,
            };
        }
        Some(node)
    }

    fn node(&self, path: &Path) -> Result<&Node> {
        match self.lookup(path) {
            Some(Node::Mask) | None => Err(not_found(path)),
            Some(node) => Ok(node),
        }
    }
}

impl FileSystem for MemFs {
    fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = clean(path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(self.node(&path)?.info(&name))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let path = clean(path);
        match self.node(&path)? {
            Node::File { data, .. } => Ok(Box::new(Cursor::new(data.clone()))),
            _ => Err(Error::Unsupported(format!(
                "{} is not a regular file",
                path.display()
            ))),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<FileInfo>> {
        let path = clean(path);
        match self.node(&path)? {
            Node::Dir { entries, .. } => Ok(entries
                .iter()
                .filter(|(_, node)| !matches!(node, Node::Mask))
                .map(|(name, node)| node.info(name))
                .collect()),
            _ => Err(Error::Unsupported(format!(
                "{} is not a directory",
                path.display()
            ))),
        }
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        let path = clean(path);
        match self.node(&path)? {
            Node::Symlink { target } => Ok(target.clone()),
            _ => Err(Error::Unsupported(format!(
                "{} is not a symbolic link",
                path.display()
            ))),
        }
    }

    fn xattr(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        let path = clean(path);
        self.node(&path)?;
        Ok(self
            .xattrs
            .get(&path)
            .and_then(|attrs| attrs.get(name))
            .cloned())
    }
}
