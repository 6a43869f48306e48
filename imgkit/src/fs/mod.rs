//! Read-only filesystem views over layer contents
//!
//! All paths are relative to the root of the view. A leading `/` and `.` components
//! are ignored, and `..` never climbs above the root.

mod dir;
mod mem;
mod overlay;
mod whiteout;

pub use dir::DirFs;
pub use mem::MemFs;
pub use overlay::OverlayFs;
pub use whiteout::{WhiteoutFs, OPAQUE_MARKER, OPAQUE_XATTRS, WHITEOUT_PREFIX};

use crate::{error::*, Context};
use std::{
    io::Read,
    path::{Component, Path, PathBuf},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    CharDevice { rdev: u64 },
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Base name, empty for the root
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    /// Permission bits
    pub mode: u32,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }
}

pub trait FileSystem: Send + Sync {
    /// Metadata of the entry itself, symbolic links are not followed
    fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Contents of a regular file
    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    /// Entries of a directory sorted by name
    fn read_dir(&self, path: &Path) -> Result<Vec<FileInfo>>;

    fn read_link(&self, path: &Path) -> Result<PathBuf>;

    /// Extended attribute of the entry, `None` when unset or unsupported
    fn xattr(&self, _path: &Path, _name: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Read a whole regular file
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open(path)?
            .read_to_end(&mut buf)
            .map_err(|e| Error::path(path, e))?;
        Ok(buf)
    }
}

impl<T: FileSystem + ?Sized> FileSystem for &T {
    fn stat(&self, path: &Path) -> Result<FileInfo> {
        (**self).stat(path)
    }
    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        (**self).open(path)
    }
    fn read_dir(&self, path: &Path) -> Result<Vec<FileInfo>> {
        (**self).read_dir(path)
    }
    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        (**self).read_link(path)
    }
    fn xattr(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        (**self).xattr(path, name)
    }
}

impl<T: FileSystem + ?Sized> FileSystem for Box<T> {
    fn stat(&self, path: &Path) -> Result<FileInfo> {
        (**self).stat(path)
    }
    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        (**self).open(path)
    }
    fn read_dir(&self, path: &Path) -> Result<Vec<FileInfo>> {
        (**self).read_dir(path)
    }
    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        (**self).read_link(path)
    }
    fn xattr(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        (**self).xattr(path, name)
    }
}

/// Normalize a path into root-relative form
pub fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => cleaned.push(name),
            Component::ParentDir => {
                cleaned.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    cleaned
}

pub(crate) fn not_found(path: &Path) -> Error {
    Error::NotFound(format!("{}", Path::new("/").join(path).display()))
}

/// Every entry below the root, depth first in name order
///
/// Cancellation is checked between entries.
pub fn walk(ctx: &Context, fs: &dyn FileSystem) -> Result<Vec<(PathBuf, FileInfo)>> {
    let mut entries = Vec::new();
    walk_dir(ctx, fs, Path::new(""), &mut entries)?;
    Ok(entries)
}

fn walk_dir(
    ctx: &Context,
    fs: &dyn FileSystem,
    dir: &Path,
    entries: &mut Vec<(PathBuf, FileInfo)>,
) -> Result<()> {
    for info in fs.read_dir(dir)? {
        ctx.check()?;
        let path = dir.join(&info.name);
        let is_dir = info.is_dir();
        entries.push((path.clone(), info));
        if is_dir {
            walk_dir(ctx, fs, &path, entries)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_paths() {
        assert_eq!(clean(Path::new("/etc/passwd")), PathBuf::from("etc/passwd"));
        assert_eq!(clean(Path::new("./a/./b")), PathBuf::from("a/b"));
        assert_eq!(clean(Path::new("../../a/../b")), PathBuf::from("b"));
        assert_eq!(clean(Path::new("/")), PathBuf::new());
    }

    #[test]
    fn walk_sorted() -> Result<()> {
        let mut fs = MemFs::new();
        fs.add_file("b/y", b"y")?;
        fs.add_file("a", b"a")?;
        fs.add_file("b/x", b"x")?;
        let paths: Vec<_> = walk(&Context::new(), &fs)?
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("a"),
                PathBuf::from("b"),
                PathBuf::from("b/x"),
                PathBuf::from("b/y")
            ]
        );
        Ok(())
    }

    #[test]
    fn walk_cancelled() -> Result<()> {
        let mut fs = MemFs::new();
        fs.add_file("a", b"a")?;
        let ctx = Context::new();
        ctx.cancel();
        assert!(matches!(walk(&ctx, &fs), Err(Error::Cancelled)));
        Ok(())
    }
}
