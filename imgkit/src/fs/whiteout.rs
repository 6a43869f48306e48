use super::{clean, FileInfo, FileKind, FileSystem, MemFs, OverlayFs};
use crate::error::*;
use std::{
    io::Read,
    path::{Path, PathBuf},
};

/// Prefix of the file marking a path deleted from lower layers
pub const WHITEOUT_PREFIX: &str = ".wh.";
/// Marker file hiding every lower entry of its directory
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";
/// Extended attributes marking an overlay directory opaque
pub const OPAQUE_XATTRS: [&str; 2] = ["trusted.overlay.opaque", "user.overlay.opaque"];

/// Layer diff of the overlay filesystem, as it would appear in a layer tarball
///
/// The kernel records deletions as character devices with device number 0 and opaque
/// directories as an extended attribute. This view replaces the former with an empty
/// `.wh.<name>` file and adds a `.wh..wh..opq` file into the latter.
#[derive(Debug, Clone)]
pub struct WhiteoutFs<L> {
    lower: L,
}

impl<L: FileSystem> WhiteoutFs<L> {
    pub fn new(lower: L) -> Self {
        WhiteoutFs { lower }
    }

    /// Virtual entries of the directory `dir` laid over the lower filesystem
    fn overlay(&self, dir: &Path) -> Result<OverlayFs<&L>> {
        let mut upper = MemFs::new();
        let entries = match self.lower.read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(OverlayFs::new(upper, &self.lower)),
            Err(e) => return Err(e),
        };
        for info in &entries {
            if info.kind == (FileKind::CharDevice { rdev: 0 }) {
                upper.add_mask(dir.join(&info.name))?;
                upper.add_file(dir.join(format!("{}{}", WHITEOUT_PREFIX, info.name)), &[])?;
            }
        }
        if !entries.iter().any(|info| info.name == OPAQUE_MARKER) && self.is_opaque(dir)? {
            upper.add_file(dir.join(OPAQUE_MARKER), &[])?;
        }
        Ok(OverlayFs::new(upper, &self.lower))
    }

    fn is_opaque(&self, dir: &Path) -> Result<bool> {
        for name in OPAQUE_XATTRS {
            if self.lower.xattr(dir, name)?.as_deref() == Some(b"y".as_slice()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Overlay of the parent directory, or `None` for the root itself
    fn parent_overlay(&self, path: &Path) -> Result<Option<OverlayFs<&L>>> {
        let path = clean(path);
        match path.parent() {
            Some(parent) => Ok(Some(self.overlay(parent)?)),
            None => Ok(None),
        }
    }
}

impl<L: FileSystem> FileSystem for WhiteoutFs<L> {
    fn stat(&self, path: &Path) -> Result<FileInfo> {
        match self.parent_overlay(path)? {
            Some(overlay) => overlay.stat(path),
            None => self.lower.stat(path),
        }
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        match self.parent_overlay(path)? {
            Some(overlay) => overlay.open(path),
            None => self.lower.open(path),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<FileInfo>> {
        let path = clean(path);
        if let Some(overlay) = self.parent_overlay(&path)? {
            if !overlay.stat(&path)?.is_dir() {
                return Err(Error::Unsupported(format!(
                    "{} is not a directory",
                    path.display()
                )));
            }
        }
        self.overlay(&path)?.read_dir(&path)
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        match self.parent_overlay(path)? {
            Some(overlay) => overlay.read_link(path),
            None => self.lower.read_link(path),
        }
    }

    fn xattr(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        match self.parent_overlay(path)? {
            Some(overlay) => overlay.xattr(path, name),
            None => self.lower.xattr(path, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fs::walk, Context};

    fn diff() -> Result<MemFs> {
        let mut lower = MemFs::new();
        lower.add_file("etc/hostname", b"box")?;
        lower.add_char_device("etc/passwd", 0)?;
        lower.add_char_device("dev/tty", 0x500)?;
        lower.add_dir("var/cache")?;
        lower.set_xattr("var/cache", "trusted.overlay.opaque", b"y")?;
        lower.add_file("var/cache/new", b"")?;
        lower.add_dir("srv")?;
        lower.set_xattr("srv", "user.overlay.opaque", b"y")?;
        lower.add_file(format!("srv/{}", OPAQUE_MARKER), b"")?;
        Ok(lower)
    }

    #[test]
    fn whiteouts_become_files() -> Result<()> {
        let fs = WhiteoutFs::new(diff()?);
        let paths: Vec<_> = walk(&Context::new(), &fs)?
            .into_iter()
            .map(|(path, _)| path.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "dev",
                "dev/tty",
                "etc",
                "etc/.wh.passwd",
                "etc/hostname",
                "srv",
                "srv/.wh..wh..opq",
                "var",
                "var/cache",
                "var/cache/.wh..wh..opq",
                "var/cache/new",
            ]
        );

        let whiteout = fs.stat(Path::new("etc/.wh.passwd"))?;
        assert_eq!(whiteout.kind, FileKind::File);
        assert_eq!(whiteout.size, 0);
        assert!(fs.read(Path::new("/etc/.wh.passwd"))?.is_empty());
        assert!(fs.stat(Path::new("etc/passwd")).unwrap_err().is_not_found());
        assert_eq!(
            fs.stat(Path::new("dev/tty"))?.kind,
            FileKind::CharDevice { rdev: 0x500 }
        );
        assert_eq!(fs.read(Path::new("etc/hostname"))?, b"box");
        Ok(())
    }

    #[test]
    fn whiteout_dir_listing() -> Result<()> {
        let fs = WhiteoutFs::new(diff()?);
        let names: Vec<_> = fs
            .read_dir(Path::new("var/cache"))?
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, vec![OPAQUE_MARKER, "new"]);
        assert!(fs.read_dir(Path::new("etc/hostname")).is_err());
        assert!(fs.read_dir(Path::new("missing")).is_err());
        Ok(())
    }
}
