use super::{not_found, FileInfo, FileSystem, MemFs};
use crate::error::*;
use std::{
    collections::BTreeMap,
    io::Read,
    path::{Path, PathBuf},
};

/// Virtual in-memory layer over another filesystem
///
/// An entry of the upper layer shadows the lower entry of the same path, and a mask in
/// the upper layer hides the lower entry and everything below it.
#[derive(Debug, Clone)]
pub struct OverlayFs<L> {
    upper: MemFs,
    lower: L,
}

impl<L: FileSystem> OverlayFs<L> {
    pub fn new(upper: MemFs, lower: L) -> Self {
        OverlayFs { upper, lower }
    }

    pub fn upper(&self) -> &MemFs {
        &self.upper
    }

    pub fn lower(&self) -> &L {
        &self.lower
    }

    fn check_visible(&self, path: &Path) -> Result<()> {
        if self.upper.is_masked(path) {
            Err(not_found(path))
        } else {
            Ok(())
        }
    }
}

impl<L: FileSystem> FileSystem for OverlayFs<L> {
    fn stat(&self, path: &Path) -> Result<FileInfo> {
        self.check_visible(path)?;
        if self.upper.contains(path) {
            self.upper.stat(path)
        } else {
            self.lower.stat(path)
        }
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        self.check_visible(path)?;
        if self.upper.contains(path) {
            self.upper.open(path)
        } else {
            self.lower.open(path)
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<FileInfo>> {
        self.check_visible(path)?;
        let upper_dir = match self.upper.stat(path) {
            Ok(info) if info.is_dir() => true,
            Ok(_) => return self.upper.read_dir(path),
            Err(_) => false,
        };
        let lower = match self.lower.read_dir(path) {
            Ok(entries) => Some(entries),
            Err(e) if e.is_not_found() && upper_dir => None,
            Err(e) => return Err(e),
        };

        let mut merged = BTreeMap::new();
        if let Some(entries) = lower {
            let masks = self.upper.masks_in(path);
            for info in entries {
                if !masks.contains(&info.name) {
                    merged.insert(info.name.clone(), info);
                }
            }
        }
        if upper_dir {
            for info in self.upper.read_dir(path)? {
                merged.insert(info.name.clone(), info);
            }
        }
        Ok(merged.into_values().collect())
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        self.check_visible(path)?;
        if self.upper.contains(path) {
            self.upper.read_link(path)
        } else {
            self.lower.read_link(path)
        }
    }

    fn xattr(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        self.check_visible(path)?;
        if self.upper.contains(path) {
            if let Some(value) = self.upper.xattr(path, name)? {
                return Ok(Some(value));
            }
        }
        self.lower.xattr(path, name)
    }
}
