use super::{check_cache_id, Driver};
use crate::error::*;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

pub const VFS: &str = "vfs";
pub const BTRFS: &str = "btrfs";

/// Drivers keeping a full copy, or snapshot, of the filesystem for every layer
///
/// The content of a layer lives in `{home}/{subdir}/{cache-id}`. These drivers do not
/// keep the changes of a layer apart, so they cannot provide diffs.
#[derive(Debug, Clone)]
pub struct DirDriver {
    driver_type: &'static str,
    home: PathBuf,
    layers: PathBuf,
}

impl DirDriver {
    pub fn new(driver_type: &'static str, subdir: &str, root: &Path) -> Result<Self> {
        let home = root.join(driver_type);
        if !home.is_dir() {
            return Err(Error::NotFound(format!(
                "{} driver home {}",
                driver_type,
                home.display()
            )));
        }
        let layers = home.join(subdir);
        Ok(DirDriver {
            driver_type,
            home,
            layers,
        })
    }

    pub fn create_vfs(root: &Path) -> Result<Box<dyn Driver>> {
        Ok(Box::new(Self::new(VFS, "dir", root)?))
    }

    pub fn create_btrfs(root: &Path) -> Result<Box<dyn Driver>> {
        Ok(Box::new(Self::new(BTRFS, "subvolumes", root)?))
    }

    pub fn layer_dir(&self, cache_id: &str) -> Result<PathBuf> {
        check_cache_id(cache_id)?;
        Ok(self.layers.join(cache_id))
    }
}

impl Driver for DirDriver {
    fn driver_type(&self) -> &str {
        self.driver_type
    }

    fn home(&self) -> &Path {
        &self.home
    }

    fn accessible(&self, cache_id: &str) -> bool {
        match self.layer_dir(cache_id) {
            Ok(dir) => dir.is_dir(),
            Err(_) => false,
        }
    }

    fn get_metadata(&self, cache_id: &str) -> Result<BTreeMap<String, String>> {
        let dir = self.layer_dir(cache_id)?;
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "layer {} in {}",
                cache_id, self.driver_type
            )));
        }
        let mut metadata = BTreeMap::new();
        metadata.insert("Dir".to_string(), dir.to_string_lossy().to_string());
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn vfs() -> Result<()> {
        let root = tempfile::tempdir()?;
        fs::create_dir_all(root.path().join("vfs/dir/abc"))?;
        let driver = DirDriver::create_vfs(root.path())?;
        assert_eq!(driver.driver_type(), VFS);
        assert!(driver.accessible("abc"));
        assert!(!driver.accessible("def"));
        assert_eq!(
            driver.get_metadata("abc")?["Dir"],
            root.path().join("vfs/dir/abc").to_string_lossy()
        );
        assert!(driver.as_differ().is_none());
        Ok(())
    }

    #[test]
    fn btrfs() -> Result<()> {
        let root = tempfile::tempdir()?;
        assert!(DirDriver::create_btrfs(root.path()).is_err());
        fs::create_dir_all(root.path().join("btrfs/subvolumes/abc"))?;
        let driver = DirDriver::create_btrfs(root.path())?;
        assert!(driver.accessible("abc"));
        assert!(driver.get_metadata("missing").unwrap_err().is_not_found());
        Ok(())
    }
}
