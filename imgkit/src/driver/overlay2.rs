use super::{check_cache_id, normalize, Differ, Driver};
use crate::{
    error::*,
    fs::{DirFs, FileSystem, WhiteoutFs},
};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

pub const OVERLAY2: &str = "overlay2";
pub const FUSE_OVERLAYFS: &str = "fuse-overlayfs";

const LINK_DIR: &str = "l";

/// On-disk layout of one layer of the overlay2 driver
///
/// ```text
/// {home}/{cache-id}/
/// ├── diff/       changes of this layer
/// ├── link        short name of this layer under {home}/l/
/// ├── lower       short names of the lower layers, `l/AAA:l/BBB`, topmost first
/// ├── work/
/// ├── merged/
/// └── committed   exists once the layer is read-only
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay2Entity {
    home: PathBuf,
    cache_id: String,
}

impl Overlay2Entity {
    pub fn new(home: impl Into<PathBuf>, cache_id: &str) -> Result<Self> {
        check_cache_id(cache_id)?;
        Ok(Overlay2Entity {
            home: home.into(),
            cache_id: cache_id.to_string(),
        })
    }

    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    pub fn dir(&self) -> PathBuf {
        self.home.join(&self.cache_id)
    }

    pub fn diff_dir(&self) -> PathBuf {
        self.dir().join("diff")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir().join("work")
    }

    pub fn merged_dir(&self) -> PathBuf {
        self.dir().join("merged")
    }

    pub fn lower_file(&self) -> PathBuf {
        self.dir().join("lower")
    }

    pub fn link_file(&self) -> PathBuf {
        self.dir().join("link")
    }

    pub fn committed_file(&self) -> PathBuf {
        self.dir().join("committed")
    }

    /// Short name of this layer under `{home}/l/`
    pub fn link(&self) -> Result<String> {
        let path = self.link_file();
        let link = fs::read_to_string(&path).map_err(|e| Error::path(&path, e))?;
        Ok(link.trim().to_string())
    }

    /// Absolute `diff` directories of the lower layers, from the bottom to the top
    ///
    /// A layer without `lower` file is a base layer.
    pub fn get_lower_paths(&self) -> Result<Vec<PathBuf>> {
        let path = self.lower_file();
        let lower = match fs::read_to_string(&path) {
            Ok(lower) => lower,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::path(&path, e)),
        };
        let mut paths = Vec::new();
        for name in lower.trim().split(':').filter(|name| !name.is_empty()) {
            let link = self.home.join(name);
            let target = fs::read_link(&link).map_err(|e| Error::path(&link, e))?;
            paths.push(normalize(&self.home.join(LINK_DIR).join(target)));
        }
        paths.reverse();
        Ok(paths)
    }

    pub fn is_readonly(&self) -> bool {
        self.committed_file().exists()
    }
}

/// Driver of the overlay2 layout, shared with fuse-overlayfs
#[derive(Debug, Clone)]
pub struct Overlay2Driver {
    driver_type: &'static str,
    home: PathBuf,
}

impl Overlay2Driver {
    /// Driver of `{root}/{driver_type}`
    pub fn new(driver_type: &'static str, root: &Path) -> Result<Self> {
        let home = root.join(driver_type);
        if !home.is_dir() {
            return Err(Error::NotFound(format!(
                "{} driver home {}",
                driver_type,
                home.display()
            )));
        }
        Ok(Overlay2Driver { driver_type, home })
    }

    pub fn create_overlay2(root: &Path) -> Result<Box<dyn Driver>> {
        Ok(Box::new(Self::new(OVERLAY2, root)?))
    }

    pub fn create_fuse_overlayfs(root: &Path) -> Result<Box<dyn Driver>> {
        Ok(Box::new(Self::new(FUSE_OVERLAYFS, root)?))
    }

    pub fn entity(&self, cache_id: &str) -> Result<Overlay2Entity> {
        Overlay2Entity::new(&self.home, cache_id)
    }
}

impl Driver for Overlay2Driver {
    fn driver_type(&self) -> &str {
        self.driver_type
    }

    fn home(&self) -> &Path {
        &self.home
    }

    fn accessible(&self, cache_id: &str) -> bool {
        match self.entity(cache_id) {
            Ok(entity) => entity.diff_dir().is_dir(),
            Err(_) => false,
        }
    }

    fn get_metadata(&self, cache_id: &str) -> Result<BTreeMap<String, String>> {
        let entity = self.entity(cache_id)?;
        let dir = entity.dir();
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "layer {} in {}",
                cache_id, self.driver_type
            )));
        }
        let mut metadata = BTreeMap::new();
        metadata.insert("UpperDir".to_string(), display(&entity.diff_dir()));
        metadata.insert("WorkDir".to_string(), display(&entity.work_dir()));
        metadata.insert("MergedDir".to_string(), display(&entity.merged_dir()));
        let lower = entity.get_lower_paths()?;
        if !lower.is_empty() {
            let lower: Vec<_> = lower.iter().rev().map(|p| display(p)).collect();
            metadata.insert("LowerDir".to_string(), lower.join(":"));
        }
        Ok(metadata)
    }

    fn as_differ(&self) -> Option<&dyn Differ> {
        Some(self)
    }
}

impl Differ for Overlay2Driver {
    fn diff(&self, cache_id: &str) -> Result<Box<dyn FileSystem>> {
        let diff_dir = self.entity(cache_id)?.diff_dir();
        if !diff_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "diff of layer {} at {}",
                cache_id,
                diff_dir.display()
            )));
        }
        Ok(Box::new(WhiteoutFs::new(DirFs::new(diff_dir))))
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    /// Two layers: `base` and `top` over it
    fn graph(root: &Path) -> Result<()> {
        let home = root.join(OVERLAY2);
        for (id, link) in [("base", "BASELINK"), ("top", "TOPLINK")] {
            fs::create_dir_all(home.join(id).join("diff"))?;
            fs::write(home.join(id).join("link"), link)?;
            fs::create_dir_all(home.join(LINK_DIR))?;
            symlink(format!("../{}/diff", id), home.join(LINK_DIR).join(link))?;
        }
        fs::write(home.join("top/lower"), "l/BASELINK")?;
        fs::write(home.join("base/committed"), "")?;
        fs::write(home.join("top/diff/file"), "content")?;
        Ok(())
    }

    #[test]
    fn entity() -> Result<()> {
        let root = tempfile::tempdir()?;
        graph(root.path())?;
        let driver = Overlay2Driver::new(OVERLAY2, root.path())?;
        let home = root.path().join(OVERLAY2);

        let base = driver.entity("base")?;
        assert!(base.get_lower_paths()?.is_empty());
        assert!(base.is_readonly());
        assert_eq!(base.link()?, "BASELINK");

        let top = driver.entity("top")?;
        assert!(!top.is_readonly());
        assert_eq!(top.get_lower_paths()?, vec![home.join("base/diff")]);
        assert!(driver.entity("../escape").is_err());
        Ok(())
    }

    #[test]
    fn lower_paths_bottom_to_top() -> Result<()> {
        let root = tempfile::tempdir()?;
        graph(root.path())?;
        let home = root.path().join(OVERLAY2);
        fs::create_dir_all(home.join("mid/diff"))?;
        symlink("../mid/diff", home.join("l/MIDLINK"))?;
        fs::write(home.join("top/lower"), "l/MIDLINK:l/BASELINK\n")?;

        let driver = Overlay2Driver::new(OVERLAY2, root.path())?;
        assert_eq!(
            driver.entity("top")?.get_lower_paths()?,
            vec![home.join("base/diff"), home.join("mid/diff")]
        );
        let metadata = driver.get_metadata("top")?;
        assert_eq!(
            metadata["LowerDir"],
            format!(
                "{}:{}",
                home.join("mid/diff").display(),
                home.join("base/diff").display()
            )
        );
        Ok(())
    }

    #[test]
    fn driver() -> Result<()> {
        let root = tempfile::tempdir()?;
        graph(root.path())?;
        let driver = Overlay2Driver::new(OVERLAY2, root.path())?;
        assert_eq!(driver.driver_type(), OVERLAY2);
        assert!(driver.accessible("top"));
        assert!(!driver.accessible("missing"));

        let metadata = driver.get_metadata("base")?;
        assert!(!metadata.contains_key("LowerDir"));
        assert_eq!(
            metadata["UpperDir"],
            display(&root.path().join("overlay2/base/diff"))
        );

        let diff = driver.as_differ().unwrap().diff("top")?;
        assert_eq!(diff.read(Path::new("file"))?, b"content");
        assert!(driver.as_differ().unwrap().diff("missing").is_err());
        assert!(Overlay2Driver::new(FUSE_OVERLAYFS, root.path()).is_err());
        Ok(())
    }
}
