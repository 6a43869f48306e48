use crate::{digest::SUPPORTED_ALGORITHMS, driver::Driver, error::*, Context, Digest};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use walkdir::WalkDir;

/// Reserved entry of the layer database for container mounts
const MOUNTS_DIR: &str = "mounts";

/// Metadata of a layer in the graph root, addressed by its chain ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootfsLayer {
    pub chain_id: Digest,
    pub diff_id: Digest,
    /// Chain ID of the parent layer, `None` for a base layer
    pub parent: Option<Digest>,
    /// Directory name of the layer content in the storage driver
    pub cache_id: String,
    /// Uncompressed size in bytes
    pub size: i64,
}

type Slot = Arc<Mutex<Option<Arc<RootfsLayer>>>>;

/// `{root}/image/{driver}/layerdb`
///
/// ```text
/// layerdb/sha256/{chain-id}/
/// ├── cache-id
/// ├── diff
/// ├── parent     absent for a base layer
/// ├── size
/// └── tar-split.json.gz
/// ```
///
/// Layers are loaded lazily and cached by chain ID. Concurrent requests for the same
/// layer wait for a single load. Parents are referred to by chain ID, so the cache
/// holds each layer once however many chains share it.
#[derive(Debug)]
pub struct LayerDb {
    root: PathBuf,
    cache: Mutex<HashMap<Digest, Slot>>,
    loads: AtomicUsize,
}

impl LayerDb {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LayerDb {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layer_dir(&self, chain_id: &Digest) -> PathBuf {
        self.root.join(chain_id.as_path())
    }

    /// How many times metadata has been read from disk
    pub fn metadata_loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Layer of `chain_id`, with its ancestors checked to be loadable
    pub fn get_layer(&self, driver: &dyn Driver, chain_id: &Digest) -> Result<Arc<RootfsLayer>> {
        self.get_chain(driver, chain_id)?
            .pop()
            .ok_or_else(|| Error::NotFound(format!("layer {}", chain_id)))
    }

    /// Layers from the base to `chain_id`
    ///
    /// Each ancestor is loaded and checked once while following the parent links.
    pub fn get_chain(&self, driver: &dyn Driver, chain_id: &Digest) -> Result<Vec<Arc<RootfsLayer>>> {
        let mut visited = HashSet::new();
        let mut chain = Vec::new();
        let mut next = Some(chain_id.clone());
        while let Some(chain_id) = next {
            if !visited.insert(chain_id.clone()) {
                return Err(Error::LayerCycle(chain_id.to_string()));
            }
            let layer = self.cached(&chain_id)?;
            if !driver.accessible(&layer.cache_id) {
                return Err(Error::NotFound(format!(
                    "content of layer {} in {} driver, cache ID {}",
                    chain_id,
                    driver.driver_type(),
                    layer.cache_id
                )));
            }
            next = layer.parent.clone();
            chain.push(layer);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Metadata of a single layer, loaded once while its directory exists
    fn cached(&self, chain_id: &Digest) -> Result<Arc<RootfsLayer>> {
        let dir = self.layer_dir(chain_id);
        if !dir.is_dir() {
            if self.cache.lock().remove(chain_id).is_some() {
                log::debug!("Evict layer {} removed from {}", chain_id, self.root.display());
            }
            return Err(Error::NotFound(format!("layer {}", chain_id)));
        }

        let slot = self.cache.lock().entry(chain_id.clone()).or_default().clone();
        let mut loaded = slot.lock();
        let layer = match &*loaded {
            Some(layer) => layer.clone(),
            None => {
                let layer = Arc::new(self.load(chain_id, &dir)?);
                *loaded = Some(layer.clone());
                layer
            }
        };
        Ok(layer)
    }

    /// Read every metadata file, reporting all failures at once
    fn load(&self, chain_id: &Digest, dir: &Path) -> Result<RootfsLayer> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        let diff_id = read_value(&dir.join("diff")).and_then(|s| Digest::new(&s));
        let size = read_value(&dir.join("size")).and_then(|s| {
            s.parse::<i64>()
                .map_err(|e| Error::invalid_field("size", format!("{}: {}", chain_id, e)))
        });
        let cache_id = read_value(&dir.join("cache-id"));
        let parent = match read_value(&dir.join("parent")) {
            Ok(s) => Digest::new(&s).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        };

        match (diff_id, size, cache_id, parent) {
            (Ok(diff_id), Ok(size), Ok(cache_id), Ok(parent)) => Ok(RootfsLayer {
                chain_id: chain_id.clone(),
                diff_id,
                parent,
                cache_id,
                size,
            }),
            (diff_id, size, cache_id, parent) => Err(Error::Aggregate(
                [
                    diff_id.err(),
                    size.err(),
                    cache_id.err(),
                    parent.err(),
                ]
                .into_iter()
                .flatten()
                .collect(),
            )),
        }
    }

    /// Chain IDs of every layer on disk
    ///
    /// Entries which are not valid digests are skipped with a warning.
    pub fn get_all_layer_chain_ids(&self, ctx: &Context) -> Result<Vec<Digest>> {
        let mut ids = Vec::new();
        for algorithm in SUPPORTED_ALGORITHMS {
            let dir = self.root.join(algorithm);
            if !dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
                ctx.check()?;
                let entry = entry?;
                let name = entry.file_name().to_string_lossy();
                if name == MOUNTS_DIR || !entry.file_type().is_dir() {
                    continue;
                }
                match Digest::from_parts(algorithm, &name) {
                    Ok(id) => ids.push(id),
                    Err(e) => log::warn!("Skip invalid layer {}: {}", entry.path().display(), e),
                }
            }
        }
        Ok(ids)
    }
}

/// Trimmed content of a one-value metadata file
pub(super) fn read_value(path: &Path) -> Result<String> {
    let value = fs::read_to_string(path).map_err(|e| Error::path(path, e))?;
    Ok(value.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverRegistry;
    use std::thread;

    struct Fixture {
        _root: tempfile::TempDir,
        driver: Box<dyn Driver>,
        db: LayerDb,
    }

    fn write_layer(root: &Path, diff_id: &Digest, parent: Option<&Digest>, cache_id: &str) -> Result<Digest> {
        let chain_id = match parent {
            Some(parent) => Digest::from_buf_sha256(format!("{} {}", parent, diff_id).as_bytes()),
            None => diff_id.clone(),
        };
        let dir = root.join("image/overlay2/layerdb").join(chain_id.as_path());
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("diff"), diff_id.to_string())?;
        fs::write(dir.join("size"), "1024\n")?;
        fs::write(dir.join("cache-id"), cache_id)?;
        if let Some(parent) = parent {
            fs::write(dir.join("parent"), parent.to_string())?;
        }
        fs::create_dir_all(root.join("overlay2").join(cache_id).join("diff"))?;
        Ok(chain_id)
    }

    fn fixture() -> Result<(Fixture, Digest, Digest)> {
        let root = tempfile::tempdir()?;
        let base = write_layer(root.path(), &Digest::from_buf_sha256(b"base"), None, "c0")?;
        let top = write_layer(root.path(), &Digest::from_buf_sha256(b"top"), Some(&base), "c1")?;
        let driver = DriverRegistry::with_builtin().create("overlay2", root.path())?;
        let db = LayerDb::new(root.path().join("image/overlay2/layerdb"));
        Ok((
            Fixture {
                _root: root,
                driver,
                db,
            },
            base,
            top,
        ))
    }

    #[test]
    fn chain() -> Result<()> {
        let (f, base, top) = fixture()?;
        let layer = f.db.get_layer(f.driver.as_ref(), &top)?;
        assert_eq!(layer.parent.as_ref(), Some(&base));
        assert_eq!(layer.cache_id, "c1");
        assert_eq!(layer.size, 1024);
        assert_eq!(layer.diff_id, Digest::from_buf_sha256(b"top"));

        let chain = f.db.get_chain(f.driver.as_ref(), &top)?;
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].chain_id, base);
        assert_eq!(chain[1].chain_id, top);
        assert!(Arc::ptr_eq(&chain[1], &layer));
        // Both layers were read once
        assert_eq!(f.db.metadata_loads(), 2);

        let mut ids = f.db.get_all_layer_chain_ids(&Context::new())?;
        ids.sort();
        let mut expected = vec![base, top];
        expected.sort();
        assert_eq!(ids, expected);
        Ok(())
    }

    #[test]
    fn concurrent_get_layer() -> Result<()> {
        let (f, _, top) = fixture()?;
        let layers: Vec<Arc<RootfsLayer>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| f.db.get_layer(f.driver.as_ref(), &top)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread panicked"))
                .collect::<Result<_>>()
        })?;
        for layer in &layers {
            assert!(Arc::ptr_eq(layer, &layers[0]));
        }
        assert_eq!(f.db.metadata_loads(), 2);
        Ok(())
    }

    #[test]
    fn missing_metadata_is_aggregated() -> Result<()> {
        let (f, _, top) = fixture()?;
        let dir = f.db.layer_dir(&top);
        fs::remove_file(dir.join("diff"))?;
        fs::remove_file(dir.join("size"))?;
        match f.db.get_layer(f.driver.as_ref(), &top) {
            Err(Error::Aggregate(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected: {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn stale_cache_is_evicted() -> Result<()> {
        let (f, _, top) = fixture()?;
        f.db.get_layer(f.driver.as_ref(), &top)?;
        fs::remove_dir_all(f.db.layer_dir(&top))?;
        assert!(f.db.get_layer(f.driver.as_ref(), &top).unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn inaccessible_content() -> Result<()> {
        let (f, base, _) = fixture()?;
        fs::remove_dir_all(f.driver.home().join("c0"))?;
        assert!(f.db.get_layer(f.driver.as_ref(), &base).unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn cycle_is_detected() -> Result<()> {
        let (f, base, top) = fixture()?;
        fs::write(f.db.layer_dir(&base).join("parent"), top.to_string())?;
        assert!(matches!(
            f.db.get_layer(f.driver.as_ref(), &top),
            Err(Error::LayerCycle(_))
        ));
        Ok(())
    }

    #[test]
    fn invalid_entries_are_skipped() -> Result<()> {
        let (f, _, _) = fixture()?;
        fs::create_dir_all(f.db.root().join("sha256/not-a-digest"))?;
        fs::create_dir_all(f.db.root().join("sha256/mounts"))?;
        assert_eq!(f.db.get_all_layer_chain_ids(&Context::new())?.len(), 2);
        Ok(())
    }

    #[test]
    fn listing_is_cancellable() -> Result<()> {
        let (f, _, _) = fixture()?;
        let ctx = Context::new();
        ctx.cancel();
        assert!(matches!(
            f.db.get_all_layer_chain_ids(&ctx),
            Err(Error::Cancelled)
        ));
        Ok(())
    }

    #[test]
    fn missing_ancestor_fails_chain() -> Result<()> {
        let (f, base, top) = fixture()?;
        fs::remove_dir_all(f.db.layer_dir(&base))?;
        assert!(f.db.get_chain(f.driver.as_ref(), &top).unwrap_err().is_not_found());
        Ok(())
    }
}
