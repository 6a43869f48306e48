use crate::{
    error::*,
    reference::{is_short_identifier, DigestSet, ImageReference},
    Digest,
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Content of `repositories.json`
#[derive(Debug, Default, Deserialize)]
struct Repositories {
    #[serde(rename = "Repositories", default)]
    repositories: BTreeMap<String, BTreeMap<String, String>>,
}

/// Maps derived from one read of `repositories.json`
#[derive(Debug, Default)]
struct NameIndex {
    /// Reference as written in the file to image ID
    raw: HashMap<String, Digest>,
    /// Normalized reference, e.g. `docker.io/library/ubuntu:20.04`, to image ID
    forward: HashMap<String, Digest>,
    /// Image ID to every reference pointing to it
    reverse: HashMap<Digest, Vec<ImageReference>>,
    digests: DigestSet,
}

impl NameIndex {
    fn from_repositories(repositories: Repositories) -> Self {
        let mut index = NameIndex::default();
        for (repository, refs) in repositories.repositories {
            for (name, id) in refs {
                let reference = match ImageReference::parse_normalized(&name) {
                    Ok(reference) if reference.tag.is_some() || reference.digest.is_some() => {
                        reference
                    }
                    Ok(_) => {
                        log::warn!("Skip reference `{}` without tag or digest", name);
                        continue;
                    }
                    Err(e) => {
                        log::warn!("Skip invalid reference `{}` in {}: {}", name, repository, e);
                        continue;
                    }
                };
                let id = match Digest::parse_image_id(&id) {
                    Ok(id) => id,
                    Err(e) => {
                        log::warn!("Skip `{}` pointing to invalid image ID: {}", name, e);
                        continue;
                    }
                };
                index.raw.insert(name.clone(), id.clone());
                let key = lookup_key(&reference);
                if let Some(previous) = index.forward.insert(key.clone(), id.clone()) {
                    if previous != id {
                        log::warn!("`{}` in {} shadows {} for {}", name, repository, previous, key);
                    }
                }
                index.reverse.entry(id.clone()).or_default().push(reference);
                index.digests.insert(id);
            }
        }
        index
    }

    fn resolve(&self, input: &str) -> Result<Digest> {
        if let Some(id) = self.raw.get(input) {
            return Ok(id.clone());
        }
        if let Ok(id) = Digest::parse_image_id(input) {
            if self.reverse.contains_key(&id) {
                return Ok(id);
            }
        }
        if is_short_identifier(input) {
            match self.digests.lookup(input) {
                Ok(id) => return Ok(id),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        let reference = ImageReference::parse_normalized(input)?;
        if reference.tag.is_none() && reference.digest.is_none() {
            return Err(Error::InvalidReference(format!(
                "{}: neither tag nor digest is specified",
                input
            )));
        }
        self.forward
            .get(&lookup_key(&reference))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("image {}", input)))
    }
}

/// Key of the forward map, the tag is ignored when a digest is given
fn lookup_key(reference: &ImageReference) -> String {
    if reference.digest.is_some() {
        reference.without_tag().to_string()
    } else {
        reference.to_string()
    }
}

/// `{root}/image/{driver}/repositories.json`
///
/// ```json
/// {
///   "Repositories": {
///     "ubuntu": {
///       "ubuntu:20.04": "sha256:...",
///       "ubuntu@sha256:...": "sha256:..."
///     }
///   }
/// }
/// ```
///
/// The file is re-read when a lookup fails, since the daemon rewrites it on every tag.
#[derive(Debug)]
pub struct NameDb {
    path: PathBuf,
    index: RwLock<Arc<NameIndex>>,
    reloads: AtomicUsize,
}

impl NameDb {
    /// Open and read the name index. A missing file is an empty index.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let index = read_index(&path)?;
        Ok(NameDb {
            path,
            index: RwLock::new(Arc::new(index)),
            reloads: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How many times the index has been re-read after [NameDb::open]
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Re-read `repositories.json` and replace the whole index
    pub fn reload(&self) -> Result<()> {
        let index = read_index(&self.path)?;
        self.reloads.fetch_add(1, Ordering::SeqCst);
        *self.index.write() = Arc::new(index);
        Ok(())
    }

    fn current(&self) -> Arc<NameIndex> {
        self.index.read().clone()
    }

    /// Resolve a full or short image ID, or a reference like `ubuntu:20.04`
    ///
    /// On failure the index is reloaded and the lookup tried once more.
    pub fn lookup_image_id(&self, reference: &str) -> Result<Digest> {
        match self.current().resolve(reference) {
            Ok(id) => Ok(id),
            Err(e) => {
                log::debug!(
                    "Reload {} since lookup of `{}` failed: {}",
                    self.path.display(),
                    reference,
                    e
                );
                self.reload()?;
                self.current().resolve(reference)
            }
        }
    }

    /// Familiar tagged and digested references to the image, sorted
    pub fn references(&self, id: &Digest) -> (Vec<String>, Vec<String>) {
        let index = self.current();
        let mut tags = Vec::new();
        let mut digests = Vec::new();
        for reference in index.reverse.get(id).into_iter().flatten() {
            if reference.digest.is_some() {
                digests.push(reference.familiar());
            } else {
                tags.push(reference.familiar());
            }
        }
        tags.sort();
        digests.sort();
        (tags, digests)
    }

    /// Every image ID having at least one reference
    pub fn image_ids(&self) -> Vec<Digest> {
        let mut ids: Vec<_> = self.current().reverse.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn read_index(path: &Path) -> Result<NameIndex> {
    let buf = match fs::read(path) {
        Ok(buf) => buf,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(NameIndex::default()),
        Err(e) => return Err(Error::path(path, e)),
    };
    let repositories: Repositories = serde_json::from_slice(&buf)?;
    Ok(NameIndex::from_repositories(repositories))
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn write_repositories(path: &Path, refs: BTreeMap<&str, BTreeMap<&str, String>>) -> Result<()> {
        let json = serde_json::json!({ "Repositories": refs });
        fs::write(path, serde_json::to_vec(&json)?)?;
        Ok(())
    }

    fn ids() -> (Digest, Digest) {
        (Digest::from_buf_sha256(b"ubuntu"), Digest::from_buf_sha256(b"app"))
    }

    fn name_db() -> Result<(tempfile::TempDir, NameDb)> {
        let root = tempfile::tempdir()?;
        let path = root.path().join("repositories.json");
        let (ubuntu, app) = ids();
        let digested = format!("ghcr.io/owner/app@{}", Digest::from_buf_sha256(b"manifest"));
        write_repositories(
            &path,
            btreemap! {
                "ubuntu" => btreemap! {
                    "ubuntu:20.04" => ubuntu.to_string(),
                    "ubuntu:focal" => ubuntu.to_string(),
                },
                "ghcr.io/owner/app" => btreemap! {
                    "ghcr.io/owner/app:v1" => app.encoded.clone(),
                    digested.as_str() => app.to_string(),
                    "ghcr.io/owner/app" => app.to_string(),
                    "ghcr.io/owner/app:v0" => "garbage".to_string(),
                },
            },
        )?;
        let db = NameDb::open(&path)?;
        Ok((root, db))
    }

    #[test]
    fn lookup() -> Result<()> {
        let (_root, db) = name_db()?;
        let (ubuntu, app) = ids();
        let manifest = Digest::from_buf_sha256(b"manifest");

        assert_eq!(db.lookup_image_id("ubuntu:20.04")?, ubuntu);
        assert_eq!(db.lookup_image_id("docker.io/library/ubuntu:focal")?, ubuntu);
        assert_eq!(db.lookup_image_id(&ubuntu.to_string())?, ubuntu);
        assert_eq!(db.lookup_image_id(&ubuntu.encoded)?, ubuntu);
        assert_eq!(db.lookup_image_id(ubuntu.short_id())?, ubuntu);
        assert_eq!(db.lookup_image_id("ghcr.io/owner/app:v1")?, app);
        // digest wins over tag
        let both = format!("ghcr.io/owner/app:nonexistent@{}", manifest);
        assert_eq!(db.lookup_image_id(&both)?, app);
        assert_eq!(db.reloads(), 0);

        assert!(db.lookup_image_id("ubuntu:18.04").unwrap_err().is_not_found());
        assert!(db.lookup_image_id("ubuntu").unwrap_err().is_bad_name());
        assert!(db.lookup_image_id("Ubuntu:20.04").unwrap_err().is_bad_name());
        assert!(db.lookup_image_id("ghcr.io/owner/app:v0").unwrap_err().is_not_found());
        // every failure retries once
        assert_eq!(db.reloads(), 4);
        Ok(())
    }

    #[test]
    fn references() -> Result<()> {
        let (_root, db) = name_db()?;
        let (ubuntu, app) = ids();
        let manifest = Digest::from_buf_sha256(b"manifest");
        assert_eq!(
            db.references(&ubuntu),
            (vec!["ubuntu:20.04".to_string(), "ubuntu:focal".to_string()], vec![])
        );
        assert_eq!(
            db.references(&app),
            (
                vec!["ghcr.io/owner/app:v1".to_string()],
                vec![format!("ghcr.io/owner/app@{}", manifest)]
            )
        );
        assert_eq!(db.image_ids().len(), 2);
        Ok(())
    }

    #[test]
    fn reload_on_miss() -> Result<()> {
        let (root, db) = name_db()?;
        let (ubuntu, _) = ids();
        let added = Digest::from_buf_sha256(b"added");
        write_repositories(
            &root.path().join("repositories.json"),
            btreemap! {
                "ubuntu" => btreemap! { "ubuntu:20.04" => ubuntu.to_string() },
                "added" => btreemap! { "added:latest" => added.to_string() },
            },
        )?;
        assert_eq!(db.lookup_image_id("added:latest")?, added);
        assert_eq!(db.reloads(), 1);
        assert_eq!(db.lookup_image_id(added.short_id())?, added);
        assert_eq!(db.reloads(), 1);
        Ok(())
    }

    #[test]
    fn missing_file() -> Result<()> {
        let root = tempfile::tempdir()?;
        let db = NameDb::open(root.path().join("repositories.json"))?;
        assert!(db.image_ids().is_empty());
        assert!(db.lookup_image_id("ubuntu:20.04").unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn literal_name_wins_over_normalized() -> Result<()> {
        let root = tempfile::tempdir()?;
        let path = root.path().join("repositories.json");
        let short = Digest::from_buf_sha256(b"short");
        let full = Digest::from_buf_sha256(b"full");
        write_repositories(
            &path,
            btreemap! {
                "ubuntu" => btreemap! { "ubuntu:20.04" => short.to_string() },
                "docker.io/library/ubuntu" => btreemap! {
                    "docker.io/library/ubuntu:20.04" => full.to_string(),
                },
            },
        )?;
        let db = NameDb::open(&path)?;
        assert_eq!(db.lookup_image_id("ubuntu:20.04")?, short);
        assert_eq!(db.lookup_image_id("docker.io/library/ubuntu:20.04")?, full);
        // Other spellings fall back to the normalized entry written last
        assert_eq!(db.lookup_image_id("library/ubuntu:20.04")?, short);
        assert_eq!(db.reloads(), 0);
        Ok(())
    }

    #[test]
    fn ambiguous_short_id() -> Result<()> {
        let root = tempfile::tempdir()?;
        let path = root.path().join("repositories.json");
        let x = format!("sha256:abcdef{}", "0".repeat(58));
        let y = format!("sha256:abcdef{}", "1".repeat(58));
        write_repositories(
            &path,
            btreemap! {
                "x" => btreemap! { "x:1" => x },
                "y" => btreemap! { "y:1" => y },
            },
        )?;
        let db = NameDb::open(&path)?;
        assert!(matches!(
            db.lookup_image_id("abcdef"),
            Err(Error::AmbiguousReference(_))
        ));
        Ok(())
    }
}
