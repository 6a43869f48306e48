use super::layer_db::read_value;
use crate::{digest::SUPPORTED_ALGORITHMS, error::*, Context, Digest};
use chrono::{DateTime, FixedOffset};
use std::{
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// `{root}/image/{driver}/imagedb`
///
/// ```text
/// imagedb/
/// ├── content/sha256/{image-id}      config JSON, named by its own digest
/// └── metadata/sha256/{image-id}/
///     ├── parent
///     └── lastUpdated
/// ```
#[derive(Debug, Clone)]
pub struct ImageDb {
    root: PathBuf,
}

impl ImageDb {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ImageDb { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_path(&self, id: &Digest) -> PathBuf {
        self.root.join("content").join(id.as_path())
    }

    fn metadata_dir(&self, id: &Digest) -> PathBuf {
        self.root.join("metadata").join(id.as_path())
    }

    /// IDs of every image config on disk
    pub fn get_all_image_ids(&self, ctx: &Context) -> Result<Vec<Digest>> {
        let mut ids = Vec::new();
        for algorithm in SUPPORTED_ALGORITHMS {
            let dir = self.root.join("content").join(algorithm);
            if !dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
                ctx.check()?;
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                match Digest::from_parts(algorithm, &name) {
                    Ok(id) => ids.push(id),
                    Err(e) => log::warn!("Skip invalid image {}: {}", entry.path().display(), e),
                }
            }
        }
        Ok(ids)
    }

    /// Raw config JSON of the image
    ///
    /// The content is checked against `id`, since the ID is the digest of the config.
    pub fn read_image_config(&self, id: &Digest) -> Result<Vec<u8>> {
        let path = self.content_path(id);
        let buf = fs::read(&path).map_err(|e| Error::path(&path, e))?;
        if !id.matches(&buf) {
            return Err(Error::invalid_field(
                "config",
                format!("content of {} does not match its digest", path.display()),
            ));
        }
        Ok(buf)
    }

    /// Image this one was built from, known only for locally built images
    pub fn get_parent(&self, id: &Digest) -> Result<Option<Digest>> {
        match self.read_metadata(id, "parent")? {
            Some(parent) => Ok(Some(Digest::new(&parent)?)),
            None => Ok(None),
        }
    }

    /// Last time the image was tagged or pulled
    pub fn get_last_updated(&self, id: &Digest) -> Result<Option<DateTime<FixedOffset>>> {
        match self.read_metadata(id, "lastUpdated")? {
            Some(value) => DateTime::parse_from_rfc3339(&value)
                .map(Some)
                .map_err(|e| Error::invalid_field("lastUpdated", e)),
            None => Ok(None),
        }
    }

    fn read_metadata(&self, id: &Digest, key: &str) -> Result<Option<String>> {
        match read_value(&self.metadata_dir(id).join(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &[u8] = br#"{"architecture":"amd64","os":"linux","rootfs":{"type":"layers","diff_ids":[]}}"#;

    fn image_db() -> Result<(tempfile::TempDir, ImageDb, Digest)> {
        let root = tempfile::tempdir()?;
        let db = ImageDb::new(root.path().join("imagedb"));
        let id = Digest::from_buf_sha256(CONFIG);
        fs::create_dir_all(db.root().join("content/sha256"))?;
        fs::write(db.content_path(&id), CONFIG)?;
        Ok((root, db, id))
    }

    #[test]
    fn config() -> Result<()> {
        let (_root, db, id) = image_db()?;
        assert_eq!(db.read_image_config(&id)?, CONFIG);

        let other = Digest::from_buf_sha256(b"other");
        assert!(db.read_image_config(&other).unwrap_err().is_not_found());

        fs::write(db.content_path(&other), CONFIG)?;
        assert!(matches!(
            db.read_image_config(&other),
            Err(Error::InvalidField { .. })
        ));
        Ok(())
    }

    #[test]
    fn all_image_ids() -> Result<()> {
        let (_root, db, id) = image_db()?;
        fs::write(db.root().join("content/sha256/garbage"), "")?;
        fs::create_dir_all(db.root().join("content/sha256").join("0".repeat(64)))?;
        assert_eq!(db.get_all_image_ids(&Context::new())?, vec![id]);

        let ctx = Context::new();
        ctx.cancel();
        assert!(matches!(db.get_all_image_ids(&ctx), Err(Error::Cancelled)));
        Ok(())
    }

    #[test]
    fn sidecars() -> Result<()> {
        let (_root, db, id) = image_db()?;
        assert_eq!(db.get_parent(&id)?, None);
        assert_eq!(db.get_last_updated(&id)?, None);

        let parent = Digest::from_buf_sha256(b"parent");
        fs::create_dir_all(db.metadata_dir(&id))?;
        fs::write(db.metadata_dir(&id).join("parent"), parent.to_string())?;
        fs::write(
            db.metadata_dir(&id).join("lastUpdated"),
            "2021-03-04T05:06:07.123456789Z",
        )?;
        assert_eq!(db.get_parent(&id)?, Some(parent));
        let updated = db.get_last_updated(&id)?.expect("lastUpdated");
        assert_eq!(updated.timestamp(), 1614834367);
        assert_eq!(updated.timestamp_subsec_nanos(), 123456789);

        fs::write(db.metadata_dir(&id).join("lastUpdated"), "yesterday")?;
        assert!(db.get_last_updated(&id).is_err());
        Ok(())
    }
}
