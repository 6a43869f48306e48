//! Images of a local Docker daemon, read directly from its graph root
//!
//! ```text
//! /var/lib/docker/
//! ├── image/{driver}/
//! │   ├── imagedb/
//! │   ├── layerdb/
//! │   └── repositories.json
//! └── {driver}/{cache-id}/...
//! ```
//!
//! Nothing is written to the graph root.

mod image_db;
mod layer_db;
mod name_db;

pub use image_db::ImageDb;
pub use layer_db::{LayerDb, RootfsLayer};
pub use name_db::NameDb;

use super::{ImageCloser, ImageMetadata, ImageOptions, Layer, LayerMetadata, Storage};
use crate::{
    driver::{Driver, DriverRegistry},
    error::*,
    fs::FileSystem,
    manifest::{media_type, Platform},
    Context, Digest,
};
use oci_spec::image::ImageConfiguration;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Storage of a Docker graph root
#[derive(Debug)]
pub struct RootfsStorage {
    root: PathBuf,
    driver: Arc<dyn Driver>,
    layer_db: LayerDb,
    image_db: ImageDb,
    name_db: NameDb,
}

impl RootfsStorage {
    /// Open the graph root at `root`, detecting its storage driver
    ///
    /// `preferred` overrides the detection when it names a registered driver.
    pub fn new(
        ctx: &Context,
        root: &Path,
        drivers: &DriverRegistry,
        preferred: Option<&str>,
    ) -> Result<Self> {
        let driver: Arc<dyn Driver> = drivers.new_driver(ctx, root, preferred)?.into();
        let image_root = root.join("image").join(driver.driver_type());
        if !image_root.is_dir() {
            return Err(Error::NotFound(format!(
                "image store of {} driver at {}",
                driver.driver_type(),
                image_root.display()
            )));
        }
        log::info!(
            "Open graph root {} with {} driver",
            root.display(),
            driver.driver_type()
        );
        Ok(RootfsStorage {
            root: root.to_owned(),
            driver,
            layer_db: LayerDb::new(image_root.join("layerdb")),
            image_db: ImageDb::new(image_root.join("imagedb")),
            name_db: NameDb::open(image_root.join("repositories.json"))?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn layer_db(&self) -> &LayerDb {
        &self.layer_db
    }

    pub fn image_db(&self) -> &ImageDb {
        &self.image_db
    }

    pub fn name_db(&self) -> &NameDb {
        &self.name_db
    }

    /// IDs of all images in the graph root, tagged or not
    pub fn image_ids(&self, ctx: &Context) -> Result<Vec<Digest>> {
        self.image_db.get_all_image_ids(ctx)
    }

    /// Chain IDs of all layers in the graph root
    pub fn layer_chain_ids(&self, ctx: &Context) -> Result<Vec<Digest>> {
        self.layer_db.get_all_layer_chain_ids(ctx)
    }

    fn open_image(
        &self,
        ctx: &Context,
        reference: &str,
        opts: &ImageOptions,
    ) -> Result<RootfsImage> {
        ctx.check()?;
        let id = self.name_db.lookup_image_id(reference)?;
        let (repo_tags, repo_digests) = self.name_db.references(&id);

        let config_file = self.image_db.read_image_config(&id)?;
        let config = ImageConfiguration::from_reader(config_file.as_slice())?;
        let platform: Platform = serde_json::from_slice(&config_file)?;
        if let Some(wanted) = &opts.platform {
            if !wanted.matches(&platform) {
                return Err(Error::NotFound(format!(
                    "image {} for {}/{}, found {}/{}",
                    reference, wanted.os, wanted.architecture, platform.os, platform.architecture
                )));
            }
        }

        let diff_ids = config
            .rootfs()
            .diff_ids()
            .iter()
            .map(|diff_id| Digest::new(diff_id))
            .collect::<Result<Vec<_>>>()?;
        let chain_ids = Digest::chain_ids(&diff_ids);

        let history: Vec<Option<String>> = config
            .history()
            .iter()
            .filter(|h| !h.empty_layer().unwrap_or(false))
            .map(|h| h.created_by().as_ref().map(|s| s.to_string()))
            .collect();
        let history = if history.len() == chain_ids.len() {
            history
        } else {
            log::warn!(
                "Image {} has {} non-empty history entries for {} layers, ignoring history",
                id,
                history.len(),
                chain_ids.len()
            );
            vec![None; chain_ids.len()]
        };

        let chain = match chain_ids.last() {
            Some(top) => self.layer_db.get_chain(self.driver.as_ref(), top)?,
            None => Vec::new(),
        };
        if chain.len() != chain_ids.len() {
            return Err(Error::invalid_field(
                "parent",
                format!(
                    "layer chain of image {} has {} layers, expected {}",
                    id,
                    chain.len(),
                    chain_ids.len()
                ),
            ));
        }

        let mut layers: Vec<Arc<dyn Layer>> = Vec::with_capacity(chain_ids.len());
        let mut size = 0;
        for (((layer, chain_id), diff_id), created_by) in
            chain.into_iter().zip(&chain_ids).zip(diff_ids).zip(history)
        {
            ctx.check()?;
            if &layer.chain_id != chain_id {
                return Err(Error::invalid_field(
                    "parent",
                    format!("layer {} found where {} was expected", layer.chain_id, chain_id),
                ));
            }
            if layer.diff_id != diff_id {
                return Err(Error::invalid_field(
                    "diff",
                    format!(
                        "layer {} has DiffID {}, expected {}",
                        chain_id, layer.diff_id, diff_id
                    ),
                ));
            }
            size += layer.size.max(0);
            layers.push(Arc::new(RootfsImageLayer {
                metadata: LayerMetadata {
                    diff_id: Some(diff_id),
                    digest: None,
                    chain_id: Some(chain_id.clone()),
                    media_type: media_type::OCI_LAYER_TAR.to_string(),
                    size: layer.size,
                    created_by,
                },
                layer,
                driver: self.driver.clone(),
            }));
        }

        let metadata = ImageMetadata {
            digest: repo_digests
                .first()
                .and_then(|r| r.split_once('@'))
                .and_then(|(_, digest)| Digest::new(digest).ok()),
            id,
            name: reference.to_string(),
            repo_tags,
            repo_digests,
            platform,
            created: config.created().as_ref().map(|s| s.to_string()),
            size,
            compressed_size: None,
        };
        log::debug!("Resolved {} to {} with {} layers", reference, metadata.id, layers.len());
        Ok(RootfsImage {
            metadata,
            config_file,
            layers,
        })
    }
}

impl Storage for RootfsStorage {
    fn get_image(
        &self,
        ctx: &Context,
        reference: &str,
        opts: &ImageOptions,
    ) -> Result<Box<dyn ImageCloser>> {
        Ok(Box::new(self.open_image(ctx, reference, opts)?))
    }
}

/// Image resolved from the graph root, every read returns what was resolved on open
struct RootfsImage {
    metadata: ImageMetadata,
    config_file: Vec<u8>,
    layers: Vec<Arc<dyn Layer>>,
}

impl ImageCloser for RootfsImage {
    fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    fn config_file(&self, ctx: &Context) -> Result<Vec<u8>> {
        ctx.check()?;
        Ok(self.config_file.clone())
    }

    fn layers(&self, ctx: &Context) -> Result<Vec<Arc<dyn Layer>>> {
        ctx.check()?;
        Ok(self.layers.clone())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct RootfsImageLayer {
    metadata: LayerMetadata,
    layer: Arc<RootfsLayer>,
    driver: Arc<dyn Driver>,
}

impl Layer for RootfsImageLayer {
    fn metadata(&self) -> &LayerMetadata {
        &self.metadata
    }

    fn get_fs(&self, ctx: &Context) -> Result<Box<dyn FileSystem>> {
        ctx.check()?;
        let differ = self.driver.as_differ().ok_or_else(|| {
            Error::Unsupported(format!(
                "diff of layers in {} driver",
                self.driver.driver_type()
            ))
        })?;
        differ.diff(&self.layer.cache_id)
    }
}
