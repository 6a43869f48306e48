//! Uniform access to images regardless of where they are stored
//!
//! - [RootfsStorage] reads the graph root of a Docker daemon
//! - [RemoteStorage] reads a registry implementing the distribution API
//!
//! Both hand out an [ImageCloser] created per request, which exposes the config blob and
//! the ordered layers of one image.

pub mod remote;
pub mod rootfs;

pub use remote::RemoteStorage;
pub use rootfs::RootfsStorage;

use crate::{
    config::Config, driver::DriverRegistry, error::*, fs::FileSystem, manifest::Platform,
    manifest::SchemaRegistry, Context, Digest,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageMetadata {
    /// Digest of the config blob
    pub id: Digest,
    /// Digest of the manifest, when known
    pub digest: Option<Digest>,
    /// Reference the image was requested by
    pub name: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    pub platform: Platform,
    pub created: Option<String>,
    /// Uncompressed size of the layers, `-1` when unknown
    pub size: i64,
    /// Size of the layers as transferred, unknown for local storage
    pub compressed_size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LayerMetadata {
    /// Digest of the uncompressed layer tarball
    pub diff_id: Option<Digest>,
    /// Digest of the blob as stored in a registry
    pub digest: Option<Digest>,
    pub chain_id: Option<Digest>,
    pub media_type: String,
    /// `-1` when unknown
    pub size: i64,
    /// Build step which created this layer
    pub created_by: Option<String>,
}

/// One layer of an image
pub trait Layer: Send + Sync {
    fn metadata(&self) -> &LayerMetadata;

    /// Files of the layer, whiteouts appear as `.wh.` prefixed files
    fn get_fs(&self, ctx: &Context) -> Result<Box<dyn FileSystem>>;
}

/// Image resolved for one request
///
/// Reads after construction are idempotent. [ImageCloser::close] releases any
/// resource held by the image.
pub trait ImageCloser: Send + Sync {
    fn metadata(&self) -> &ImageMetadata;

    /// The raw config blob
    fn config_file(&self, ctx: &Context) -> Result<Vec<u8>>;

    /// Layers from the base layer to the top, throwaway layers excluded
    fn layers(&self, ctx: &Context) -> Result<Vec<Arc<dyn Layer>>>;

    fn close(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageOptions {
    /// Platform to pick from an index, the host platform when unset
    pub platform: Option<Platform>,
}

pub trait Storage: Send + Sync {
    fn get_image(
        &self,
        ctx: &Context,
        reference: &str,
        opts: &ImageOptions,
    ) -> Result<Box<dyn ImageCloser>>;
}

/// Open a storage for a URI of the registered scheme
pub type OpenFn = Box<dyn Fn(&Context, &Url) -> Result<Box<dyn Storage>> + Send + Sync>;

/// URI scheme to storage mapping, e.g. `rootfs:///var/lib/docker`
#[derive(Default)]
pub struct StorageRegistry {
    openers: RwLock<BTreeMap<String, OpenFn>>,
}

pub const ROOTFS_SCHEME: &str = "rootfs";
pub const REMOTE_SCHEME: &str = "remote";

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `rootfs` and `remote` storages configured by `config`
    pub fn with_builtin(config: &Config) -> Self {
        let registry = Self::new();

        let docker_root = config.docker_root.clone();
        let driver = config.driver.clone();
        let drivers = Arc::new(DriverRegistry::with_builtin());
        registry.must_register(
            ROOTFS_SCHEME,
            Box::new(move |ctx: &Context, url: &Url| -> Result<Box<dyn Storage>> {
                let root = match url.path() {
                    "" | "/" => docker_root.clone(),
                    path => PathBuf::from(path),
                };
                let storage = RootfsStorage::new(ctx, &root, &drivers, driver.as_deref())?;
                Ok(Box::new(storage))
            }),
        );

        let platform = config.platform.clone();
        registry.must_register(
            REMOTE_SCHEME,
            Box::new(move |_: &Context, _: &Url| -> Result<Box<dyn Storage>> {
                let storage = RemoteStorage::new(
                    Arc::new(SchemaRegistry::with_builtin()),
                    Box::new(remote::HttpClientFactory),
                )
                .with_default_platform(platform.clone());
                Ok(Box::new(storage))
            }),
        );
        registry
    }

    pub fn register(&self, scheme: &str, open: OpenFn) -> Result<()> {
        let mut openers = self.openers.write();
        if openers.contains_key(scheme) {
            return Err(Error::AlreadyRegistered(scheme.to_string()));
        }
        openers.insert(scheme.to_string(), open);
        Ok(())
    }

    /// Same as [StorageRegistry::register], but panics on duplicate
    pub fn must_register(&self, scheme: &str, open: OpenFn) {
        if let Err(e) = self.register(scheme, open) {
            panic!("{}", e);
        }
    }

    pub fn schemes(&self) -> Vec<String> {
        self.openers.read().keys().cloned().collect()
    }

    pub fn open(&self, ctx: &Context, uri: &str) -> Result<Box<dyn Storage>> {
        let url = Url::parse(uri)?;
        let openers = self.openers.read();
        let open = openers
            .get(url.scheme())
            .ok_or_else(|| Error::Unsupported(format!("storage scheme `{}`", url.scheme())))?;
        open(ctx, &url)
    }
}
