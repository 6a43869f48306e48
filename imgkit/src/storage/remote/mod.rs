//! Images in a registry implementing the [distribution API](https://github.com/opencontainers/distribution-spec)

mod auth;
mod client;

pub use auth::{AuthChallenge, StoredAuth};
pub use client::Client;

use super::{ImageCloser, ImageMetadata, ImageOptions, Layer, LayerMetadata, Storage};
use crate::{
    error::*,
    fs::{FileSystem, MemFs},
    manifest::{
        detect_media_type, image_size, Descriptor, LayerDescriptor, Manifest, Platform,
        SchemaRegistry,
    },
    reference::ImageReference,
    Context, Digest,
};
use flate2::read::GzDecoder;
use oci_spec::image::ImageConfiguration;
use std::{io::Read, sync::Arc};

/// Access to one repository of a registry
pub trait RegistryClient: Send + Sync {
    /// Manifest bytes of the tag or digest of `reference`, and their descriptor
    fn fetch_tag_or_digest(
        &self,
        ctx: &Context,
        reference: &ImageReference,
    ) -> Result<(Vec<u8>, Descriptor)>;

    /// Descriptor of the manifest without fetching it
    fn stat_tag_or_digest(&self, ctx: &Context, reference: &ImageReference) -> Result<Descriptor>;

    fn fetch_blob(&self, ctx: &Context, reference: &ImageReference, digest: &Digest)
        -> Result<Vec<u8>>;
}

/// Create a client for the repository of a reference
pub trait ClientFactory: Send + Sync {
    /// `accept` lists the manifest media types the client should ask for
    fn client(
        &self,
        reference: &ImageReference,
        accept: &[String],
    ) -> Result<Arc<dyn RegistryClient>>;
}

/// Creates [Client] with the credentials of docker, podman and imgkit
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn client(
        &self,
        reference: &ImageReference,
        accept: &[String],
    ) -> Result<Arc<dyn RegistryClient>> {
        let auth = StoredAuth::load_all()?;
        Ok(Arc::new(Client::new(reference, accept, auth)?))
    }
}

/// Storage backed by container registries
pub struct RemoteStorage {
    schemas: Arc<SchemaRegistry>,
    clients: Box<dyn ClientFactory>,
    default_platform: Option<Platform>,
}

impl RemoteStorage {
    pub fn new(schemas: Arc<SchemaRegistry>, clients: Box<dyn ClientFactory>) -> Self {
        RemoteStorage {
            schemas,
            clients,
            default_platform: None,
        }
    }

    /// Platform picked from an index when the request does not name one
    pub fn with_default_platform(mut self, platform: Option<Platform>) -> Self {
        self.default_platform = platform;
        self
    }

    /// Decode with the media type the registry declared, or a guessed one if it is unknown
    fn decode(&self, raw: &[u8], descriptor: &Descriptor) -> Result<Manifest> {
        let media_type = if !descriptor.media_type.is_empty()
            && self.schemas.get(&descriptor.media_type).is_ok()
        {
            descriptor.media_type.clone()
        } else {
            detect_media_type(raw)
        };
        let (manifest, _) = self.schemas.parse(&media_type, raw)?;
        Ok(manifest)
    }

    fn open_image(
        &self,
        ctx: &Context,
        input: &str,
        opts: &ImageOptions,
    ) -> Result<RemoteImage> {
        let mut reference = ImageReference::parse_normalized(input)?;
        if reference.tag.is_none() && reference.digest.is_none() {
            return Err(Error::InvalidReference(format!(
                "{}: neither tag nor digest is specified",
                input
            )));
        }
        let accept: Vec<String> = self
            .schemas
            .media_types()
            .into_iter()
            .map(str::to_string)
            .collect();
        let client = self.clients.client(&reference, &accept)?;
        let repo_tags: Vec<String> = reference
            .tag
            .iter()
            .map(|tag| format!("{}:{}", reference.familiar_name(), tag))
            .collect();

        let (raw, descriptor) = client.fetch_tag_or_digest(ctx, &reference)?;
        let mut manifest = self.decode(&raw, &descriptor)?;
        let mut platform = None;
        if manifest.as_index_manifest().is_some() {
            let wanted = opts
                .platform
                .clone()
                .or_else(|| self.default_platform.clone())
                .unwrap_or_else(Platform::host);
            let selected = manifest.select_platform(&wanted)?;
            log::debug!(
                "Select {} for {}/{} from {}",
                selected.digest,
                wanted.os,
                wanted.architecture,
                reference
            );
            reference = ImageReference {
                digest: Some(selected.digest.clone()),
                ..reference.without_tag()
            };
            let (raw, descriptor) = client.fetch_tag_or_digest(ctx, &reference)?;
            manifest = self.decode(&raw, &descriptor)?;
            platform = selected.platform;
        }
        let image = manifest.as_image_manifest().ok_or_else(|| {
            Error::Unsupported(format!("nested index {} in {}", manifest.media_type(), input))
        })?;
        let layer_descriptors = image.layers();
        let non_empty: Vec<LayerDescriptor> = layer_descriptors
            .iter()
            .filter(|layer| !layer.empty)
            .cloned()
            .collect();

        let (config_file, config) = match image.config() {
            Some(config) => {
                let blob = client.fetch_blob(ctx, &reference, &config.digest)?;
                let parsed = ImageConfiguration::from_reader(blob.as_slice())?;
                (Some((config.digest.clone(), blob)), Some(parsed))
            }
            None => (None, None),
        };

        let (diff_ids, history) = match &config {
            Some(config) => {
                let diff_ids = config
                    .rootfs()
                    .diff_ids()
                    .iter()
                    .map(|diff_id| Digest::new(diff_id).map(Some))
                    .collect::<Result<Vec<_>>>()?;
                let history: Vec<Option<String>> = config
                    .history()
                    .iter()
                    .filter(|h| !h.empty_layer().unwrap_or(false))
                    .map(|h| h.created_by().as_ref().map(|s| s.to_string()))
                    .collect();
                (diff_ids, history)
            }
            None => (Vec::new(), Vec::new()),
        };
        let diff_ids = if diff_ids.len() == non_empty.len() {
            diff_ids
        } else {
            if config.is_some() {
                log::warn!(
                    "{} lists {} layers but its config has {} DiffIDs",
                    reference,
                    non_empty.len(),
                    diff_ids.len()
                );
            }
            vec![None; non_empty.len()]
        };
        let history = if history.len() == non_empty.len() {
            history
        } else {
            if config.is_some() {
                log::warn!(
                    "{} has {} non-empty history entries for {} layers, ignoring history",
                    reference,
                    history.len(),
                    non_empty.len()
                );
            }
            vec![None; non_empty.len()]
        };
        let chain_ids: Vec<Option<Digest>> = if diff_ids.iter().all(Option::is_some) {
            let known: Vec<Digest> = diff_ids.iter().flatten().cloned().collect();
            Digest::chain_ids(&known).into_iter().map(Some).collect()
        } else {
            vec![None; non_empty.len()]
        };

        let mut layers: Vec<Arc<dyn Layer>> = Vec::with_capacity(non_empty.len());
        for (((layer, diff_id), chain_id), created_by) in
            non_empty.into_iter().zip(diff_ids).zip(chain_ids).zip(history)
        {
            layers.push(Arc::new(RemoteLayer {
                metadata: LayerMetadata {
                    diff_id,
                    digest: Some(layer.descriptor.digest.clone()),
                    chain_id,
                    media_type: layer.descriptor.media_type.clone(),
                    size: layer.descriptor.size,
                    created_by,
                },
                client: client.clone(),
                reference: reference.clone(),
                descriptor: layer.descriptor,
            }));
        }

        let (platform, created) = match (&config_file, &config, &manifest) {
            (Some((_, blob)), Some(config), _) => (
                serde_json::from_slice::<Platform>(blob)?,
                config.created().as_ref().map(|s| s.to_string()),
            ),
            (_, _, Manifest::Schema1(schema1)) => (
                Platform::new("linux", &schema1.architecture, None),
                schema1.extracted.first().and_then(|v1| v1.created.clone()),
            ),
            _ => (platform.unwrap_or_else(Platform::host), None),
        };

        let manifest_digest = manifest.digest();
        let id = match &config_file {
            Some((digest, _)) => digest.clone(),
            None => manifest_digest.clone(),
        };
        let metadata = ImageMetadata {
            id,
            digest: Some(manifest_digest.clone()),
            name: input.to_string(),
            repo_tags,
            repo_digests: vec![format!("{}@{}", reference.familiar_name(), manifest_digest)],
            platform,
            created,
            size: -1,
            compressed_size: Some(image_size(&layer_descriptors)),
        };
        Ok(RemoteImage {
            metadata,
            config_file: config_file.map(|(_, blob)| blob),
            layers,
        })
    }
}

impl Storage for RemoteStorage {
    fn get_image(
        &self,
        ctx: &Context,
        reference: &str,
        opts: &ImageOptions,
    ) -> Result<Box<dyn ImageCloser>> {
        Ok(Box::new(self.open_image(ctx, reference, opts)?))
    }
}

struct RemoteImage {
    metadata: ImageMetadata,
    /// `None` for schema 1 manifests, which have no config blob
    config_file: Option<Vec<u8>>,
    layers: Vec<Arc<dyn Layer>>,
}

impl ImageCloser for RemoteImage {
    fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    fn config_file(&self, ctx: &Context) -> Result<Vec<u8>> {
        ctx.check()?;
        self.config_file.clone().ok_or_else(|| {
            Error::Unsupported(format!(
                "config blob of schema 1 image {}",
                self.metadata.name
            ))
        })
    }

    fn layers(&self, ctx: &Context) -> Result<Vec<Arc<dyn Layer>>> {
        ctx.check()?;
        Ok(self.layers.clone())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct RemoteLayer {
    metadata: LayerMetadata,
    client: Arc<dyn RegistryClient>,
    reference: ImageReference,
    descriptor: Descriptor,
}

impl Layer for RemoteLayer {
    fn metadata(&self) -> &LayerMetadata {
        &self.metadata
    }

    /// Download and unpack the whole layer into memory
    fn get_fs(&self, ctx: &Context) -> Result<Box<dyn FileSystem>> {
        let blob = self
            .client
            .fetch_blob(ctx, &self.reference, &self.descriptor.digest)?;
        Ok(Box::new(unpack_layer(ctx, &blob)?))
    }
}

/// Unpack a layer tarball, gzip compressed or not, into memory
///
/// Whiteouts stay `.wh.` prefixed regular files as they are in the archive.
pub fn unpack_layer(ctx: &Context, blob: &[u8]) -> Result<MemFs> {
    let reader: Box<dyn Read + '_> = if blob.starts_with(&[0x1f, 0x8b]) {
        Box::new(GzDecoder::new(blob))
    } else {
        Box::new(blob)
    };
    let mut archive = tar::Archive::new(reader);
    let mut files = MemFs::new();
    for entry in archive.entries()? {
        ctx.check()?;
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let entry_type = entry.header().entry_type();
        let mode = entry.header().mode().unwrap_or(0o644);
        match entry_type {
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                files.add_file_with_mode(&path, &data, mode)?;
            }
            tar::EntryType::Directory => files.add_dir(&path)?,
            tar::EntryType::Symlink => {
                if let Some(target) = entry.link_name()? {
                    files.add_symlink(&path, target)?;
                }
            }
            tar::EntryType::Link => {
                if let Some(target) = entry.link_name()? {
                    let data = files.read(&target)?;
                    files.add_file_with_mode(&path, &data, mode)?;
                }
            }
            tar::EntryType::Char => {
                let major = entry.header().device_major()?.unwrap_or(0);
                let minor = entry.header().device_minor()?.unwrap_or(0);
                files.add_char_device(&path, makedev(major as u64, minor as u64))?;
            }
            other => log::debug!("Skip {:?} entry {}", other, path.display()),
        }
    }
    Ok(files)
}

/// Device number in the Linux encoding
fn makedev(major: u64, minor: u64) -> u64 {
    ((major & 0xfffff000) << 32)
        | ((major & 0x00000fff) << 8)
        | ((minor & 0xffffff00) << 12)
        | (minor & 0x000000ff)
}
