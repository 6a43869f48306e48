use super::{media_type, oci, schema1, schema2, Descriptor, Manifest};
use crate::error::*;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Decode manifest bytes of a single media type
pub type DecodeFn = fn(&[u8]) -> Result<Manifest>;

/// Media type to decoder mapping
///
/// Constructed explicitly and handed to whoever parses manifests. Binding a media type
/// twice is an error, except for the default types (`""` and `application/json`) which
/// may be rebound. An empty media type looks up the default decoder.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    decoders: BTreeMap<String, DecodeFn>,
}

impl SchemaRegistry {
    /// Empty registry without any decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with OCI, Docker schema 2 and Docker schema 1 decoders
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.must_register(media_type::OCI_MANIFEST, oci::decode_manifest);
        registry.must_register(media_type::OCI_INDEX, oci::decode_index);
        registry.must_register(media_type::DOCKER_V2_SCHEMA2, schema2::decode_manifest);
        registry.must_register(media_type::DOCKER_V2_LIST, schema2::decode_list);
        registry.must_register(media_type::DOCKER_V2_SCHEMA1, schema1::decode);
        registry.must_register(media_type::DOCKER_V2_SCHEMA1_SIGNED, schema1::decode);
        for default in media_type::DEFAULT_MEDIA_TYPES {
            registry.must_register(default, schema1::decode);
        }
        registry
    }

    pub fn register(&mut self, media_type: &str, decode: DecodeFn) -> Result<()> {
        if self.decoders.contains_key(media_type) && !media_type::is_default(media_type) {
            return Err(Error::AlreadyRegistered(media_type.to_string()));
        }
        self.decoders.insert(media_type.to_string(), decode);
        Ok(())
    }

    /// Same as [SchemaRegistry::register], but panics on duplicate
    pub fn must_register(&mut self, media_type: &str, decode: DecodeFn) {
        if let Err(e) = self.register(media_type, decode) {
            panic!("{}", e);
        }
    }

    pub fn get(&self, media_type: &str) -> Result<DecodeFn> {
        self.decoders
            .get(media_type)
            .copied()
            .ok_or_else(|| Error::SchemaNotFound(media_type.to_string()))
    }

    /// Decode `raw` as `media_type`. The descriptor is computed over `raw` itself.
    pub fn parse(&self, media_type: &str, raw: &[u8]) -> Result<(Manifest, Descriptor)> {
        let decode = self.get(media_type)?;
        let manifest = decode(raw)?;
        let descriptor = Descriptor::from_bytes(manifest.media_type(), raw);
        Ok((manifest, descriptor))
    }

    /// Decode `raw` as the media type guessed by [detect_media_type]
    pub fn parse_bytes(&self, raw: &[u8]) -> Result<(Manifest, Descriptor)> {
        self.parse(&detect_media_type(raw), raw)
    }

    /// Registered media types except the defaults, e.g. for an `Accept` header
    pub fn media_types(&self) -> Vec<&str> {
        self.decoders
            .keys()
            .map(String::as_str)
            .filter(|media_type| !media_type::is_default(media_type))
            .collect()
    }
}

#[derive(Deserialize)]
struct Probe {
    #[serde(rename = "schemaVersion")]
    schema_version: Option<u32>,
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    signatures: Option<serde_json::Value>,
    #[serde(rename = "fsLayers")]
    fs_layers: Option<serde_json::Value>,
    config: Option<serde_json::Value>,
    manifests: Option<Vec<serde_json::Value>>,
}

fn nested_media_type(value: Option<&serde_json::Value>) -> Option<&str> {
    value?.get("mediaType")?.as_str()
}

/// Guess the media type of manifest bytes without decoding them
///
/// Returns an empty string when nothing is recognized, which routes to the default decoder.
pub fn detect_media_type(raw: &[u8]) -> String {
    let probe: Probe = match serde_json::from_slice(raw) {
        Ok(probe) => probe,
        Err(_) => return String::new(),
    };
    if let Some(media_type) = probe.media_type.filter(|m| !m.is_empty()) {
        return media_type;
    }
    let detected = match probe.schema_version {
        Some(1) if probe.signatures.is_some() => media_type::DOCKER_V2_SCHEMA1_SIGNED,
        Some(1) => media_type::DOCKER_V2_SCHEMA1,
        Some(2) => match &probe.manifests {
            Some(manifests) => {
                if nested_media_type(manifests.first()) == Some(media_type::DOCKER_V2_SCHEMA2) {
                    media_type::DOCKER_V2_LIST
                } else {
                    media_type::OCI_INDEX
                }
            }
            None => {
                if nested_media_type(probe.config.as_ref())
                    == Some(media_type::DOCKER_V2_SCHEMA2_CONFIG)
                {
                    media_type::DOCKER_V2_SCHEMA2
                } else {
                    media_type::OCI_MANIFEST
                }
            }
        },
        None if probe.fs_layers.is_some() => media_type::DOCKER_V2_SCHEMA1,
        _ => "",
    };
    detected.to_string()
}
