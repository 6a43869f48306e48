use super::{
    media_type, validate_unambiguous_manifest_format, AllowedFields, Descriptor, ImageManifest,
    IndexManifest, LayerDescriptor, Manifest,
};
use crate::error::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// [OCI image manifest](https://github.com/opencontainers/image-spec/blob/v1.1.0/manifest.md)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(skip)]
    pub(super) payload: Vec<u8>,
}

/// [OCI image index](https://github.com/opencontainers/image-spec/blob/v1.1.0/image-index.md)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(skip)]
    pub(super) payload: Vec<u8>,
}

/// Check `schemaVersion` and the optional `mediaType`, filling the latter when absent
pub(super) fn check_header(
    schema_version: u32,
    media_type: &mut Option<String>,
    expected: &str,
) -> Result<()> {
    if schema_version != 2 {
        return Err(Error::invalid_field(
            "schemaVersion",
            format!("expected 2 for {}, got {}", expected, schema_version),
        ));
    }
    match media_type.as_deref() {
        None => {
            *media_type = Some(expected.to_string());
            Ok(())
        }
        Some(found) if found == expected => Ok(()),
        Some(found) => Err(Error::invalid_field(
            "mediaType",
            format!("expected {}, got {}", expected, found),
        )),
    }
}

impl OciManifest {
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        validate_unambiguous_manifest_format(
            raw,
            media_type::OCI_MANIFEST,
            AllowedFields::CONFIG | AllowedFields::LAYERS,
        )?;
        let mut manifest: OciManifest = serde_json::from_slice(raw)?;
        check_header(
            manifest.schema_version,
            &mut manifest.media_type,
            media_type::OCI_MANIFEST,
        )?;
        manifest.payload = raw.to_vec();
        Ok(manifest)
    }

    pub fn media_type(&self) -> &str {
        self.media_type.as_deref().unwrap_or(media_type::OCI_MANIFEST)
    }
}

impl ImageManifest for OciManifest {
    fn config(&self) -> Option<&Descriptor> {
        Some(&self.config)
    }

    fn layers(&self) -> Vec<LayerDescriptor> {
        self.layers
            .iter()
            .map(|layer| LayerDescriptor {
                descriptor: layer.clone(),
                empty: false,
            })
            .collect()
    }
}

impl OciIndex {
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        validate_unambiguous_manifest_format(raw, media_type::OCI_INDEX, AllowedFields::MANIFESTS)?;
        let mut index: OciIndex = serde_json::from_slice(raw)?;
        check_header(
            index.schema_version,
            &mut index.media_type,
            media_type::OCI_INDEX,
        )?;
        index.payload = raw.to_vec();
        Ok(index)
    }

    pub fn media_type(&self) -> &str {
        self.media_type.as_deref().unwrap_or(media_type::OCI_INDEX)
    }
}

impl IndexManifest for OciIndex {
    fn manifests(&self) -> &[Descriptor] {
        &self.manifests
    }
}

pub(super) fn decode_manifest(raw: &[u8]) -> Result<Manifest> {
    Ok(Manifest::OciManifest(OciManifest::from_slice(raw)?))
}

pub(super) fn decode_index(raw: &[u8]) -> Result<Manifest> {
    Ok(Manifest::OciIndex(OciIndex::from_slice(raw)?))
}
