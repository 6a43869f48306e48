use super::{
    media_type, oci::check_header, validate_unambiguous_manifest_format, AllowedFields,
    Descriptor, ImageManifest, IndexManifest, LayerDescriptor, Manifest,
};
use crate::error::*;
use serde::{Deserialize, Serialize};

/// [Docker image manifest v2, schema 2](https://docs.docker.com/registry/spec/manifest-v2-2/)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema2Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(skip)]
    pub(super) payload: Vec<u8>,
}

/// Docker manifest list, a.k.a. fat manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema2List {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    #[serde(skip)]
    pub(super) payload: Vec<u8>,
}

impl Schema2Manifest {
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        validate_unambiguous_manifest_format(
            raw,
            media_type::DOCKER_V2_SCHEMA2,
            AllowedFields::CONFIG | AllowedFields::LAYERS,
        )?;
        let mut manifest: Schema2Manifest = serde_json::from_slice(raw)?;
        check_header(
            manifest.schema_version,
            &mut manifest.media_type,
            media_type::DOCKER_V2_SCHEMA2,
        )?;
        manifest.payload = raw.to_vec();
        Ok(manifest)
    }

    pub fn media_type(&self) -> &str {
        self.media_type
            .as_deref()
            .unwrap_or(media_type::DOCKER_V2_SCHEMA2)
    }
}

impl ImageManifest for Schema2Manifest {
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

impl Schema2List {
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        validate_unambiguous_manifest_format(
            raw,
            media_type::DOCKER_V2_LIST,
            AllowedFields::MANIFESTS,
        )?;
        let mut list: Schema2List = serde_json::from_slice(raw)?;
        check_header(
            list.schema_version,
            &mut list.media_type,
            media_type::DOCKER_V2_LIST,
        )?;
        list.payload = raw.to_vec();
        Ok(list)
    }

    pub fn media_type(&self) -> &str {
        self.media_type.as_deref().unwrap_or(media_type::DOCKER_V2_LIST)
    }
}

impl IndexManifest for Schema2List {
    fn manifests(&self) -> &[Descriptor] {
        &self.manifests
    }
}

pub(super) fn decode_manifest(raw: &[u8]) -> Result<Manifest> {
    Ok(Manifest::Schema2(Schema2Manifest::from_slice(raw)?))
}

pub(super) fn decode_list(raw: &[u8]) -> Result<Manifest> {
    Ok(Manifest::Schema2List(Schema2List::from_slice(raw)?))
}
