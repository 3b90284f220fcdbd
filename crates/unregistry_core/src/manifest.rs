use bytes::Bytes;
use oci_spec::image::{Descriptor, ImageIndex, ImageManifest, MediaType};

use crate::{Error, OciDigest, Result};

pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// The parsed form of a manifest payload.
#[derive(Clone, Debug)]
pub enum ManifestKind {
    /// A single-platform image manifest: a config plus layers. Covers both
    /// the OCI image manifest and Docker schema 2 formats.
    Image(ImageManifest),
    /// A multi-platform index: a list of per-platform manifest descriptors.
    /// Covers both the OCI index and Docker manifest list formats.
    Index(ImageIndex),
}

/// A manifest as stored by the registry: the exact payload bytes provided by
/// the client plus their parsed form. The payload is kept verbatim because
/// the digest is computed over the bytes on the wire; recoding the document
/// would change its identity.
#[derive(Clone, Debug)]
pub struct Manifest {
    kind: ManifestKind,
    media_type: String,
    digest: OciDigest,
    payload: Bytes,
}

impl Manifest {
    /// Parse a manifest payload, sniffing the format by attempted
    /// deserialization: image manifests first (OCI image manifest and Docker
    /// schema 2), then indexes (OCI index and Docker manifest list).
    pub fn parse(payload: Bytes) -> Result<Self> {
        let (kind, media_type) = if let Ok(img) = serde_json::from_slice::<ImageManifest>(&payload)
        {
            let media_type = img
                .media_type()
                .clone()
                .map(|mt| mt.to_string())
                .unwrap_or_else(|| MEDIA_TYPE_OCI_MANIFEST.to_string());
            (ManifestKind::Image(img), media_type)
        } else if let Ok(index) = serde_json::from_slice::<ImageIndex>(&payload) {
            let media_type = index
                .media_type()
                .clone()
                .map(|mt| mt.to_string())
                .unwrap_or_else(|| MEDIA_TYPE_OCI_INDEX.to_string());
            (ManifestKind::Index(index), media_type)
        } else {
            return Err(Error::ManifestVerification(
                "payload matches no known manifest format".to_string(),
            ));
        };

        Ok(Self {
            kind,
            media_type,
            digest: OciDigest::from_bytes(&payload),
            payload,
        })
    }

    pub fn kind(&self) -> &ManifestKind {
        &self.kind
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Digest of the canonical payload.
    pub fn digest(&self) -> &OciDigest {
        &self.digest
    }

    /// The exact bytes provided at parse time.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn size(&self) -> i64 {
        self.payload.len() as i64
    }

    /// Descriptor for this manifest as a referenceable blob.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::new(
            MediaType::from(self.media_type.as_str()),
            self.size(),
            self.digest.to_string(),
        )
    }

    /// Descriptors of the content this manifest references directly: the
    /// config and layers of an image manifest, or the per-platform manifests
    /// of an index.
    pub fn children(&self) -> Vec<Descriptor> {
        match &self.kind {
            ManifestKind::Image(img) => {
                let mut children = Vec::with_capacity(img.layers().len() + 1);
                children.push(img.config().clone());
                children.extend(img.layers().iter().cloned());
                children
            }
            ManifestKind::Index(index) => index.manifests().to_vec(),
        }
    }
}

/// True for media types that describe manifests, i.e. content worth
/// descending into when walking an image DAG.
pub fn is_manifest_media_type(media_type: &str) -> bool {
    matches!(
        media_type,
        MEDIA_TYPE_OCI_MANIFEST
            | MEDIA_TYPE_OCI_INDEX
            | MEDIA_TYPE_DOCKER_MANIFEST
            | MEDIA_TYPE_DOCKER_MANIFEST_LIST
    )
}
