use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use containerd_client::services::v1::{
    CreateImageRequest, GetImageRequest, Image, UpdateImageRequest, UpdateRequest,
};
use containerd_client::types::Descriptor as ContainerdDescriptor;
use oci_spec::image::{Descriptor, DescriptorBuilder, MediaType};
use tracing::debug;

use unregistry_core::registry::{BlobStore, TagStore};
use unregistry_core::{
    is_manifest_media_type, Error as CoreError, ImageReference, Manifest, ManifestKind, OciDigest,
};

use crate::blobs::ContainerdBlobStore;
use crate::client::ContainerdClient;
use crate::errors::{internal, is_already_exists, is_not_found};

/// Label prefix containerd's garbage collector follows from a content entry
/// to the children it references.
const GC_REF_LABEL_PREFIX: &str = "containerd.io/gc.ref.content";

/// Tag access backed by the containerd image namespace. Image records are
/// the garbage-collection roots, so tagging is also where the manifest DAG
/// is made reachable: reference labels are applied across the DAG before the
/// record is written. In the reverse order a collection running between the
/// two steps could see a reachable root with unreachable children.
pub struct ContainerdTagStore {
    client: ContainerdClient,
    repo: ImageReference,
    blobs: ContainerdBlobStore,
}

impl ContainerdTagStore {
    pub(crate) fn new(
        client: ContainerdClient,
        repo: ImageReference,
        blobs: ContainerdBlobStore,
    ) -> Self {
        Self { client, repo, blobs }
    }

    /// Walk the manifest DAG from `root` and label every parent's content
    /// entry with the digests of its children. Children that are themselves
    /// manifests are descended into when present; a child listed by an index
    /// but not pushed (a partial multi-platform push) is labeled on the
    /// parent and skipped.
    async fn label_references(&self, root: &OciDigest) -> unregistry_core::Result<()> {
        let mut queue: VecDeque<OciDigest> = VecDeque::from([root.clone()]);
        let mut is_root = true;

        while let Some(digest) = queue.pop_front() {
            let payload = match self.blobs.get(&digest).await {
                Ok(payload) => payload,
                Err(CoreError::BlobUnknown(_)) if !is_root => continue,
                Err(e) => return Err(e),
            };
            is_root = false;

            let manifest = Manifest::parse(payload)?;
            let labels = child_labels(&manifest);
            if !labels.is_empty() {
                self.set_content_labels(&digest, labels).await?;
            }

            for child in manifest.children() {
                if is_manifest_media_type(&child.media_type().to_string()) {
                    queue.push_back(child.digest().as_str().try_into()?);
                }
            }
        }

        Ok(())
    }

    async fn set_content_labels(
        &self,
        digest: &OciDigest,
        labels: HashMap<String, String>,
    ) -> unregistry_core::Result<()> {
        let paths = labels
            .keys()
            .map(|key| format!("labels.{key}"))
            .collect::<Vec<_>>();
        let info = containerd_client::services::v1::Info {
            digest: digest.to_string(),
            labels,
            ..Default::default()
        };
        let request = UpdateRequest {
            info: Some(info),
            update_mask: Some(prost_types::FieldMask { paths }),
        };
        let request = self.client.request(request, None)?;
        self.client
            .content()
            .update(request)
            .await
            .map_err(|status| {
                internal(format!("set reference labels on content '{digest}'"), status)
            })?;
        debug!(digest = %digest, "applied reference labels to containerd content");
        Ok(())
    }
}

/// Reference labels for the content a manifest points at, following the
/// containerd conventions: `config` for the image config, `l.<i>` for
/// layers, `m.<i>` for the manifests of an index.
fn child_labels(manifest: &Manifest) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    match manifest.kind() {
        ManifestKind::Image(img) => {
            labels.insert(
                format!("{GC_REF_LABEL_PREFIX}.config"),
                img.config().digest().clone(),
            );
            for (i, layer) in img.layers().iter().enumerate() {
                labels.insert(
                    format!("{GC_REF_LABEL_PREFIX}.l.{i}"),
                    layer.digest().clone(),
                );
            }
        }
        ManifestKind::Index(index) => {
            for (i, child) in index.manifests().iter().enumerate() {
                labels.insert(
                    format!("{GC_REF_LABEL_PREFIX}.m.{i}"),
                    child.digest().clone(),
                );
            }
        }
    }
    labels
}

#[async_trait]
impl TagStore for ContainerdTagStore {
    async fn get(&self, tag: &str) -> unregistry_core::Result<Descriptor> {
        let name = self.repo.tagged(tag)?;
        let request = self.client.request(GetImageRequest { name: name.clone() }, None)?;
        let image = match self.client.images().get(request).await {
            Ok(response) => response
                .into_inner()
                .image
                .ok_or_else(|| internal("get image", "missing image in response"))?,
            Err(status) if is_not_found(&status) => {
                debug!(image = %name, "image not found in containerd image store");
                return Err(CoreError::TagUnknown(tag.to_string()));
            }
            Err(status) => {
                return Err(internal(
                    format!("get image '{name}' from containerd image store"),
                    status,
                ));
            }
        };

        let target = image
            .target
            .ok_or_else(|| internal("get image", "image record has no target"))?;
        let descriptor = DescriptorBuilder::default()
            .media_type(MediaType::from(target.media_type.as_str()))
            .digest(target.digest)
            .size(target.size)
            .build()
            .map_err(|e| internal("build image target descriptor", e))?;
        Ok(descriptor)
    }

    async fn tag(&self, tag: &str, target: &Descriptor) -> unregistry_core::Result<()> {
        let name = self.repo.tagged(tag)?;
        let digest: OciDigest = target.digest().as_str().try_into()?;

        // Labels first. Once they are in place the image record is a single
        // durable write that flips the whole DAG to referenced.
        self.label_references(&digest).await?;

        let image = Image {
            name: name.clone(),
            target: Some(ContainerdDescriptor {
                media_type: target.media_type().to_string(),
                digest: digest.to_string(),
                size: target.size(),
                annotations: HashMap::new(),
            }),
            ..Default::default()
        };

        let request = self.client.request(
            CreateImageRequest {
                image: Some(image.clone()),
                ..Default::default()
            },
            None,
        )?;
        match self.client.images().create(request).await {
            Ok(_) => {
                debug!(image = %name, digest = %digest, "created image in containerd image store");
                Ok(())
            }
            Err(status) if is_already_exists(&status) => {
                let request = self.client.request(
                    UpdateImageRequest {
                        image: Some(image),
                        ..Default::default()
                    },
                    None,
                )?;
                self.client.images().update(request).await.map_err(|status| {
                    internal(format!("update image '{name}' in containerd image store"), status)
                })?;
                debug!(image = %name, digest = %digest, "updated image in containerd image store");
                Ok(())
            }
            Err(status) => Err(internal(
                format!("create image '{name}' in containerd image store"),
                status,
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;

    const MANIFEST: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a",
            "size": 2
        },
        "layers": [
            {
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": "sha256:2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae",
                "size": 3
            },
            {
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": "sha256:fcde2b2edba56bf408601fb721fe9b5c338d10ee429ea04fae5511b68fbf8fb9",
                "size": 3
            }
        ]
    }"#;

    const INDEX: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae",
                "size": 3,
                "platform": { "architecture": "amd64", "os": "linux" }
            },
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:fcde2b2edba56bf408601fb721fe9b5c338d10ee429ea04fae5511b68fbf8fb9",
                "size": 3,
                "platform": { "architecture": "arm64", "os": "linux" }
            }
        ]
    }"#;

    #[test]
    fn image_manifest_labels_name_config_and_layers() {
        let manifest = Manifest::parse(Bytes::from(MANIFEST)).unwrap();
        let labels = child_labels(&manifest);

        assert_eq!(labels.len(), 3);
        assert_eq!(
            labels
                .get("containerd.io/gc.ref.content.config")
                .map(String::as_str),
            Some("sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"),
        );
        assert_eq!(
            labels
                .get("containerd.io/gc.ref.content.l.0")
                .map(String::as_str),
            Some("sha256:2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae"),
        );
        assert_eq!(
            labels
                .get("containerd.io/gc.ref.content.l.1")
                .map(String::as_str),
            Some("sha256:fcde2b2edba56bf408601fb721fe9b5c338d10ee429ea04fae5511b68fbf8fb9"),
        );
    }

    #[test]
    fn index_labels_name_child_manifests() {
        let manifest = Manifest::parse(Bytes::from(INDEX)).unwrap();
        let labels = child_labels(&manifest);

        assert_eq!(labels.len(), 2);
        assert_eq!(
            labels
                .get("containerd.io/gc.ref.content.m.0")
                .map(String::as_str),
            Some("sha256:2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae"),
        );
        assert_eq!(
            labels
                .get("containerd.io/gc.ref.content.m.1")
                .map(String::as_str),
            Some("sha256:fcde2b2edba56bf408601fb721fe9b5c338d10ee429ea04fae5511b68fbf8fb9"),
        );
    }
}
