use async_trait::async_trait;
use tracing::debug;

use unregistry_core::registry::{BlobStore, ManifestStore};
use unregistry_core::{Error as CoreError, ImageReference, Manifest, OciDigest};

use crate::blobs::ContainerdBlobStore;

/// Manifest access backed by the content store. Manifests are plain blobs;
/// binding a digest to a name is the tag store's job.
pub struct ContainerdManifestStore {
    blobs: ContainerdBlobStore,
    repo: ImageReference,
}

impl ContainerdManifestStore {
    pub(crate) fn new(blobs: ContainerdBlobStore, repo: ImageReference) -> Self {
        Self { blobs, repo }
    }
}

#[async_trait]
impl ManifestStore for ContainerdManifestStore {
    async fn exists(&self, digest: &OciDigest) -> unregistry_core::Result<bool> {
        match self.blobs.stat(digest).await {
            Ok(_) => Ok(true),
            Err(CoreError::BlobUnknown(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, digest: &OciDigest) -> unregistry_core::Result<Manifest> {
        let payload = match self.blobs.get(digest).await {
            Ok(payload) => payload,
            Err(CoreError::BlobUnknown(_)) => {
                return Err(CoreError::ManifestUnknownRevision(digest.to_string()));
            }
            Err(e) => return Err(e),
        };

        let manifest = Manifest::parse(payload)?;
        debug!(
            repo = %self.repo,
            digest = %digest,
            mediatype = manifest.media_type(),
            "got manifest from containerd content store"
        );
        Ok(manifest)
    }

    async fn put(&self, manifest: &Manifest) -> unregistry_core::Result<OciDigest> {
        let descriptor = self
            .blobs
            .put(manifest.media_type(), manifest.payload().clone())
            .await?;
        debug!(
            repo = %self.repo,
            digest = %descriptor.digest(),
            mediatype = manifest.media_type(),
            "stored manifest in containerd content store"
        );
        descriptor.digest().as_str().try_into()
    }
}
