use unregistry_core::registry::Repository;
use unregistry_core::ImageReference;

use crate::blobs::ContainerdBlobStore;
use crate::client::ContainerdClient;
use crate::manifests::ContainerdManifestStore;
use crate::tags::ContainerdTagStore;

/// One repository of the registry. Stateless and cheap: it is recreated per
/// request and hands out equally cheap store values sharing one client.
#[derive(Clone)]
pub struct ContainerdRepository {
    client: ContainerdClient,
    reference: ImageReference,
}

impl ContainerdRepository {
    pub(crate) fn new(client: ContainerdClient, reference: ImageReference) -> Self {
        Self { client, reference }
    }
}

impl Repository for ContainerdRepository {
    type BlobStore = ContainerdBlobStore;
    type ManifestStore = ContainerdManifestStore;
    type TagStore = ContainerdTagStore;

    fn named(&self) -> &ImageReference {
        &self.reference
    }

    fn blobs(&self) -> ContainerdBlobStore {
        ContainerdBlobStore::new(self.client.clone(), self.reference.clone())
    }

    fn manifests(&self) -> ContainerdManifestStore {
        ContainerdManifestStore::new(self.blobs(), self.reference.clone())
    }

    fn tags(&self) -> ContainerdTagStore {
        ContainerdTagStore::new(self.client.clone(), self.reference.clone(), self.blobs())
    }
}
