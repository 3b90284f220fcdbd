use unregistry_core::registry::Namespace;
use unregistry_core::ImageReference;

use crate::client::ContainerdClient;
use crate::repository::ContainerdRepository;

/// The registry namespace over a containerd store. Repository names are
/// normalized here; image records are keyed by normalized names, so a read
/// after a write through a non-normalized name would otherwise miss.
#[derive(Clone)]
pub struct ContainerdRegistry {
    client: ContainerdClient,
}

impl ContainerdRegistry {
    pub fn new(client: ContainerdClient) -> Self {
        Self { client }
    }
}

impl Namespace for ContainerdRegistry {
    type Repository = ContainerdRepository;

    fn repository(&self, name: &str) -> unregistry_core::Result<ContainerdRepository> {
        let reference = ImageReference::parse(name)?;
        Ok(ContainerdRepository::new(self.client.clone(), reference))
    }
}
