use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use containerd_client::services::v1::content_client::ContentClient;
use containerd_client::services::v1::images_client::ImagesClient;
use containerd_client::services::v1::leases_client::LeasesClient;
use containerd_client::services::v1::{
    CreateRequest as CreateLeaseRequest, DeleteRequest as DeleteLeaseRequest, Lease,
};
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;
use tonic::Request;
use tracing::debug;

use crate::errors::{is_not_found, Error, Result};

/// Metadata keys containerd reads to scope requests.
const NAMESPACE_HEADER: &str = "containerd-namespace";
const LEASE_HEADER: &str = "containerd-lease";

/// Label containerd's garbage collector reads to expire a lease.
const GC_EXPIRE_LABEL: &str = "containerd.io/gc.expire";

/// How long staged upload content is protected from garbage collection. The
/// push protocol never tells the storage layer when a push is over, so leases
/// are left to expire passively; this bounds the orphan window for uploads
/// that are never referenced by a manifest.
pub const LEASE_EXPIRATION: Duration = Duration::from_secs(60 * 60);

/// Shared connection to containerd, scoped to one namespace. Cloning is
/// cheap; the underlying channel multiplexes concurrent requests.
#[derive(Clone, Debug)]
pub struct ContainerdClient {
    channel: Channel,
    namespace: String,
}

impl ContainerdClient {
    /// Connect to the containerd UNIX socket.
    pub async fn connect(sock: impl AsRef<Path>, namespace: impl Into<String>) -> Result<Self> {
        let channel = containerd_client::connect(sock.as_ref()).await?;
        let namespace = namespace.into();
        debug!(%namespace, sock = %sock.as_ref().display(), "connected to containerd");
        Ok(Self { channel, namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn content(&self) -> ContentClient<Channel> {
        ContentClient::new(self.channel.clone())
    }

    pub(crate) fn images(&self) -> ImagesClient<Channel> {
        ImagesClient::new(self.channel.clone())
    }

    pub(crate) fn leases(&self) -> LeasesClient<Channel> {
        LeasesClient::new(self.channel.clone())
    }

    /// Build a request carrying the namespace and, if given, a lease id.
    pub(crate) fn request<T>(&self, message: T, lease: Option<&str>) -> Result<Request<T>> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert(NAMESPACE_HEADER, MetadataValue::try_from(self.namespace.as_str())?);
        if let Some(id) = lease {
            request
                .metadata_mut()
                .insert(LEASE_HEADER, MetadataValue::try_from(id)?);
        }
        Ok(request)
    }

    /// Create a lease that expires on its own after `expiration`.
    pub(crate) async fn create_lease(&self, expiration: Duration) -> Result<Lease> {
        let request = CreateLeaseRequest {
            id: uuid::Uuid::new_v4().to_string(),
            labels: lease_labels(Utc::now(), expiration),
        };
        let request = self.request(request, None)?;
        let lease = self
            .leases()
            .create(request)
            .await?
            .into_inner()
            .lease
            .ok_or(Error::MissingField("lease"))?;
        debug!(lease = %lease.id, "created containerd lease");
        Ok(lease)
    }

    /// Delete a lease. Deleting an already-deleted lease is not an error.
    pub(crate) async fn delete_lease(&self, id: &str) -> Result<()> {
        let request = self.request(
            DeleteLeaseRequest {
                id: id.to_string(),
                sync: false,
            },
            None,
        )?;
        match self.leases().delete(request).await {
            Ok(_) => {
                debug!(lease = id, "deleted containerd lease");
                Ok(())
            }
            Err(status) if is_not_found(&status) => Ok(()),
            Err(status) => Err(status.into()),
        }
    }
}

fn lease_labels(now: DateTime<Utc>, expiration: Duration) -> HashMap<String, String> {
    let expire = now + expiration;
    HashMap::from([(
        GC_EXPIRE_LABEL.to_string(),
        expire.to_rfc3339_opts(SecondsFormat::Secs, true),
    )])
}

/// Convert a protobuf timestamp, falling back to the current time when the
/// server omits one.
pub(crate) fn timestamp_to_datetime(ts: Option<&prost_types::Timestamp>) -> DateTime<Utc> {
    ts.and_then(|ts| DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32))
        .unwrap_or_else(Utc::now)
}
