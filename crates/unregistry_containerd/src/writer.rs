use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use containerd_client::services::v1::{
    Lease, WriteAction, WriteContentRequest, WriteContentResponse,
};
use futures::StreamExt;
use oci_spec::image::{Descriptor, DescriptorBuilder, MediaType};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Streaming;
use tracing::debug;
use uuid::Uuid;

use unregistry_core::registry::{BlobWriter, ByteStream};
use unregistry_core::{Error as CoreError, ImageReference, MEDIA_TYPE_OCTET_STREAM, OciDigest};

use crate::client::{timestamp_to_datetime, ContainerdClient, LEASE_EXPIRATION};
use crate::errors::{internal, is_already_exists, Error};

/// Content-writer ref for an upload session id.
pub(crate) fn upload_ref(id: &str) -> String {
    format!("upload-{id}")
}

/// A resumable blob upload backed by a containerd content writer.
///
/// The writer owns a lease that keeps the staged content (and, once
/// committed, the blob) out of the garbage collector's reach. The lease is
/// intentionally not deleted on a successful commit: the push is still
/// uploading sibling blobs and the manifest, and nothing references this
/// blob until the final tag lands. The lease expires on its own instead.
pub struct ContainerdBlobWriter {
    client: ContainerdClient,
    id: String,
    lease: Lease,
    upload_ref: String,
    requests: Option<mpsc::Sender<WriteContentRequest>>,
    responses: Streaming<WriteContentResponse>,
    /// Total bytes staged under the ref, including previous sessions.
    size: i64,
    /// Bytes written through this session only.
    session_bytes: i64,
    started_at: DateTime<Utc>,
    committed: bool,
    lease_deleted: bool,
}

impl ContainerdBlobWriter {
    /// Open a writer for a new upload (`id` absent) or resume an existing
    /// one. A fresh lease is created either way; the staging ref is keyed by
    /// the id, so resuming picks up previously written bytes.
    pub(crate) async fn open(
        client: &ContainerdClient,
        repo: &ImageReference,
        id: Option<&str>,
    ) -> unregistry_core::Result<Self> {
        let id = id
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let upload_ref = upload_ref(&id);

        let lease = client
            .create_lease(LEASE_EXPIRATION)
            .await
            .map_err(|e| internal("create containerd lease", e))?;

        // Open the content write stream under the lease. The initial Stat
        // both creates the staging ref and reports the current offset, which
        // is nonzero when resuming.
        let (requests, receiver) = mpsc::channel::<WriteContentRequest>(8);
        let stat = WriteContentRequest {
            action: WriteAction::Stat as i32,
            r#ref: upload_ref.clone(),
            ..Default::default()
        };
        requests
            .send(stat)
            .await
            .map_err(|_| internal("open containerd content writer", Error::WriteStreamClosed))?;

        let opened = async {
            let request = client.request(ReceiverStream::new(receiver), Some(&lease.id))?;
            let mut responses = client.content().write(request).await?.into_inner();
            let status = match responses.message().await? {
                Some(status) => status,
                None => return Err(Error::WriteStreamClosed),
            };
            Ok((responses, status))
        }
        .await;

        let (responses, status) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                let _ = client.delete_lease(&lease.id).await;
                return Err(internal("create containerd content writer", e));
            }
        };

        let started_at = timestamp_to_datetime(lease.created_at.as_ref());
        debug!(
            writer.id = %id,
            repo = %repo,
            size = status.offset,
            "created containerd blob writer"
        );

        Ok(Self {
            client: client.clone(),
            id,
            lease,
            upload_ref,
            requests: Some(requests),
            responses,
            size: status.offset,
            session_bytes: 0,
            started_at,
            committed: false,
            lease_deleted: false,
        })
    }

    async fn delete_lease(&mut self) -> Result<(), Error> {
        if self.lease_deleted {
            return Ok(());
        }
        self.client.delete_lease(&self.lease.id).await?;
        self.lease_deleted = true;
        Ok(())
    }

    /// Send one request and wait for its response.
    async fn round_trip(
        &mut self,
        request: WriteContentRequest,
    ) -> Result<WriteContentResponse, Error> {
        let sender = self
            .requests
            .clone()
            .ok_or(Error::WriteStreamClosed)?;
        if sender.send(request).await.is_err() {
            // The stream is dead; surface the server's close status.
            return match self.responses.message().await {
                Err(status) => Err(status.into()),
                _ => Err(Error::WriteStreamClosed),
            };
        }
        match self.responses.message().await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(Error::WriteStreamClosed),
            Err(status) => Err(status.into()),
        }
    }

    async fn write_chunk(&mut self, data: Bytes) -> unregistry_core::Result<usize> {
        let len = data.len();
        let offset = self.size;
        let request = WriteContentRequest {
            action: WriteAction::Write as i32,
            r#ref: self.upload_ref.clone(),
            offset,
            data: data.to_vec(),
            ..Default::default()
        };
        let response = self
            .round_trip(request)
            .await
            .map_err(|e| internal("write data to containerd blob writer", e))?;

        let written = (response.offset - offset).max(0);
        self.size = response.offset;
        self.session_bytes += written;
        debug!(writer.id = %self.id, size = written, "wrote data to containerd blob writer");

        if (written as usize) < len {
            return Err(CoreError::Backend(format!(
                "short write to containerd blob writer: {written} of {len} bytes"
            )));
        }
        Ok(len)
    }
}

#[async_trait]
impl BlobWriter for ContainerdBlobWriter {
    fn id(&self) -> &str {
        &self.id
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn size(&self) -> i64 {
        self.size
    }

    async fn write(&mut self, data: Bytes) -> unregistry_core::Result<usize> {
        self.write_chunk(data).await
    }

    async fn read_from(&mut self, mut body: ByteStream) -> unregistry_core::Result<i64> {
        let mut copied: i64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| internal("read upload body", e))?;
            if chunk.is_empty() {
                continue;
            }
            copied += self.write_chunk(chunk).await? as i64;
        }
        debug!(writer.id = %self.id, size = copied, "copied data to containerd blob writer");
        Ok(copied)
    }

    async fn commit(&mut self, descriptor: Descriptor) -> unregistry_core::Result<Descriptor> {
        let digest: OciDigest = descriptor.digest().as_str().try_into()?;
        debug!(
            writer.id = %self.id,
            digest = %digest,
            mediatype = %descriptor.media_type(),
            size = self.size,
            "committing blob to containerd content store"
        );

        // The caller may not know the size; the writer always commits what
        // it actually staged.
        let request = WriteContentRequest {
            action: WriteAction::Commit as i32,
            r#ref: self.upload_ref.clone(),
            total: self.size,
            expected: digest.to_string(),
            offset: self.size,
            ..Default::default()
        };
        match self.round_trip(request).await {
            Ok(_) => {
                // Keep the lease: nothing references this blob until the
                // manifest is tagged, and deleting the lease now would
                // expose it to garbage collection. The lease expires on its
                // own.
                self.committed = true;
                debug!(writer.id = %self.id, digest = %digest, "committed blob to containerd content store");
            }
            Err(Error::Rpc(status)) if is_already_exists(&status) => {
                // Another upload already produced this digest; this writer
                // contributed no new object, so its lease can go.
                let _ = self.delete_lease().await;
                self.committed = true;
                debug!(writer.id = %self.id, digest = %digest, "blob already exists in containerd content store");
            }
            Err(e) => {
                return Err(internal("commit blob to containerd content store", e));
            }
        }

        // Fill in what the caller left out.
        let size = if descriptor.size() == 0 {
            self.size
        } else {
            descriptor.size()
        };
        let media_type = match descriptor.media_type() {
            MediaType::Other(s) if s.is_empty() => MediaType::from(MEDIA_TYPE_OCTET_STREAM),
            mt => mt.clone(),
        };
        let descriptor = DescriptorBuilder::default()
            .media_type(media_type)
            .digest(digest.to_string())
            .size(size)
            .build()
            .map_err(|e| internal("build blob descriptor", e))?;

        Ok(descriptor)
    }

    async fn cancel(&mut self) -> unregistry_core::Result<()> {
        debug!(writer.id = %self.id, "canceling upload: deleting containerd lease");
        self.delete_lease()
            .await
            .map_err(|e| internal("delete containerd lease", e))?;
        Ok(())
    }

    async fn close(&mut self) -> unregistry_core::Result<()> {
        debug!(writer.id = %self.id, "closing containerd blob writer");
        // Dropping the sender ends the write stream.
        self.requests.take();

        // A session that never wrote anything and never committed left
        // nothing worth preserving. Deletion is idempotent.
        if self.session_bytes == 0 && !self.committed {
            self.delete_lease()
                .await
                .map_err(|e| internal("delete containerd lease", e))?;
        }
        Ok(())
    }
}
