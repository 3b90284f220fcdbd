use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use containerd_client::services::v1::{InfoRequest, ReadContentRequest};
use oci_spec::image::{Descriptor, DescriptorBuilder, MediaType};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use unregistry_core::registry::{BlobStore, BlobWriter};
use unregistry_core::{Error as CoreError, ImageReference, MEDIA_TYPE_OCTET_STREAM, OciDigest};

use crate::client::ContainerdClient;
use crate::errors::{internal, is_not_found};
use crate::reader::ContentReader;
use crate::writer::ContainerdBlobWriter;

/// Blob access backed by the containerd content store. Deliberately thin:
/// containerd already provides content-addressed dedup, atomic commits,
/// resumable writers and random-access reads, so this only adapts the v2
/// semantics and normalizes errors.
#[derive(Clone)]
pub struct ContainerdBlobStore {
    client: ContainerdClient,
    repo: ImageReference,
}

impl ContainerdBlobStore {
    pub(crate) fn new(client: ContainerdClient, repo: ImageReference) -> Self {
        Self { client, repo }
    }
}

#[async_trait]
impl BlobStore for ContainerdBlobStore {
    type Writer = ContainerdBlobWriter;
    type Reader = ContentReader;

    async fn stat(&self, digest: &OciDigest) -> unregistry_core::Result<Descriptor> {
        let request = InfoRequest {
            digest: digest.to_string(),
        };
        let request = self.client.request(request, None)?;
        let info = match self.client.content().info(request).await {
            Ok(response) => response
                .into_inner()
                .info
                .ok_or_else(|| internal("stat blob", "missing info in response"))?,
            Err(status) if is_not_found(&status) => {
                return Err(CoreError::BlobUnknown(digest.to_string()));
            }
            Err(status) => {
                return Err(internal(
                    format!("get metadata for blob '{digest}' from containerd content store"),
                    status,
                ));
            }
        };

        // The content store is untyped; a blob's media type is conveyed by
        // the manifest that references it.
        let descriptor = DescriptorBuilder::default()
            .media_type(MediaType::from(MEDIA_TYPE_OCTET_STREAM))
            .digest(info.digest)
            .size(info.size)
            .build()
            .map_err(|e| internal("build blob descriptor", e))?;
        Ok(descriptor)
    }

    async fn get(&self, digest: &OciDigest) -> unregistry_core::Result<Bytes> {
        let request = ReadContentRequest {
            digest: digest.to_string(),
            offset: 0,
            size: 0,
        };
        let request = self.client.request(request, None)?;
        let mut responses = match self.client.content().read(request).await {
            Ok(responses) => responses.into_inner(),
            Err(status) if is_not_found(&status) => {
                return Err(CoreError::BlobUnknown(digest.to_string()));
            }
            Err(status) => {
                return Err(internal(
                    format!("read blob '{digest}' from containerd content store"),
                    status,
                ));
            }
        };

        let mut blob = BytesMut::new();
        loop {
            match responses.message().await {
                Ok(Some(message)) => blob.extend_from_slice(&message.data),
                Ok(None) => break,
                Err(status) if is_not_found(&status) => {
                    return Err(CoreError::BlobUnknown(digest.to_string()));
                }
                Err(status) => {
                    return Err(internal(
                        format!("read blob '{digest}' from containerd content store"),
                        status,
                    ));
                }
            }
        }
        Ok(blob.freeze())
    }

    async fn open(&self, digest: &OciDigest) -> unregistry_core::Result<ContentReader> {
        // Stat first: it validates existence and provides the size the
        // section reader needs for end-relative seeks.
        let descriptor = self.stat(digest).await?;
        Ok(ContentReader::new(
            self.client.clone(),
            digest.to_string(),
            descriptor.size(),
        ))
    }

    async fn put(&self, media_type: &str, blob: Bytes) -> unregistry_core::Result<Descriptor> {
        let mut writer = ContainerdBlobWriter::open(&self.client, &self.repo, None).await?;

        let staged = async {
            writer.write(blob.clone()).await?;
            let descriptor = DescriptorBuilder::default()
                .media_type(MediaType::from(media_type))
                .digest(OciDigest::from_bytes(&blob).to_string())
                .size(blob.len() as i64)
                .build()
                .map_err(|e| internal("build blob descriptor", e))?;
            writer.commit(descriptor).await
        }
        .await;

        match staged {
            Ok(descriptor) => {
                writer.close().await?;
                Ok(descriptor)
            }
            Err(e) => {
                // Release the resources held by the failed writer.
                let _ = writer.cancel().await;
                let _ = writer.close().await;
                Err(e)
            }
        }
    }

    async fn create(&self) -> unregistry_core::Result<ContainerdBlobWriter> {
        ContainerdBlobWriter::open(&self.client, &self.repo, None).await
    }

    async fn resume(&self, id: &str) -> unregistry_core::Result<ContainerdBlobWriter> {
        ContainerdBlobWriter::open(&self.client, &self.repo, Some(id)).await
    }

    async fn serve_blob(
        &self,
        digest: &OciDigest,
        head_only: bool,
    ) -> unregistry_core::Result<Response> {
        let descriptor = self.stat(digest).await?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header_value(&descriptor.media_type().to_string())?,
        );
        headers.insert(
            header::CONTENT_LENGTH,
            header_value(&descriptor.size().to_string())?,
        );
        headers.insert(
            HeaderName::from_static("docker-content-digest"),
            header_value(&digest.to_string())?,
        );
        headers.insert(header::ETAG, header_value(&digest.to_string())?);

        if head_only {
            return Ok((StatusCode::OK, headers).into_response());
        }

        debug!(repo = %self.repo, digest = %digest, size = descriptor.size(), "serving blob");
        let reader = self.open(digest).await?;
        // Exactly `size` bytes go on the wire.
        let body = Body::from_stream(ReaderStream::new(reader.take(descriptor.size() as u64)));
        Ok((StatusCode::OK, headers, body).into_response())
    }
}

fn header_value(value: &str) -> unregistry_core::Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| internal("build response header", e))
}
