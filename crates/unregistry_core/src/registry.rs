use async_trait::async_trait;
use axum::response::Response;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use oci_spec::image::Descriptor;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::errors::{Error, Result};
use crate::manifest::Manifest;
use crate::oci_digest::OciDigest;
use crate::reference::ImageReference;

/// Byte stream handed to blob writers, typically an HTTP request body.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// The top-level storage object consumed by the HTTP dispatcher. Hands out
/// repositories; everything else hangs off them.
pub trait Namespace: Clone + Send + Sync + 'static {
    type Repository: Repository;

    /// Resolve a repository by the name given in the request path. The name
    /// is validated and normalized; no I/O happens here.
    fn repository(&self, name: &str) -> Result<Self::Repository>;

    /// Scope identifier. This storage layer does not partition.
    fn scope(&self) -> &'static str {
        "global"
    }
}

/// Access to the blobs, manifests and tags of a single repository.
pub trait Repository: Clone + Send + Sync + 'static {
    type BlobStore: BlobStore;
    type ManifestStore: ManifestStore;
    type TagStore: TagStore;

    /// The normalized repository reference.
    fn named(&self) -> &ImageReference;

    fn blobs(&self) -> Self::BlobStore;
    fn manifests(&self) -> Self::ManifestStore;
    fn tags(&self) -> Self::TagStore;
}

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    type Writer: BlobWriter;
    type Reader: AsyncRead + AsyncSeek + Send + Unpin + 'static;

    /// Blob metadata by digest. The returned descriptor always carries the
    /// `application/octet-stream` media type: the backing store is untyped
    /// and the real media type lives in the referencing manifest.
    async fn stat(&self, digest: &OciDigest) -> Result<Descriptor>;

    /// The whole blob as one buffer. Meant for small objects like manifests.
    async fn get(&self, digest: &OciDigest) -> Result<Bytes>;

    /// A seekable reader over the blob.
    async fn open(&self, digest: &OciDigest) -> Result<Self::Reader>;

    /// Store a small blob in one call: open a writer, write, commit with the
    /// computed digest. Succeeds if the blob already exists.
    async fn put(&self, media_type: &str, blob: Bytes) -> Result<Descriptor>;

    /// Start a new upload session.
    async fn create(&self) -> Result<Self::Writer>;

    /// Reopen the upload session with the given id.
    async fn resume(&self, id: &str) -> Result<Self::Writer>;

    /// Serve the blob over HTTP: content headers plus, unless `head_only`,
    /// a body of exactly the blob's size.
    async fn serve_blob(&self, digest: &OciDigest, head_only: bool) -> Result<Response>;

    async fn mount(&self, _from: &ImageReference, _digest: &OciDigest) -> Result<Descriptor> {
        Err(Error::Unsupported("blob mount"))
    }

    async fn delete(&self, _digest: &OciDigest) -> Result<()> {
        Err(Error::Unsupported("blob delete"))
    }
}

#[async_trait]
pub trait ManifestStore: Send + Sync + 'static {
    /// Whether a manifest with this digest exists.
    async fn exists(&self, digest: &OciDigest) -> Result<bool>;

    /// Fetch and parse a manifest by digest.
    async fn get(&self, digest: &OciDigest) -> Result<Manifest>;

    /// Store a manifest payload, returning its digest. Tagging is a separate
    /// step through the repository's [`TagStore`].
    async fn put(&self, manifest: &Manifest) -> Result<OciDigest>;

    async fn delete(&self, _digest: &OciDigest) -> Result<()> {
        Err(Error::Unsupported("manifest delete"))
    }
}

#[async_trait]
pub trait TagStore: Send + Sync + 'static {
    /// The manifest descriptor a tag points at.
    async fn get(&self, tag: &str) -> Result<Descriptor>;

    /// Bind a tag to a manifest descriptor. The descriptor's content must
    /// already be committed; this also marks the content reachable so it
    /// survives garbage collection.
    async fn tag(&self, tag: &str, target: &Descriptor) -> Result<()>;

    async fn untag(&self, _tag: &str) -> Result<()> {
        Err(Error::Unsupported("untag"))
    }

    async fn all(&self) -> Result<Vec<String>> {
        Err(Error::Unsupported("tag listing"))
    }

    async fn lookup(&self, _target: &Descriptor) -> Result<Vec<String>> {
        Err(Error::Unsupported("tag lookup"))
    }
}

/// A resumable blob upload session.
#[async_trait]
pub trait BlobWriter: Send + 'static {
    /// Identifier for this upload, echoed in upload URLs.
    fn id(&self) -> &str;

    /// When the upload started.
    fn started_at(&self) -> DateTime<Utc>;

    /// Total bytes staged so far, including bytes from resumed sessions.
    fn size(&self) -> i64;

    /// Append a chunk.
    async fn write(&mut self, data: Bytes) -> Result<usize>;

    /// Append everything from the stream, returning the number of bytes
    /// consumed.
    async fn read_from(&mut self, body: ByteStream) -> Result<i64>;

    /// Finalize the upload. The descriptor carries the expected digest; a
    /// zero size or missing media type is filled in from the session. Commit
    /// of content that already exists is success.
    async fn commit(&mut self, descriptor: Descriptor) -> Result<Descriptor>;

    /// Abort the upload and release the staged content.
    async fn cancel(&mut self) -> Result<()>;

    /// Close the session. May be called after commit or cancel.
    async fn close(&mut self) -> Result<()>;
}
