use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use containerd_client::services::v1::ReadContentRequest;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio_util::io::StreamReader;

use crate::client::ContainerdClient;
use crate::errors::is_not_found;

type ChunkReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

/// Seekable reader over a blob in the containerd content store. Reading
/// streams ranged content chunks; seeking drops the current stream and the
/// next read reopens one at the new offset.
pub struct ContentReader {
    client: ContainerdClient,
    digest: String,
    size: i64,
    position: u64,
    inner: Option<ChunkReader>,
}

impl ContentReader {
    pub(crate) fn new(client: ContainerdClient, digest: String, size: i64) -> Self {
        Self {
            client,
            digest,
            size,
            position: 0,
            inner: None,
        }
    }

    /// Size of the underlying blob.
    pub fn size(&self) -> i64 {
        self.size
    }

    fn chunks_from(&self, offset: i64) -> BoxStream<'static, io::Result<Bytes>> {
        let client = self.client.clone();
        let digest = self.digest.clone();
        futures::stream::once(async move {
            let request = ReadContentRequest {
                digest: digest.clone(),
                offset,
                size: 0,
            };
            let request = client
                .request(request, None)
                .map_err(|e| io::Error::other(e.to_string()))?;
            let responses = client.content().read(request).await.map_err(|status| {
                if is_not_found(&status) {
                    io::Error::new(io::ErrorKind::NotFound, format!("blob {digest} not found"))
                } else {
                    io::Error::other(status.to_string())
                }
            })?;
            Ok::<_, io::Error>(
                responses
                    .into_inner()
                    .map(|message| match message {
                        Ok(m) => Ok(Bytes::from(m.data)),
                        Err(status) => Err(io::Error::other(status.to_string())),
                    })
                    .boxed(),
            )
        })
        .try_flatten()
        .boxed()
    }
}

impl AsyncRead for ContentReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.inner.is_none() {
            let stream = this.chunks_from(this.position as i64);
            this.inner = Some(StreamReader::new(stream));
        }

        let filled_before = buf.filled().len();
        let reader = this.inner.as_mut().unwrap();
        match Pin::new(reader).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.position += (buf.filled().len() - filled_before) as u64;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl AsyncSeek for ContentReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let target = match position {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => this.size + delta,
            SeekFrom::Current(delta) => this.position as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of blob",
            ));
        }
        if target as u64 != this.position {
            this.position = target as u64;
            this.inner = None;
        }
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.position))
    }
}
