use std::collections::HashMap;
use std::io;

use axum::extract::{Extension, Path, Query, Request};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::{StreamExt, TryStreamExt};
use oci_spec::image::{Descriptor, DescriptorBuilder, MediaType};

use unregistry_core::registry::{BlobStore, BlobWriter, ByteStream, Repository};
use unregistry_core::{Error as CoreError, ImageReference, MEDIA_TYPE_OCTET_STREAM, OciDigest};

use super::errors::{Error, Result};
use super::path_param;

pub(crate) fn router<R: Repository>() -> Router {
    Router::new()
        .route(
            "/:digest",
            get(serve_blob::<R>).delete(delete_blob::<R>),
        )
        // Clients are inconsistent about the trailing slash here.
        .route("/uploads", post(uploads_post::<R>))
        .route("/uploads/", post(uploads_post::<R>))
        .route(
            "/uploads/:id",
            get(uploads_get::<R>)
                .patch(uploads_patch::<R>)
                .put(uploads_put::<R>)
                .delete(uploads_delete::<R>),
        )
}

/// GET and HEAD for `/v2/<name>/blobs/<digest>`. The store writes the
/// content headers either way and streams the body for GET.
async fn serve_blob<R: Repository>(
    Extension(repository): Extension<R>,
    Path(params): Path<HashMap<String, String>>,
    method: Method,
) -> Result<Response> {
    let digest: OciDigest = path_param(&params, "digest")?.try_into()?;
    let response = repository
        .blobs()
        .serve_blob(&digest, method == Method::HEAD)
        .await?;
    Ok(response)
}

async fn delete_blob<R: Repository>(
    Extension(repository): Extension<R>,
    Path(params): Path<HashMap<String, String>>,
) -> Result<Response> {
    let digest: OciDigest = path_param(&params, "digest")?.try_into()?;
    repository.blobs().delete(&digest).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

// POST /v2/<name>/blobs/uploads/
//
// Three shapes:
// * `?mount=<digest>&from=<repo>`: cross-repository mount. The backend does
//   not support it, so this falls back to opening a session, as the
//   distribution spec allows.
// * `?digest=<digest>`: monolithic upload, body is the whole blob.
// * bare: open a session for the POST-PATCH-PUT sequence.
async fn uploads_post<R: Repository>(
    Extension(repository): Extension<R>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
) -> Result<Response> {
    let name = path_param(&params, "repository")?.to_string();
    let store = repository.blobs();

    if let (Some(mount), Some(from)) = (query.get("mount"), query.get("from")) {
        let digest: OciDigest = mount.as_str().try_into()?;
        let from = ImageReference::parse(from)?;
        match store.mount(&from, &digest).await {
            Ok(descriptor) => return blob_created(&name, &descriptor),
            Err(CoreError::Unsupported(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(digest) = query.get("digest") {
        let digest: OciDigest = digest.as_str().try_into()?;
        let mut writer = store.create().await?;
        let staged = async {
            writer.read_from(body_stream(request)).await?;
            writer.commit(unsized_descriptor(&digest)?).await
        }
        .await;
        return match staged {
            Ok(descriptor) => {
                writer.close().await?;
                blob_created(&name, &descriptor)
            }
            Err(e) => {
                let _ = writer.cancel().await;
                let _ = writer.close().await;
                Err(e.into())
            }
        };
    }

    let mut writer = store.create().await?;
    let id = writer.id().to_string();
    let size = writer.size();
    writer.close().await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&upload_location(&name, &id))?,
    );
    headers.insert(header::RANGE, HeaderValue::from_str(&range_header(size))?);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    headers.insert(
        HeaderName::from_static("docker-upload-uuid"),
        HeaderValue::from_str(&id)?,
    );
    Ok((StatusCode::ACCEPTED, headers).into_response())
}

// PATCH /v2/<name>/blobs/uploads/<id>: append a chunk.
async fn uploads_patch<R: Repository>(
    Extension(repository): Extension<R>,
    Path(params): Path<HashMap<String, String>>,
    headers: HeaderMap,
    request: Request,
) -> Result<Response> {
    let name = path_param(&params, "repository")?.to_string();
    let id = path_param(&params, "id")?.to_string();

    let mut writer = repository.blobs().resume(&id).await?;

    // Chunked uploads carry a content range; its start must line up with
    // what is already staged.
    if let Some(range) = headers.get(header::CONTENT_RANGE) {
        let start = range
            .to_str()
            .ok()
            .and_then(|value| value.split('-').next())
            .and_then(|start| start.parse::<i64>().ok());
        if start != Some(writer.size()) {
            let _ = writer.close().await;
            return Err(CoreError::BlobUploadInvalid(id).into());
        }
    }

    let appended = writer.read_from(body_stream(request)).await;
    let size = writer.size();
    match appended {
        Ok(_) => writer.close().await?,
        Err(e) => {
            let _ = writer.close().await;
            return Err(e.into());
        }
    }

    upload_accepted(StatusCode::ACCEPTED, &name, &id, size)
}

// PUT /v2/<name>/blobs/uploads/<id>?digest=<digest>: optional final chunk,
// then commit.
async fn uploads_put<R: Repository>(
    Extension(repository): Extension<R>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
) -> Result<Response> {
    let name = path_param(&params, "repository")?.to_string();
    let id = path_param(&params, "id")?.to_string();
    let digest: OciDigest = query
        .get("digest")
        .ok_or(Error::MissingQueryParameter("digest"))?
        .as_str()
        .try_into()?;

    let mut writer = repository.blobs().resume(&id).await?;
    let staged = async {
        writer.read_from(body_stream(request)).await?;
        writer.commit(unsized_descriptor(&digest)?).await
    }
    .await;

    match staged {
        Ok(descriptor) => {
            writer.close().await?;
            blob_created(&name, &descriptor)
        }
        Err(e) => {
            let _ = writer.cancel().await;
            let _ = writer.close().await;
            Err(e.into())
        }
    }
}

// GET /v2/<name>/blobs/uploads/<id>: upload progress.
async fn uploads_get<R: Repository>(
    Extension(repository): Extension<R>,
    Path(params): Path<HashMap<String, String>>,
) -> Result<Response> {
    let name = path_param(&params, "repository")?.to_string();
    let id = path_param(&params, "id")?.to_string();

    let mut writer = repository.blobs().resume(&id).await?;
    let size = writer.size();
    writer.close().await?;

    upload_accepted(StatusCode::NO_CONTENT, &name, &id, size)
}

// DELETE /v2/<name>/blobs/uploads/<id>: abort the upload.
async fn uploads_delete<R: Repository>(
    Extension(repository): Extension<R>,
    Path(params): Path<HashMap<String, String>>,
) -> Result<Response> {
    let id = path_param(&params, "id")?.to_string();

    let mut writer = repository.blobs().resume(&id).await?;
    let canceled = writer.cancel().await;
    let _ = writer.close().await;
    canceled?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

fn body_stream(request: Request) -> ByteStream {
    request
        .into_body()
        .into_data_stream()
        .map_err(io::Error::other)
        .boxed()
}

/// Descriptor carrying only the expected digest; the writer fills in the
/// size it staged and the default media type on commit.
fn unsized_descriptor(digest: &OciDigest) -> unregistry_core::Result<Descriptor> {
    DescriptorBuilder::default()
        .media_type(MediaType::from(MEDIA_TYPE_OCTET_STREAM))
        .digest(digest.to_string())
        .size(0i64)
        .build()
        .map_err(|e| CoreError::Backend(format!("build upload descriptor: {e}")))
}

fn upload_location(name: &str, id: &str) -> String {
    format!("/v2/{name}/blobs/uploads/{id}")
}

fn range_header(size: i64) -> String {
    format!("0-{}", (size - 1).max(0))
}

fn upload_accepted(status: StatusCode, name: &str, id: &str, size: i64) -> Result<Response> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&upload_location(name, id))?,
    );
    headers.insert(header::RANGE, HeaderValue::from_str(&range_header(size))?);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    headers.insert(
        HeaderName::from_static("docker-upload-uuid"),
        HeaderValue::from_str(id)?,
    );
    Ok((status, headers).into_response())
}

fn blob_created(name: &str, descriptor: &Descriptor) -> Result<Response> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&format!("/v2/{name}/blobs/{}", descriptor.digest()))?,
    );
    headers.insert(
        HeaderName::from_static("docker-content-digest"),
        HeaderValue::from_str(descriptor.digest())?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    Ok((StatusCode::CREATED, headers).into_response())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn range_headers_are_inclusive() {
        assert_eq!(range_header(0), "0-0");
        assert_eq!(range_header(1), "0-0");
        assert_eq!(range_header(1024), "0-1023");
    }

    #[test]
    fn upload_locations_keep_the_request_name() {
        assert_eq!(
            upload_location("ghcr.io/containerd/busybox", "abc"),
            "/v2/ghcr.io/containerd/busybox/blobs/uploads/abc",
        );
    }
}
