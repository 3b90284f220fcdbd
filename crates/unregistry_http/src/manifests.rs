use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Extension, Path};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;

use unregistry_core::registry::{ManifestStore, Repository, TagStore};
use unregistry_core::{Error as CoreError, Manifest, OciDigest};

use super::errors::Result;
use super::path_param;

pub(crate) fn router<R: Repository>() -> Router {
    Router::new().route(
        "/:reference",
        get(get_manifest::<R>)
            .put(put_manifest::<R>)
            .delete(delete_manifest::<R>),
    )
}

/// A manifest endpoint reference is either a digest or a tag; digests are
/// recognizable by their algorithm separator, which tags cannot contain.
fn parse_reference(reference: &str) -> Result<ManifestRef> {
    if reference.contains(':') {
        Ok(ManifestRef::Digest(reference.try_into()?))
    } else {
        Ok(ManifestRef::Tag(reference.to_string()))
    }
}

enum ManifestRef {
    Digest(OciDigest),
    Tag(String),
}

/// GET and HEAD for `/v2/<name>/manifests/<reference>`.
async fn get_manifest<R: Repository>(
    Extension(repository): Extension<R>,
    Path(params): Path<HashMap<String, String>>,
    method: Method,
) -> Result<Response> {
    let reference = path_param(&params, "reference")?;

    let digest = match parse_reference(reference)? {
        ManifestRef::Digest(digest) => digest,
        ManifestRef::Tag(tag) => {
            let target = repository.tags().get(&tag).await?;
            target.digest().as_str().try_into()?
        }
    };

    let manifest = repository.manifests().get(&digest).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(manifest.media_type())?,
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&manifest.size().to_string())?,
    );
    headers.insert(
        HeaderName::from_static("docker-content-digest"),
        HeaderValue::from_str(&digest.to_string())?,
    );

    if method == Method::HEAD {
        return Ok((StatusCode::OK, headers).into_response());
    }
    Ok((
        StatusCode::OK,
        headers,
        Body::from(manifest.payload().clone()),
    )
        .into_response())
}

/// PUT `/v2/<name>/manifests/<reference>`. The payload is stored verbatim;
/// when the reference is a tag, the manifest is then bound to it, which also
/// makes the image DAG reachable for the backing store's garbage collector.
async fn put_manifest<R: Repository>(
    Extension(repository): Extension<R>,
    Path(params): Path<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let name = path_param(&params, "repository")?.to_string();
    let reference = path_param(&params, "reference")?.to_string();

    let manifest = Manifest::parse(body)?;
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        if content_type.to_str().ok() != Some(manifest.media_type()) {
            return Err(CoreError::ManifestVerification(format!(
                "content type does not match manifest media type {}",
                manifest.media_type()
            ))
            .into());
        }
    }

    let digest = repository.manifests().put(&manifest).await?;

    match parse_reference(&reference)? {
        ManifestRef::Tag(tag) => {
            repository.tags().tag(&tag, &manifest.descriptor()).await?;
        }
        ManifestRef::Digest(provided) => {
            if provided != digest {
                return Err(CoreError::InvalidDigest(reference.clone()).into());
            }
        }
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&format!("/v2/{name}/manifests/{digest}"))?,
    );
    headers.insert(
        HeaderName::from_static("docker-content-digest"),
        HeaderValue::from_str(&digest.to_string())?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    Ok((StatusCode::CREATED, headers).into_response())
}

async fn delete_manifest<R: Repository>(
    Extension(repository): Extension<R>,
    Path(params): Path<HashMap<String, String>>,
) -> Result<Response> {
    let reference = path_param(&params, "reference")?;
    match parse_reference(reference)? {
        ManifestRef::Digest(digest) => repository.manifests().delete(&digest).await?,
        ManifestRef::Tag(tag) => repository.tags().untag(&tag).await?,
    }
    Ok(StatusCode::ACCEPTED.into_response())
}
