//! OCI distribution v2 dispatcher over the storage contract.

use std::collections::HashMap;

use axum::extract::{Path, Request, State};
use axum::http::uri::Uri;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use once_cell::sync::Lazy;
use regex::Regex;
use tower::util::{MapRequest, MapRequestLayer};
use tower::Layer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{self, TraceLayer};

mod errors;
pub use errors::{Error, Result};

mod blobs;
mod manifests;

use unregistry_core::registry::Namespace;
use unregistry_core::Error as CoreError;

/// The ready-to-serve v2 service: the router wrapped with the request
/// rewriter that makes nested repository names routable.
pub type RegistryService = MapRequest<Router, fn(Request) -> Request>;

pub fn service<N: Namespace>(namespace: N) -> RegistryService {
    MapRequestLayer::new(rewrite_nested_repository_uri as fn(Request) -> Request)
        .layer(router(namespace))
}

/// The v2 API router. Repository-scoped routes get the resolved repository
/// attached as a request extension.
pub fn router<N: Namespace>(namespace: N) -> Router {
    let repository = Router::new()
        .nest("/blobs", blobs::router::<N::Repository>())
        .nest("/manifests", manifests::router::<N::Repository>())
        .route("/tags/list", get(tags_list))
        .route_layer(middleware::from_fn_with_state(
            namespace,
            with_repository::<N>,
        ));

    Router::new()
        .route("/v2/", get(version))
        .nest("/v2/:repository", repository)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new())
                .on_request(trace::DefaultOnRequest::new())
                .on_response(trace::DefaultOnResponse::new()),
        )
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("docker-distribution-api-version"),
            HeaderValue::from_static("registry/2.0"),
        ))
}

/// Resolve the repository named in the path and hand it to the route
/// handlers. Invalid names turn into a 4xx before any backend I/O.
async fn with_repository<N: Namespace>(
    State(namespace): State<N>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let name = params
        .get("repository")
        .ok_or(Error::MissingPathParameter("repository"))?;
    let repository = namespace.repository(name)?;
    request.extensions_mut().insert(repository);
    Ok(next.run(request).await)
}

async fn version() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        "{}",
    )
        .into_response()
}

async fn tags_list() -> Result<Response> {
    Err(CoreError::Unsupported("tag listing").into())
}

// Repository names may span several path segments
// (`/v2/ghcr.io/containerd/busybox/manifests/1.36`). The router only knows
// single-segment parameters, so the name is collapsed into one
// percent-encoded segment before routing; the path extractor decodes it
// again on the way out.
static NESTED_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/v2/(.+)/(manifests|blobs|tags)(/.*)?$").unwrap());

pub fn rewrite_nested_repository_uri(mut request: Request) -> Request {
    let path = request.uri().path();
    let Some(caps) = NESTED_NAME_RE.captures(path) else {
        return request;
    };
    let name = &caps[1];
    if !name.contains('/') {
        return request;
    }

    let rest = caps.get(3).map(|m| m.as_str()).unwrap_or("");
    let mut path_and_query = format!(
        "/v2/{}/{}{}",
        urlencoding::encode(name),
        &caps[2],
        rest
    );
    if let Some(query) = request.uri().query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = path_and_query.parse().ok();
    if parts.path_and_query.is_some() {
        if let Ok(uri) = Uri::from_parts(parts) {
            *request.uri_mut() = uri;
        }
    }
    request
}

pub(crate) fn path_param<'a>(
    params: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or(Error::MissingPathParameter(name))
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use rstest::*;

    use super::*;

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[rstest]
    #[case::nested_manifest(
        "/v2/ghcr.io/containerd/busybox/manifests/1.36",
        "/v2/ghcr.io%2Fcontainerd%2Fbusybox/manifests/1.36"
    )]
    #[case::nested_blob(
        "/v2/library/busybox/blobs/sha256:0000000000000000000000000000000000000000000000000000000000000000",
        "/v2/library%2Fbusybox/blobs/sha256:0000000000000000000000000000000000000000000000000000000000000000"
    )]
    #[case::nested_upload(
        "/v2/a/b/c/blobs/uploads/",
        "/v2/a%2Fb%2Fc/blobs/uploads/"
    )]
    #[case::single_segment_untouched(
        "/v2/busybox/manifests/latest",
        "/v2/busybox/manifests/latest"
    )]
    #[case::version_untouched("/v2/", "/v2/")]
    fn rewrites_nested_names(#[case] input: &str, #[case] expected: &str) {
        let rewritten = rewrite_nested_repository_uri(request(input));
        assert_eq!(rewritten.uri().path(), expected);
    }

    #[test]
    fn rewriting_preserves_the_query_string() {
        let rewritten = rewrite_nested_repository_uri(request(
            "/v2/a/b/blobs/uploads/some-id?digest=sha256:abc",
        ));
        assert_eq!(
            rewritten.uri().path_and_query().unwrap().as_str(),
            "/v2/a%2Fb/blobs/uploads/some-id?digest=sha256:abc",
        );
    }

    #[test]
    fn tag_listing_is_unsupported() {
        let response = futures::executor::block_on(tags_list())
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
