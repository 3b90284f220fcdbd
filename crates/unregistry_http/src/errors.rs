use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use oci_spec::distribution::{ErrorInfoBuilder, ErrorResponseBuilder};
use unregistry_core::{DistributionErrorCode, Error as CoreError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("missing path parameter: {0}")]
    MissingPathParameter(&'static str),
    #[error("missing query parameter: {0}")]
    MissingQueryParameter(&'static str),

    #[error("http invalid header value")]
    InvalidHeaderValue(#[from] axum::http::header::InvalidHeaderValue),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::Core(e) => core_error_to_response(e),
            Error::MissingPathParameter(_) | Error::MissingQueryParameter(_) => {
                (StatusCode::BAD_REQUEST, format!("{self}")).into_response()
            }
            Error::InvalidHeaderValue(_) => {
                (StatusCode::BAD_REQUEST, format!("{self}")).into_response()
            }
        }
    }
}

fn core_error_to_response(e: CoreError) -> Response {
    let message = e.to_string();
    match e {
        CoreError::BlobUnknown(_) => {
            into_error_response(DistributionErrorCode::BlobUnknown, message)
        }
        CoreError::ManifestUnknownRevision(_) | CoreError::TagUnknown(_) => {
            into_error_response(DistributionErrorCode::ManifestUnknown, message)
        }
        CoreError::ManifestVerification(_) => {
            into_error_response(DistributionErrorCode::ManifestInvalid, message)
        }
        CoreError::InvalidDigest(_) | CoreError::UnsupportedDigestAlgorithm(_) => {
            into_error_response(DistributionErrorCode::DigestInvalid, message)
        }
        CoreError::InvalidReference(_) | CoreError::InvalidTag(_) => {
            into_error_response(DistributionErrorCode::NameInvalid, message)
        }
        CoreError::BlobUploadInvalid(_) => {
            into_error_response(DistributionErrorCode::BlobUploadInvalid, message)
        }
        CoreError::Unsupported(_) => {
            into_error_response(DistributionErrorCode::Unsupported, message)
        }
        CoreError::Backend(ref detail) => {
            tracing::warn!("backend error: {detail}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("internal server error"),
            )
                .into_response()
        }
    }
}

fn into_error_response(code: DistributionErrorCode, message: String) -> Response {
    let status = status_code(&code);
    let info = ErrorInfoBuilder::default()
        .code(code)
        .message(message)
        .build()
        .expect("all required ErrorInfo fields must be initialized");
    let body = ErrorResponseBuilder::default()
        .errors(vec![info])
        .build()
        .expect("all required ErrorResponse fields must be initialized");

    (status, axum::Json(body)).into_response()
}

fn status_code(code: &DistributionErrorCode) -> StatusCode {
    match code {
        DistributionErrorCode::BlobUnknown => StatusCode::NOT_FOUND,
        DistributionErrorCode::ManifestUnknown => StatusCode::NOT_FOUND,
        DistributionErrorCode::ManifestInvalid => StatusCode::BAD_REQUEST,
        DistributionErrorCode::DigestInvalid => StatusCode::BAD_REQUEST,
        DistributionErrorCode::NameInvalid => StatusCode::BAD_REQUEST,
        DistributionErrorCode::BlobUploadInvalid => StatusCode::RANGE_NOT_SATISFIABLE,
        DistributionErrorCode::Unsupported => StatusCode::METHOD_NOT_ALLOWED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn not_found_family_maps_to_404() {
        for e in [
            CoreError::BlobUnknown("sha256:abc".into()),
            CoreError::ManifestUnknownRevision("sha256:abc".into()),
            CoreError::TagUnknown("latest".into()),
        ] {
            let response = Error::from(e).into_response();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn unsupported_maps_to_405() {
        let response = Error::from(CoreError::Unsupported("blob delete")).into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn backend_failures_stay_opaque() {
        let response =
            Error::from(CoreError::Backend("grpc status 14: unavailable".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn validation_failures_map_to_400() {
        let response = Error::from(CoreError::InvalidDigest("bogus".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = Error::from(CoreError::InvalidReference("UPPER".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
