use tonic::{Code, Status};

use unregistry_core::Error as CoreError;

pub(crate) type Result<T> = std::result::Result<T, Error>;

/// Failures local to the containerd adapter. Everything crossing the storage
/// contract is converted into the core taxonomy; gRPC status codes never
/// leak upward.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("containerd rpc: {0}")]
    Rpc(#[from] Status),

    #[error("containerd transport: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("invalid request metadata: {0}")]
    Metadata(#[from] tonic::metadata::errors::InvalidMetadataValue),

    #[error("containerd response missing field: {0}")]
    MissingField(&'static str),

    #[error("content write stream closed unexpectedly")]
    WriteStreamClosed,
}

impl From<Error> for CoreError {
    fn from(e: Error) -> Self {
        match e {
            Error::Core(e) => e,
            e => CoreError::Backend(e.to_string()),
        }
    }
}

pub(crate) fn is_not_found(status: &Status) -> bool {
    status.code() == Code::NotFound
}

pub(crate) fn is_already_exists(status: &Status) -> bool {
    status.code() == Code::AlreadyExists
}

/// Wrap a containerd failure with the failed operation's context.
pub(crate) fn internal(context: impl std::fmt::Display, err: impl std::fmt::Display) -> CoreError {
    CoreError::Backend(format!("{context}: {err}"))
}
