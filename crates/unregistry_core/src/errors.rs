pub use oci_spec::distribution::ErrorCode as DistributionErrorCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the storage layer. Backend-specific failures are
/// translated into this taxonomy at the adapter boundary; identifiers of the
/// backing store never leak past it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    #[error("blob unknown to registry: {0}")]
    BlobUnknown(String),
    #[error("unknown manifest revision: {0}")]
    ManifestUnknownRevision(String),
    #[error("unknown tag: {0}")]
    TagUnknown(String),
    #[error("manifest verification failed: {0}")]
    ManifestVerification(String),
    #[error("invalid blob upload: {0}")]
    BlobUploadInvalid(String),

    #[error("{0} is unsupported")]
    Unsupported(&'static str),

    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    /// True for the not-found family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::BlobUnknown(_) | Error::ManifestUnknownRevision(_) | Error::TagUnknown(_)
        )
    }
}
