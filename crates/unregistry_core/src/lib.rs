pub mod errors;
pub use errors::{DistributionErrorCode, Error, Result};

mod oci_digest;
pub use oci_digest::OciDigest;

mod reference;
pub use reference::ImageReference;

mod manifest;
pub use manifest::{is_manifest_media_type, Manifest, ManifestKind};
pub use manifest::{
    MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_OCI_MANIFEST, MEDIA_TYPE_OCTET_STREAM,
};

pub mod registry;
