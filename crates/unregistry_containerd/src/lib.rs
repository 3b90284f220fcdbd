//! Registry storage backed by a containerd content and image store.
//!
//! The registry protocol expects repository-scoped blobs with resumable,
//! commit-at-the-end uploads; containerd offers a global content-addressed
//! store plus a name-to-descriptor image namespace, both governed by a
//! label-and-lease driven garbage collector. This crate reconciles the two:
//! blob writers hold a lease while content is staged, and tagging applies
//! reference labels across the manifest DAG before the image record lands.

mod errors;
pub use errors::Error;

mod client;
pub use client::ContainerdClient;

mod blobs;
pub use blobs::ContainerdBlobStore;

mod reader;
pub use reader::ContentReader;

mod writer;
pub use writer::ContainerdBlobWriter;

mod manifests;
pub use manifests::ContainerdManifestStore;

mod tags;
pub use tags::ContainerdTagStore;

mod repository;
pub use repository::ContainerdRepository;

mod registry;
pub use registry::ContainerdRegistry;
