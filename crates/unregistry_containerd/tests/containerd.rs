//! End-to-end flows against a running containerd. These need a containerd
//! socket and are skipped by default:
//!
//!     CONTAINERD_SOCK=/run/containerd/containerd.sock \
//!         cargo test -p unregistry_containerd -- --ignored

use bytes::Bytes;
use oci_spec::image::{DescriptorBuilder, MediaType};

use unregistry_containerd::{ContainerdClient, ContainerdRegistry};
use unregistry_core::registry::{
    BlobStore, BlobWriter, ManifestStore, Namespace, Repository, TagStore,
};
use unregistry_core::{Error, Manifest, OciDigest};

const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

async fn test_registry() -> ContainerdRegistry {
    let sock = std::env::var("CONTAINERD_SOCK")
        .unwrap_or_else(|_| "/run/containerd/containerd.sock".to_string());
    let client = ContainerdClient::connect(sock, "unregistry-test")
        .await
        .expect("containerd must be reachable");
    ContainerdRegistry::new(client)
}

/// A minimal single-platform image: config, two layers, manifest.
fn build_image(seed: &str) -> (Vec<(String, Bytes)>, Bytes) {
    let config = Bytes::from(format!(
        r#"{{"architecture":"amd64","os":"linux","rootfs":{{"type":"layers","diff_ids":[]}},"seed":"{seed}"}}"#
    ));
    let layers = vec![
        Bytes::from(format!("layer-one-{seed}")),
        Bytes::from(format!("layer-two-{seed}")),
    ];

    let mut blobs = vec![(CONFIG_MEDIA_TYPE.to_string(), config.clone())];
    let mut layer_entries = String::new();
    for layer in &layers {
        if !layer_entries.is_empty() {
            layer_entries.push(',');
        }
        layer_entries.push_str(&format!(
            r#"{{"mediaType":"{LAYER_MEDIA_TYPE}","digest":"{}","size":{}}}"#,
            OciDigest::from_bytes(layer),
            layer.len(),
        ));
        blobs.push((LAYER_MEDIA_TYPE.to_string(), layer.clone()));
    }

    let manifest = Bytes::from(format!(
        r#"{{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json","config":{{"mediaType":"{CONFIG_MEDIA_TYPE}","digest":"{}","size":{}}},"layers":[{layer_entries}]}}"#,
        OciDigest::from_bytes(&config),
        config.len(),
    ));

    (blobs, manifest)
}

#[tokio::test]
#[ignore = "requires a running containerd"]
async fn push_and_pull_round_trip() {
    let registry = test_registry().await;
    let repository = registry.repository("unregistry-e2e/push-pull").unwrap();
    let blobs = repository.blobs();
    let manifests = repository.manifests();
    let tags = repository.tags();

    let (image_blobs, manifest_payload) = build_image("round-trip");

    // Push the blobs through upload sessions.
    for (_, blob) in &image_blobs {
        let mut writer = blobs.create().await.unwrap();
        writer.write(blob.clone()).await.unwrap();
        let descriptor = DescriptorBuilder::default()
            .media_type(MediaType::from("application/octet-stream"))
            .digest(OciDigest::from_bytes(blob).to_string())
            .size(blob.len() as i64)
            .build()
            .unwrap();
        let committed = writer.commit(descriptor).await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(committed.size(), blob.len() as i64);
    }

    // Push and tag the manifest.
    let manifest = Manifest::parse(manifest_payload.clone()).unwrap();
    let digest = manifests.put(&manifest).await.unwrap();
    tags.tag("latest", &manifest.descriptor()).await.unwrap();

    // Pull everything back.
    assert!(manifests.exists(&digest).await.unwrap());
    let target = tags.get("latest").await.unwrap();
    assert_eq!(target.digest().as_str(), digest.to_string());

    let pulled = manifests.get(&digest).await.unwrap();
    assert_eq!(pulled.payload(), &manifest_payload);

    for (_, blob) in &image_blobs {
        let blob_digest = OciDigest::from_bytes(blob);
        let stat = blobs.stat(&blob_digest).await.unwrap();
        assert_eq!(stat.size(), blob.len() as i64);
        assert_eq!(&blobs.get(&blob_digest).await.unwrap(), blob);
    }
}

#[tokio::test]
#[ignore = "requires a running containerd"]
async fn second_push_deduplicates() {
    let registry = test_registry().await;
    let repository = registry.repository("unregistry-e2e/dedup").unwrap();
    let blobs = repository.blobs();

    let blob = Bytes::from("dedup-layer-bytes");
    let digest = OciDigest::from_bytes(&blob);
    let descriptor = DescriptorBuilder::default()
        .media_type(MediaType::from("application/octet-stream"))
        .digest(digest.to_string())
        .size(blob.len() as i64)
        .build()
        .unwrap();

    for _ in 0..2 {
        let mut writer = blobs.create().await.unwrap();
        writer.write(blob.clone()).await.unwrap();
        // The second commit hits already-exists inside containerd and must
        // still report success with the same descriptor.
        let committed = writer.commit(descriptor.clone()).await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(committed.digest().as_str(), digest.to_string());
    }
}

#[tokio::test]
#[ignore = "requires a running containerd"]
async fn uploads_resume_at_the_written_offset() {
    let registry = test_registry().await;
    let repository = registry.repository("unregistry-e2e/resume").unwrap();
    let blobs = repository.blobs();

    let mut writer = blobs.create().await.unwrap();
    let id = writer.id().to_string();
    writer.write(Bytes::from("first-half|")).await.unwrap();
    let staged = writer.size();
    writer.close().await.unwrap();

    let mut resumed = blobs.resume(&id).await.unwrap();
    assert_eq!(resumed.id(), id);
    assert_eq!(resumed.size(), staged);

    resumed.write(Bytes::from("second-half")).await.unwrap();
    let content = Bytes::from("first-half|second-half");
    let descriptor = DescriptorBuilder::default()
        .media_type(MediaType::from("application/octet-stream"))
        .digest(OciDigest::from_bytes(&content).to_string())
        .size(content.len() as i64)
        .build()
        .unwrap();
    resumed.commit(descriptor).await.unwrap();
    resumed.close().await.unwrap();

    assert_eq!(
        blobs.get(&OciDigest::from_bytes(&content)).await.unwrap(),
        content,
    );
}

#[tokio::test]
#[ignore = "requires a running containerd"]
async fn nested_repository_names_key_image_records() {
    let registry = test_registry().await;
    let repository = registry.repository("ghcr.io/containerd/busybox").unwrap();
    assert_eq!(repository.named().name(), "ghcr.io/containerd/busybox");

    let (image_blobs, manifest_payload) = build_image("nested-name");
    let blobs = repository.blobs();
    for (media_type, blob) in &image_blobs {
        blobs.put(media_type, blob.clone()).await.unwrap();
    }
    let manifest = Manifest::parse(manifest_payload).unwrap();
    repository.manifests().put(&manifest).await.unwrap();
    repository
        .tags()
        .tag("1.36", &manifest.descriptor())
        .await
        .unwrap();

    let target = repository.tags().get("1.36").await.unwrap();
    assert_eq!(target.digest().as_str(), manifest.digest().to_string());
}

fn build_index(children: &[&Manifest]) -> Bytes {
    let mut entries = String::new();
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            entries.push(',');
        }
        let arch = if i == 0 { "amd64" } else { "arm64" };
        entries.push_str(&format!(
            r#"{{"mediaType":"{}","digest":"{}","size":{},"platform":{{"architecture":"{arch}","os":"linux"}}}}"#,
            child.media_type(),
            child.digest(),
            child.size(),
        ));
    }
    Bytes::from(format!(
        r#"{{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json","manifests":[{entries}]}}"#
    ))
}

#[tokio::test]
#[ignore = "requires a running containerd"]
async fn multi_platform_index_tags_point_at_the_index() {
    let registry = test_registry().await;
    let repository = registry.repository("unregistry-e2e/multi-platform").unwrap();
    let blobs = repository.blobs();
    let manifests = repository.manifests();

    let mut children = Vec::new();
    for seed in ["index-amd64", "index-arm64"] {
        let (image_blobs, manifest_payload) = build_image(seed);
        for (media_type, blob) in &image_blobs {
            blobs.put(media_type, blob.clone()).await.unwrap();
        }
        let manifest = Manifest::parse(manifest_payload).unwrap();
        manifests.put(&manifest).await.unwrap();
        children.push(manifest);
    }

    let index = Manifest::parse(build_index(&children.iter().collect::<Vec<_>>())).unwrap();
    let index_digest = manifests.put(&index).await.unwrap();
    repository
        .tags()
        .tag("v1.10.0", &index.descriptor())
        .await
        .unwrap();

    // The record's target is the index; every child manifest stays pullable.
    let target = repository.tags().get("v1.10.0").await.unwrap();
    assert_eq!(target.digest().as_str(), index_digest.to_string());
    for child in &children {
        assert!(manifests.exists(child.digest()).await.unwrap());
    }
}

#[tokio::test]
#[ignore = "requires a running containerd"]
async fn partial_index_pushes_still_tag() {
    let registry = test_registry().await;
    let repository = registry.repository("unregistry-e2e/partial-index").unwrap();
    let blobs = repository.blobs();
    let manifests = repository.manifests();

    // Push only one of the two platforms the index lists.
    let (image_blobs, manifest_payload) = build_image("partial-pushed");
    for (media_type, blob) in &image_blobs {
        blobs.put(media_type, blob.clone()).await.unwrap();
    }
    let pushed = Manifest::parse(manifest_payload).unwrap();
    manifests.put(&pushed).await.unwrap();

    let (_, missing_payload) = build_image("partial-missing");
    let missing = Manifest::parse(missing_payload).unwrap();

    let index = Manifest::parse(build_index(&[&pushed, &missing])).unwrap();
    manifests.put(&index).await.unwrap();
    repository
        .tags()
        .tag("partial", &index.descriptor())
        .await
        .unwrap();

    // The absent platform stays absent; pulls of it report an unknown
    // manifest while the tag itself resolves.
    let target = repository.tags().get("partial").await.unwrap();
    assert_eq!(target.digest().as_str(), index.digest().to_string());
    assert!(matches!(
        manifests.get(missing.digest()).await,
        Err(Error::ManifestUnknownRevision(_))
    ));
}

#[tokio::test]
#[ignore = "requires a running containerd"]
async fn missing_content_maps_to_not_found_errors() {
    let registry = test_registry().await;
    let repository = registry.repository("unregistry-e2e/missing").unwrap();

    let absent = OciDigest::from_bytes(b"never pushed anywhere");
    assert!(matches!(
        repository.blobs().stat(&absent).await,
        Err(Error::BlobUnknown(_))
    ));
    assert!(!repository.manifests().exists(&absent).await.unwrap());
    assert!(matches!(
        repository.manifests().get(&absent).await,
        Err(Error::ManifestUnknownRevision(_))
    ));
    assert!(matches!(
        repository.tags().get("no-such-tag").await,
        Err(Error::TagUnknown(_))
    ));
}
