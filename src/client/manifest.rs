//! Manifest distribution
//!
//! Maps `repository:tag` names, resolved through the tracker, onto
//! content-addressed bytes fetched and served through the torrent client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::cli::Config;
use crate::client::torrent::{TorrentClient, Transfer};
use crate::client::tracker::{manifest_key, ManifestRecord, TrackerClient};
use crate::digest::{Digest, InfoHash};
use crate::error::TorrentError;
use crate::storage::ContentStore;
use crate::torrent::TorrentParser;

/// Suffix of the staging file used when re-posting content cached under a
/// non-digest name
const REPOST_SUFFIX: &str = ".repost";

/// Publishes and resolves manifests by name
pub struct ManifestDistributor {
    client: Arc<TorrentClient>,
    tracker: TrackerClient,
    piece_length: u64,
    disable_torrent: AtomicBool,
}

impl ManifestDistributor {
    pub fn new(config: &Config, client: Arc<TorrentClient>) -> Result<Self> {
        let tracker = TrackerClient::new(&config.tracker_url, config.resolve_timeout())?;
        Ok(Self::with_tracker(config, client, tracker))
    }

    pub fn with_tracker(config: &Config, client: Arc<TorrentClient>, tracker: TrackerClient) -> Self {
        Self {
            client,
            tracker,
            piece_length: config.piece_length,
            disable_torrent: AtomicBool::new(config.disable_torrent),
        }
    }

    pub fn torrent_disabled(&self) -> bool {
        self.disable_torrent.load(Ordering::SeqCst)
    }

    pub fn set_torrent_disabled(&self, disabled: bool) {
        let was = self.disable_torrent.swap(disabled, Ordering::SeqCst);
        if was != disabled {
            info!("Torrent distribution {}", if disabled { "disabled" } else { "enabled" });
        }
    }

    pub fn client(&self) -> &Arc<TorrentClient> {
        &self.client
    }

    fn store(&self) -> &Arc<dyn ContentStore> {
        self.client.store()
    }

    /// Publish the manifest staged as `local_name` under `repository:tag`
    pub async fn post_manifest(&self, repository: &str, tag: &str, local_name: &str) -> Result<Digest> {
        let key = manifest_key(repository, tag);
        let store = self.store();

        let data = if store.upload_file_exists(local_name).await {
            store.read_upload_file(local_name).await?
        } else if store.cache_file_exists(local_name).await {
            store.read_cache_file(local_name).await?
        } else {
            error!("Cannot post {}: '{}' is not staged", key, local_name);
            return Err(TorrentError::not_exist_with_path(
                format!("manifest for {} is not staged", key),
                local_name,
            )
            .into());
        };

        let digest = Digest::of_bytes(&data);
        self.cache_content(local_name, &digest, data).await?;

        let info_hash = if self.torrent_disabled() {
            debug!("Torrent disabled, not seeding {}", digest);
            None
        } else {
            Some(self.seed_cached(&digest).await?)
        };

        let record = ManifestRecord {
            digest: digest.clone(),
            info_hash,
        };
        self.tracker.post_manifest(repository, tag, &record).await?;

        info!("Posted manifest {} ({})", key, digest);
        Ok(digest)
    }

    /// Resolve `repository:tag` and make its manifest available in the cache
    pub async fn get_manifest(&self, repository: &str, tag: &str) -> Result<Digest> {
        if self.torrent_disabled() {
            return Err(TorrentError::Disabled.into());
        }

        let key = manifest_key(repository, tag);
        let record = self.tracker.get_manifest(repository, tag).await?;
        let digest = record.digest;

        if self.store().cache_file_exists(digest.hex()).await {
            debug!("Manifest {} ({}) already cached", key, digest);
            return Ok(digest);
        }

        let transfer = self.transfer_for(&digest, record.info_hash).await?;
        self.client.download(&transfer).await?;
        self.promote_download(&transfer, &digest).await?;
        if let Err(e) = self.client.seed(&transfer).await {
            warn!("Cached {} but failed to seed it: {}", digest, e);
        }

        info!("Fetched manifest {} ({})", key, digest);
        Ok(digest)
    }

    /// Move content into the cache under its digest
    async fn cache_content(&self, local_name: &str, digest: &Digest, data: Bytes) -> Result<()> {
        let store = self.store();
        let staged = store.upload_file_exists(local_name).await;

        if store.cache_file_exists(digest.hex()).await {
            if staged && local_name != digest.hex() {
                store.delete_upload_file(local_name).await?;
            }
            debug!("Content {} already cached", digest);
            return Ok(());
        }

        let source = if staged {
            local_name.to_string()
        } else {
            // Cached under another name: restage a copy.
            let tmp = format!("{}{}", digest.hex(), REPOST_SUFFIX);
            store.create_upload_file(&tmp).await?;
            store.append_upload_file(&tmp, &data).await?;
            tmp
        };

        if let Err(e) = store.move_upload_file_to_cache(&source, digest.hex()).await {
            if !store.cache_file_exists(digest.hex()).await {
                return Err(e);
            }
            debug!("Content {} cached concurrently", digest);
            if store.upload_file_exists(&source).await {
                store.delete_upload_file(&source).await?;
            }
        }
        Ok(())
    }

    /// Register and seed cached content, publishing its descriptor when new
    async fn seed_cached(&self, digest: &Digest) -> Result<InfoHash> {
        let path = self.store().cache_file_path(digest.hex());
        let meta = TorrentParser::build_from_file(&path, digest.hex(), self.piece_length).await?;
        let (transfer, is_new) = self.client.add_torrent(meta).await?;
        if is_new {
            self.client.seed(&transfer).await?;
            self.tracker.post_info(digest, transfer.meta()).await?;
        }
        Ok(transfer.info_hash())
    }

    async fn transfer_for(&self, digest: &Digest, info_hash: Option<InfoHash>) -> Result<Arc<Transfer>> {
        let transfer = match info_hash {
            Some(info_hash) => self.client.add_torrent_info_hash(info_hash).await?.0,
            None => {
                let meta = self.tracker.get_info(digest).await?.ok_or_else(|| {
                    TorrentError::not_found(format!("no descriptor published for {}", digest))
                })?;
                self.client.add_torrent(meta).await?.0
            }
        };

        if transfer.name() != digest.hex() {
            self.client.remove_torrent(&transfer.info_hash()).await?;
            return Err(TorrentError::invalid_state_with_name(
                format!("descriptor names '{}', expected digest {}", transfer.name(), digest),
                transfer.name(),
            )
            .into());
        }
        Ok(transfer)
    }

    /// Check the assembled download against its digest and move it into the cache
    async fn promote_download(&self, transfer: &Transfer, digest: &Digest) -> Result<()> {
        let store = self.store();
        let name = transfer.name();
        if store.cache_file_exists(name).await {
            return Ok(());
        }

        let data = store
            .read_download_file(name, 0, transfer.total_length() as usize)
            .await?;
        let actual = Digest::of_bytes(&data);
        if &actual != digest {
            warn!("Downloaded content hashes to {}, expected {}", actual, digest);
            return Err(TorrentError::validation_error(format!(
                "downloaded content hashes to {}, expected {}",
                actual, digest
            ))
            .into());
        }

        if let Err(e) = store.move_download_file_to_cache(name, digest.hex()).await {
            if !store.cache_file_exists(digest.hex()).await {
                return Err(e);
            }
            debug!("Content {} cached concurrently", digest);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_helpers::{post_raw_manifest, spawn_tracker};
    use crate::storage::FileStore;
    use crate::swarm::{MemorySwarm, SwarmEngine, SwarmNetwork};
    use async_trait::async_trait;

    /// Swarm that fetches normally but refuses to announce
    struct NoAnnounce(MemorySwarm);

    #[async_trait]
    impl SwarmEngine for NoAnnounce {
        async fn resolve(&self, info_hash: &InfoHash) -> Result<crate::torrent::MetaInfo> {
            self.0.resolve(info_hash).await
        }

        async fn fetch_piece(&self, info_hash: &InfoHash, index: usize) -> Result<Bytes> {
            self.0.fetch_piece(info_hash, index).await
        }

        async fn announce(&self, _meta: &crate::torrent::MetaInfo, _store: Arc<dyn ContentStore>) -> Result<()> {
            Err(TorrentError::network_error_full("announce refused", "swarm", "test").into())
        }

        async fn release(&self, info_hash: &InfoHash) -> Result<()> {
            self.0.release(info_hash).await
        }
    }

    struct Node {
        _dir: tempfile::TempDir,
        store: Arc<FileStore>,
        distributor: ManifestDistributor,
    }

    async fn node(tracker_url: &str, swarm: MemorySwarm, disabled: bool) -> Node {
        node_with(tracker_url, Arc::new(swarm), disabled).await
    }

    async fn node_with(tracker_url: &str, swarm: Arc<dyn SwarmEngine>, disabled: bool) -> Node {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(tracker_url, dir.path());
        config.piece_length = 16;
        config.resolve_timeout_secs = 2;
        config.piece_timeout_secs = 2;
        config.disable_torrent = disabled;

        let store = Arc::new(FileStore::with_root(dir.path()).await.unwrap());
        let client = Arc::new(TorrentClient::new(&config, store.clone(), swarm).unwrap());
        let distributor = ManifestDistributor::new(&config, client).unwrap();
        Node {
            _dir: dir,
            store,
            distributor,
        }
    }

    async fn stage(store: &FileStore, name: &str, data: &[u8]) {
        store.create_upload_file(name).await.unwrap();
        store.append_upload_file(name, data).await.unwrap();
    }

    fn manifest_bytes() -> Vec<u8> {
        br#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json","layers":[]}"#
            .to_vec()
    }

    #[tokio::test]
    async fn test_post_unknown_repository_fails_with_tracker_text() {
        let tracker = spawn_tracker().await;
        let n = node(&tracker, MemorySwarm::standalone(), false).await;
        stage(&n.store, "manifest", &manifest_bytes()).await;

        let err = n.distributor.post_manifest("failedrepo", "tag", "manifest").await.unwrap_err();
        assert!(err.to_string().contains("failedrepo:tag not found"), "{}", err);
    }

    #[tokio::test]
    async fn test_post_unstaged_is_not_exist() {
        let tracker = spawn_tracker().await;
        let n = node(&tracker, MemorySwarm::standalone(), false).await;

        let err = n.distributor.post_manifest("successrepo", "tag", "missing").await.unwrap_err();
        assert!(err.downcast_ref::<TorrentError>().unwrap().is_not_exist());
    }

    #[tokio::test]
    async fn test_get_after_post_on_same_node() {
        let tracker = spawn_tracker().await;
        let n = node(&tracker, MemorySwarm::standalone(), false).await;
        let data = manifest_bytes();
        stage(&n.store, "manifest", &data).await;

        let posted = n.distributor.post_manifest("successrepo", "tag", "manifest").await.unwrap();
        assert_eq!(posted, Digest::of_bytes(&data));
        assert!(!n.store.upload_file_exists("manifest").await);

        let first = n.distributor.get_manifest("successrepo", "tag").await.unwrap();
        let second = n.distributor.get_manifest("successrepo", "tag").await.unwrap();
        assert_eq!(first, posted);
        assert_eq!(second, posted);
        assert_eq!(&n.store.read_cache_file(posted.hex()).await.unwrap()[..], &data[..]);
    }

    #[tokio::test]
    async fn test_get_fetches_through_swarm() {
        let tracker = spawn_tracker().await;
        let network = SwarmNetwork::new();
        let publisher = node(&tracker, network.join(), false).await;
        let consumer = node(&tracker, network.join(), false).await;

        let data = manifest_bytes();
        stage(&publisher.store, "manifest", &data).await;
        let posted = publisher.distributor.post_manifest("successrepo", "tag", "manifest").await.unwrap();

        let fetched = consumer.distributor.get_manifest("successrepo", "tag").await.unwrap();
        assert_eq!(fetched, posted);
        assert_eq!(&consumer.store.read_cache_file(fetched.hex()).await.unwrap()[..], &data[..]);
        assert!(!consumer.store.download_file_exists(fetched.hex()).await);

        // Second call is served from the cache.
        let again = consumer.distributor.get_manifest("successrepo", "tag").await.unwrap();
        assert_eq!(again, posted);
        let info_hash = consumer.distributor.client().active_torrents().await[0];
        assert_eq!(network.seeder_count(&info_hash).await, 2);
    }

    #[tokio::test]
    async fn test_get_falls_back_to_published_descriptor() {
        let tracker = spawn_tracker().await;
        let network = SwarmNetwork::new();
        let publisher = node(&tracker, network.join(), false).await;
        let consumer = node(&tracker, network.join(), false).await;

        let data = manifest_bytes();
        stage(&publisher.store, "manifest", &data).await;
        let posted = publisher.distributor.post_manifest("successrepo", "tag", "manifest").await.unwrap();

        // A record without an identity, as left by a poster running with torrent disabled.
        let tracker_client = TrackerClient::new(&tracker, std::time::Duration::from_secs(5)).unwrap();
        let record = ManifestRecord {
            digest: posted.clone(),
            info_hash: None,
        };
        tracker_client.post_manifest("successrepo", "tag", &record).await.unwrap();

        let fetched = consumer.distributor.get_manifest("successrepo", "tag").await.unwrap();
        assert_eq!(fetched, posted);
        assert_eq!(&consumer.store.read_cache_file(fetched.hex()).await.unwrap()[..], &data[..]);
    }

    #[tokio::test]
    async fn test_get_unknown_name_is_not_found() {
        let tracker = spawn_tracker().await;
        let n = node(&tracker, MemorySwarm::standalone(), false).await;

        let err = n.distributor.get_manifest("successrepo", "nosuchtag").await.unwrap_err();
        assert!(err.downcast_ref::<TorrentError>().unwrap().is_not_found());
        assert!(err.to_string().contains("successrepo:nosuchtag not found"));
    }

    #[tokio::test]
    async fn test_disabled_posts_but_never_gets() {
        let tracker = spawn_tracker().await;
        let n = node(&tracker, MemorySwarm::standalone(), true).await;
        let data = manifest_bytes();
        stage(&n.store, "manifest", &data).await;

        let posted = n.distributor.post_manifest("successrepo", "tag", "manifest").await.unwrap();
        assert_eq!(&n.store.read_cache_file(posted.hex()).await.unwrap()[..], &data[..]);
        assert!(n.distributor.client().active_torrents().await.is_empty());

        let err = n.distributor.get_manifest("successrepo", "tag").await.unwrap_err();
        assert_eq!(err.to_string(), "Torrent disabled");
        let err = n.distributor.get_manifest("anyrepo", "anytag").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<TorrentError>(), Some(TorrentError::Disabled)));

        n.distributor.set_torrent_disabled(false);
        assert_eq!(n.distributor.get_manifest("successrepo", "tag").await.unwrap(), posted);
    }

    #[tokio::test]
    async fn test_repost_is_idempotent() {
        let tracker = spawn_tracker().await;
        let n = node(&tracker, MemorySwarm::standalone(), false).await;
        let data = manifest_bytes();

        stage(&n.store, "manifest", &data).await;
        let first = n.distributor.post_manifest("successrepo", "tag", "manifest").await.unwrap();
        stage(&n.store, "manifest", &data).await;
        let second = n.distributor.post_manifest("successrepo", "other", "manifest").await.unwrap();

        assert_eq!(first, second);
        assert!(!n.store.upload_file_exists("manifest").await);
        assert_eq!(n.distributor.client().active_torrents().await.len(), 1);

        // Already cached under its digest name.
        let third = n.distributor.post_manifest("successrepo", "tag", first.hex()).await.unwrap();
        assert_eq!(third, first);
    }

    #[tokio::test]
    async fn test_get_keeps_cached_content_when_seeding_fails() {
        let tracker = spawn_tracker().await;
        let network = SwarmNetwork::new();
        let publisher = node(&tracker, network.join(), false).await;
        let consumer = node_with(&tracker, Arc::new(NoAnnounce(network.join())), false).await;

        let data = manifest_bytes();
        stage(&publisher.store, "manifest", &data).await;
        let posted = publisher.distributor.post_manifest("successrepo", "tag", "manifest").await.unwrap();

        let fetched = consumer.distributor.get_manifest("successrepo", "tag").await.unwrap();
        assert_eq!(fetched, posted);
        assert_eq!(&consumer.store.read_cache_file(fetched.hex()).await.unwrap()[..], &data[..]);
    }

    #[tokio::test]
    async fn test_get_drops_transfer_named_after_other_content() {
        let tracker = spawn_tracker().await;
        let network = SwarmNetwork::new();
        let publisher = node(&tracker, network.join(), false).await;
        let consumer = node(&tracker, network.join(), false).await;

        stage(&publisher.store, "manifest", &manifest_bytes()).await;
        publisher.distributor.post_manifest("successrepo", "tag", "manifest").await.unwrap();
        let info_hash = publisher.distributor.client().active_torrents().await[0];

        // Identity of one manifest paired with the digest of another.
        let other = Digest::of_bytes(b"other manifest");
        let body = format!(r#"{{"digest":"{}","info_hash":"{}"}}"#, other, info_hash);
        post_raw_manifest(&tracker, "successrepo:mixed", &body).await;

        let err = consumer.distributor.get_manifest("successrepo", "mixed").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::InvalidState { .. })
        ));
        assert!(consumer.distributor.client().active_torrents().await.is_empty());
        assert!(!consumer.store.cache_file_exists(other.hex()).await);
    }

    #[tokio::test]
    async fn test_get_rejects_record_with_path_digest() {
        let tracker = spawn_tracker().await;
        let n = node(&tracker, MemorySwarm::standalone(), false).await;
        stage(&n.store, "secret", b"not a manifest").await;
        post_raw_manifest(&tracker, "successrepo:tag", r#"{"digest":"../upload/secret"}"#).await;

        assert!(n.distributor.get_manifest("successrepo", "tag").await.is_err());
        assert!(n.store.upload_file_exists("secret").await);
    }
}
