//! Proxy repositories: a local cache in front of a remote origin
//!
//! A miss is fetched from the remote under the per-path lock, so concurrent
//! first requests for one path reach the remote once and every later caller
//! finds the committed file.

use async_trait::async_trait;
use depot_core::{ChecksumAlgorithm, Configuration, Repository, RepositoryPath, RepositoryType};
use std::sync::Arc;

use super::RepositoryProvider;
use crate::checksum::{ChecksumCache, DigestValues, Digests, parse_checksum};
use crate::error::{RepoError, Result};
use crate::fetch;
use crate::index::{ArtifactEntry, ArtifactIndex, ArtifactPredicate, Paginator};
use crate::locks::PathLocks;
use crate::remote::{RemoteCredentials, RemoteFetcher, RemoteRequest};
use crate::stream::{self, ArtifactInputStream, ArtifactOutputStream};

pub struct ProxyRepositoryProvider {
    index: Arc<ArtifactIndex>,
    fetcher: Arc<dyn RemoteFetcher>,
    locks: Arc<PathLocks>,
    checksums: Arc<ChecksumCache>,
}

impl ProxyRepositoryProvider {
    pub fn new(
        index: Arc<ArtifactIndex>,
        fetcher: Arc<dyn RemoteFetcher>,
        locks: Arc<PathLocks>,
        checksums: Arc<ChecksumCache>,
    ) -> Self {
        Self {
            index,
            fetcher,
            locks,
            checksums,
        }
    }

    /// Whether `path` can be served from the local cache
    async fn is_cached(&self, config: &Configuration, path: &RepositoryPath) -> Result<bool> {
        let meta = match tokio::fs::metadata(path.absolute()).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if path.is_metadata() {
            let age = meta.modified().ok().and_then(|m| m.elapsed().ok());
            if age.is_some_and(|age| age >= config.remote.metadata_max_age) {
                tracing::debug!("Cached metadata {} expired", path);
                return Ok(false);
            }
        }

        match self.index.get(&path.key(), path.relative())? {
            Some(entry) => Ok(entry.cached),
            None => Ok(true),
        }
    }

    /// Serve from cache or fetch from the remote; caller holds the path lock
    async fn ensure_cached(&self, config: &Configuration, path: &RepositoryPath) -> Result<bool> {
        if self.is_cached(config, path).await? {
            self.index.touch(&path.key(), path.relative())?;
            tracing::debug!("Cache hit {}", path);
            return Ok(true);
        }

        let remote = path.repository().remote.as_ref().ok_or_else(|| {
            RepoError::ConfigurationInconsistency {
                message: format!("proxy repository {} has no remote", path.key()),
            }
        })?;
        let request = RemoteRequest::new(remote.url_for(path.relative()))
            .with_credentials(RemoteCredentials::from_remote(remote));
        tracing::debug!("Cache miss {}, fetching {}", path, request.url);

        let target = path.absolute();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = stream::staging_path(&target);

        let fetched = if path.is_checksum() {
            self.fetch_checksum(path, &request, &staging, config.remote.retry_budget)
                .await?
        } else {
            fetch::download(
                self.fetcher.as_ref(),
                &request,
                &staging,
                config.remote.retry_budget,
            )
            .await?
        };
        let Some(digests) = fetched else {
            tracing::debug!("{} not found on remote", request.url);
            return Ok(false);
        };

        if !path.is_checksum() {
            self.checksums.put_all(&path.to_string(), &digests);
        }

        if let Err(e) = stream::commit_staged(path, &staging, &digests, &self.index, false).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }

        tracing::info!("Cached {} ({} bytes) from {}", path, digests.size, request.url);
        Ok(true)
    }

    /// Fetch a checksum file into memory, validate it and stage it
    async fn fetch_checksum(
        &self,
        path: &RepositoryPath,
        request: &RemoteRequest,
        staging: &std::path::Path,
        retry_budget: u32,
    ) -> Result<Option<DigestValues>> {
        let Some(content) = fetch::buffer(self.fetcher.as_ref(), request, retry_budget).await?
        else {
            return Ok(None);
        };
        self.validate_checksum(path, &content);

        let mut digests = Digests::new();
        digests.update(&content);
        if let Err(e) = tokio::fs::write(staging, &content).await {
            let _ = tokio::fs::remove_file(staging).await;
            return Err(e.into());
        }
        Ok(Some(digests.finish()))
    }

    /// Compare a fetched checksum file with the digest computed for its
    /// artifact; a mismatch is reported and the cached digest dropped
    fn validate_checksum(&self, path: &RepositoryPath, content: &[u8]) {
        let Some((base, algorithm)) = ChecksumAlgorithm::split(path.relative()) else {
            return;
        };
        let artifact = path.sibling(base).to_string();
        let Some(expected) = self.checksums.get(&artifact, algorithm) else {
            return;
        };

        match parse_checksum(content) {
            Some(actual) if actual == expected => {
                tracing::debug!("{} checksum of {} verified", algorithm, artifact);
            }
            actual => {
                let mismatch = RepoError::ChecksumMismatch {
                    path: artifact.clone(),
                    expected,
                    actual: actual.unwrap_or_default(),
                };
                tracing::warn!("{}", mismatch);
                self.checksums.remove(&artifact, algorithm);
            }
        }
    }
}

#[async_trait]
impl RepositoryProvider for ProxyRepositoryProvider {
    fn alias(&self) -> RepositoryType {
        RepositoryType::Proxy
    }

    async fn resolve_path(
        &self,
        config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<RepositoryPath>> {
        let _guard = self.locks.acquire(&path.to_string()).await;
        if self.ensure_cached(config, path).await? {
            Ok(Some(path.clone()))
        } else {
            Ok(None)
        }
    }

    async fn get_input_stream(
        &self,
        config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<ArtifactInputStream>> {
        let _guard = self.locks.acquire(&path.to_string()).await;
        if self.ensure_cached(config, path).await? {
            ArtifactInputStream::open(path.clone()).await
        } else {
            Ok(None)
        }
    }

    async fn get_output_stream(
        &self,
        _config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<ArtifactOutputStream>> {
        tracing::debug!("Refusing write of {} into a proxy repository", path);
        Ok(None)
    }

    async fn delete(&self, _config: &Configuration, path: &RepositoryPath) -> Result<bool> {
        let _guard = self.locks.acquire(&path.to_string()).await;
        if !tokio::fs::try_exists(path.absolute()).await? {
            return Ok(false);
        }

        tokio::fs::remove_file(path.absolute()).await?;
        if !path.is_checksum() {
            stream::remove_sidecars(path).await?;
        }
        self.index.remove(&path.key(), path.relative())?;
        Ok(true)
    }

    async fn search(
        &self,
        _config: &Configuration,
        repository: &Repository,
        predicate: &ArtifactPredicate,
        paginator: &Paginator,
    ) -> Result<Vec<ArtifactEntry>> {
        self.index.search(&[repository.key()], predicate, paginator)
    }

    async fn count(
        &self,
        _config: &Configuration,
        repository: &Repository,
        predicate: &ArtifactPredicate,
    ) -> Result<u64> {
        self.index.count(&[repository.key()], predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::{Reply, ScriptedFetcher};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    const REMOTE: &str = "https://repo.example/maven2";
    const JAR: &str = "org/foo/bar/1.0/bar-1.0.jar";

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Configuration,
        fetcher: Arc<ScriptedFetcher>,
        checksums: Arc<ChecksumCache>,
        index: Arc<ArtifactIndex>,
        provider: ProxyRepositoryProvider,
    }

    fn fixture(fetcher: ScriptedFetcher) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            r#"
basedir: {}
storages:
  storage0:
    repositories:
      central:
        type: proxy
        remote:
          url: {REMOTE}
"#,
            dir.path().display()
        );
        let config = Configuration::from_yaml(&yaml).unwrap();
        let fetcher = Arc::new(fetcher);
        let checksums = Arc::new(ChecksumCache::new(Duration::from_secs(60)));
        let index = Arc::new(ArtifactIndex::open_memory().unwrap());
        let provider = ProxyRepositoryProvider::new(
            index.clone(),
            fetcher.clone(),
            Arc::new(PathLocks::new()),
            checksums.clone(),
        );

        Fixture {
            _dir: dir,
            config,
            fetcher,
            checksums,
            index,
            provider,
        }
    }

    impl Fixture {
        fn path(&self, relative: &str) -> RepositoryPath {
            let repo = self.config.repository("storage0", "central").unwrap().clone();
            RepositoryPath::new(repo, relative).unwrap()
        }

        async fn read(&self, relative: &str) -> Option<Vec<u8>> {
            let mut stream = self
                .provider
                .get_input_stream(&self.config, &self.path(relative))
                .await
                .unwrap()?;
            let mut data = Vec::new();
            stream.read_to_end(&mut data).await.unwrap();
            Some(data)
        }
    }

    fn url(relative: &str) -> String {
        format!("{REMOTE}/{relative}")
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script(&url(JAR), Reply::ok(b"remote jar"));
        let fx = fixture(fetcher);

        assert_eq!(fx.read(JAR).await.unwrap(), b"remote jar");
        assert_eq!(fx.read(JAR).await.unwrap(), b"remote jar");
        assert_eq!(fx.fetcher.calls(), 1);

        let entry = fx
            .index
            .get(&fx.path(JAR).key(), JAR)
            .unwrap()
            .unwrap();
        assert!(entry.cached);
        assert_eq!(entry.size, 10);
        assert!(!fx.path(&format!("{JAR}.sha1")).absolute().exists());
    }

    #[tokio::test]
    async fn test_remote_not_found() {
        let fx = fixture(ScriptedFetcher::new());
        assert!(fx.read(JAR).await.is_none());
        assert!(fx
            .provider
            .resolve_path(&fx.config, &fx.path(JAR))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_checksum_verified() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script(&url(JAR), Reply::ok(b"hello world"));
        fetcher.script(
            &url(&format!("{JAR}.sha1")),
            Reply::ok(b"2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"),
        );
        let fx = fixture(fetcher);

        fx.read(JAR).await.unwrap();
        fx.read(&format!("{JAR}.sha1")).await.unwrap();

        let artifact = fx.path(JAR).to_string();
        assert!(fx.checksums.get(&artifact, ChecksumAlgorithm::Sha1).is_some());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_still_delivered() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script(&url(JAR), Reply::ok(b"hello world"));
        fetcher.script(
            &url(&format!("{JAR}.sha1")),
            Reply::ok(b"0000000000000000000000000000000000000000"),
        );
        let fx = fixture(fetcher);

        fx.read(JAR).await.unwrap();
        let artifact = fx.path(JAR).to_string();
        assert!(fx.checksums.get(&artifact, ChecksumAlgorithm::Sha1).is_some());

        let delivered = fx.read(&format!("{JAR}.sha1")).await.unwrap();
        assert_eq!(delivered, b"0000000000000000000000000000000000000000");
        assert!(fx.checksums.get(&artifact, ChecksumAlgorithm::Sha1).is_none());
        assert!(fx.checksums.get(&artifact, ChecksumAlgorithm::Md5).is_some());
    }

    #[tokio::test]
    async fn test_checksum_refetched_whole_after_short_body() {
        let sha1 = format!("{JAR}.sha1");
        let fetcher = ScriptedFetcher::new();
        fetcher.script(&url(JAR), Reply::ok(b"hello world"));
        fetcher.script(
            &url(&sha1),
            Reply::Body {
                chunks: vec![b"2aae6c35".to_vec()],
                fail_after: false,
                accepts_ranges: false,
                partial: false,
                content_length: Some(40),
            },
        );
        fetcher.script(&url(&sha1), Reply::ok(b"2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"));
        let fx = fixture(fetcher);

        fx.read(JAR).await.unwrap();
        let delivered = fx.read(&sha1).await.unwrap();
        assert_eq!(delivered, b"2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");

        let artifact = fx.path(JAR).to_string();
        assert!(fx.checksums.get(&artifact, ChecksumAlgorithm::Sha1).is_some());
        let cached = fx.path(&sha1).absolute();
        let leftovers = std::fs::read_dir(cached.parent().unwrap())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);
        let offsets: Vec<u64> = fx
            .fetcher
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with(".sha1"))
            .map(|r| r.offset)
            .collect();
        assert_eq!(offsets, vec![0, 0]);
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let fetcher = ScriptedFetcher::with_delay(Duration::from_millis(50));
        fetcher.script(&url(JAR), Reply::ok(b"single flight"));
        let fx = Arc::new(fixture(fetcher));

        let reads = (0..4).map(|_| {
            let fx = fx.clone();
            tokio::spawn(async move { fx.read(JAR).await })
        });
        for read in futures::future::join_all(reads).await {
            assert_eq!(read.unwrap().unwrap(), b"single flight");
        }
        assert_eq!(fx.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_uncached_record_is_refetched() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script(&url(JAR), Reply::ok(b"v1"));
        let fx = fixture(fetcher);

        fx.read(JAR).await.unwrap();
        let mut entry = fx.index.get(&fx.path(JAR).key(), JAR).unwrap().unwrap();
        entry.cached = false;
        fx.index.upsert(&entry).unwrap();

        fx.read(JAR).await.unwrap();
        assert_eq!(fx.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_writes_refused_and_delete() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script(&url(JAR), Reply::ok(b"remote jar"));
        let fx = fixture(fetcher);

        assert!(fx
            .provider
            .get_output_stream(&fx.config, &fx.path(JAR))
            .await
            .unwrap()
            .is_none());

        fx.read(JAR).await.unwrap();
        assert!(fx.provider.delete(&fx.config, &fx.path(JAR)).await.unwrap());
        assert!(fx.index.get(&fx.path(JAR).key(), JAR).unwrap().is_none());
        assert!(!fx.provider.delete(&fx.config, &fx.path(JAR)).await.unwrap());
    }
}
