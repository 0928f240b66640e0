//! Artifact streams and atomic commit onto repository storage
//!
//! Writes always land in a staging file next to their target and are moved
//! into place by a rename, so readers never observe a partial artifact.

use depot_core::{ChecksumAlgorithm, RepositoryPath};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::checksum::{DigestValues, Digests};
use crate::error::Result;
use crate::index::{ArtifactEntry, ArtifactIndex};

/// Readable artifact resolved in a concrete repository
#[derive(Debug)]
pub struct ArtifactInputStream {
    path: RepositoryPath,
    file: File,
    length: u64,
}

impl ArtifactInputStream {
    /// Open `path` if it exists as a regular file
    pub async fn open(path: RepositoryPath) -> Result<Option<Self>> {
        let location = path.absolute();
        match tokio::fs::metadata(&location).await {
            Ok(meta) if meta.is_file() => {
                let file = File::open(&location).await?;
                Ok(Some(Self {
                    path,
                    file,
                    length: meta.len(),
                }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Where the artifact was found
    pub fn path(&self) -> &RepositoryPath {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl AsyncRead for ArtifactInputStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

/// Writable artifact, visible only after `commit`
pub struct ArtifactOutputStream {
    path: RepositoryPath,
    staging: Option<PathBuf>,
    file: File,
    digests: Digests,
    index: Arc<ArtifactIndex>,
}

impl ArtifactOutputStream {
    /// Create the staging file for `path`
    pub async fn create(path: RepositoryPath, index: Arc<ArtifactIndex>) -> Result<Self> {
        let target = path.absolute();
        let staging = staging_path(&target);
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&staging).await?;

        Ok(Self {
            path,
            staging: Some(staging),
            file,
            digests: Digests::new(),
            index,
        })
    }

    pub fn path(&self) -> &RepositoryPath {
        &self.path
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.digests.size()
    }

    /// Move the staged bytes into place, write sidecars and index the artifact
    pub async fn commit(mut self) -> Result<DigestValues> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        let staging = self.staging.take().unwrap_or_default();
        let digests = std::mem::take(&mut self.digests).finish();
        commit_staged(&self.path, &staging, &digests, &self.index, true).await?;
        Ok(digests)
    }

    /// Discard the staged bytes
    pub async fn abort(mut self) -> Result<()> {
        if let Some(staging) = self.staging.take() {
            tokio::fs::remove_file(&staging).await?;
        }
        Ok(())
    }
}

impl AsyncWrite for ArtifactOutputStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let poll = Pin::new(&mut this.file).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = poll {
            this.digests.update(&buf[..written]);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

impl Drop for ArtifactOutputStream {
    fn drop(&mut self) {
        if let Some(staging) = self.staging.take() {
            let _ = std::fs::remove_file(staging);
        }
    }
}

impl std::fmt::Debug for ArtifactOutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactOutputStream")
            .field("path", &self.path.to_string())
            .field("written", &self.digests.size())
            .finish_non_exhaustive()
    }
}

/// Unique staging file next to `target`
pub fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{:016x}.part", name, rand::random::<u64>()))
}

/// Rename a staged file into place and record it
///
/// The previous file goes to the trash when the repository keeps one. With
/// `sidecars`, `.md5` / `.sha1` files are written next to artifacts (never
/// next to checksum files themselves).
pub async fn commit_staged(
    path: &RepositoryPath,
    staging: &Path,
    digests: &DigestValues,
    index: &ArtifactIndex,
    sidecars: bool,
) -> Result<()> {
    let target = path.absolute();
    if path.repository().trash_enabled && tokio::fs::try_exists(&target).await? {
        move_to_trash(path).await?;
    }

    tokio::fs::rename(staging, &target).await?;

    if sidecars && !path.is_checksum() {
        for algorithm in ChecksumAlgorithm::ALL {
            let sidecar = path.sibling(algorithm.sidecar(path.relative())).absolute();
            tokio::fs::write(&sidecar, digests.get(algorithm)).await?;
        }
    }

    if let Some(entry) = ArtifactEntry::for_path(path, digests.size) {
        index.upsert(&entry.with_checksums(&digests.md5, &digests.sha1))?;
    }

    tracing::debug!("Committed {} ({} bytes)", path, digests.size);
    Ok(())
}

/// Move a stored file under the repository trash directory
pub async fn move_to_trash(path: &RepositoryPath) -> Result<()> {
    let trash = path.trash();
    if let Some(parent) = trash.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(path.absolute(), &trash).await?;
    Ok(())
}

/// Remove checksum sidecars of an artifact, ignoring missing ones
pub async fn remove_sidecars(path: &RepositoryPath) -> Result<()> {
    for algorithm in ChecksumAlgorithm::ALL {
        let sidecar = path.sibling(algorithm.sidecar(path.relative())).absolute();
        match tokio::fs::remove_file(&sidecar).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{Repository, RepositoryKey};
    use tokio::io::AsyncReadExt;

    fn repo(dir: &Path, trash: bool) -> Repository {
        let mut repo = Repository::hosted("releases");
        repo.storage_id = "storage0".to_string();
        repo.location = dir.to_path_buf();
        repo.trash_enabled = trash;
        repo
    }

    async fn write(path: RepositoryPath, index: &Arc<ArtifactIndex>, data: &[u8]) -> DigestValues {
        let mut out = ArtifactOutputStream::create(path, index.clone()).await.unwrap();
        out.write_all(data).await.unwrap();
        out.commit().await.unwrap()
    }

    #[tokio::test]
    async fn test_commit_writes_file_sidecars_and_entry() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(ArtifactIndex::open_memory().unwrap());
        let path = RepositoryPath::new(repo(dir.path(), false), "org/foo/bar/1.0/bar-1.0.jar").unwrap();

        let digests = write(path.clone(), &index, b"hello world").await;

        assert_eq!(std::fs::read(path.absolute()).unwrap(), b"hello world");
        let sha1 = std::fs::read_to_string(dir.path().join("org/foo/bar/1.0/bar-1.0.jar.sha1")).unwrap();
        assert_eq!(sha1, digests.sha1);

        let entry = index
            .get(&RepositoryKey::new("storage0", "releases"), "org/foo/bar/1.0/bar-1.0.jar")
            .unwrap()
            .unwrap();
        assert_eq!(entry.size, 11);
        assert_eq!(entry.sha1.as_deref(), Some(digests.sha1.as_str()));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("org/foo/bar/1.0"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_moves_previous_to_trash() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(ArtifactIndex::open_memory().unwrap());
        let path = RepositoryPath::new(repo(dir.path(), true), "org/foo/bar/1.0/bar-1.0.jar").unwrap();

        write(path.clone(), &index, b"first").await;
        write(path.clone(), &index, b"second").await;

        assert_eq!(std::fs::read(path.absolute()).unwrap(), b"second");
        assert_eq!(std::fs::read(path.trash()).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_dropped_stream_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(ArtifactIndex::open_memory().unwrap());
        let path = RepositoryPath::new(repo(dir.path(), false), "a/b/1.0/b-1.0.jar").unwrap();

        {
            let mut out = ArtifactOutputStream::create(path.clone(), index.clone()).await.unwrap();
            out.write_all(b"partial").await.unwrap();
        }

        assert!(!path.absolute().exists());
        assert_eq!(std::fs::read_dir(dir.path().join("a/b/1.0")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_input_stream_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(ArtifactIndex::open_memory().unwrap());
        let path = RepositoryPath::new(repo(dir.path(), false), "org/foo/bar/1.0/bar-1.0.jar").unwrap();
        write(path.clone(), &index, b"content").await;

        let mut input = ArtifactInputStream::open(path.clone()).await.unwrap().unwrap();
        assert_eq!(input.len(), 7);
        let mut data = Vec::new();
        input.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"content");

        let dir_path = RepositoryPath::new(repo(dir.path(), false), "org/foo").unwrap();
        assert!(ArtifactInputStream::open(dir_path).await.unwrap().is_none());
        let missing = RepositoryPath::new(repo(dir.path(), false), "nope.jar").unwrap();
        assert!(ArtifactInputStream::open(missing).await.unwrap().is_none());
    }
}
