//! Filesystem-backed object store.
//!
//! Objects live at `<root>/<object path>`. In-progress writes go to
//! `<root>/.partial/` and are renamed into place on commit, so a failed
//! or aborted stream never leaves a truncated object behind. Content
//! types are kept in sidecar files under `<root>/.meta/`.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::signing::UrlSigner;
use crate::{ObjectInfo, ObjectStore, ObjectWriter, StorageError};

const PARTIAL_DIR: &str = ".partial";
const META_DIR: &str = ".meta";

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    signer: Option<UrlSigner>,
}

impl LocalObjectStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            signer: None,
        }
    }

    /// Enables [`sign_write_url`](ObjectStore::sign_write_url) using `signer`.
    pub fn with_signer(mut self, signer: UrlSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn signer(&self) -> Option<&UrlSigner> {
        self.signer.as_ref()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Removes leftovers of writes interrupted by a crash.
    pub async fn purge_partials(&self) -> Result<usize, StorageError> {
        let dir = self.root.join(PARTIAL_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "purged partial objects");
        }
        Ok(removed)
    }

    fn object_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        tracklift_transfer::validate_object_path(path)?;

        let names: Vec<_> = Path::new(path)
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy()),
                _ => None,
            })
            .collect();
        if names.is_empty() {
            return Err(StorageError::InvalidPath(format!("no file name: {path}")));
        }
        // Dot-prefixed names are reserved for `.partial` and `.meta`.
        if names.iter().any(|name| name.starts_with('.')) {
            return Err(StorageError::InvalidPath(format!(
                "reserved object path: {path}"
            )));
        }
        Ok(self.root.join(path))
    }

    fn meta_path(&self, path: &str) -> PathBuf {
        self.root.join(META_DIR).join(path)
    }

    async fn read_content_type(&self, path: &str) -> Option<String> {
        tokio::fs::read_to_string(self.meta_path(path))
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    async fn head_inner(&self, path: &str) -> Result<Option<ObjectInfo>, StorageError> {
        let full = self.object_path(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectInfo {
                name: path.to_string(),
                size: meta.len(),
                content_type: self.read_content_type(path).await,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Walks the store and returns `(object path, size)` for every object.
    async fn walk(&self) -> Result<Vec<(String, u64)>, StorageError> {
        let mut out = Vec::new();
        let mut stack = vec![(self.root.clone(), String::new())];

        while let Some((dir, rel)) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let key = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };

                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push((entry.path(), key));
                } else if file_type.is_file() {
                    out.push((key, entry.metadata().await?.len()));
                }
            }
        }

        Ok(out)
    }
}

impl ObjectStore for LocalObjectStore {
    fn open_write_stream<'a>(
        &'a self,
        path: &'a str,
        content_type: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ObjectWriter>, StorageError>> {
        async move {
            let final_path = self.object_path(path)?;
            let partial_dir = self.root.join(PARTIAL_DIR);
            tokio::fs::create_dir_all(&partial_dir).await?;

            let part_path = partial_dir.join(format!("{}.part", uuid::Uuid::new_v4()));
            let file = tokio::fs::File::create(&part_path).await?;

            debug!(path, part = %part_path.display(), "opened object write stream");

            let writer: Box<dyn ObjectWriter> = Box::new(LocalWriter {
                file: Some(BufWriter::new(file)),
                part_path,
                final_path,
                meta_path: self.meta_path(path),
                name: path.to_string(),
                content_type: content_type.to_string(),
                written: 0,
                done: false,
            });
            Ok(writer)
        }
        .boxed()
    }

    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool, StorageError>> {
        async move { Ok(self.head_inner(path).await?.is_some()) }.boxed()
    }

    fn head<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<ObjectInfo>, StorageError>> {
        self.head_inner(path).boxed()
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectInfo>, StorageError>> {
        async move {
            let mut objects = Vec::new();
            for (name, size) in self.walk().await? {
                if !name.starts_with(prefix) {
                    continue;
                }
                let content_type = self.read_content_type(&name).await;
                objects.push(ObjectInfo {
                    name,
                    size,
                    content_type,
                });
            }
            objects.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(objects)
        }
        .boxed()
    }

    fn delete<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        async move {
            let full = self.object_path(path)?;
            match tokio::fs::remove_file(&full).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::NotFound(path.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
            // Sidecar may be missing for objects copied in by hand.
            let _ = tokio::fs::remove_file(self.meta_path(path)).await;
            debug!(path, "object deleted");
            Ok(())
        }
        .boxed()
    }

    fn sign_write_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        self.object_path(path)?;
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| StorageError::Unsupported("direct uploads are not configured".into()))?;
        Ok(signer.signed_url(path, ttl))
    }
}

// ---------------------------------------------------------------------------
// LocalWriter
// ---------------------------------------------------------------------------

struct LocalWriter {
    file: Option<BufWriter<tokio::fs::File>>,
    part_path: PathBuf,
    final_path: PathBuf,
    meta_path: PathBuf,
    name: String,
    content_type: String,
    written: u64,
    done: bool,
}

impl LocalWriter {
    async fn commit(&mut self) -> Result<ObjectInfo, StorageError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| StorageError::Io(std::io::Error::other("writer already closed")))?;
        file.flush().await?;
        file.into_inner().sync_all().await?;

        if let Some(parent) = self.final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        self.done = true;

        if let Some(parent) = self.meta_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::write(&self.meta_path, &self.content_type).await {
            warn!(path = %self.name, error = %e, "failed to record content type");
        }

        Ok(ObjectInfo {
            name: self.name.clone(),
            size: self.written,
            content_type: Some(self.content_type.clone()),
        })
    }
}

impl ObjectWriter for LocalWriter {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<(), StorageError>> {
        async move {
            let file = self
                .file
                .as_mut()
                .ok_or_else(|| StorageError::Io(std::io::Error::other("writer already closed")))?;
            file.write_all(data).await?;
            self.written += data.len() as u64;
            Ok(())
        }
        .boxed()
    }

    fn finish(mut self: Box<Self>) -> BoxFuture<'static, Result<ObjectInfo, StorageError>> {
        async move {
            let result = self.commit().await;
            if result.is_ok() {
                debug!(path = %self.name, size = self.written, "object committed");
            }
            // On failure, Drop removes the partial file.
            result
        }
        .boxed()
    }

    fn abort(mut self: Box<Self>) -> BoxFuture<'static, ()> {
        async move {
            self.file.take();
            let _ = tokio::fs::remove_file(&self.part_path).await;
            self.done = true;
            debug!(path = %self.name, "object write aborted");
        }
        .boxed()
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        if !self.done {
            self.file.take();
            let _ = std::fs::remove_file(&self.part_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        (dir, store)
    }

    async fn put(store: &LocalObjectStore, path: &str, data: &[u8]) -> ObjectInfo {
        let mut w = store.open_write_stream(path, "audio/wav").await.unwrap();
        w.write(data).await.unwrap();
        w.finish().await.unwrap()
    }

    #[tokio::test]
    async fn write_then_head() {
        let (_dir, store) = store();
        let mut w = store
            .open_write_stream("tracks/a.wav", "audio/wav")
            .await
            .unwrap();
        w.write(b"RIFF").await.unwrap();
        w.write(b"data").await.unwrap();

        // Not visible until committed.
        assert!(!store.exists("tracks/a.wav").await.unwrap());

        let info = w.finish().await.unwrap();
        assert_eq!(info.size, 8);

        let head = store.head("tracks/a.wav").await.unwrap().unwrap();
        assert_eq!(head.size, 8);
        assert_eq!(head.content_type.as_deref(), Some("audio/wav"));
    }

    #[tokio::test]
    async fn abort_leaves_nothing() {
        let (dir, store) = store();
        let mut w = store
            .open_write_stream("tracks/a.wav", "audio/wav")
            .await
            .unwrap();
        w.write(b"partial").await.unwrap();
        w.abort().await;

        assert!(!store.exists("tracks/a.wav").await.unwrap());
        let partials = std::fs::read_dir(dir.path().join(PARTIAL_DIR)).unwrap().count();
        assert_eq!(partials, 0);
    }

    #[tokio::test]
    async fn dropped_writer_is_discarded() {
        let (dir, store) = store();
        {
            let mut w = store
                .open_write_stream("tracks/a.wav", "audio/wav")
                .await
                .unwrap();
            w.write(b"partial").await.unwrap();
        }
        assert!(!store.exists("tracks/a.wav").await.unwrap());
        let partials = std::fs::read_dir(dir.path().join(PARTIAL_DIR)).unwrap().count();
        assert_eq!(partials, 0);
    }

    #[tokio::test]
    async fn empty_object() {
        let (_dir, store) = store();
        let info = put(&store, "tracks/silence.wav", b"").await;
        assert_eq!(info.size, 0);
        assert!(store.exists("tracks/silence.wav").await.unwrap());
    }

    #[tokio::test]
    async fn list_by_prefix_sorted() {
        let (_dir, store) = store();
        put(&store, "tracks/b.wav", b"bb").await;
        put(&store, "tracks/a.wav", b"a").await;
        put(&store, "other/c.wav", b"c").await;

        let listed = store.list("tracks/").await.unwrap();
        let names: Vec<&str> = listed.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["tracks/a.wav", "tracks/b.wav"]);
        assert_eq!(listed[1].size, 2);
    }

    #[tokio::test]
    async fn list_skips_internal_dirs() {
        let (_dir, store) = store();
        put(&store, "tracks/a.wav", b"a").await;
        let all = store.list("").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "tracks/a.wav");
    }

    #[tokio::test]
    async fn delete_existing_and_missing() {
        let (_dir, store) = store();
        put(&store, "tracks/a.wav", b"a").await;

        store.delete("tracks/a.wav").await.unwrap();
        assert!(!store.exists("tracks/a.wav").await.unwrap());

        let err = store.delete("tracks/a.wav").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejects_traversal_and_reserved_paths() {
        let (_dir, store) = store();
        assert!(matches!(
            store.open_write_stream("../escape.wav", "audio/wav").await,
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            store.open_write_stream(".meta/x.wav", "audio/wav").await,
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn overwrite_replaces_object() {
        let (_dir, store) = store();
        put(&store, "tracks/a.wav", b"first").await;
        put(&store, "tracks/a.wav", b"2nd").await;
        assert_eq!(store.head("tracks/a.wav").await.unwrap().unwrap().size, 3);
    }

    #[test]
    fn sign_requires_signer() {
        let (_dir, store) = store();
        assert!(matches!(
            store.sign_write_url("tracks/a.wav", Duration::from_secs(60)),
            Err(StorageError::Unsupported(_))
        ));

        let store = store.with_signer(UrlSigner::new("k", "http://localhost:8080"));
        let url = store
            .sign_write_url("tracks/a.wav", Duration::from_secs(60))
            .unwrap();
        assert!(url.starts_with("http://localhost:8080/api/direct-upload/tracks/a.wav?"));
    }

    #[tokio::test]
    async fn purge_partials_removes_leftovers() {
        let (dir, store) = store();
        let partial_dir = dir.path().join(PARTIAL_DIR);
        std::fs::create_dir_all(&partial_dir).unwrap();
        std::fs::write(partial_dir.join("stale.part"), b"x").unwrap();

        assert_eq!(store.purge_partials().await.unwrap(), 1);
        assert_eq!(store.purge_partials().await.unwrap(), 0);
    }
}
