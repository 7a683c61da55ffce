//! Filesystem-backed [`ContentStore`] (C1), content-addressed under
//! `<root>/<ab>/<cd>/<rest>` with staging under `<root>/_uploads/<staging-id>`
//! (spec.md §6 "Persisted state layout").
//!
//! Grounded directly on the teacher's `FilesystemStorage` (blob_path /
//! upload_path layout, atomic rename on `finalize_upload`, background-thread
//! hashing via `spawn_blocking`) — see also
//! `other_examples/c44ae6b9_mbr-rockslide__src-registry-storage.rs.rs`, an
//! earlier revision of the same code that is more directly comparable.

use std::path::{Path, PathBuf};

use axum::async_trait;
use sha2::{Digest as Sha2Digest, Sha256};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWrite};
use uuid::Uuid;

use crate::digest::Digest;

use super::{ContentStore, Error};

const BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug)]
pub struct FilesystemContentStore {
    blobs: PathBuf,
    staging: PathBuf,
}

impl FilesystemContentStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, Error> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;

        let blobs = root.join("blobs");
        let staging = root.join("_uploads");
        std::fs::create_dir_all(&blobs)?;
        std::fs::create_dir_all(&staging)?;

        Ok(Self { blobs, staging })
    }

    fn blob_path(&self, digest: Digest) -> PathBuf {
        let (a, b, full) = digest.fanout_path();
        self.blobs.join(a).join(b).join(full)
    }

    fn staging_path(&self, id: Uuid) -> PathBuf {
        self.staging.join(format!("{id}.partial"))
    }
}

#[async_trait]
impl ContentStore for FilesystemContentStore {
    async fn stage(&self) -> Result<(Uuid, Box<dyn AsyncWrite + Send + Unpin>), Error> {
        let id = Uuid::new_v4();
        let path = self.staging_path(id);
        let file = tokio::fs::File::create(&path).await?;
        Ok((id, Box::new(file)))
    }

    async fn resume_stage(
        &self,
        staging_id: Uuid,
        start_at: u64,
    ) -> Result<Box<dyn AsyncWrite + Send + Unpin>, Error> {
        let path = self.staging_path(staging_id);
        if !path.exists() {
            return Err(Error::UploadDoesNotExist);
        }
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await?;
        file.seek(std::io::SeekFrom::Start(start_at)).await?;
        Ok(Box::new(file))
    }

    async fn commit(&self, staging_id: Uuid) -> Result<(Digest, u64), Error> {
        let staging_path = self.staging_path(staging_id);
        if !staging_path.exists() {
            return Err(Error::UploadDoesNotExist);
        }

        // Hashing is offloaded to a blocking thread, as in the teacher's
        // `finalize_upload`.
        let hash_path = staging_path.clone();
        let (digest, size) = tokio::task::spawn_blocking(move || -> Result<(Digest, u64), Error> {
            use std::io::Read;
            let mut src = std::fs::File::open(&hash_path)?;
            let mut buf = vec![0u8; BUFFER_SIZE];
            let mut hasher = Sha256::new();
            let mut total = 0u64;
            loop {
                let read = src.read(&mut buf)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buf[..read]);
                total += read as u64;
            }
            Ok((Digest::new(hasher.finalize().into()), total))
        })
        .await??;

        let dest = self.blob_path(digest);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Idempotent commit: if another caller already committed this
        // digest, discard our staged copy instead of erroring (spec.md
        // §4.6).
        if tokio::fs::metadata(&dest).await.is_ok() {
            tokio::fs::remove_file(&staging_path).await.ok();
        } else {
            tokio::fs::rename(&staging_path, &dest).await?;
        }

        Ok((digest, size))
    }

    async fn open(
        &self,
        digest: Digest,
    ) -> Result<Option<Box<dyn AsyncRead + Send + Unpin>>, Error> {
        let path = self.blob_path(digest);
        if !path.exists() {
            return Ok(None);
        }
        let file = tokio::fs::File::open(path).await?;
        Ok(Some(Box::new(file)))
    }

    async fn stat(&self, digest: Digest) -> Result<Option<u64>, Error> {
        let path = self.blob_path(digest);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(tokio::fs::metadata(path).await?.len()))
    }

    async fn delete(&self, digest: Digest) -> Result<(), Error> {
        let path = self.blob_path(digest);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn stage_commit_open_round_trips_bytes() {
        let tmp = tempdir::TempDir::new("cas-test").unwrap();
        let store = FilesystemContentStore::new(tmp.path()).unwrap();

        let (id, mut writer) = store.stage().await.unwrap();
        writer.write_all(b"hello blob").await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        let (digest, size) = store.commit(id).await.unwrap();
        assert_eq!(digest, Digest::of(b"hello blob"));
        assert_eq!(size, 10);

        let mut reader = store.open(digest).await.unwrap().unwrap();
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"hello blob");
    }

    #[tokio::test]
    async fn concurrent_commit_of_same_digest_is_idempotent() {
        let tmp = tempdir::TempDir::new("cas-test").unwrap();
        let store = FilesystemContentStore::new(tmp.path()).unwrap();

        let (id1, mut w1) = store.stage().await.unwrap();
        w1.write_all(b"same bytes").await.unwrap();
        w1.flush().await.unwrap();
        drop(w1);

        let (id2, mut w2) = store.stage().await.unwrap();
        w2.write_all(b"same bytes").await.unwrap();
        w2.flush().await.unwrap();
        drop(w2);

        let (d1, _) = store.commit(id1).await.unwrap();
        let (d2, _) = store.commit(id2).await.unwrap();
        assert_eq!(d1, d2);
        assert!(store.stat(d1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_blob_returns_none() {
        let tmp = tempdir::TempDir::new("cas-test").unwrap();
        let store = FilesystemContentStore::new(tmp.path()).unwrap();
        let digest = Digest::of(b"never written");
        assert!(store.open(digest).await.unwrap().is_none());
        assert!(store.stat(digest).await.unwrap().is_none());
    }
}
