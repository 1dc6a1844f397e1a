use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Manages on-disk media storage for pet photos.
///
/// Each photo is stored as a single flat file at `{media_dir}/{photo_id}`;
/// metadata (owner, content type, hash) lives in the database.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Path to the file for a given photo.
    pub fn file_path(&self, photo_id: &str) -> PathBuf {
        self.dir.join(photo_id)
    }

    /// Write a photo and return the hex SHA-256 of its content.
    pub async fn save(&self, photo_id: &str, data: &[u8]) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let sha256 = hex::encode(hasher.finalize());

        fs::write(self.file_path(photo_id), data).await?;
        Ok(sha256)
    }

    pub async fn open(&self, photo_id: &str) -> Result<fs::File> {
        Ok(fs::File::open(self.file_path(photo_id)).await?)
    }

    pub async fn remove(&self, photo_id: &str) -> Result<()> {
        fs::remove_file(self.file_path(photo_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_records_content_hash_and_roundtrips() {
        let dir = std::env::temp_dir().join(format!("pawsquare-test-{}", std::process::id()));
        let storage = Storage::new(dir.clone()).await.unwrap();

        let sha = storage.save("photo-1", b"not really a jpeg").await.unwrap();
        // SHA-256 of the content, stable across writes
        assert_eq!(sha.len(), 64);
        assert_eq!(storage.save("photo-1", b"not really a jpeg").await.unwrap(), sha);

        let stored = fs::read(storage.file_path("photo-1")).await.unwrap();
        assert_eq!(stored, b"not really a jpeg");

        storage.remove("photo-1").await.unwrap();
        assert!(storage.open("photo-1").await.is_err());

        let _ = fs::remove_dir_all(dir).await;
    }
}
