use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Maximum accepted image size
pub const MAX_IMAGE_BYTES: usize = 2 * 1024 * 1024;

const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Local file system blob store: one PNG per post, named by the post id.
///
/// The directory is created once at startup (see `Config::ensure_directories`),
/// never lazily from a request path.
pub struct BlobStore {
    directory: PathBuf,
}

impl BlobStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Canonical file name for a post's image
    pub fn object_name(id: &Uuid) -> String {
        format!("{}.png", id)
    }

    /// The path is derived from the id alone; user-supplied filenames never
    /// reach the filesystem.
    fn blob_path(&self, id: &Uuid) -> PathBuf {
        self.directory.join(Self::object_name(id))
    }

    /// Check format and size constraints without touching the filesystem
    pub fn validate(bytes: &[u8]) -> Result<()> {
        if bytes.len() < PNG_MAGIC.len() || bytes[..PNG_MAGIC.len()] != PNG_MAGIC {
            return Err(AppError::Validation(
                "Formato de arquivo inválido. Apenas imagens PNG são permitidas.".to_string(),
            ));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(AppError::Validation(
                "O arquivo excede o tamanho máximo permitido de 2MB.".to_string(),
            ));
        }
        Ok(())
    }

    /// Write the image for `id`, replacing any existing blob.
    ///
    /// The bytes land in a temp file first and are moved into place with a
    /// rename, so a concurrent reader never observes a partial image.
    pub async fn write(&self, id: &Uuid, bytes: &Bytes) -> Result<()> {
        Self::validate(bytes)?;

        let final_path = self.blob_path(id);
        let tmp_path = self.directory.join(format!(".{}.png.tmp", id));

        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| AppError::BlobWrite(format!("Failed to create {:?}: {}", tmp_path, e)))?;
        file.write_all(bytes)
            .await
            .map_err(|e| AppError::BlobWrite(format!("Failed to write {:?}: {}", tmp_path, e)))?;
        file.flush()
            .await
            .map_err(|e| AppError::BlobWrite(format!("Failed to flush {:?}: {}", tmp_path, e)))?;
        drop(file);

        fs::rename(&tmp_path, &final_path).await.map_err(|e| {
            AppError::BlobWrite(format!("Failed to move blob into {:?}: {}", final_path, e))
        })?;

        tracing::debug!("Saved image to {:?}", final_path);
        Ok(())
    }

    pub async fn read(&self, id: &Uuid) -> Result<Bytes> {
        let path = self.blob_path(id);

        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("Imagem não encontrada para o post {}", id))
            } else {
                AppError::BlobRead(format!("Failed to read {:?}: {}", path, e))
            }
        })?;

        Ok(Bytes::from(data))
    }

    pub async fn delete(&self, id: &Uuid) -> Result<()> {
        let path = self.blob_path(id);

        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("Imagem não encontrada para o post {}", id))
            } else {
                AppError::BlobWrite(format!("Failed to delete {:?}: {}", path, e))
            }
        })?;

        tracing::debug!("Deleted image {:?}", path);
        Ok(())
    }

    pub async fn exists(&self, id: &Uuid) -> bool {
        self.blob_path(id).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn png_bytes(len: usize) -> Bytes {
        let mut data = PNG_MAGIC.to_vec();
        data.resize(len, 0xAB);
        Bytes::from(data)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let id = Uuid::new_v4();
        let bytes = png_bytes(512);

        store.write(&id, &bytes).await.unwrap();
        let back = store.read(&id).await.unwrap();
        assert_eq!(back, bytes);
    }

    #[tokio::test]
    async fn write_replaces_existing_blob() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let id = Uuid::new_v4();

        store.write(&id, &png_bytes(100)).await.unwrap();
        let second = png_bytes(200);
        store.write(&id, &second).await.unwrap();

        assert_eq!(store.read(&id).await.unwrap(), second);
    }

    #[tokio::test]
    async fn oversized_image_is_rejected() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let id = Uuid::new_v4();

        let err = store
            .write(&id, &png_bytes(MAX_IMAGE_BYTES + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!store.exists(&id).await);
    }

    #[tokio::test]
    async fn non_png_is_rejected() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let id = Uuid::new_v4();

        let err = store
            .write(&id, &Bytes::from_static(b"GIF89a not a png"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn read_missing_blob_is_not_found() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());

        let err = store.read(&Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_missing_blob_is_not_found() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());

        let err = store.delete(&Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_the_file() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let id = Uuid::new_v4();

        store.write(&id, &png_bytes(64)).await.unwrap();
        assert!(store.exists(&id).await);

        store.delete(&id).await.unwrap();
        assert!(!store.exists(&id).await);
    }
}
