use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::lease::IdentityLeases;
use crate::models::{Post, PostFields, RegenerateRequest};
use crate::services::generator::{DescriptionCache, DescriptionGenerator};
use crate::services::post::PostService;
use crate::storage::BlobStore;

/// Coordinates the post record, its image blob, and the generated description
/// across operations that cannot share a transaction.
///
/// Each operation runs on a detached task: once a step has started mutating
/// persistent state, a dropped client connection cannot abort it mid-write.
/// A per-post lease keeps two mutating operations from interleaving on the
/// same id; acquisition fails fast instead of queueing.
#[derive(Clone)]
pub struct Lifecycle {
    db: Database,
    blobs: Arc<BlobStore>,
    generator: Arc<dyn DescriptionGenerator>,
    leases: IdentityLeases,
    cache: DescriptionCache,
}

impl Lifecycle {
    pub fn new(
        db: Database,
        blobs: Arc<BlobStore>,
        generator: Arc<dyn DescriptionGenerator>,
    ) -> Self {
        Self {
            db,
            blobs,
            generator,
            leases: IdentityLeases::default(),
            cache: DescriptionCache::default(),
        }
    }

    /// Validate an identity crossing the transport boundary before any store
    /// access happens.
    pub fn parse_id(raw: &str) -> Result<Uuid> {
        Uuid::parse_str(raw.trim())
            .map_err(|_| AppError::Validation(format!("ID inválido: {}", raw)))
    }

    /// Absolute image URL as served by the static upload route
    pub fn image_url(base_url: &str, id: &Uuid) -> String {
        format!(
            "{}/uploads/{}",
            base_url.trim_end_matches('/'),
            BlobStore::object_name(id)
        )
    }

    /// Create a post that owns an image.
    ///
    /// Validate, create the record with an empty reference, write the blob
    /// under the assigned id, then point the record at it. A failed blob
    /// write deletes the record again so no orphan survives; a failed
    /// finalize leaves blob and record in place with the reference still
    /// empty, recoverable by re-running the finalize step.
    pub async fn create_with_image(
        &self,
        fields: PostFields,
        image: Bytes,
        base_url: String,
    ) -> Result<Post> {
        let this = self.clone();
        run_to_completion(async move { this.create_with_image_inner(fields, image, base_url).await })
            .await
    }

    async fn create_with_image_inner(
        &self,
        fields: PostFields,
        image: Bytes,
        base_url: String,
    ) -> Result<Post> {
        BlobStore::validate(&image)?;

        let post = PostService::create(&self.db, &fields).await?;
        let id = Uuid::parse_str(&post.id)
            .map_err(|e| AppError::Internal(format!("stored post id is not a uuid: {}", e)))?;

        // The id was assigned a moment ago, so contention here means a stale
        // lease entry; surface it and undo the record either way.
        let _lease = match self.leases.try_acquire(&id) {
            Ok(lease) => lease,
            Err(e) => {
                self.compensate_create(&id).await;
                return Err(e);
            }
        };

        if let Err(e) = self.blobs.write(&id, &image).await {
            self.compensate_create(&id).await;
            return Err(e);
        }

        let img_url = Self::image_url(&base_url, &id);
        let found = PostService::finalize_image(&self.db, &id, &img_url)
            .await
            .map_err(|e| AppError::Update(e.to_string()))?;
        if !found {
            return Err(AppError::Update(format!(
                "post {} disappeared before its image reference was stored",
                id
            )));
        }

        PostService::get(&self.db, &id)
            .await?
            .ok_or_else(|| AppError::Update(format!("post {} disappeared after finalize", id)))
    }

    async fn compensate_create(&self, id: &Uuid) {
        match PostService::delete(&self.db, id).await {
            Ok(_) => tracing::info!("Rolled back post {} after failed image write", id),
            Err(e) => {
                tracing::error!("Rollback of post {} failed, orphan record may remain: {}", id, e)
            }
        }
    }

    /// Re-run description generation for an existing post's image.
    ///
    /// The record is only touched in the final step. Generated text is kept
    /// in a content-addressed cache, so a failed final update does not force
    /// the next attempt to pay the generator round trip again.
    pub async fn regenerate_description(
        &self,
        raw_id: &str,
        overrides: RegenerateRequest,
        base_url: String,
    ) -> Result<Post> {
        let id = Self::parse_id(raw_id)?;
        let this = self.clone();
        run_to_completion(async move { this.regenerate_inner(id, overrides, base_url).await }).await
    }

    async fn regenerate_inner(
        &self,
        id: Uuid,
        overrides: RegenerateRequest,
        base_url: String,
    ) -> Result<Post> {
        let _lease = self.leases.try_acquire(&id)?;

        let image = self.blobs.read(&id).await?;

        let key = DescriptionCache::content_key(&image);
        let description = match self.cache.get(&key) {
            Some(text) => text,
            None => {
                let text = self.generator.generate(&image).await?;
                self.cache.insert(&key, &text);
                text
            }
        };

        let alt = overrides
            .alt
            .unwrap_or_else(|| "Descrição alternativa atualizada".to_string());
        let titulo = overrides
            .titulo
            .unwrap_or_else(|| "Título atualizado".to_string());
        let img_url = Self::image_url(&base_url, &id);

        let found =
            PostService::update_generated(&self.db, &id, &description, &alt, &titulo, &img_url)
                .await
                .map_err(|e| AppError::Update(e.to_string()))?;
        if !found {
            return Err(AppError::NotFound(format!("Post {} não encontrado", id)));
        }

        PostService::get(&self.db, &id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} não encontrado", id)))
    }

    /// Delete a post and, best effort, its image.
    ///
    /// Record deletion success never depends on blob presence: any blob
    /// deletion failure is logged and swallowed.
    pub async fn delete_cascade(&self, raw_id: &str) -> Result<()> {
        let id = Self::parse_id(raw_id)?;
        let this = self.clone();
        run_to_completion(async move { this.delete_inner(id).await }).await
    }

    async fn delete_inner(&self, id: Uuid) -> Result<()> {
        let _lease = self.leases.try_acquire(&id)?;

        let found = PostService::delete(&self.db, &id).await?;
        if !found {
            return Err(AppError::NotFound(format!("Post {} não encontrado", id)));
        }

        match self.blobs.delete(&id).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => {
                tracing::warn!("No image to delete for post {}", id);
            }
            Err(e) => {
                tracing::warn!("Failed to delete image for post {}: {}", id, e);
            }
        }

        Ok(())
    }
}

/// Run an operation on its own task so cancellation of the calling request
/// cannot abort a step that has already begun a persistent mutation.
async fn run_to_completion<T, F>(fut: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| AppError::Internal(format!("operation task failed: {}", e)))?
}
