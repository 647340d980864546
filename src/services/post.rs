use chrono::Utc;
use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;
use crate::models::{Post, PostFields};

/// Post record store. Single-row operations only; cross-resource consistency
/// is the coordinator's job.
pub struct PostService;

impl PostService {
    /// Insert a new post with an empty image reference and return the stored
    /// row. The id is assigned here and nowhere else.
    pub async fn create(db: &Database, fields: &PostFields) -> Result<Post> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO posts (id, description, alt, titulo, img_url, created_at, updated_at) VALUES (?, ?, ?, ?, '', ?, ?)",
        )
        .bind(&id)
        .bind(&fields.description)
        .bind(&fields.alt)
        .bind(&fields.titulo)
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await?;

        let post = sqlx::query_as("SELECT * FROM posts WHERE id = ?")
            .bind(&id)
            .fetch_one(db.pool())
            .await?;

        Ok(post)
    }

    pub async fn list(db: &Database) -> Result<Vec<Post>> {
        let posts = sqlx::query_as("SELECT * FROM posts ORDER BY created_at DESC, id")
            .fetch_all(db.pool())
            .await?;
        Ok(posts)
    }

    pub async fn get(db: &Database, id: &Uuid) -> Result<Option<Post>> {
        let post = sqlx::query_as("SELECT * FROM posts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(db.pool())
            .await?;
        Ok(post)
    }

    /// Point the record at its image. Idempotent: re-issuing with the same
    /// reference is a no-op beyond the timestamp.
    pub async fn finalize_image(db: &Database, id: &Uuid, img_url: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE posts SET img_url = ?, updated_at = ? WHERE id = ?")
            .bind(img_url)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Store a freshly generated description along with the refreshed image
    /// reference and caption fields.
    pub async fn update_generated(
        db: &Database,
        id: &Uuid,
        description: &str,
        alt: &str,
        titulo: &str,
        img_url: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE posts SET description = ?, alt = ?, titulo = ?, img_url = ?, updated_at = ? WHERE id = ?",
        )
        .bind(description)
        .bind(alt)
        .bind(titulo)
        .bind(img_url)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(db: &Database, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id.to_string())
            .execute(db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreatePostRequest;
    use tempfile::tempdir;

    async fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("posts.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        db.run_migrations().await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn create_assigns_id_and_applies_defaults() {
        let (db, _dir) = test_db().await;

        let fields = PostFields::from(CreatePostRequest::default());
        let post = PostService::create(&db, &fields).await.unwrap();

        assert!(Uuid::parse_str(&post.id).is_ok());
        assert_eq!(post.description, "Sem descrição");
        assert_eq!(post.img_url, "");
    }

    #[tokio::test]
    async fn update_and_delete_report_found_flag() {
        let (db, _dir) = test_db().await;

        let missing = Uuid::new_v4();
        assert!(!PostService::finalize_image(&db, &missing, "x").await.unwrap());
        assert!(!PostService::delete(&db, &missing).await.unwrap());

        let fields = PostFields::from(CreatePostRequest::default());
        let post = PostService::create(&db, &fields).await.unwrap();
        let id = Uuid::parse_str(&post.id).unwrap();

        assert!(PostService::finalize_image(&db, &id, "http://h/uploads/a.png")
            .await
            .unwrap());
        assert!(PostService::delete(&db, &id).await.unwrap());
        assert!(PostService::get(&db, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finalize_image_is_idempotent() {
        let (db, _dir) = test_db().await;

        let fields = PostFields::from(CreatePostRequest::default());
        let post = PostService::create(&db, &fields).await.unwrap();
        let id = Uuid::parse_str(&post.id).unwrap();
        let url = format!("http://h/uploads/{}.png", id);

        assert!(PostService::finalize_image(&db, &id, &url).await.unwrap());
        assert!(PostService::finalize_image(&db, &id, &url).await.unwrap());

        let stored = PostService::get(&db, &id).await.unwrap().unwrap();
        assert_eq!(stored.img_url, url);
    }
}
