use axum::{
    extract::{Host, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{CreatePostRequest, Post, PostFields, RegenerateRequest};
use crate::services::PostService;
use crate::AppState;

/// Absolute URL prefix for this request, honoring a forwarding proxy's
/// scheme header.
fn request_base_url(headers: &HeaderMap, host: &str) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}

/// List all posts
/// GET /posts
pub async fn list_posts(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<Post>>>> {
    let posts = PostService::list(&state.db).await?;
    Ok(Json(ApiResponse::success(posts)))
}

/// Create a post without an image
/// POST /posts
pub async fn create_post(
    State(state): State<AppState>,
    body: Option<Json<CreatePostRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<Post>>)> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let post = PostService::create(&state.db, &PostFields::from(req)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(post))))
}

/// Upload an image and create the post that owns it
/// POST /upload (multipart, image in field "imagem")
pub async fn upload_image(
    State(state): State<AppState>,
    Host(host): Host,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<Post>>)> {
    let mut image: Option<Bytes> = None;
    let mut req = CreatePostRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Falha ao processar upload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "imagem" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Falha ao ler imagem: {}", e)))?;
                image = Some(data);
            }
            "descricao" => {
                let text = field.text().await.unwrap_or_default();
                if !text.is_empty() {
                    req.description = Some(text);
                }
            }
            "alt" => {
                let text = field.text().await.unwrap_or_default();
                if !text.is_empty() {
                    req.alt = Some(text);
                }
            }
            "titulo" => {
                let text = field.text().await.unwrap_or_default();
                if !text.is_empty() {
                    req.titulo = Some(text);
                }
            }
            _ => {}
        }
    }

    let image =
        image.ok_or_else(|| AppError::Validation("Nenhuma imagem foi enviada.".to_string()))?;

    let base_url = request_base_url(&headers, &host);
    let post = state
        .lifecycle
        .create_with_image(PostFields::from(req), image, base_url)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(post))))
}

/// Regenerate the description for a post's image
/// PUT /upload/:id
pub async fn regenerate_description(
    State(state): State<AppState>,
    Host(host): Host,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<RegenerateRequest>>,
) -> Result<Json<ApiResponse<Post>>> {
    let overrides = body.map(|Json(req)| req).unwrap_or_default();
    let base_url = request_base_url(&headers, &host);

    let post = state
        .lifecycle
        .regenerate_description(&id, overrides, base_url)
        .await?;

    Ok(Json(ApiResponse::success(post)))
}

/// Delete a post and its image
/// DELETE /posts/:id
pub async fn delete_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    state.lifecycle.delete_cascade(&id).await?;
    Ok(Json(ApiResponse::<()>::success_message(&format!(
        "Post com ID {} excluído com sucesso.",
        id
    ))))
}
