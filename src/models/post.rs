use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Post model
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Post {
    pub id: String,
    pub description: String,
    pub alt: String,
    pub titulo: String,
    #[serde(rename = "imgUrl")]
    pub img_url: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields accepted when creating a post; every field is optional and falls
/// back to the service defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatePostRequest {
    #[serde(alias = "descricao")]
    pub description: Option<String>,
    pub alt: Option<String>,
    pub titulo: Option<String>,
}

/// New-post field values after defaults have been applied
#[derive(Debug, Clone)]
pub struct PostFields {
    pub description: String,
    pub alt: String,
    pub titulo: String,
}

impl From<CreatePostRequest> for PostFields {
    fn from(req: CreatePostRequest) -> Self {
        Self {
            description: req.description.unwrap_or_else(|| "Sem descrição".to_string()),
            alt: req
                .alt
                .unwrap_or_else(|| "Descrição alternativa padrão".to_string()),
            titulo: req.titulo.unwrap_or_else(|| "Título padrão".to_string()),
        }
    }
}

/// Optional overrides accepted when regenerating a description
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegenerateRequest {
    pub alt: Option<String>,
    pub titulo: Option<String>,
}
