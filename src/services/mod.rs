pub mod generator;
pub mod lifecycle;
pub mod post;

pub use generator::{DescriptionCache, DescriptionGenerator, GeminiGenerator};
pub use lifecycle::Lifecycle;
pub use post::PostService;
