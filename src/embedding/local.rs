/// Local embedding provider using fastembed
///
/// Runs all-MiniLM-L6-v2 (384 dimensions), the model Chroma's default
/// embedding function uses, so query vectors match the stored paper vectors.
/// fastembed inference is CPU-bound and runs on the blocking pool.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task;

use super::{EmbeddingError, EmbeddingProvider};

pub struct LocalEmbeddingProvider {
    model: Arc<Mutex<TextEmbedding>>,
    name: String,
    dim: usize,
}

impl LocalEmbeddingProvider {
    /// Load the model, downloading weights into `cache_dir` on first use.
    pub async fn new(cache_dir: &str) -> Result<Self, EmbeddingError> {
        let cache_path = PathBuf::from(cache_dir);

        let model = task::spawn_blocking(move || {
            std::fs::create_dir_all(&cache_path)
                .map_err(|e| EmbeddingError::ModelInit(format!("Failed to create cache dir: {}", e)))?;
            TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                    .with_cache_dir(cache_path)
                    .with_show_download_progress(false),
            )
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::ModelInit(e.to_string()))??;

        tracing::info!(model = "all-MiniLM-L6-v2", "Local embedding model loaded");

        Ok(LocalEmbeddingProvider {
            model: Arc::new(Mutex::new(model)),
            name: "all-MiniLM-L6-v2".to_string(),
            dim: 384,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        let mut vectors = task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbeddingError::Generation("embedding model lock poisoned".to_string()))?;
            model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::Generation(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Generation(e.to_string()))??;

        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Generation("model returned no embedding".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}
