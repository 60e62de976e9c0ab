//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 인덱스 빌드와 질의에 반드시 같은 임베더(이름 + 차원)를 사용해야 합니다.
//! 인덱스는 빌드에 사용한 임베더를 기록하고, 로드 시 차원이 다르면 에러가 납니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(EmbedderKind::Auto, 384, Duration::from_secs(60))?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

mod gemini;
mod hashing;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::{GeminiEmbedding, DEFAULT_DIMENSION, GEMINI_EMBEDDER_NAME};
pub use hashing::{HashingEmbedding, DEFAULT_HASH_DIMENSION, HASHING_NAME_PREFIX};

// ============================================================================
// Errors
// ============================================================================

/// 임베딩 에러
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )]
    MissingApiKey,

    #[error("Invalid dimension: {0}")]
    InvalidDimension(usize),

    #[error("Embedding request timed out")]
    Timeout,

    #[error("Rate limit exceeded (429)")]
    RateLimited,

    #[error("Embedding API error ({status}): {message}")]
    Api { status: String, message: String },

    #[error("Failed to send embedding request: {0}")]
    Transport(String),

    #[error("Malformed embedding response: {0}")]
    Malformed(String),

    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

impl EmbeddingError {
    /// 재시도로 복구될 수 있는 에러인지
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Timeout | EmbeddingError::RateLimited | EmbeddingError::Transport(_)
        )
    }
}

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 고정 차원 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서(청크) 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// 질의 임베딩 (기본 구현: `embed`와 동일)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(text).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름 (인덱스에 기록됨)
    fn name(&self) -> &str;
}

// ============================================================================
// Embedder Selection
// ============================================================================

/// 임베더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// API 키가 있으면 Gemini, 없으면 해싱
    Auto,
    /// Gemini API
    Gemini,
    /// 로컬 FNV-1a 해싱 (오프라인)
    Hashing,
}

impl FromStr for EmbedderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(EmbedderKind::Auto),
            "gemini" => Ok(EmbedderKind::Gemini),
            "hashing" | "hash" | "local" => Ok(EmbedderKind::Hashing),
            other => Err(format!(
                "unknown embedder '{}' (expected auto, gemini or hashing)",
                other
            )),
        }
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// Gemini API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String, EmbeddingError> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    Err(EmbeddingError::MissingApiKey)
}

/// Gemini API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Factory Function
// ============================================================================

/// 임베딩 프로바이더 생성
pub fn create_embedder(
    kind: EmbedderKind,
    hash_dimension: usize,
    timeout: Duration,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let embedder: Arc<dyn EmbeddingProvider> = match kind {
        EmbedderKind::Gemini => Arc::new(GeminiEmbedding::from_env()?.with_timeout(timeout)?),
        EmbedderKind::Hashing => Arc::new(HashingEmbedding::new(hash_dimension)?),
        EmbedderKind::Auto if has_api_key() => {
            Arc::new(GeminiEmbedding::from_env()?.with_timeout(timeout)?)
        }
        EmbedderKind::Auto => {
            tracing::warn!("No Gemini API key set, falling back to local hashing embedder");
            Arc::new(HashingEmbedding::new(hash_dimension)?)
        }
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_kind_from_str() {
        assert_eq!("auto".parse::<EmbedderKind>(), Ok(EmbedderKind::Auto));
        assert_eq!("Gemini".parse::<EmbedderKind>(), Ok(EmbedderKind::Gemini));
        assert_eq!("hash".parse::<EmbedderKind>(), Ok(EmbedderKind::Hashing));
        assert!("faiss".parse::<EmbedderKind>().is_err());
    }

    #[test]
    fn test_create_hashing_embedder() {
        let embedder =
            create_embedder(EmbedderKind::Hashing, 128, Duration::from_secs(5)).unwrap();
        assert_eq!(embedder.dimension(), 128);
        assert_eq!(embedder.name(), "fnv1a-hash-128");
    }

    #[test]
    fn test_transient_errors() {
        assert!(EmbeddingError::Timeout.is_transient());
        assert!(EmbeddingError::RateLimited.is_transient());
        assert!(!EmbeddingError::MissingApiKey.is_transient());
        assert!(!EmbeddingError::InvalidDimension(3).is_transient());
    }

    #[tokio::test]
    async fn test_default_batch_embedding() {
        let embedder = HashingEmbedding::new(64).unwrap();
        let texts = vec!["loan amount".to_string(), "interest rate".to_string()];
        let vectors = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], embedder.embed("loan amount").await.unwrap());
    }
}
