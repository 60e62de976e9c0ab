//! Retriever - 질의 임베딩 + 인덱스 검색
//!
//! 인덱스는 `Arc`로 공유되는 읽기 전용 구조이므로 여러 질의를 동시에 처리할 수 있습니다.

use std::sync::Arc;

use thiserror::Error;

use crate::embedding::{EmbeddingError, EmbeddingProvider};

use super::index::{IndexError, VectorIndex};
use super::vector::SearchHit;

/// 기본 검색 결과 개수
pub const DEFAULT_TOP_K: usize = 3;

/// 검색 에러
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// 벡터 검색기
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    top_k: usize,
}

impl Retriever {
    /// 검색기 생성
    ///
    /// 인덱스 차원과 임베더 차원이 다르면 재빌드가 필요한 설정 에러입니다.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
    ) -> Result<Self, IndexError> {
        if !index.is_empty() && index.dimension() != embedder.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: index.dimension(),
                found: embedder.dimension(),
            });
        }

        if !index.is_empty() && index.embedder_name() != embedder.name() {
            tracing::warn!(
                "Index was built with '{}' but queries use '{}'; similarity scores may be meaningless",
                index.embedder_name(),
                embedder.name()
            );
        }

        Ok(Self {
            embedder,
            index,
            top_k: DEFAULT_TOP_K,
        })
    }

    /// 기본 결과 개수 변경
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// 상위 k개 청크 검색 (인덱스가 더 작으면 전부 반환)
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, RetrievalError> {
        let query_embedding = self.embedder.embed_query(query).await?;
        let hits = self.index.search(&query_embedding, k)?;

        tracing::debug!(
            "Retrieved {} chunks for query ({} chars)",
            hits.len(),
            query.chars().count()
        );
        Ok(hits)
    }

    /// 기본 개수(`top_k`)로 검색
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, RetrievalError> {
        self.retrieve(query, self.top_k).await
    }
}
