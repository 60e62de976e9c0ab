//! Index Builder - 문서 → 청크 → 임베딩 → 인덱스 (빌드 단계)
//!
//! 인덱스는 증분 갱신 없이 매번 전체를 다시 만들고,
//! 저장 시 기존 인덱스를 원자적으로 교체합니다.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::embedding::{EmbeddingError, EmbeddingProvider};

use super::chunker::Chunker;
use super::document::Document;
use super::index::{IndexError, VectorIndex};
use super::vector::IndexEntry;

/// 빌드 에러
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("No documents with content to index")]
    EmptyCorpus,

    #[error("Failed to embed chunks of {document_id}: {source}")]
    Embedding {
        document_id: String,
        #[source]
        source: EmbeddingError,
    },

    #[error("Embedder returned {found} vectors for {expected} chunks of {document_id}")]
    VectorCount {
        document_id: String,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// 빌드 결과 요약
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub document_count: usize,
    pub chunk_count: usize,
    pub dimension: usize,
    pub embedder: String,
    /// 청크가 하나도 나오지 않은 문서 (빈 문서)
    pub skipped_documents: Vec<String>,
}

/// 인덱스 빌더
pub struct IndexBuilder {
    chunker: Box<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IndexBuilder {
    pub fn new(chunker: Box<dyn Chunker>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { chunker, embedder }
    }

    /// 문서 전체로 인덱스 생성
    pub async fn build(
        &self,
        documents: &[Document],
    ) -> Result<(VectorIndex, BuildReport), BuildError> {
        let mut entries = Vec::new();
        let mut skipped_documents = Vec::new();

        for (i, document) in documents.iter().enumerate() {
            let chunks = self.chunker.chunk(document);
            if chunks.is_empty() {
                skipped_documents.push(document.id.clone());
                continue;
            }

            tracing::info!(
                "[{}/{}] Embedding {} ({} chunks)",
                i + 1,
                documents.len(),
                document.id,
                chunks.len()
            );

            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed_batch(&texts)
                .await
                .map_err(|source| BuildError::Embedding {
                    document_id: document.id.clone(),
                    source,
                })?;

            if vectors.len() != chunks.len() {
                return Err(BuildError::VectorCount {
                    document_id: document.id.clone(),
                    expected: chunks.len(),
                    found: vectors.len(),
                });
            }

            entries.extend(
                chunks
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexEntry::new(chunk, vector)),
            );
        }

        if entries.is_empty() {
            return Err(BuildError::EmptyCorpus);
        }

        let index = VectorIndex::build(entries, self.embedder.name())?;
        let report = BuildReport {
            document_count: documents.len() - skipped_documents.len(),
            chunk_count: index.len(),
            dimension: index.dimension(),
            embedder: self.embedder.name().to_string(),
            skipped_documents,
        };

        tracing::info!(
            "Built vector index: {} documents, {} chunks, dimension {}",
            report.document_count,
            report.chunk_count,
            report.dimension
        );

        Ok((index, report))
    }

    /// 인덱스 생성 후 디렉토리에 저장 (기존 인덱스 교체)
    pub async fn build_and_save(
        &self,
        documents: &[Document],
        index_dir: &Path,
    ) -> Result<BuildReport, BuildError> {
        let (index, report) = self.build(documents).await?;
        index.save(index_dir)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedding;
    use crate::knowledge::chunker::{ChunkConfig, RecursiveChunker};
    use tempfile::TempDir;

    fn builder() -> IndexBuilder {
        let chunker = RecursiveChunker::new(ChunkConfig::new(120, 20).unwrap()).unwrap();
        IndexBuilder::new(Box::new(chunker), Arc::new(HashingEmbedding::new(256).unwrap()))
    }

    fn long_text(topic: &str) -> String {
        (0..8)
            .map(|i| format!("Sentence {} about the {} agreement.", i, topic))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn test_build_collects_all_chunks() {
        let docs = vec![
            Document::new("a.txt", long_text("loan")),
            Document::new("empty.txt", ""),
            Document::new("b.txt", "short memo"),
        ];

        let (index, report) = builder().build(&docs).await.unwrap();

        assert_eq!(report.document_count, 2);
        assert_eq!(report.skipped_documents, vec!["empty.txt".to_string()]);
        assert_eq!(report.chunk_count, index.len());
        assert_eq!(report.dimension, 256);
        assert_eq!(report.embedder, "fnv1a-hash-256");
        assert!(index.len() > 2);
        assert_eq!(index.entries().last().unwrap().chunk.document_id, "b.txt");
    }

    #[tokio::test]
    async fn test_build_empty_corpus() {
        let result = builder().build(&[]).await;
        assert!(matches!(result, Err(BuildError::EmptyCorpus)));

        let result = builder().build(&[Document::new("blank.txt", "   ")]).await;
        assert!(matches!(result, Err(BuildError::EmptyCorpus)));
    }

    #[tokio::test]
    async fn test_build_and_save() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index");

        let docs = vec![Document::new("a.txt", long_text("lease"))];
        let report = builder().build_and_save(&docs, &path).await.unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), report.chunk_count);
        assert_eq!(loaded.embedder_name(), "fnv1a-hash-256");
    }
}
