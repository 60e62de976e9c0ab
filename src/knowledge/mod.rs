//! Knowledge 모듈 - 검색 가능한 벡터 지식 저장소
//!
//! - Chunker: 구분자 계층 기반 텍스트 분할 (오버랩 포함)
//! - VectorIndex: 불변 코사인 인덱스 + 버전 관리되는 디스크 포맷
//! - Retriever: 질의 임베딩 → 상위 k개 청크
//! - IndexBuilder: 문서 → 청크 → 임베딩 → 인덱스 (빌드 단계)

mod builder;
mod chunker;
mod document;
mod index;
mod retriever;
mod vector;

// Re-exports
pub use builder::{BuildError, BuildReport, IndexBuilder};
pub use chunker::{recursive_chunker, ChunkConfig, ChunkError, Chunker, RecursiveChunker};
pub use document::{Chunk, Document, META_FILE_NAME, META_SOURCE};
pub use index::{IndexError, IndexManifest, VectorIndex, INDEX_FORMAT_VERSION};
pub use retriever::{RetrievalError, Retriever, DEFAULT_TOP_K};
pub use vector::{cosine_similarity, l2_normalize, IndexEntry, SearchHit, METRIC_COSINE};

use std::path::PathBuf;

/// 데이터 디렉토리 경로 (~/.lead-insights/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lead-insights")
}
