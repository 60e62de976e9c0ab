//! lead-insights - 금융 문서 RAG 질의응답 및 리드 스코어링
//!
//! 문서 폴더를 청크 단위 벡터 인덱스로 만들고,
//! 질문에는 검색된 청크만 근거로 답변하며,
//! 문서마다 1~10 리드 스코어를 매깁니다.

pub mod answer;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod knowledge;
pub mod llm;
pub mod scoring;

// Re-exports
pub use answer::{Answer, AnswerComposer, AnswerOutcome};
pub use collector::{load_corpus, CollectError, CorpusCollector};
pub use config::{Settings, SettingsError};
pub use embedding::{
    create_embedder, EmbedderKind, EmbeddingError, EmbeddingProvider, GeminiEmbedding,
    HashingEmbedding,
};
pub use engine::{build_index, Engine, SetupError};
pub use knowledge::{
    get_data_dir, BuildReport, Chunk, ChunkConfig, ChunkError, Chunker, Document, IndexBuilder,
    IndexError, RecursiveChunker, RetrievalError, Retriever, SearchHit, VectorIndex,
};
pub use llm::{create_model, GenerationParams, LanguageModel, LlmError, LlmProvider};
pub use scoring::{BatchReport, LeadScore, Scorer, ScoringError, ScoringFailure};
