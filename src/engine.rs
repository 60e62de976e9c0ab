//! Engine - 검색기 / 답변 생성기 / 스코어러를 묶는 조립 지점
//!
//! 질의 흐름: 질문 → Retriever → AnswerComposer → Answer
//! 스코어링 흐름: Document → Scorer → LeadScore (인덱스 불필요)

use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::answer::{Answer, AnswerComposer};
use crate::collector::load_corpus;
use crate::config::Settings;
use crate::embedding::{
    create_embedder, EmbedderKind, EmbeddingError, GEMINI_EMBEDDER_NAME, HASHING_NAME_PREFIX,
};
use crate::knowledge::{
    recursive_chunker, BuildReport, Document, IndexBuilder, IndexError, Retriever, VectorIndex,
};
use crate::llm::{create_model, LanguageModel, LlmError};
use crate::scoring::{BatchReport, LeadScore, Scorer, ScoringError};

/// 엔진 구성 실패 (설정 에러)
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Model(#[from] LlmError),
}

impl SetupError {
    /// 인덱스 재빌드로 해결되는 에러인지
    pub fn rebuild_required(&self) -> bool {
        matches!(self, SetupError::Index(e) if e.rebuild_required())
    }
}

/// 질의응답 + 스코어링 엔진
pub struct Engine {
    retriever: Retriever,
    composer: AnswerComposer,
    scorer: Scorer,
}

impl Engine {
    /// 구성 요소로 직접 생성
    pub fn new(retriever: Retriever, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            retriever,
            composer: AnswerComposer::new(model.clone()),
            scorer: Scorer::new(model),
        }
    }

    pub fn with_scoring_concurrency(mut self, concurrency: usize) -> Self {
        self.scorer = self.scorer.with_concurrency(concurrency);
        self
    }

    /// 설정으로 엔진 열기 (인덱스 로드 + 임베더/모델 연결)
    pub fn open(settings: &Settings) -> Result<Self, SetupError> {
        let index = VectorIndex::load(&settings.index_dir)?;
        tracing::info!(
            "Loaded vector index: {} chunks, dimension {}, embedder {}",
            index.len(),
            index.dimension(),
            index.embedder_name()
        );

        let (kind, hash_dimension) = query_embedder_for(settings, &index);
        let embedder = create_embedder(kind, hash_dimension, settings.request_timeout)?;
        let retriever = Retriever::new(embedder, Arc::new(index))?.with_top_k(settings.top_k);

        let model = create_model(
            settings.llm_provider,
            settings.model.as_deref(),
            &settings.openrouter_base_url,
            settings.request_timeout,
        )?;

        Ok(Self::new(retriever, model).with_scoring_concurrency(settings.scoring_concurrency))
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// 질문에 답변 (기본 top_k)
    pub async fn ask(&self, question: &str) -> Answer {
        self.ask_with_k(question, self.retriever.top_k()).await
    }

    /// 질문에 답변
    ///
    /// 빈 질문은 임베더/모델 호출 없이 고정 답변을 반환합니다.
    pub async fn ask_with_k(&self, question: &str, k: usize) -> Answer {
        if question.trim().is_empty() {
            return Answer::empty_query();
        }

        match self.retriever.retrieve(question, k).await {
            Ok(hits) => self.composer.answer(question, hits).await,
            Err(e) => {
                tracing::warn!("Retrieval failed: {}", e);
                Answer::failed(e)
            }
        }
    }

    pub async fn score(&self, document: &Document) -> Result<LeadScore, ScoringError> {
        self.scorer.score(document).await
    }

    pub async fn score_batch(&self, documents: &[Document]) -> BatchReport {
        self.scorer.score_batch(documents).await
    }
}

/// 인덱스에 맞는 질의 임베더 선택
///
/// `auto`이면 인덱스를 빌드한 임베더를 따릅니다. 해싱 인덱스는 같은 차원의 해싱 임베더,
/// Gemini 인덱스는 Gemini 임베더를 사용하므로 API 키가 없으면 해싱으로 넘어가지 않고
/// `MissingApiKey`가 됩니다.
fn query_embedder_for(settings: &Settings, index: &VectorIndex) -> (EmbedderKind, usize) {
    let built_with = index.embedder_name();

    match settings.embedder {
        EmbedderKind::Auto if built_with.starts_with(HASHING_NAME_PREFIX) => {
            (EmbedderKind::Hashing, index.dimension())
        }
        EmbedderKind::Auto if built_with == GEMINI_EMBEDDER_NAME => {
            (EmbedderKind::Gemini, settings.hash_dimension)
        }
        kind => (kind, settings.hash_dimension),
    }
}

/// 인덱스 빌드 단계: 코퍼스 로드 → 청킹 → 임베딩 → 저장 (기존 인덱스 교체)
pub async fn build_index(settings: &Settings) -> Result<BuildReport> {
    let documents = load_corpus(&settings.docs_dir)
        .with_context(|| format!("Failed to load corpus from {:?}", settings.docs_dir))?;

    let embedder = create_embedder(
        settings.embedder,
        settings.hash_dimension,
        settings.request_timeout,
    )
    .context("Failed to create embedder")?;
    let chunker = recursive_chunker(settings.chunk).context("Invalid chunk settings")?;

    IndexBuilder::new(chunker, embedder)
        .build_and_save(&documents, &settings.index_dir)
        .await
        .with_context(|| format!("Failed to build index at {:?}", settings.index_dir))
}

/// 스코어링 전용 스코어러 생성 (인덱스 없이)
pub fn open_scorer(settings: &Settings) -> Result<Scorer, SetupError> {
    let model = create_model(
        settings.llm_provider,
        settings.model.as_deref(),
        &settings.openrouter_base_url,
        settings.request_timeout,
    )?;
    Ok(Scorer::new(model).with_concurrency(settings.scoring_concurrency))
}

// ============================================================================
// Tests
// ============================================================================
