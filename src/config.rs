//! 설정 - 기본값 → 환경변수(.env 포함) → CLI 플래그 순으로 덮어씀

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::embedding::{self, EmbedderKind, DEFAULT_HASH_DIMENSION};
use crate::knowledge::{get_data_dir, ChunkConfig, DEFAULT_TOP_K};
use crate::llm::{LlmProvider, DEFAULT_OPENROUTER_BASE_URL};
use crate::scoring::DEFAULT_SCORING_CONCURRENCY;

/// 설정 에러
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// 실행 설정
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// 원본 문서 디렉토리 (*.txt)
    pub docs_dir: PathBuf,
    /// 벡터 인덱스 디렉토리
    pub index_dir: PathBuf,
    pub chunk: ChunkConfig,
    pub top_k: usize,
    pub embedder: EmbedderKind,
    pub hash_dimension: usize,
    pub llm_provider: LlmProvider,
    /// None이면 프로바이더 기본 모델
    pub model: Option<String>,
    pub openrouter_base_url: String,
    pub request_timeout: Duration,
    pub scoring_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("mock_docs"),
            index_dir: get_data_dir().join("index"),
            chunk: ChunkConfig::default(),
            top_k: DEFAULT_TOP_K,
            embedder: EmbedderKind::Auto,
            hash_dimension: DEFAULT_HASH_DIMENSION,
            llm_provider: LlmProvider::OpenRouter,
            model: None,
            openrouter_base_url: DEFAULT_OPENROUTER_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
            scoring_concurrency: DEFAULT_SCORING_CONCURRENCY,
        }
    }
}

impl Settings {
    /// `.env` 로드 후 환경변수에서 설정 생성
    pub fn load() -> Result<Self, SettingsError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("Loaded environment from {:?}", path),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("Failed to load .env file: {}", e),
        }
        Self::from_env()
    }

    /// 프로세스 환경변수에서 설정 생성
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// 임의의 조회 함수로 설정 생성 (빈 값은 미설정으로 취급)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(dir) = get("LEAD_INSIGHTS_DOCS_DIR") {
            settings.docs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("LEAD_INSIGHTS_INDEX_DIR") {
            settings.index_dir = PathBuf::from(dir);
        }

        let chunk_size = parse_var(&get, "LEAD_INSIGHTS_CHUNK_SIZE", settings.chunk.chunk_size)?;
        let overlap = parse_var(&get, "LEAD_INSIGHTS_CHUNK_OVERLAP", settings.chunk.overlap)?;
        settings.chunk = ChunkConfig::new(chunk_size, overlap).map_err(|e| SettingsError::Invalid {
            var: "LEAD_INSIGHTS_CHUNK_OVERLAP",
            value: overlap.to_string(),
            reason: e.to_string(),
        })?;

        settings.top_k = parse_var(&get, "LEAD_INSIGHTS_TOP_K", settings.top_k)?;
        if settings.top_k == 0 {
            return Err(SettingsError::Invalid {
                var: "LEAD_INSIGHTS_TOP_K",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        settings.embedder = parse_var(&get, "LEAD_INSIGHTS_EMBEDDER", settings.embedder)?;
        settings.hash_dimension =
            parse_var(&get, "LEAD_INSIGHTS_HASH_DIMENSION", settings.hash_dimension)?;
        settings.llm_provider = parse_var(&get, "LEAD_INSIGHTS_LLM_PROVIDER", settings.llm_provider)?;
        settings.model = get("LEAD_INSIGHTS_MODEL");

        if let Some(url) = get("OPENROUTER_BASE_URL") {
            settings.openrouter_base_url = url;
        }

        let timeout_secs = parse_var(&get, "LEAD_INSIGHTS_TIMEOUT_SECS", 60u64)?;
        settings.request_timeout = Duration::from_secs(timeout_secs);

        settings.scoring_concurrency = parse_var(
            &get,
            "LEAD_INSIGHTS_SCORING_CONCURRENCY",
            settings.scoring_concurrency,
        )?
        .max(1);

        Ok(settings)
    }

    /// 청킹 설정 변경 (CLI 플래그)
    pub fn with_chunking(mut self, chunk_size: Option<usize>, overlap: Option<usize>) -> Result<Self, SettingsError> {
        let chunk_size = chunk_size.unwrap_or(self.chunk.chunk_size);
        let overlap = overlap.unwrap_or(self.chunk.overlap);
        self.chunk = ChunkConfig::new(chunk_size, overlap).map_err(|e| SettingsError::Invalid {
            var: "--overlap",
            value: overlap.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self)
    }

    /// OpenRouter 키 설정 여부
    pub fn has_openrouter_key(&self) -> bool {
        std::env::var("OPENROUTER_API_KEY")
            .map(|k| !k.is_empty())
            .unwrap_or(false)
    }

    /// Gemini 키 설정 여부
    pub fn has_gemini_key(&self) -> bool {
        embedding::has_api_key()
    }
}

fn parse_var<T, F>(get: &F, var: &'static str, default: T) -> Result<T, SettingsError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| SettingsError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
