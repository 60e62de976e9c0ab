//! 언어 모델 모듈 - 단발성 프롬프트 → 텍스트 완성
//!
//! 코어는 "프롬프트를 보내고 텍스트를 받는다, 실패/타임아웃 가능"에만 의존하므로
//! 프로바이더를 교체할 수 있습니다.
//!
//! - OpenRouter: OpenAI 호환 chat completions
//! - Gemini: generateContent

mod gemini;
mod openrouter;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::{GeminiModel, DEFAULT_GEMINI_MODEL};
pub use openrouter::{OpenRouterModel, DEFAULT_OPENROUTER_BASE_URL, DEFAULT_OPENROUTER_MODEL};

// ============================================================================
// Errors
// ============================================================================

/// 언어 모델 호출 에러
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("API key not found. Set {0} environment variable.")]
    MissingApiKey(&'static str),

    #[error("Language model request timed out")]
    Timeout,

    #[error("Language model rate limit exceeded (429)")]
    RateLimited,

    #[error("Language model API error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("Failed to send language model request: {0}")]
    Transport(String),

    #[error("Language model returned an empty response")]
    EmptyResponse,

    #[error("Malformed language model response: {0}")]
    MalformedResponse(String),

    #[error("Invalid language model configuration: {0}")]
    InvalidConfig(String),
}

impl LlmError {
    /// 재시도로 복구될 수 있는 에러인지 (타임아웃, 429, 전송 실패)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout | LlmError::RateLimited | LlmError::Transport(_)
        ) || matches!(self, LlmError::Http { status, .. } if *status >= 500)
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Transport(e.to_string())
        }
    }
}

// ============================================================================
// Generation Parameters
// ============================================================================

/// 생성 파라미터
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationParams {
    /// 근거 기반 답변용 (낮은 temperature)
    pub fn answering() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1024,
        }
    }

    /// 리드 스코어링용
    pub fn scoring() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

// ============================================================================
// LanguageModel Trait
// ============================================================================

/// 언어 모델 트레이트
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// 프롬프트 한 번 호출 (멀티턴 상태 없음)
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Provider Selection
// ============================================================================

/// 언어 모델 프로바이더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenRouter,
    Gemini,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openrouter" | "openai" => Ok(LlmProvider::OpenRouter),
            "gemini" => Ok(LlmProvider::Gemini),
            other => Err(format!(
                "unknown LLM provider '{}' (expected openrouter or gemini)",
                other
            )),
        }
    }
}

/// 언어 모델 생성 (API 키는 환경변수에서)
pub fn create_model(
    provider: LlmProvider,
    model: Option<&str>,
    openrouter_base_url: &str,
    timeout: Duration,
) -> Result<Arc<dyn LanguageModel>, LlmError> {
    let model: Arc<dyn LanguageModel> = match provider {
        LlmProvider::OpenRouter => Arc::new(OpenRouterModel::from_env(
            model.unwrap_or(DEFAULT_OPENROUTER_MODEL),
            openrouter_base_url,
            timeout,
        )?),
        LlmProvider::Gemini => Arc::new(GeminiModel::from_env(
            model.unwrap_or(DEFAULT_GEMINI_MODEL),
            timeout,
        )?),
    };

    tracing::info!("Using language model: {}", model.name());
    Ok(model)
}

// ============================================================================
// Test Double
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("OpenRouter".parse::<LlmProvider>(), Ok(LlmProvider::OpenRouter));
        assert_eq!("gemini".parse::<LlmProvider>(), Ok(LlmProvider::Gemini));
        assert!("claude".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_transient_errors() {
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::RateLimited.is_transient());
        assert!(LlmError::Http {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!LlmError::Http {
            status: 401,
            message: "bad key".into()
        }
        .is_transient());
        assert!(!LlmError::EmptyResponse.is_transient());
    }

    #[test]
    fn test_generation_presets() {
        assert_eq!(GenerationParams::answering().temperature, 0.1);
        assert_eq!(GenerationParams::scoring().temperature, 0.7);
        assert_eq!(GenerationParams::scoring().max_tokens, 1024);
    }
}
