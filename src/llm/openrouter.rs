//! OpenRouter 언어 모델 (OpenAI 호환 chat completions)
//!
//! ref: https://openrouter.ai/docs/api-reference/chat-completion

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{GenerationParams, LanguageModel, LlmError};

/// 기본 API 베이스 URL
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
/// 기본 모델
pub const DEFAULT_OPENROUTER_MODEL: &str = "deepseek/deepseek-chat:free";

/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 2;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 1500;

/// OpenRouter 클라이언트
#[derive(Debug)]
pub struct OpenRouterModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: Url,
}

impl OpenRouterModel {
    /// 생성
    ///
    /// # Arguments
    /// * `base_url` - OpenAI 호환 API 베이스 (예: `https://openrouter.ai/api/v1`)
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey("OPENROUTER_API_KEY"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            endpoint: chat_endpoint(base_url)?,
        })
    }

    /// `OPENROUTER_API_KEY` 환경변수에서 생성
    pub fn from_env(model: &str, base_url: &str, timeout: Duration) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(LlmError::MissingApiKey("OPENROUTER_API_KEY"))?;
        Self::new(api_key, model, base_url, timeout)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// `{base}/chat/completions` 엔드포인트 계산
fn chat_endpoint(base_url: &str) -> Result<Url, LlmError> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }

    Url::parse(&base)
        .and_then(|url| url.join("chat/completions"))
        .map_err(|e| LlmError::InvalidConfig(format!("invalid base URL '{}': {}", base_url, e)))
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// 응답 본문에서 답변 텍스트 추출
fn parse_chat_response(status: u16, body: &str) -> Result<String, LlmError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

    // OpenRouter는 200 응답 안에 error를 담아 보내기도 함
    if let Some(error) = response.error {
        let status = error
            .code
            .as_ref()
            .and_then(|c| c.as_u64())
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(status);
        return Err(LlmError::Http {
            status,
            message: error.message,
        });
    }

    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(LlmError::EmptyResponse)
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        for attempt in 0..=MAX_RETRIES {
            tracing::debug!(
                "OpenRouter request: model={}, prompt={} chars (attempt {})",
                self.model,
                prompt.len(),
                attempt + 1
            );

            let response = self
                .client
                .post(self.endpoint.clone())
                .bearer_auth(&self.api_key)
                .header("X-Title", "lead-insights")
                .json(&request)
                .send()
                .await
                .map_err(LlmError::from_reqwest)?;

            let status = response.status();
            let body = response.text().await.map_err(LlmError::from_reqwest)?;

            if status.is_success() {
                return parse_chat_response(status.as_u16(), &body);
            }

            if status.as_u16() == 429 {
                if attempt < MAX_RETRIES {
                    let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                    tracing::warn!(
                        "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                        backoff,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                return Err(LlmError::RateLimited);
            }

            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Http {
                status: status.as_u16(),
                message,
            });
        }

        Err(LlmError::RateLimited)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
