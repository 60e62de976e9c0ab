//! Gemini 언어 모델 (generateContent)
//!
//! 임베딩과 같은 API 키(`GEMINI_API_KEY` / `GOOGLE_AI_API_KEY`)를 사용합니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationParams, LanguageModel, LlmError};
use crate::embedding;

/// 기본 모델
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 2;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Gemini 클라이언트
#[derive(Debug)]
pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl GeminiModel {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey("GEMINI_API_KEY"));
        }

        let model = model.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            url: format!("{}/{}:generateContent", GEMINI_API_BASE, model),
            model,
        })
    }

    /// 환경변수 API 키로 생성
    pub fn from_env(model: &str, timeout: Duration) -> Result<Self, LlmError> {
        let api_key =
            embedding::get_api_key().map_err(|_| LlmError::MissingApiKey("GEMINI_API_KEY"))?;
        Self::new(api_key, model, timeout)
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// 첫 번째 후보의 텍스트 파트를 이어 붙임
fn parse_generate_response(body: &str) -> Result<String, LlmError> {
    let response: GenerateResponse =
        serde_json::from_str(body).map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
            },
        };

        for attempt in 0..=MAX_RETRIES {
            let response = self
                .client
                .post(&self.url)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(LlmError::from_reqwest)?;

            let status = response.status();
            let body = response.text().await.map_err(LlmError::from_reqwest)?;

            if status.is_success() {
                return parse_generate_response(&body);
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

            return Err(LlmError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        Err(LlmError::RateLimited)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_url() {
        let model = GeminiModel::new("key", DEFAULT_GEMINI_MODEL, Duration::from_secs(5)).unwrap();
        assert_eq!(
            model.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(model.name(), "gemini-2.0-flash");
    }

    #[test]
    fn test_parse_generate_response() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Score "},{"text":"8"}],"role":"model"}}]}"#;
        assert_eq!(parse_generate_response(body).unwrap(), "Score 8");

        assert_eq!(
            parse_generate_response(r#"{"candidates":[]}"#),
            Err(LlmError::EmptyResponse)
        );
        assert_eq!(
            parse_generate_response(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#),
            Err(LlmError::EmptyResponse)
        );
        assert!(matches!(
            parse_generate_response("not json"),
            Err(LlmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: "hello" }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                max_output_tokens: 1024,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
    }
}
