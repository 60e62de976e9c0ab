//! Gemini 임베딩 프로바이더
//!
//! `gemini-embedding-001` (MRL 지원) 호출, 요청 속도 제한, 429 지수 백오프.
//! source: https://ai.google.dev/gemini-api/docs/embeddings

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{get_api_key, EmbeddingError, EmbeddingProvider};

/// Gemini 임베딩 API 엔드포인트
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

const GEMINI_EMBED_MODEL: &str = "models/gemini-embedding-001";

/// 인덱스 매니페스트에 기록되는 임베더 이름
pub const GEMINI_EMBEDDER_NAME: &str = "gemini-embedding-001";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// 지원 차원
const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이 (1000ms = 60 RPM 준수)
const MIN_DELAY_MS: u64 = 1000;
/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;
/// 기본 요청 타임아웃
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 문서 / 질의 태스크 타입
const TASK_DOCUMENT: &str = "RETRIEVAL_DOCUMENT";
const TASK_QUERY: &str = "RETRIEVAL_QUERY";

// ============================================================================
// Rate Limiter
// ============================================================================

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay: Duration::from_millis(MIN_DELAY_MS),
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    async fn acquire(&mut self) {
        // 1. 최소 딜레이 적용 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();

        // 2. 윈도우 밖의 오래된 요청 제거
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. Rate limit 초과 시 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        // 4. 현재 요청 기록
        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// GeminiEmbedding
// ============================================================================

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiEmbedding {
    /// 새 Gemini 임베딩 인스턴스 생성 (기본 768차원)
    pub fn new(api_key: String) -> Result<Self, EmbeddingError> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// 차원을 지정하여 생성 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self, EmbeddingError> {
        if !SUPPORTED_DIMENSIONS.contains(&dimension) {
            return Err(EmbeddingError::InvalidDimension(dimension));
        }

        Ok(Self {
            api_key,
            client: build_client(DEFAULT_TIMEOUT)?,
            dimension,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                RATE_LIMIT_RPM,
                RATE_LIMIT_WINDOW,
            ))),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env() -> Result<Self, EmbeddingError> {
        Self::new(get_api_key()?)
    }

    /// 요청 타임아웃 변경
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, EmbeddingError> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    /// 태스크 타입을 지정한 임베딩 (재시도 포함)
    async fn embed_with_task(&self, text: &str, task_type: &str) -> Result<Vec<f32>, EmbeddingError> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: GEMINI_EMBED_MODEL,
            content: EmbedContent {
                parts: vec![EmbedPart { text }],
            },
            task_type,
            output_dimensionality: Some(self.dimension),
        };

        let mut last_error: Option<EmbeddingError> = None;

        // 재시도 루프 (429 / 전송 실패 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            // API 키는 URL이 아닌 헤더로 전송
            let response = match self
                .client
                .post(GEMINI_EMBED_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    let error = if e.is_timeout() {
                        EmbeddingError::Timeout
                    } else {
                        EmbeddingError::Transport(e.to_string())
                    };
                    if attempt < MAX_RETRIES {
                        let backoff = backoff_for(attempt);
                        tracing::warn!(
                            "Embedding request failed ({}), retrying in {:?} (attempt {}/{})",
                            error,
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        last_error = Some(error);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(error);
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

            if status.is_success() {
                let parsed: EmbedResponse = serde_json::from_str(&body)
                    .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
                let values = parsed.embedding.values;
                if values.len() != self.dimension {
                    return Err(EmbeddingError::Malformed(format!(
                        "expected {} values, got {}",
                        self.dimension,
                        values.len()
                    )));
                }
                return Ok(values);
            }

            // 429 Rate Limit - 재시도
            if status.as_u16() == 429 {
                last_error = Some(EmbeddingError::RateLimited);
                if attempt < MAX_RETRIES {
                    let backoff = backoff_for(attempt);
                    tracing::warn!(
                        "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                        backoff,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                break;
            }

            // 다른 에러 - 즉시 실패
            let (status_text, message) = match serde_json::from_str::<GeminiError>(&body) {
                Ok(error) => (error.error.status, error.error.message),
                Err(_) => (status.to_string(), body),
            };
            return Err(EmbeddingError::Api {
                status: status_text,
                message,
            });
        }

        Err(last_error.unwrap_or(EmbeddingError::RateLimited))
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, EmbeddingError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EmbeddingError::Client(e.to_string()))
}

fn backoff_for(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt))
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    content: EmbedContent<'a>,
    #[serde(rename = "taskType")]
    task_type: &'a str,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TASK_DOCUMENT).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TASK_QUERY).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        // Gemini는 배치 API가 없으므로 순차 처리 (Rate limiter가 조절)
        let mut results = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            tracing::debug!("Embedding batch {}/{}", i + 1, texts.len());
            results.push(self.embed(text).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        GEMINI_EMBEDDER_NAME
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_dimension() {
        let result = GeminiEmbedding::with_dimension("fake_key".to_string(), 999);
        assert!(matches!(result, Err(EmbeddingError::InvalidDimension(999))));
    }

    #[test]
    fn test_valid_dimensions() {
        for dim in SUPPORTED_DIMENSIONS {
            let embedder = GeminiEmbedding::with_dimension("fake_key".to_string(), dim).unwrap();
            assert_eq!(embedder.dimension(), dim);
        }
    }

    #[tokio::test]
    async fn test_empty_text_skips_request() {
        let embedder = GeminiEmbedding::new("fake_key".to_string()).unwrap();
        let vector = embedder.embed("   ").await.unwrap();
        assert_eq!(vector, vec![0.0; DEFAULT_DIMENSION]);
    }

    #[test]
    fn test_request_serialization() {
        let request = EmbedRequest {
            model: GEMINI_EMBED_MODEL,
            content: EmbedContent {
                parts: vec![EmbedPart { text: "hello" }],
            },
            task_type: TASK_QUERY,
            output_dimensionality: Some(768),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["taskType"], "RETRIEVAL_QUERY");
        assert_eq!(json["outputDimensionality"], 768);
        assert_eq!(json["content"]["parts"][0]["text"], "hello");
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_for(0), Duration::from_millis(2000));
        assert_eq!(backoff_for(2), Duration::from_millis(8000));
    }
}
