//! Scoring 모듈 - 문서 단위 리드 스코어링 (1~10)
//!
//! 모델 응답은 신뢰하지 않고 필드별로 검증합니다.
//! 검증 실패는 원문 응답과 함께 타입이 있는 에러로 반환됩니다.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::knowledge::Document;
use crate::llm::{GenerationParams, LanguageModel, LlmError};

/// 최저 점수
pub const MIN_SCORE: u8 = 1;
/// 최고 점수
pub const MAX_SCORE: u8 = 10;
/// 배치 스코어링 기본 동시 실행 수
pub const DEFAULT_SCORING_CONCURRENCY: usize = 4;

const EMPTY_DOCUMENT_REASONING: &str =
    "The document is empty, so there are no financial details to evaluate.";

const SCORING_INSTRUCTION: &str = "You are a highly experienced financial analyst specializing in \
lead qualification. Your task is to analyze the provided text from a financial document and assign \
a lead score from 1 to 10, where 1 indicates a very low-quality lead and 10 indicates a very \
high-quality lead.

Base your score on the presence of specific, actionable financial details such as loan amounts, \
investment sizes, contract terms, company valuations, and clear financial health indicators. \
High-quality leads are documents with concrete, significant financial data. Low-quality leads are \
generic, lack specific numbers, or are not related to financial transactions.

Carefully analyze the document and provide a detailed reasoning for your score, referencing the \
specific factors you identified. You must provide your answer in the JSON format requested.";

const FORMAT_INSTRUCTIONS: &str = r#"Respond with a single JSON object and nothing else, using exactly these fields:
{
  "score": <integer from 1 to 10>,
  "reasoning": "<detailed explanation of the score>",
  "key_factors": ["<factor>", "..."]
}"#;

// ============================================================================
// Types
// ============================================================================

/// 리드 스코어
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadScore {
    /// 문서 출처
    pub source: String,
    /// 1 ~ 10
    pub score: u8,
    pub reasoning: String,
    pub key_factors: Vec<String>,
}

/// 스코어링 에러
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("Model response is not valid JSON: {reason}")]
    InvalidJson { reason: String, raw: String },

    #[error("Model response is missing field '{field}'")]
    MissingField { field: &'static str, raw: String },

    #[error("Field '{field}' has the wrong type (expected {expected})")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
        raw: String,
    },

    #[error("Score {value} is outside the range 1-10")]
    OutOfRange { value: f64, raw: String },

    #[error(transparent)]
    Model(#[from] LlmError),
}

impl ScoringError {
    /// 파싱 실패 시 모델 원문 응답
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            ScoringError::InvalidJson { raw, .. }
            | ScoringError::MissingField { raw, .. }
            | ScoringError::TypeMismatch { raw, .. }
            | ScoringError::OutOfRange { raw, .. } => Some(raw),
            ScoringError::Model(_) => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ScoringError::Model(e) if e.is_transient())
    }
}

/// 스코어링 실패 항목
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringFailure {
    pub source: String,
    pub error: ScoringError,
}

/// 배치 스코어링 결과
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// 성공한 점수 (점수 내림차순)
    pub scored: Vec<LeadScore>,
    /// 실패 (입력 순서)
    pub failures: Vec<ScoringFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.scored.len() + self.failures.len()
    }
}

// ============================================================================
// Prompt & Parsing
// ============================================================================

/// 스코어링 프롬프트 생성
pub fn build_scoring_prompt(document_text: &str) -> String {
    format!(
        "{}\n\nDOCUMENT_TEXT:\n{}\n\n{}",
        SCORING_INSTRUCTION, document_text, FORMAT_INSTRUCTIONS
    )
}

/// 코드 펜스 제거 후 JSON 객체 부분만 추출
fn extract_json_object(raw: &str) -> Option<&str> {
    let mut body = raw.trim();

    if let Ok(re) = regex::Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)\s*```") {
        if let Some(inner) = re.captures(body).and_then(|c| c.get(1)) {
            body = inner.as_str();
        }
    }

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

/// 모델 응답 → LeadScore (필드별 검증)
pub fn parse_lead_score(source: &str, raw: &str) -> Result<LeadScore, ScoringError> {
    let json = extract_json_object(raw).ok_or_else(|| ScoringError::InvalidJson {
        reason: "no JSON object found".to_string(),
        raw: raw.to_string(),
    })?;

    let value: Value = serde_json::from_str(json).map_err(|e| ScoringError::InvalidJson {
        reason: e.to_string(),
        raw: raw.to_string(),
    })?;

    let object = value.as_object().ok_or_else(|| ScoringError::InvalidJson {
        reason: "top-level value is not an object".to_string(),
        raw: raw.to_string(),
    })?;

    let score = parse_score(object, raw)?;

    let reasoning = match object.get("reasoning") {
        None => return Err(missing("reasoning", raw)),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(mismatch("reasoning", "string", raw)),
    };

    let key_factors = match object.get("key_factors") {
        None => return Err(missing("key_factors", raw)),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| mismatch("key_factors", "array of strings", raw))?,
        Some(_) => return Err(mismatch("key_factors", "array of strings", raw)),
    };

    Ok(LeadScore {
        source: source.to_string(),
        score,
        reasoning,
        key_factors,
    })
}

fn parse_score(object: &Map<String, Value>, raw: &str) -> Result<u8, ScoringError> {
    let number = match object.get("score") {
        None => return Err(missing("score", raw)),
        Some(Value::Number(n)) => n,
        Some(_) => return Err(mismatch("score", "integer", raw)),
    };

    // 8.0 같은 정수값 float는 허용
    let value = match number.as_i64() {
        Some(i) => i as f64,
        None => match number.as_f64() {
            Some(f) if f.fract() == 0.0 => f,
            _ => return Err(mismatch("score", "integer", raw)),
        },
    };

    if value < f64::from(MIN_SCORE) || value > f64::from(MAX_SCORE) {
        return Err(ScoringError::OutOfRange {
            value,
            raw: raw.to_string(),
        });
    }

    Ok(value as u8)
}

fn missing(field: &'static str, raw: &str) -> ScoringError {
    ScoringError::MissingField {
        field,
        raw: raw.to_string(),
    }
}

fn mismatch(field: &'static str, expected: &'static str, raw: &str) -> ScoringError {
    ScoringError::TypeMismatch {
        field,
        expected,
        raw: raw.to_string(),
    }
}

// ============================================================================
// Scorer
// ============================================================================

/// 리드 스코어러
pub struct Scorer {
    model: Arc<dyn LanguageModel>,
    params: GenerationParams,
    concurrency: usize,
}

impl Scorer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            params: GenerationParams::scoring(),
            concurrency: DEFAULT_SCORING_CONCURRENCY,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// 배치 동시 실행 수 (최소 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 문서 하나 스코어링
    ///
    /// 빈 문서는 모델을 호출하지 않고 최저점을 반환합니다.
    pub async fn score(&self, document: &Document) -> Result<LeadScore, ScoringError> {
        let source = document.source();

        if document.text.trim().is_empty() {
            tracing::warn!("Empty document, assigning minimum score: {}", source);
            return Ok(LeadScore {
                source: source.to_string(),
                score: MIN_SCORE,
                reasoning: EMPTY_DOCUMENT_REASONING.to_string(),
                key_factors: vec!["No content".to_string()],
            });
        }

        let prompt = build_scoring_prompt(&document.text);
        let raw = self.model.complete(&prompt, &self.params).await?;
        let lead = parse_lead_score(source, &raw)?;

        tracing::debug!("Scored {}: {}/{}", source, lead.score, MAX_SCORE);
        Ok(lead)
    }

    /// 여러 문서 스코어링 (개별 실패는 다른 문서에 영향 없음)
    pub async fn score_batch(&self, documents: &[Document]) -> BatchReport {
        let mut results: Vec<(usize, Result<LeadScore, ScoringError>)> =
            stream::iter(documents.iter().enumerate())
                .map(|(i, document)| async move { (i, self.score(document).await) })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        results.sort_by_key(|(i, _)| *i);

        let mut report = BatchReport::default();
        for (i, result) in results {
            match result {
                Ok(lead) => report.scored.push(lead),
                Err(error) => {
                    let source = documents[i].source().to_string();
                    tracing::warn!("Failed to score {}: {}", source, error);
                    report.failures.push(ScoringFailure { source, error });
                }
            }
        }

        report.scored.sort_by(|a, b| b.score.cmp(&a.score));

        tracing::info!(
            "Scored {} documents ({} failed)",
            report.scored.len(),
            report.failures.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;

    const VALID: &str =
        r#"{"score": 8, "reasoning": "Concrete loan terms.", "key_factors": ["$2M loan", "5 year term"]}"#;

    #[test]
    fn test_parse_valid() {
        let lead = parse_lead_score("loan.txt", VALID).unwrap();
        assert_eq!(lead.source, "loan.txt");
        assert_eq!(lead.score, 8);
        assert_eq!(lead.reasoning, "Concrete loan terms.");
        assert_eq!(lead.key_factors, vec!["$2M loan", "5 year term"]);
    }

    #[test]
    fn test_parse_code_fence_and_prose() {
        let raw = format!("Here is my analysis:\n```json\n{}\n```\nThanks.", VALID);
        assert_eq!(parse_lead_score("a", &raw).unwrap().score, 8);

        let raw = format!("Sure! {} Hope this helps.", VALID);
        assert_eq!(parse_lead_score("a", &raw).unwrap().score, 8);
    }

    #[test]
    fn test_parse_integral_float() {
        let raw = r#"{"score": 8.0, "reasoning": "r", "key_factors": []}"#;
        assert_eq!(parse_lead_score("a", raw).unwrap().score, 8);

        let raw = r#"{"score": 7.5, "reasoning": "r", "key_factors": []}"#;
        assert!(matches!(
            parse_lead_score("a", raw),
            Err(ScoringError::TypeMismatch { field: "score", .. })
        ));
    }

    #[test]
    fn test_parse_failures() {
        let cases = [
            ("not json at all", "invalid"),
            ("{\"score\": 8,", "invalid"),
            (r#"{"reasoning": "r", "key_factors": []}"#, "missing"),
            (r#"{"score": "8", "reasoning": "r", "key_factors": []}"#, "type"),
            (r#"{"score": 0, "reasoning": "r", "key_factors": []}"#, "range"),
            (r#"{"score": 11, "reasoning": "r", "key_factors": []}"#, "range"),
            (r#"{"score": 5, "key_factors": []}"#, "missing"),
            (r#"{"score": 5, "reasoning": "r", "key_factors": "a, b"}"#, "type"),
            (r#"{"score": 5, "reasoning": "r", "key_factors": [1, 2]}"#, "type"),
        ];

        for (raw, kind) in cases {
            let err = parse_lead_score("a", raw).unwrap_err();
            let ok = match kind {
                "invalid" => matches!(err, ScoringError::InvalidJson { .. }),
                "missing" => matches!(err, ScoringError::MissingField { .. }),
                "type" => matches!(err, ScoringError::TypeMismatch { .. }),
                "range" => matches!(err, ScoringError::OutOfRange { .. }),
                _ => false,
            };
            assert!(ok, "unexpected error for {}: {:?}", raw, err);
            assert_eq!(err.raw_response(), Some(raw));
        }
    }

    #[test]
    fn test_prompt_contains_document() {
        let prompt = build_scoring_prompt("Loan of $500,000 at 6%.");
        assert!(prompt.contains("lead score from 1 to 10"));
        assert!(prompt.contains("DOCUMENT_TEXT:\nLoan of $500,000 at 6%."));
        assert!(prompt.contains("\"key_factors\""));
    }

    #[tokio::test]
    async fn test_empty_document_skips_model() {
        let model = Arc::new(ScriptedModel::replying(VALID));
        let scorer = Scorer::new(model.clone());

        let lead = scorer.score(&Document::new("blank.txt", "  \n ")).await.unwrap();

        assert_eq!(lead.score, MIN_SCORE);
        assert!(lead.score <= 5);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_model_error_is_typed() {
        let scorer = Scorer::new(Arc::new(ScriptedModel::failing(LlmError::RateLimited)));
        let err = scorer.score(&Document::new("a.txt", "text")).await.unwrap_err();
        assert_eq!(err, ScoringError::Model(LlmError::RateLimited));
        assert!(err.is_transient());
        assert_eq!(err.raw_response(), None);
    }

    #[tokio::test]
    async fn test_batch_sorts_and_collects_failures() {
        // 문서 텍스트에 점수를 넣어 두고 그대로 응답
        let model = ScriptedModel::new(|prompt| {
            if prompt.contains("MALFORMED") {
                return Ok("I think this is a 7".to_string());
            }
            let score = prompt
                .split("SCORE=")
                .nth(1)
                .and_then(|rest| rest.split_whitespace().next())
                .unwrap_or("1");
            Ok(format!(
                r#"{{"score": {}, "reasoning": "r", "key_factors": ["f"]}}"#,
                score
            ))
        });
        let scorer = Scorer::new(Arc::new(model)).with_concurrency(2);

        let docs = vec![
            Document::new("d1.txt", "SCORE=3 memo"),
            Document::new("d2.txt", "SCORE=9 loan"),
            Document::new("d3.txt", "MALFORMED"),
            Document::new("d4.txt", "SCORE=6 lease"),
            Document::new("d5.txt", "SCORE=12 bogus"),
        ];

        let report = scorer.score_batch(&docs).await;

        let ranking: Vec<(&str, u8)> = report
            .scored
            .iter()
            .map(|l| (l.source.as_str(), l.score))
            .collect();
        assert_eq!(ranking, vec![("d2.txt", 9), ("d4.txt", 6), ("d1.txt", 3)]);

        let failed: Vec<&str> = report.failures.iter().map(|f| f.source.as_str()).collect();
        assert_eq!(failed, vec!["d3.txt", "d5.txt"]);
        assert!(matches!(report.failures[0].error, ScoringError::InvalidJson { .. }));
        assert!(matches!(report.failures[1].error, ScoringError::OutOfRange { .. }));
        assert_eq!(report.total(), 5);
    }
}
