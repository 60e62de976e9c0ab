//! Answer 모듈 - 검색된 청크 + 질문 → 근거 기반 답변
//!
//! 답변에는 프롬프트에 실제로 들어간 청크가 순서 그대로 함께 반환됩니다.
//! 모델 호출이 실패해도 에러 대신 실패 답변을 돌려줍니다.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::knowledge::SearchHit;
use crate::llm::{GenerationParams, LanguageModel};

/// 빈 질문에 대한 고정 답변
pub const EMPTY_QUERY_ANSWER: &str = "Please enter a query.";

/// 답변 시스템 지시문
const ANSWER_INSTRUCTION: &str = "You are an expert financial analyst. Answer the user's question \
based *only* on the context provided below. If the context does not contain the answer, \
state that clearly. Do not make up information.";

// ============================================================================
// Types
// ============================================================================

/// 답변 결과 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// 컨텍스트 기반으로 생성된 답변
    Grounded,
    /// 빈 질문 (모델 호출 없음)
    EmptyQuery,
    /// 검색 또는 모델 호출 실패
    Failed,
}

/// 답변 + 출처
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    /// 프롬프트에 사용된 청크 (검색 순서)
    pub context: Vec<SearchHit>,
    pub outcome: AnswerOutcome,
}

impl Answer {
    /// 빈 질문 답변
    pub fn empty_query() -> Self {
        Self {
            text: EMPTY_QUERY_ANSWER.to_string(),
            context: Vec::new(),
            outcome: AnswerOutcome::EmptyQuery,
        }
    }

    /// 실패 답변 (`An error occurred: ...`)
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            text: format!("An error occurred: {}", error),
            context: Vec::new(),
            outcome: AnswerOutcome::Failed,
        }
    }

    pub fn is_grounded(&self) -> bool {
        self.outcome == AnswerOutcome::Grounded
    }

    /// 출처 표시 이름 (중복 제거, 처음 등장한 순서)
    pub fn sources(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.context
            .iter()
            .map(|hit| hit.chunk.display_name())
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

// ============================================================================
// Prompt
// ============================================================================

/// 답변 프롬프트 생성
///
/// 지시문 + 청크 텍스트(빈 줄로 구분, 검색 순서) + 질문 원문
pub fn build_answer_prompt(question: &str, hits: &[SearchHit]) -> String {
    let context = hits
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{}\n\nCONTEXT:\n{}\n\nQUESTION:\n{}",
        ANSWER_INSTRUCTION, context, question
    )
}

// ============================================================================
// Composer
// ============================================================================

/// 답변 생성기
pub struct AnswerComposer {
    model: Arc<dyn LanguageModel>,
    params: GenerationParams,
}

impl AnswerComposer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            params: GenerationParams::answering(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// 질문당 모델 한 번 호출
    pub async fn answer(&self, question: &str, hits: Vec<SearchHit>) -> Answer {
        let prompt = build_answer_prompt(question, &hits);

        tracing::debug!(
            "Composing answer with {} context chunks via {}",
            hits.len(),
            self.model.name()
        );

        match self.model.complete(&prompt, &self.params).await {
            Ok(text) => Answer {
                text,
                context: hits,
                outcome: AnswerOutcome::Grounded,
            },
            Err(e) => {
                tracing::warn!("Answer generation failed: {}", e);
                Answer::failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Chunk, Document, META_FILE_NAME};
    use crate::llm::testing::ScriptedModel;
    use crate::llm::LlmError;

    fn hit(source: &str, ordinal: usize, text: &str, similarity: f32) -> SearchHit {
        let doc = Document::new(format!("docs/{}", source), text).with_metadata(META_FILE_NAME, source);
        SearchHit {
            chunk: Chunk::from_document(&doc, ordinal, text),
            similarity,
        }
    }

    #[test]
    fn test_prompt_layout() {
        let hits = vec![
            hit("loan.txt", 0, "Loan amount is $2,000,000.", 0.9),
            hit("loan.txt", 1, "Term is 7 years.", 0.8),
        ];
        let prompt = build_answer_prompt("What is the loan term?", &hits);

        assert!(prompt.starts_with("You are an expert financial analyst."));
        assert!(prompt.contains("Loan amount is $2,000,000.\n\nTerm is 7 years."));
        assert!(prompt.ends_with("QUESTION:\nWhat is the loan term?"));
        let first = prompt.find("Loan amount").unwrap();
        let second = prompt.find("Term is 7").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_answer_keeps_context_order() {
        let model = Arc::new(ScriptedModel::replying("The term is 7 years."));
        let composer = AnswerComposer::new(model.clone());
        let hits = vec![
            hit("loan.txt", 1, "Term is 7 years.", 0.9),
            hit("lease.txt", 0, "Lease for 5 years.", 0.4),
            hit("loan.txt", 0, "Loan amount is $2,000,000.", 0.3),
        ];

        let answer = composer.answer("What is the loan term?", hits.clone()).await;

        assert_eq!(answer.outcome, AnswerOutcome::Grounded);
        assert_eq!(answer.text, "The term is 7 years.");
        assert_eq!(answer.context, hits);
        assert_eq!(answer.sources(), vec!["loan.txt", "lease.txt"]);
        assert_eq!(model.calls(), 1);
        assert!(model.prompts()[0].contains("Lease for 5 years."));
    }

    #[tokio::test]
    async fn test_model_failure_becomes_failed_answer() {
        let model = Arc::new(ScriptedModel::failing(LlmError::Timeout));
        let composer = AnswerComposer::new(model);

        let answer = composer
            .answer("anything", vec![hit("a.txt", 0, "text", 0.5)])
            .await;

        assert_eq!(answer.outcome, AnswerOutcome::Failed);
        assert!(answer.text.starts_with("An error occurred: "));
        assert!(answer.context.is_empty());
    }

    #[test]
    fn test_empty_query_answer() {
        let answer = Answer::empty_query();
        assert_eq!(answer.text, "Please enter a query.");
        assert!(answer.context.is_empty());
        assert!(!answer.is_grounded());
    }
}
