//! 문서 / 청크 데이터 모델
//!
//! 문서는 외부에서 만들어진 읽기 전용 입력이고,
//! 청크는 인덱스 빌드 시 한 번 생성되어 다음 재빌드까지 유지됩니다.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 메타데이터 키: 원본 경로
pub const META_SOURCE: &str = "source";
/// 메타데이터 키: 파일 이름 (출처 표시용)
pub const META_FILE_NAME: &str = "file_name";

// ============================================================================
// Document
// ============================================================================

/// 원본 문서
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// 안정적인 문서 ID (보통 파일 경로)
    pub id: String,
    /// 원문 텍스트
    pub text: String,
    /// 메타데이터 (최소 `source` 포함)
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// ID와 텍스트로 생성 (`source` 메타데이터 자동 설정)
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        let mut metadata = BTreeMap::new();
        metadata.insert(META_SOURCE.to_string(), id.clone());
        Self {
            id,
            text: text.into(),
            metadata,
        }
    }

    /// 메타데이터 추가
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 출처 (`source` 메타데이터, 없으면 ID)
    pub fn source(&self) -> &str {
        self.metadata
            .get(META_SOURCE)
            .map(String::as_str)
            .unwrap_or(&self.id)
    }

    /// 표시용 이름 (`file_name` 메타데이터, 없으면 출처)
    pub fn display_name(&self) -> &str {
        self.metadata
            .get(META_FILE_NAME)
            .map(String::as_str)
            .unwrap_or_else(|| self.source())
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 문서에서 잘라낸 연속된 텍스트 조각 (검색 단위)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 청크 ID (`{document_id}#{ordinal}`)
    pub id: String,
    /// 원본 문서 ID
    pub document_id: String,
    /// 문서 내 순번 (0-based)
    pub ordinal: usize,
    /// 청크 텍스트 (원문의 연속된 부분 문자열)
    pub text: String,
    /// 문서에서 상속된 메타데이터
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    /// 문서의 `ordinal`번째 청크 생성
    pub fn from_document(document: &Document, ordinal: usize, text: impl Into<String>) -> Self {
        Self {
            id: chunk_id(&document.id, ordinal),
            document_id: document.id.clone(),
            ordinal,
            text: text.into(),
            metadata: document.metadata.clone(),
        }
    }

    /// 출처
    pub fn source(&self) -> &str {
        self.metadata
            .get(META_SOURCE)
            .map(String::as_str)
            .unwrap_or(&self.document_id)
    }

    /// 표시용 이름
    pub fn display_name(&self) -> &str {
        self.metadata
            .get(META_FILE_NAME)
            .map(String::as_str)
            .unwrap_or_else(|| self.source())
    }
}

/// 청크 ID 생성
pub(crate) fn chunk_id(document_id: &str, ordinal: usize) -> String {
    format!("{}#{}", document_id, ordinal)
}
