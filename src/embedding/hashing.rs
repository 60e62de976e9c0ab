//! FNV-1a 피처 해싱 임베더 - 오프라인 대체 구현
//!
//! 소문자 단어 토큰을 해시 버킷에 부호와 함께 누적한 뒤 L2 정규화합니다.
//! 외부 호출이 없고 결정적이므로 API 키 없이 인덱스를 만들거나 테스트할 때 사용합니다.

use async_trait::async_trait;

use super::{EmbeddingError, EmbeddingProvider};
use crate::knowledge::l2_normalize;

/// 기본 해시 차원
pub const DEFAULT_HASH_DIMENSION: usize = 384;
/// 해싱 임베더 이름 접두사 (`fnv1a-hash-{dimension}`)
pub const HASHING_NAME_PREFIX: &str = "fnv1a-hash";

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

/// 해싱 임베더
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimension: usize,
    name: String,
}

impl HashingEmbedding {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::InvalidDimension(dimension));
        }
        Ok(Self {
            dimension,
            name: format!("{}-{}", HASHING_NAME_PREFIX, dimension),
        })
    }

    /// 동기 임베딩 (비동기 트레이트 구현이 이 함수를 사용)
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedding {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_HASH_DIMENSION,
            name: format!("{}-{}", HASHING_NAME_PREFIX, DEFAULT_HASH_DIMENSION),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// 영숫자 단어 토큰 (소문자)
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}
