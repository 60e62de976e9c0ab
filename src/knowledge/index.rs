//! Vector Index - 불변 벡터 인덱스와 디스크 영속화
//!
//! 빌드 후에는 읽기 전용이며, 여러 태스크에서 `Arc`로 공유해 동시에 검색할 수 있습니다.
//! 검색은 전체 엔트리에 대한 정확한 코사인 유사도 비교입니다.
//!
//! ## 디스크 포맷 (version 1)
//! ```text
//! <index_dir>/
//!   manifest.json   버전, 메트릭, 차원, 엔트리 수, 임베더, SHA-256 체크섬
//!   entries.json    청크 배열 (삽입 순서)
//!   vectors.bin     entry_count × dimension 개의 little-endian f32
//! ```
//!
//! 저장은 임시 디렉토리에 모두 쓴 뒤 교체하므로
//! 실패해도 반쯤 쓰인 인덱스가 남지 않습니다.
//! 교체는 기존 디렉토리를 `.<name>.old-<pid>`로 옮긴 뒤 새 디렉토리를 제자리에 두는
//! 두 번의 rename입니다. 그 사이에 다른 프로세스가 로드하면 `NotFound`를 받고,
//! 그 시점에 프로세스가 죽으면 `.old-<pid>` 디렉토리만 남습니다.
//! 두 경우 모두 복구 방법은 다시 빌드하는 것입니다.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::document::Chunk;
use super::vector::{cosine_similarity, IndexEntry, SearchHit, METRIC_COSINE};

/// 현재 디스크 포맷 버전
pub const INDEX_FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const ENTRIES_FILE: &str = "entries.json";
const VECTORS_FILE: &str = "vectors.bin";

// ============================================================================
// Errors
// ============================================================================

/// 인덱스 에러
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Vector index not found at {path:?}")]
    NotFound { path: PathBuf },

    #[error("Vector index at {path:?} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Unsupported index format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Embedding dimension mismatch: index uses {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Duplicate chunk id in index: {0}")]
    DuplicateChunk(String),

    #[error("Empty embedding vector for chunk {0}")]
    EmptyVector(String),

    #[error("Failed to write vector index at {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IndexError {
    /// 빌드 단계를 다시 실행해야 복구되는 에러인지
    pub fn rebuild_required(&self) -> bool {
        matches!(
            self,
            IndexError::NotFound { .. }
                | IndexError::Corrupt { .. }
                | IndexError::UnsupportedVersion { .. }
                | IndexError::DimensionMismatch { .. }
        )
    }
}

// ============================================================================
// Manifest
// ============================================================================

/// 인덱스 매니페스트 (manifest.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexManifest {
    pub format_version: u32,
    pub metric: String,
    pub dimension: usize,
    pub entry_count: usize,
    pub embedder: String,
    pub created_at: DateTime<Utc>,
    pub entries_sha256: String,
    pub vectors_sha256: String,
}

/// 엄격한 파싱 전에 버전만 먼저 읽기 위한 구조체
#[derive(Deserialize)]
struct VersionProbe {
    format_version: u32,
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 불변 벡터 인덱스
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    embedder: String,
    created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// 엔트리 전체로 인덱스 생성 (O(n))
    ///
    /// 모든 벡터의 차원이 같아야 하고 청크 ID는 중복될 수 없습니다.
    pub fn build(entries: Vec<IndexEntry>, embedder: impl Into<String>) -> Result<Self, IndexError> {
        let dimension = entries.first().map(|e| e.vector.len()).unwrap_or(0);

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if entry.vector.is_empty() {
                return Err(IndexError::EmptyVector(entry.chunk.id.clone()));
            }
            if entry.vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    found: entry.vector.len(),
                });
            }
            if !seen.insert(entry.chunk.id.as_str()) {
                return Err(IndexError::DuplicateChunk(entry.chunk.id.clone()));
            }
        }

        Ok(Self {
            dimension,
            embedder: embedder.into(),
            created_at: Utc::now(),
            entries,
        })
    }

    /// 상위 k개 검색 (유사도 내림차순, 동점은 삽입 순서)
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let similarity = cosine_similarity(query, &entry.vector);
                (i, if similarity.is_nan() { f32::MIN } else { similarity })
            })
            .collect();

        // 안정 정렬 - 동점은 삽입 순서 유지
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, similarity)| SearchHit {
                chunk: self.entries[i].chunk.clone(),
                similarity,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 벡터 차원 (빈 인덱스는 0)
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 빌드에 사용된 임베더 이름
    pub fn embedder_name(&self) -> &str {
        &self.embedder
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// 인덱스 디렉토리가 존재하는지 (매니페스트 기준)
    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).is_file()
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// 디렉토리에 저장 (임시 디렉토리에 쓴 뒤 교체)
    pub fn save(&self, dir: &Path) -> Result<(), IndexError> {
        let chunks: Vec<&Chunk> = self.entries.iter().map(|e| &e.chunk).collect();
        let entries_bytes = serde_json::to_vec_pretty(&chunks).map_err(|e| IndexError::Write {
            path: dir.join(ENTRIES_FILE),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;

        let mut vectors_bytes = Vec::with_capacity(self.entries.len() * self.dimension * 4);
        for entry in &self.entries {
            for value in &entry.vector {
                vectors_bytes.extend_from_slice(&value.to_le_bytes());
            }
        }

        let manifest = IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            metric: METRIC_COSINE.to_string(),
            dimension: self.dimension,
            entry_count: self.entries.len(),
            embedder: self.embedder.clone(),
            created_at: self.created_at,
            entries_sha256: sha256_hex(&entries_bytes),
            vectors_sha256: sha256_hex(&vectors_bytes),
        };
        let manifest_bytes =
            serde_json::to_vec_pretty(&manifest).map_err(|e| IndexError::Write {
                path: dir.join(MANIFEST_FILE),
                source: io::Error::new(io::ErrorKind::InvalidData, e),
            })?;

        let (parent, name) = split_index_path(dir);
        fs::create_dir_all(&parent).map_err(write_error(&parent))?;

        let pid = std::process::id();
        let staging = parent.join(format!(".{}.tmp-{}", name, pid));
        let backup = parent.join(format!(".{}.old-{}", name, pid));

        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(write_error(&staging))?;
        }

        let written = write_staging(
            &staging,
            &[
                (ENTRIES_FILE, &entries_bytes),
                (VECTORS_FILE, &vectors_bytes),
                (MANIFEST_FILE, &manifest_bytes),
            ],
        );
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        // 교체: 기존 인덱스를 옆으로 옮기고 새 인덱스를 제자리에
        let had_previous = dir.exists();
        if had_previous {
            if let Err(e) = fs::rename(dir, &backup) {
                let _ = fs::remove_dir_all(&staging);
                return Err(write_error(dir)(e));
            }
        }

        if let Err(e) = fs::rename(&staging, dir) {
            if had_previous {
                let _ = fs::rename(&backup, dir);
            }
            let _ = fs::remove_dir_all(&staging);
            return Err(write_error(dir)(e));
        }

        if had_previous {
            if let Err(e) = fs::remove_dir_all(&backup) {
                tracing::warn!("Failed to remove previous index at {:?}: {}", backup, e);
            }
        }

        tracing::info!(
            "Saved vector index to {:?} ({} entries, dimension {})",
            dir,
            self.entries.len(),
            self.dimension
        );
        Ok(())
    }

    /// 디렉토리에서 로드 (버전/체크섬/크기 검증)
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(IndexError::NotFound {
                path: dir.to_path_buf(),
            });
        }

        let corrupt = |reason: String| IndexError::Corrupt {
            path: dir.to_path_buf(),
            reason,
        };

        let manifest_bytes =
            fs::read(&manifest_path).map_err(|e| corrupt(format!("{}: {}", MANIFEST_FILE, e)))?;

        let probe: VersionProbe = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| corrupt(format!("{}: {}", MANIFEST_FILE, e)))?;
        if probe.format_version != INDEX_FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion {
                found: probe.format_version,
                expected: INDEX_FORMAT_VERSION,
            });
        }

        let manifest: IndexManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| corrupt(format!("{}: {}", MANIFEST_FILE, e)))?;
        if manifest.metric != METRIC_COSINE {
            return Err(corrupt(format!("unsupported metric '{}'", manifest.metric)));
        }

        let entries_bytes = fs::read(dir.join(ENTRIES_FILE))
            .map_err(|e| corrupt(format!("{}: {}", ENTRIES_FILE, e)))?;
        if sha256_hex(&entries_bytes) != manifest.entries_sha256 {
            return Err(corrupt(format!("{} checksum mismatch", ENTRIES_FILE)));
        }

        let vectors_bytes = fs::read(dir.join(VECTORS_FILE))
            .map_err(|e| corrupt(format!("{}: {}", VECTORS_FILE, e)))?;
        if sha256_hex(&vectors_bytes) != manifest.vectors_sha256 {
            return Err(corrupt(format!("{} checksum mismatch", VECTORS_FILE)));
        }

        let chunks: Vec<Chunk> = serde_json::from_slice(&entries_bytes)
            .map_err(|e| corrupt(format!("{}: {}", ENTRIES_FILE, e)))?;
        if chunks.len() != manifest.entry_count {
            return Err(corrupt(format!(
                "expected {} entries, found {}",
                manifest.entry_count,
                chunks.len()
            )));
        }

        let stride = manifest
            .dimension
            .checked_mul(4)
            .ok_or_else(|| corrupt("dimension/entry_count overflow".to_string()))?;
        let expected_len = manifest
            .entry_count
            .checked_mul(stride)
            .ok_or_else(|| corrupt("dimension/entry_count overflow".to_string()))?;
        if vectors_bytes.len() != expected_len {
            return Err(corrupt(format!(
                "{} has {} bytes, expected {}",
                VECTORS_FILE,
                vectors_bytes.len(),
                expected_len
            )));
        }

        let entries: Vec<IndexEntry> = if manifest.entry_count == 0 {
            vec![]
        } else {
            if stride == 0 {
                return Err(corrupt("zero dimension with non-empty index".to_string()));
            }
            chunks
                .into_iter()
                .zip(vectors_bytes.chunks_exact(stride))
                .map(|(chunk, raw)| IndexEntry::new(chunk, decode_vector(raw)))
                .collect()
        };

        let mut index =
            Self::build(entries, manifest.embedder.clone()).map_err(|e| corrupt(e.to_string()))?;
        index.dimension = manifest.dimension;
        index.created_at = manifest.created_at;

        tracing::debug!(
            "Loaded vector index from {:?} ({} entries)",
            dir,
            index.len()
        );
        Ok(index)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn decode_vector(raw: &[u8]) -> Vec<f32> {
    raw.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// 인덱스 경로를 (부모 디렉토리, 이름)으로 분리
fn split_index_path(dir: &Path) -> (PathBuf, String) {
    let parent = match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    (parent, name)
}

fn write_error(path: &Path) -> impl FnOnce(io::Error) -> IndexError + '_ {
    move |source| IndexError::Write {
        path: path.to_path_buf(),
        source,
    }
}

/// 임시 디렉토리에 파일을 쓰고 fsync
fn write_staging(staging: &Path, files: &[(&str, &Vec<u8>)]) -> Result<(), IndexError> {
    fs::create_dir_all(staging).map_err(write_error(staging))?;

    for (name, bytes) in files {
        let path = staging.join(name);
        let mut file = File::create(&path).map_err(write_error(&path))?;
        file.write_all(bytes).map_err(write_error(&path))?;
        file.sync_all().map_err(write_error(&path))?;
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::document::Document;
    use tempfile::TempDir;

    fn entry(doc: &str, ordinal: usize, vector: Vec<f32>) -> IndexEntry {
        let document = Document::new(doc, "text");
        let chunk = Chunk::from_document(&document, ordinal, format!("{} chunk {}", doc, ordinal));
        IndexEntry::new(chunk, vector)
    }

    fn sample_index() -> VectorIndex {
        VectorIndex::build(
            vec![
                entry("a.txt", 0, vec![1.0, 0.0, 0.0]),
                entry("a.txt", 1, vec![0.7, 0.7, 0.0]),
                entry("b.txt", 0, vec![0.0, 1.0, 0.0]),
                entry("b.txt", 1, vec![0.0, 0.0, 1.0]),
                entry("c.txt", 0, vec![0.3, 0.1, 0.9]),
            ],
            "test-embedder",
        )
        .unwrap()
    }

    #[test]
    fn test_build_rejects_mixed_dimensions() {
        let result = VectorIndex::build(
            vec![entry("a.txt", 0, vec![1.0, 0.0]), entry("a.txt", 1, vec![1.0])],
            "test",
        );
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_build_rejects_duplicates() {
        let result = VectorIndex::build(
            vec![entry("a.txt", 0, vec![1.0]), entry("a.txt", 0, vec![0.5])],
            "test",
        );
        assert!(matches!(result, Err(IndexError::DuplicateChunk(id)) if id == "a.txt#0"));
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.1, 0.0], 3).unwrap();

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.id, "a.txt#0");
        assert_eq!(hits[1].chunk.id, "a.txt#1");
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn test_search_fewer_entries_than_k() {
        let index = sample_index();
        assert_eq!(index.search(&[0.0, 0.0, 1.0], 50).unwrap().len(), 5);
        assert!(index.search(&[0.0, 0.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_search_ties_keep_insertion_order() {
        let index = VectorIndex::build(
            vec![
                entry("x.txt", 0, vec![0.0, 1.0]),
                entry("y.txt", 0, vec![1.0, 0.0]),
                entry("z.txt", 0, vec![2.0, 0.0]),
            ],
            "test",
        )
        .unwrap();

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].chunk.id, "y.txt#0");
        assert_eq!(hits[1].chunk.id, "z.txt#0");
        assert_eq!(hits[2].chunk.id, "x.txt#0");
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let index = sample_index();
        let err = index.search(&[1.0, 0.0], 3).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 3, found: 2 }
        ));
        assert!(err.rebuild_required());
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::build(vec![], "test").unwrap();
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 2.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index");

        let index = sample_index();
        index.save(&path).unwrap();
        assert!(VectorIndex::exists(&path));

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.embedder_name(), "test-embedder");
        assert_eq!(loaded.entries(), index.entries());

        for query in [[1.0, 0.1, 0.0], [0.2, 0.2, 0.9], [-1.0, 0.5, 0.3]] {
            let before = index.search(&query, 3).unwrap();
            let after = loaded.search(&query, 3).unwrap();
            assert_eq!(before, after);
        }
    }

    #[test]
    fn test_save_replaces_existing_index() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index");

        sample_index().save(&path).unwrap();

        let rebuilt =
            VectorIndex::build(vec![entry("new.txt", 0, vec![0.5, 0.5])], "other").unwrap();
        rebuilt.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.dimension(), 2);

        // 임시/백업 디렉토리가 남지 않아야 함
        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_empty_index_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty");

        VectorIndex::build(vec![], "test").unwrap().save(&path).unwrap();
        let loaded = VectorIndex::load(&path).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_missing_index() {
        let temp_dir = TempDir::new().unwrap();
        let err = VectorIndex::load(&temp_dir.path().join("nope")).unwrap_err();

        assert!(matches!(err, IndexError::NotFound { .. }));
        assert!(err.rebuild_required());
    }

    #[test]
    fn test_load_garbage_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(MANIFEST_FILE), b"not json at all").unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn test_load_detects_tampered_vectors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index");
        sample_index().save(&path).unwrap();

        let vectors_path = path.join(VECTORS_FILE);
        let mut bytes = std::fs::read(&vectors_path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&vectors_path, bytes).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { ref reason, .. } if reason.contains("checksum")));
    }

    #[test]
    fn test_load_missing_entries_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index");
        sample_index().save(&path).unwrap();
        std::fs::remove_file(path.join(ENTRIES_FILE)).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn test_load_rejects_oversized_dimension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index");
        sample_index().save(&path).unwrap();

        // 2^62: dimension * 4가 usize를 넘침
        let manifest_path = path.join(MANIFEST_FILE);
        let manifest = std::fs::read_to_string(&manifest_path).unwrap();
        assert!(manifest.contains("\"dimension\": 3"));
        let manifest = manifest.replace("\"dimension\": 3", "\"dimension\": 4611686018427387904");
        std::fs::write(&manifest_path, manifest).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { ref reason, .. } if reason.contains("overflow")));
        assert!(err.rebuild_required());
    }

    #[test]
    fn test_load_unsupported_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(MANIFEST_FILE), br#"{"format_version": 99}"#).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(
            err,
            IndexError::UnsupportedVersion { found: 99, expected: 1 }
        ));
    }
}
