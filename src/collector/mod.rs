//! 문서 수집 모듈
//!
//! 코퍼스 디렉토리의 텍스트 파일(*.txt)을 `Document`로 읽어 들입니다.
//! 숨김 파일과 .gitignore 패턴은 건너뛰고, 결과는 경로 순으로 정렬됩니다.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use thiserror::Error;

use crate::knowledge::{Document, META_FILE_NAME};

// ============================================================================
// Errors
// ============================================================================

/// 수집 에러
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Directory not found: {0:?}")]
    DirectoryNotFound(PathBuf),

    #[error("Not a directory: {0:?}")]
    NotADirectory(PathBuf),

    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),

    #[error("File is not valid UTF-8 text: {0:?}")]
    NotUtf8(PathBuf),

    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Collector
// ============================================================================

/// 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
    /// 수집할 확장자
    pub extensions: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 10 * 1024 * 1024, // 10MB
            extensions: vec!["txt".to_string()],
        }
    }
}

/// 코퍼스 수집기
pub struct CorpusCollector {
    config: CollectorConfig,
}

impl CorpusCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 단일 파일을 문서로 읽기
    pub fn load_file(&self, path: &Path) -> Result<Document, CollectError> {
        if !path.exists() {
            return Err(CollectError::FileNotFound(path.to_path_buf()));
        }

        let bytes = std::fs::read(path).map_err(|source| CollectError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|_| CollectError::NotUtf8(path.to_path_buf()))?;

        let mut document = Document::new(path.to_string_lossy(), text);
        if let Some(name) = path.file_name() {
            document = document.with_metadata(META_FILE_NAME, name.to_string_lossy());
        }
        Ok(document)
    }

    /// 디렉토리 재귀 수집 (경로 순 정렬)
    ///
    /// UTF-8이 아니거나 읽을 수 없는 파일은 경고 후 건너뜁니다.
    pub fn collect_directory(&self, dir: &Path) -> Result<Vec<Document>, CollectError> {
        if !dir.exists() {
            return Err(CollectError::DirectoryNotFound(dir.to_path_buf()));
        }
        if !dir.is_dir() {
            return Err(CollectError::NotADirectory(dir.to_path_buf()));
        }

        let walker = WalkBuilder::new(dir)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .build();

        let mut paths = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            if self.should_include(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            match self.load_file(&path) {
                Ok(document) => documents.push(document),
                Err(e) => tracing::warn!("Skipping document: {}", e),
            }
        }

        tracing::info!("Collected {} documents from {:?}", documents.len(), dir);
        Ok(documents)
    }

    /// 확장자/크기 필터
    fn should_include(&self, path: &Path) -> bool {
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false);
        if !matches_ext {
            return false;
        }

        if self.config.max_file_size > 0 {
            if let Ok(metadata) = std::fs::metadata(path) {
                if metadata.len() > self.config.max_file_size {
                    tracing::warn!(
                        "Skipping document larger than {} bytes: {:?} ({} bytes)",
                        self.config.max_file_size,
                        path,
                        metadata.len()
                    );
                    return false;
                }
            }
        }

        true
    }
}

/// 기본 설정으로 코퍼스 로드
pub fn load_corpus(dir: &Path) -> Result<Vec<Document>, CollectError> {
    CorpusCollector::with_defaults().collect_directory(dir)
}

// ============================================================================
// Statistics
// ============================================================================

/// 코퍼스 통계
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub documents: usize,
    pub empty_documents: usize,
    pub total_chars: usize,
}

impl CorpusStats {
    pub fn from_documents(documents: &[Document]) -> Self {
        let mut stats = Self::default();
        for document in documents {
            stats.documents += 1;
            stats.total_chars += document.text.chars().count();
            if document.text.trim().is_empty() {
                stats.empty_documents += 1;
            }
        }
        stats
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &[u8]) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_collect_sorted_txt_only() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "b_lease.txt", b"Lease agreement");
        write(root, "a_loan.txt", b"Loan agreement");
        write(root, "notes.md", b"# not collected");
        write(root, ".hidden.txt", b"hidden");
        write(root, "nested/c_equity.txt", b"Equity round");

        let docs = load_corpus(root).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.display_name()).collect();

        assert_eq!(names, vec!["a_loan.txt", "b_lease.txt", "c_equity.txt"]);
        assert_eq!(docs[0].text, "Loan agreement");
        assert_eq!(docs[0].source(), root.join("a_loan.txt").to_string_lossy().as_ref());
    }

    #[test]
    fn test_non_utf8_skipped() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "good.txt", b"fine");
        write(temp_dir.path(), "bad.txt", &[0xff, 0xfe, 0x00, 0x81]);

        let docs = load_corpus(temp_dir.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].display_name(), "good.txt");

        let err = CorpusCollector::with_defaults()
            .load_file(&temp_dir.path().join("bad.txt"))
            .unwrap_err();
        assert!(matches!(err, CollectError::NotUtf8(_)));
    }

    #[test]
    fn test_size_limit_skips_large_documents() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "short.txt", b"Loan");
        write(temp_dir.path(), "long.txt", b"Commercial lease agreement");

        let collector = CorpusCollector::new(CollectorConfig {
            max_file_size: 8,
            ..CollectorConfig::default()
        });
        let docs = collector.collect_directory(temp_dir.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].display_name(), "short.txt");

        let unlimited = CorpusCollector::new(CollectorConfig {
            max_file_size: 0,
            ..CollectorConfig::default()
        });
        assert_eq!(unlimited.collect_directory(temp_dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_corpus(&temp_dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, CollectError::DirectoryNotFound(_)));
    }

    #[test]
    fn test_corpus_stats() {
        let docs = vec![Document::new("a", "héllo"), Document::new("b", "  ")];
        let stats = CorpusStats::from_documents(&docs);
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.empty_documents, 1);
        assert_eq!(stats.total_chars, 7);
    }
}
