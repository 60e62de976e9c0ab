//! CLI 모듈
//!
//! lead-insights CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::answer::AnswerOutcome;
use crate::collector::{load_corpus, CorpusCollector, CorpusStats};
use crate::config::Settings;
use crate::engine::{build_index, open_scorer, Engine, SetupError};
use crate::knowledge::{IndexError, VectorIndex};
use crate::scoring::MAX_SCORE;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "lead-insights")]
#[command(version, about = "금융 문서 RAG 질의응답 및 리드 스코어링", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 문서 폴더로 벡터 인덱스 생성 (기존 인덱스 교체)
    Build {
        /// 문서 폴더 (*.txt)
        #[arg(short, long)]
        docs: Option<PathBuf>,

        /// 인덱스 저장 폴더
        #[arg(short, long)]
        index: Option<PathBuf>,

        /// 청크 크기 (문자 수)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// 청크 오버랩 (문자 수)
        #[arg(long)]
        overlap: Option<usize>,
    },

    /// 문서 기반 질의응답
    Ask {
        /// 질문
        question: String,

        /// 참고할 청크 개수
        #[arg(short)]
        k: Option<usize>,

        /// 인덱스 폴더
        #[arg(short, long)]
        index: Option<PathBuf>,
    },

    /// 문서 리드 스코어링 (1~10)
    Score {
        /// 스코어링할 파일 (생략 시 문서 폴더 전체)
        files: Vec<PathBuf>,

        /// 문서 폴더 (*.txt)
        #[arg(short, long)]
        docs: Option<PathBuf>,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load().context("설정 로드 실패")?;

    match cli.command {
        Commands::Build {
            docs,
            index,
            chunk_size,
            overlap,
        } => {
            let mut settings = settings.with_chunking(chunk_size, overlap)?;
            if let Some(docs) = docs {
                settings.docs_dir = docs;
            }
            if let Some(index) = index {
                settings.index_dir = index;
            }
            cmd_build(&settings).await
        }
        Commands::Ask { question, k, index } => {
            let mut settings = settings;
            if let Some(index) = index {
                settings.index_dir = index;
            }
            cmd_ask(&settings, &question, k).await
        }
        Commands::Score { files, docs } => {
            let mut settings = settings;
            if let Some(docs) = docs {
                settings.docs_dir = docs;
            }
            cmd_score(&settings, &files).await
        }
        Commands::Status => cmd_status(&settings),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 인덱스 빌드 명령어 (build)
async fn cmd_build(settings: &Settings) -> Result<()> {
    println!("[*] 문서 폴더: {}", settings.docs_dir.display());
    println!(
        "[*] 청크 크기: {}, 오버랩: {}",
        settings.chunk.chunk_size, settings.chunk.overlap
    );

    let report = build_index(settings).await?;

    println!();
    println!(
        "[OK] 인덱스 생성 완료: 문서 {}, 청크 {}",
        report.document_count, report.chunk_count
    );
    println!("     임베더: {} (차원 {})", report.embedder, report.dimension);
    println!("     위치: {}", settings.index_dir.display());

    if !report.skipped_documents.is_empty() {
        println!("[!] 내용이 없어 건너뛴 문서 {} 건:", report.skipped_documents.len());
        for id in &report.skipped_documents {
            println!("    - {}", id);
        }
    }

    Ok(())
}

/// 질의응답 명령어 (ask)
async fn cmd_ask(settings: &Settings, question: &str, k: Option<usize>) -> Result<()> {
    let k = k.unwrap_or(settings.top_k);
    if k == 0 {
        bail!("-k 값은 1 이상이어야 합니다");
    }

    let engine = open_engine(settings)?;

    println!("[*] 질문: \"{}\"", question);

    let answer = engine.ask_with_k(question, k).await;

    match answer.outcome {
        AnswerOutcome::Grounded => println!("\n[OK] 답변:\n\n{}", answer.text.trim()),
        AnswerOutcome::EmptyQuery | AnswerOutcome::Failed => println!("\n[!] {}", answer.text),
    }

    if !answer.context.is_empty() {
        println!("\n출처:");
        for (i, hit) in answer.context.iter().enumerate() {
            println!(
                "{}. {} [유사도: {:.4}]",
                i + 1,
                hit.chunk.display_name(),
                hit.similarity
            );
            println!("   {}", truncate_text(&hit.chunk.text, 160));
        }
    }

    Ok(())
}

/// 리드 스코어링 명령어 (score)
async fn cmd_score(settings: &Settings, files: &[PathBuf]) -> Result<()> {
    let documents = if files.is_empty() {
        load_corpus(&settings.docs_dir)
            .with_context(|| format!("문서 폴더 읽기 실패: {}", settings.docs_dir.display()))?
    } else {
        let collector = CorpusCollector::with_defaults();
        files
            .iter()
            .map(|path| collector.load_file(path))
            .collect::<Result<Vec<_>, _>>()
            .context("문서 읽기 실패")?
    };

    if documents.is_empty() {
        println!("[!] 스코어링할 문서가 없습니다.");
        return Ok(());
    }

    let stats = CorpusStats::from_documents(&documents);
    println!(
        "[*] 스코어링 대상: {} 문서 ({} chars)",
        stats.documents, stats.total_chars
    );

    let scorer = open_scorer(settings).map_err(setup_hint)?;
    let report = scorer.score_batch(&documents).await;

    if !report.scored.is_empty() {
        println!("\n[OK] 리드 순위 ({} 건):\n", report.scored.len());
    }
    for (i, lead) in report.scored.iter().enumerate() {
        let name = Path::new(&lead.source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| lead.source.clone());

        println!("{}. [{}/{}] {}", i + 1, lead.score, MAX_SCORE, name);
        println!("   근거: {}", truncate_text(&lead.reasoning, 200));
        for factor in &lead.key_factors {
            println!("   - {}", factor);
        }
        println!();
    }

    if !report.failures.is_empty() {
        println!("[!] 스코어링 실패 ({} 건):", report.failures.len());
        for failure in &report.failures {
            println!("    - {}: {}", failure.source, failure.error);
            if let Some(raw) = failure.error.raw_response() {
                println!("      응답: {}", truncate_text(raw, 120));
            }
        }
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(settings: &Settings) -> Result<()> {
    println!("lead-insights v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 문서 폴더: {}", settings.docs_dir.display());
    println!("[*] 인덱스 폴더: {}", settings.index_dir.display());
    println!(
        "[*] 청크: {} / 오버랩 {}, top-k: {}",
        settings.chunk.chunk_size, settings.chunk.overlap, settings.top_k
    );
    println!(
        "[*] 임베더: {:?}, LLM: {:?} ({})",
        settings.embedder,
        settings.llm_provider,
        settings.model.as_deref().unwrap_or("기본 모델")
    );

    if settings.has_openrouter_key() {
        println!("[OK] OPENROUTER_API_KEY: 설정됨");
    } else {
        println!("[!] OPENROUTER_API_KEY: 미설정");
    }
    if settings.has_gemini_key() {
        println!("[OK] Gemini API 키: 설정됨");
    } else {
        println!("[!] Gemini API 키: 미설정 (로컬 해싱 임베더 사용)");
    }

    match VectorIndex::load(&settings.index_dir) {
        Ok(index) => {
            println!(
                "[OK] 벡터 인덱스: {} 청크, 차원 {}, 임베더 {}",
                index.len(),
                index.dimension(),
                index.embedder_name()
            );
            println!(
                "     생성: {} | 크기: {}",
                index.created_at().format("%Y-%m-%d %H:%M"),
                format_bytes(dir_size(&settings.index_dir))
            );
        }
        Err(IndexError::NotFound { .. }) => {
            println!("[!] 벡터 인덱스 없음. 먼저 `lead-insights build`를 실행하세요.");
        }
        Err(e) => {
            println!("[!] 벡터 인덱스 사용 불가: {}", e);
            if e.rebuild_required() {
                println!("    `lead-insights build`로 다시 생성하세요.");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 엔진 열기 (설정 에러는 안내 메시지 포함)
fn open_engine(settings: &Settings) -> Result<Engine> {
    Engine::open(settings).map_err(setup_hint)
}

/// 설정 에러에 해결 방법 덧붙이기
fn setup_hint(e: SetupError) -> anyhow::Error {
    if e.rebuild_required() {
        return anyhow::anyhow!("{}\n\n인덱스를 먼저 생성하세요:\n  lead-insights build --docs <DIR>", e);
    }

    if let SetupError::Index(_) = e {
        return anyhow::Error::new(e);
    }

    anyhow::anyhow!(
        "{}\n\n\
         설정 방법:\n  \
         export OPENROUTER_API_KEY=your-api-key\n  \
         또는 LEAD_INSIGHTS_LLM_PROVIDER=gemini 와 함께\n  \
         export GEMINI_API_KEY=your-api-key",
        e
    )
}

/// 디렉토리 내 파일 크기 합계
fn dir_size(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len() as usize)
                .sum()
        })
        .unwrap_or(0)
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use tempfile::TempDir;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("loan agreement", 4), "loan...");
        assert_eq!(truncate_text("term\r\nsheet", 20), "term sheet");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(900), "900 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_dir_size() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.bin"), [0u8; 100]).unwrap();
        std::fs::write(temp_dir.path().join("b.bin"), [0u8; 24]).unwrap();
        assert_eq!(dir_size(temp_dir.path()), 124);
        assert_eq!(dir_size(&temp_dir.path().join("missing")), 0);
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["lead-insights", "ask", "What is the loan term?", "-k", "5"]).unwrap();
        match cli.command {
            Commands::Ask { question, k, index } => {
                assert_eq!(question, "What is the loan term?");
                assert_eq!(k, Some(5));
                assert!(index.is_none());
            }
            _ => panic!("expected ask"),
        }

        let cli = Cli::try_parse_from(["lead-insights", "score", "a.txt", "b.txt"]).unwrap();
        assert!(matches!(cli.command, Commands::Score { ref files, .. } if files.len() == 2));

        let cli = Cli::try_parse_from([
            "lead-insights",
            "build",
            "--chunk-size",
            "300",
            "--overlap",
            "30",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Build { chunk_size: Some(300), overlap: Some(30), .. }
        ));
    }

    #[test]
    fn test_missing_index_hint() {
        let err = setup_hint(SetupError::Index(IndexError::NotFound {
            path: PathBuf::from("/tmp/none"),
        }));
        assert!(err.to_string().contains("lead-insights build"));
    }

    #[test]
    fn test_missing_embedding_key_hint() {
        let err = setup_hint(SetupError::Embedding(EmbeddingError::MissingApiKey)).to_string();
        assert!(err.contains("GEMINI_API_KEY"));
        assert!(!err.contains("lead-insights build"));
    }
}
