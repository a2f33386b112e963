//! Per-file classification, parsing and extraction with Rayon-based
//! parallelism.
//!
//! Every file is an isolated unit: its outcome (including a panic inside a
//! grammar) is captured in its own `ExtractionResult` and never affects the
//! other files of the job.

use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;

use crate::errors::{FileParseError, ParseCategory};
use crate::indexer::filesystem::{classify, compute_content_hash, count_lines, SNIFF_BYTES};
use crate::indexer::parser::parse_source;
use crate::indexer::symbols::{extract_symbols, FileSymbols};
use crate::models::{ParseOutcome, SourceFile};

/// Raw content of one crawled file, or why it could not be read.
pub struct FileInput {
    pub path: String,
    pub content: Result<Vec<u8>, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub max_file_bytes: u64,
    pub parse_timeout_ms: u64,
    pub workers: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_file_bytes: 1024 * 1024,
            parse_timeout_ms: 5_000,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub file: SourceFile,
    /// Present for `ok` and `partial` outcomes.
    pub symbols: Option<FileSymbols>,
    pub error: Option<FileParseError>,
}

impl ExtractionResult {
    fn skipped(file: SourceFile, reason: &str) -> Self {
        Self {
            file: SourceFile {
                outcome: ParseOutcome::Skipped(reason.to_string()),
                ..file
            },
            symbols: None,
            error: None,
        }
    }

    fn failed(file: SourceFile, error: FileParseError) -> Self {
        Self {
            file: SourceFile {
                outcome: ParseOutcome::Failed(error.to_string()),
                ..file
            },
            symbols: None,
            error: Some(error),
        }
    }
}

/// Run `f`, turning a panic into a `panic` category parse error for `path`.
pub fn run_isolated<T, F>(path: &str, f: F) -> Result<T, FileParseError>
where
    F: FnOnce() -> Result<T, FileParseError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "parser panicked".to_string());
            Err(FileParseError::new(path, ParseCategory::Panic, message))
        }
    }
}

pub fn extract_file(input: &FileInput, options: &PipelineOptions) -> ExtractionResult {
    let path = input.path.as_str();
    let bytes = match &input.content {
        Ok(bytes) => bytes,
        Err(message) => {
            let file = SourceFile {
                path: path.to_string(),
                language: classify(path, None),
                content_hash: String::new(),
                size_bytes: 0,
                line_count: 0,
                outcome: ParseOutcome::Failed(String::new()),
            };
            let error = FileParseError::new(path, ParseCategory::Read, message.clone());
            tracing::warn!(path, error = %error, "file could not be read");
            return ExtractionResult::failed(file, error);
        }
    };

    let head = &bytes[..bytes.len().min(SNIFF_BYTES)];
    let language = classify(path, Some(head));
    let file = SourceFile {
        path: path.to_string(),
        language,
        content_hash: compute_content_hash(bytes),
        size_bytes: bytes.len() as u64,
        line_count: count_lines(bytes),
        outcome: ParseOutcome::Ok,
    };

    let Some(language) = language else {
        return ExtractionResult::skipped(file, "unsupported language");
    };
    if file.size_bytes > options.max_file_bytes {
        tracing::debug!(path, size = file.size_bytes, "skipping oversized file");
        return ExtractionResult::skipped(
            file,
            &format!("exceeds {} byte limit", options.max_file_bytes),
        );
    }

    let parsed = run_isolated(path, || {
        let (unit, outcome) = parse_source(path, language, bytes, options.parse_timeout_ms)?;
        Ok((extract_symbols(&unit), outcome))
    });

    match parsed {
        Ok((symbols, outcome)) => {
            if let Some(detail) = outcome.detail() {
                tracing::warn!(path, detail, "partial parse");
            } else {
                tracing::debug!(path, records = symbols.records.len(), "parsed");
            }
            ExtractionResult {
                file: SourceFile { outcome, ..file },
                symbols: Some(symbols),
                error: None,
            }
        }
        Err(error) => {
            tracing::warn!(path, category = %error.category, error = %error, "parse failed");
            ExtractionResult::failed(file, error)
        }
    }
}

/// Extract every input on a bounded pool; results keep input order.
pub fn parallel_extract(inputs: &[FileInput], options: &PipelineOptions) -> Vec<ExtractionResult> {
    if inputs.is_empty() {
        return vec![];
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build();

    match pool {
        Ok(pool) => pool.install(|| {
            inputs
                .par_iter()
                .map(|input| extract_file(input, options))
                .collect()
        }),
        Err(err) => {
            tracing::warn!(error = %err, "falling back to sequential extraction");
            inputs
                .iter()
                .map(|input| extract_file(input, options))
                .collect()
        }
    }
}
