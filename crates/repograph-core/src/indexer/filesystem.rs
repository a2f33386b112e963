//! File classification and crawl filtering helpers.

use std::path::Path;
use std::sync::LazyLock;

use regex::bytes::Regex;
use sha2::{Digest, Sha256};

use crate::models::Language;

const LANGUAGE_BY_EXTENSION: &[(&str, Language)] = &[
    (".py", Language::Python),
    (".pyi", Language::Python),
    (".java", Language::Java),
    (".ts", Language::TypeScript),
    (".mts", Language::TypeScript),
    (".cts", Language::TypeScript),
    (".tsx", Language::Tsx),
    (".js", Language::JavaScript),
    (".jsx", Language::JavaScript),
    (".mjs", Language::JavaScript),
    (".cjs", Language::JavaScript),
    (".go", Language::Go),
];

pub(crate) const DEFAULT_SENSITIVE_EXCLUDE_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*secret*",
    "*secrets*",
    "*credential*",
    "id_rsa",
    "id_dsa",
];

pub(crate) const IMPLICIT_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    ".repograph",
];

/// Bytes inspected when sniffing an extension-less file.
pub const SNIFF_BYTES: usize = 256;

static SHEBANG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#!\s*(?:/usr/bin/env\s+(?:-S\s+)?)?(?:\S*/)?(python[0-9.]*|node|nodejs)\b")
        .expect("shebang pattern is valid")
});

/// Classify a repository path into a supported language.
///
/// The extension registry wins; extension-less files fall back to the first
/// bytes of their content (`sniff`) for a shebang line. Anything else is
/// unsupported and returns `None`.
pub fn classify(path: &str, sniff: Option<&[u8]>) -> Option<Language> {
    if let Some(lang) = detect_language(path) {
        return Some(lang);
    }
    if Path::new(path).extension().is_some() {
        return None;
    }
    sniff.and_then(sniff_shebang)
}

/// Extension-only lookup.
pub fn detect_language(path: &str) -> Option<Language> {
    let path = Path::new(path);
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))?;
    LANGUAGE_BY_EXTENSION
        .iter()
        .find(|(e, _)| *e == ext.as_str())
        .map(|(_, lang)| *lang)
}

pub fn sniff_shebang(head: &[u8]) -> Option<Language> {
    let head = &head[..head.len().min(SNIFF_BYTES)];
    let caps = SHEBANG_RE.captures(head)?;
    let interpreter = caps.get(1)?.as_bytes();
    if interpreter.starts_with(b"python") {
        Some(Language::Python)
    } else {
        Some(Language::JavaScript)
    }
}

pub fn compute_content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn count_lines(data: &[u8]) -> u64 {
    if data.is_empty() {
        return 0;
    }
    let newlines = data.iter().filter(|&&b| b == b'\n').count() as u64;
    if data.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}

/// Whether a file name looks like a credential or secret that must never be
/// read during a crawl.
pub fn is_sensitive(rel_path: &str) -> bool {
    let normalized = rel_path.replace('\\', "/");
    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);
    DEFAULT_SENSITIVE_EXCLUDE_PATTERNS
        .iter()
        .any(|pattern| glob_match(&file_name.to_lowercase(), pattern))
}

pub fn is_implicitly_ignored_dir(name: &str) -> bool {
    IMPLICIT_IGNORED_DIRS.contains(&name)
}

/// Glob match supporting `*` and `?`.
fn glob_match(text: &str, pattern: &str) -> bool {
    let t_chars: Vec<char> = text.chars().collect();
    let p_chars: Vec<char> = pattern.chars().collect();
    let (tl, pl) = (t_chars.len(), p_chars.len());
    let mut dp = vec![vec![false; pl + 1]; tl + 1];
    dp[0][0] = true;
    for j in 1..=pl {
        if p_chars[j - 1] == '*' {
            dp[0][j] = dp[0][j - 1];
        }
    }
    for i in 1..=tl {
        for j in 1..=pl {
            if p_chars[j - 1] == '*' {
                dp[i][j] = dp[i][j - 1] || dp[i - 1][j];
            } else if p_chars[j - 1] == '?' || t_chars[i - 1] == p_chars[j - 1] {
                dp[i][j] = dp[i - 1][j - 1];
            }
        }
    }
    dp[tl][pl]
}
