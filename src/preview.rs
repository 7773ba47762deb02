use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use regex::RegexBuilder;
use serde::Serialize;

pub const DIFF_CHAR_LIMIT: usize = 2_000;
pub const DIFF_TRUNCATION_MARK: &str = "...diff truncated...";

/// Result of evaluating one rule against an excerpt. Purely advisory;
/// nothing here touches persisted files. Compile errors and timeouts land
/// in `error` instead of failing the call.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewOutcome {
    pub source_excerpt: String,
    pub preview_excerpt: String,
    pub diff: String,
    pub match_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PreviewOutcome {
    fn unchanged(text: &str, error: Option<String>) -> Self {
        Self {
            source_excerpt: text.to_string(),
            preview_excerpt: text.to_string(),
            diff: String::new(),
            match_count: 0,
            error,
        }
    }
}

/// Apply `pattern` → `replacement` to `text` under a hard wall-clock
/// budget. The substitution runs on a throwaway thread; if it misses the
/// budget the thread is abandoned and the caller gets a timeout error.
pub fn preview(text: &str, pattern: &str, replacement: &str, budget: Duration) -> PreviewOutcome {
    if pattern.is_empty() {
        return PreviewOutcome::unchanged(text, None);
    }

    let (tx, rx) = mpsc::channel::<Result<(String, usize), String>>();
    let thread_text = text.to_string();
    let thread_pattern = pattern.to_string();
    let thread_replacement = replacement.to_string();
    thread::spawn(move || {
        let compiled = RegexBuilder::new(&thread_pattern)
            .case_insensitive(true)
            .build();
        let result = match compiled {
            Ok(re) => {
                let count = re.find_iter(&thread_text).count();
                let replaced = re
                    .replace_all(&thread_text, thread_replacement.as_str())
                    .into_owned();
                Ok((replaced, count))
            }
            Err(err) => Err(format!("invalid pattern: {err}")),
        };
        let _ = tx.send(result);
    });

    match rx.recv_timeout(budget) {
        Ok(Ok((replaced, count))) => {
            let diff = line_diff(text, &replaced);
            PreviewOutcome {
                source_excerpt: text.to_string(),
                preview_excerpt: replaced,
                diff,
                match_count: count,
                error: None,
            }
        }
        Ok(Err(message)) => PreviewOutcome::unchanged(text, Some(message)),
        Err(_) => PreviewOutcome::unchanged(
            text,
            Some(format!("preview timed out after {}ms", budget.as_millis())),
        ),
    }
}

/// Compact line-level diff: changed line pairs as `- old` / `+ new`,
/// bounded overall size. No diff crate in the stack; the excerpts are
/// small enough that positional comparison reads fine.
fn line_diff(source: &str, preview: &str) -> String {
    let source_lines: Vec<&str> = source.lines().collect();
    let preview_lines: Vec<&str> = preview.lines().collect();
    let max = source_lines.len().max(preview_lines.len());
    let mut out = String::new();
    for index in 0..max {
        let old = source_lines.get(index).copied();
        let new = preview_lines.get(index).copied();
        if old == new {
            continue;
        }
        if let Some(old) = old {
            out.push_str("- ");
            out.push_str(old);
            out.push('\n');
        }
        if let Some(new) = new {
            out.push_str("+ ");
            out.push_str(new);
            out.push('\n');
        }
        if out.len() > DIFF_CHAR_LIMIT {
            out.truncate(DIFF_CHAR_LIMIT);
            out.push('\n');
            out.push_str(DIFF_TRUNCATION_MARK);
            break;
        }
    }
    out
}
