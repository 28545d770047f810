//! Fenced code block extraction from generator responses.

use std::sync::LazyLock;

use regex::Regex;

/// Opening fence with an optional language hint, lazy body, closing fence.
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:[\w+#.-]+[ \t]*\r?\n)?(.*?)```").expect("fence regex should be valid")
});

/// Concatenate the trimmed body of every fenced block, in order, one newline
/// apart. Blocks that are empty after trimming are skipped.
///
/// Returns an empty string when the text holds no fenced block. The result is
/// not checked for validity as code.
pub fn extract_code(markdown: &str) -> String {
    FENCE_RE
        .captures_iter(markdown)
        .filter_map(|caps| caps.get(1))
        .map(|body| body.as_str().trim())
        .filter(|body| !body.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
