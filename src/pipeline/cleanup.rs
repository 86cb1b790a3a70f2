//! Deterministic cleanup of raw model output before it is parsed.
//!
//! Vision models occasionally wrap the whole reply in a ```` ``` ```` fence
//! despite the prompt, answer with `\r\n` line endings, or leak zero-width
//! characters copied from the page. None of that is content, and all of it
//! gets in the way of tag extraction and paragraph splitting.
//!
//! Rules run in this order: strip fences, normalise line endings, drop
//! invisible characters, trim trailing whitespace, collapse blank lines.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to a model reply.
pub fn clean_response(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s).trim().to_string()
}

/// Split text into paragraphs on blank lines, dropping empty ones.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    RE_PARAGRAPH_BREAK
        .split(&normalise_line_endings(text))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Rule 1: Strip an outer code fence ────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{2060}'],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fence_with_language_tag() {
        let input = "```text\n[PAGE_TYPE: content]\nbody\n```";
        assert_eq!(clean_response(input), "[PAGE_TYPE: content]\nbody");
    }

    #[test]
    fn inner_fences_survive() {
        let input = "before\n```\ncode\n```\nafter";
        assert_eq!(clean_response(input), input);
    }

    #[test]
    fn normalises_crlf_and_trailing_space() {
        assert_eq!(clean_response("a  \r\nb\t\r\n"), "a\nb");
    }

    #[test]
    fn removes_zero_width_but_keeps_hebrew_joiners() {
        // U+200D is used in some scripts; only the listed characters go.
        assert_eq!(clean_response("lo\u{200B}gos\u{FEFF}"), "logos");
        assert_eq!(clean_response("a\u{200D}b"), "a\u{200D}b");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(clean_response("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let paras = split_paragraphs("First line\ncontinued.\n\n  \nSecond.\r\n\r\nThird.\n\n");
        assert_eq!(paras, vec!["First line\ncontinued.", "Second.", "Third."]);
    }
}
