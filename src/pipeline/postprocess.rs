//! Post-processing: deterministic cleanup of raw OCR text.
//!
//! tesseract and vision models each leave their own artefacts: form feeds
//! after every page, `\r\n` line endings, trailing spaces on every line,
//! words split with a hyphen at the end of a line, and (for vision models)
//! an outer code fence despite the prompt. Each rule is a pure `&str → String`
//! pass so it can be tested in isolation.
//!
//! ## Rule Order
//!
//! Fences are stripped before line endings are normalised so the fence regex
//! sees the raw model output; invisible characters are removed before
//! trailing-whitespace trimming so a trailing form feed does not pin spaces
//! in place; de-hyphenation runs on trimmed lines so `-` is really last.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Apply all post-processing rules to raw OCR output.
///
/// Rules (applied in order):
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF / CR → LF)
/// 3. Remove invisible Unicode and form feeds
/// 4. Trim trailing whitespace per line
/// 5. Re-join words hyphenated across a line break
/// 6. Collapse 3+ consecutive blank lines down to 2
/// 7. End with exactly one newline (blank pages stay empty)
pub fn clean_text(input: &str) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = join_hyphenated_words(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Strip outer code fences ─────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:text|plaintext|markdown)?\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ──────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible characters ─────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{000C}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ───────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Re-join hyphenated words ────────────────────────────────────────
//
// `infor-\nmation is` becomes `information\nis`: the continuation (with any
// trailing punctuation) moves up to the previous line and the rest of the next
// line keeps its own line. The line count never grows. Only a lowercase
// continuation is joined, so `Jean-\nPierre` and list dashes survive.

static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L})-\n(\p{Ll}\S*)(?:[ \t]+|\n)?").unwrap());

fn join_hyphenated_words(input: &str) -> String {
    RE_HYPHEN_BREAK
        .replace_all(input, |caps: &Captures<'_>| {
            let at_end = caps.get(0).is_some_and(|m| m.end() == input.len());
            let newline = if at_end { "" } else { "\n" };
            format!("{}{}{}", &caps[1], &caps[2], newline)
        })
        .to_string()
}

// ── Rule 6: Collapse excessive blank lines ──────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 7: Final newline ───────────────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_code_fences("```text\nHello\nWorld\n```"), "Hello\nWorld");
        assert_eq!(strip_code_fences("```\nHello\n```"), "Hello");
        assert_eq!(strip_code_fences("Hello\nWorld"), "Hello\nWorld");
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_remove_invisible_and_form_feed() {
        assert_eq!(remove_invisible_chars("page\u{000C}"), "page");
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{FEFF}c"), "abc");
    }

    #[test]
    fn test_trim_trailing_whitespace() {
        assert_eq!(trim_trailing_whitespace("  hello   \nworld \t"), "  hello\nworld");
    }

    #[test]
    fn test_join_hyphenated_words() {
        assert_eq!(
            join_hyphenated_words("This is infor-\nmation on the\nnext line"),
            "This is information\non the\nnext line"
        );
    }

    #[test]
    fn test_join_keeps_line_count() {
        assert_eq!(
            join_hyphenated_words("infor-\nmation\nnext line"),
            "information\nnext line"
        );
        assert_eq!(join_hyphenated_words("infor-\nmation"), "information");
        assert_eq!(
            join_hyphenated_words("infor-\nmation, next"),
            "information,\nnext"
        );
        assert_eq!(clean_text("infor-\nmation\nnext line"), "information\nnext line\n");
    }

    #[test]
    fn test_hyphen_before_capital_is_kept() {
        let input = "Jean-\nPierre";
        assert_eq!(join_hyphenated_words(input), input);
        let list = "items:\n- one\n- two";
        assert_eq!(join_hyphenated_words(list), list);
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\n\nb"), "a\n\n\nb");
    }

    #[test]
    fn test_ensure_final_newline() {
        assert_eq!(ensure_final_newline("hello"), "hello\n");
        assert_eq!(ensure_final_newline("hello\n\n\n"), "hello\n");
        assert_eq!(ensure_final_newline("  \n"), "");
    }

    #[test]
    fn test_clean_text_tesseract_page() {
        let raw = "INVOICE   \r\nTotal amount due for ser-\r\nvices rendered\r\n\r\n\r\n\r\n\r\nThank you\n\u{000C}";
        let cleaned = clean_text(raw);
        assert_eq!(
            cleaned,
            "INVOICE\nTotal amount due for services\nrendered\n\n\nThank you\n"
        );
    }

    #[test]
    fn test_clean_text_blank_page() {
        assert_eq!(clean_text(" \n\u{000C}"), "");
    }
}
