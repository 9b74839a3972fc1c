//! Line-oriented markdown → styled span conversion.
//!
//! Deliberately small: headings, bullets, separators, fenced code and the
//! four inline emphases models commonly emit. Anything else is plain text.

use lazy_static::lazy_static;
use regex::Regex;

const SEPARATOR_WIDTH: usize = 50;
const SEPARATOR_CHAR: &str = "─";
const BULLET: &str = "  • ";

lazy_static! {
    static ref BULLET_REGEX: Regex = Regex::new(r"^\s*-\s+").unwrap();
    static ref BOLD_ITALIC_REGEX: Regex = Regex::new(r"^\*\*\*(.+?)\*\*\*").unwrap();
    static ref BOLD_REGEX: Regex = Regex::new(r"^\*\*(.+?)\*\*").unwrap();
    static ref CODE_REGEX: Regex = Regex::new(r"^`(.+?)`").unwrap();
    static ref ITALIC_REGEX: Regex = Regex::new(r"^\*(.+?)\*").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanStyle {
    Plain,
    Heading1,
    Heading2,
    Heading3,
    Bold,
    Italic,
    BoldItalic,
    Code,
    CodeBlock,
    Separator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSpan {
    pub text: String,
    pub style: SpanStyle,
}

/// Accumulates spans, merging adjacent text of the same style.
#[derive(Default)]
struct SpanBuilder {
    spans: Vec<StyledSpan>,
}

impl SpanBuilder {
    fn push(&mut self, text: &str, style: SpanStyle) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.spans.last_mut() {
            if last.style == style {
                last.text.push_str(text);
                return;
            }
        }
        self.spans.push(StyledSpan {
            text: text.to_string(),
            style,
        });
    }

    fn finish(self) -> Vec<StyledSpan> {
        self.spans
    }
}

fn is_fence(line: &str) -> bool {
    line.trim().starts_with("```")
}

pub fn render_markdown(content: &str) -> Vec<StyledSpan> {
    let mut out = SpanBuilder::default();
    let lines: Vec<&str> = content.split('\n').collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if line.trim().starts_with("---") {
            out.push(&SEPARATOR_CHAR.repeat(SEPARATOR_WIDTH), SpanStyle::Separator);
            out.push("\n", SpanStyle::Separator);
        } else if let Some(rest) = line.strip_prefix("# ") {
            out.push(rest, SpanStyle::Heading1);
            out.push("\n", SpanStyle::Heading1);
        } else if let Some(rest) = line.strip_prefix("## ") {
            out.push(rest, SpanStyle::Heading2);
            out.push("\n", SpanStyle::Heading2);
        } else if let Some(rest) = line.strip_prefix("### ") {
            out.push(rest, SpanStyle::Heading3);
            out.push("\n", SpanStyle::Heading3);
        } else if BULLET_REGEX.is_match(line) {
            let item = BULLET_REGEX.replace(line, "");
            out.push(BULLET, SpanStyle::Plain);
            out.push(&item, SpanStyle::Plain);
            out.push("\n", SpanStyle::Plain);
        } else if is_fence(line) {
            out.push("\n", SpanStyle::Plain);
            i += 1;
            while i < lines.len() && !is_fence(lines[i]) {
                out.push(lines[i], SpanStyle::CodeBlock);
                out.push("\n", SpanStyle::CodeBlock);
                i += 1;
            }
            // i now sits on the closing fence, or past the end when unterminated
            out.push("\n", SpanStyle::Plain);
        } else {
            render_inline(line, &mut out);
            out.push("\n", SpanStyle::Plain);
        }

        i += 1;
    }

    out.finish()
}

fn render_inline(line: &str, out: &mut SpanBuilder) {
    let mut j = 0;

    while j < line.len() {
        let rest = &line[j..];

        if let Some(caps) = BOLD_ITALIC_REGEX.captures(rest) {
            out.push(&caps[1], SpanStyle::BoldItalic);
            j += caps[0].len();
            continue;
        }
        if let Some(caps) = BOLD_REGEX.captures(rest) {
            out.push(&caps[1], SpanStyle::Bold);
            j += caps[0].len();
            continue;
        }
        if rest.starts_with('`') {
            if let Some(caps) = CODE_REGEX.captures(rest) {
                out.push(&caps[1], SpanStyle::Code);
                j += caps[0].len();
                continue;
            }
        }
        if rest.starts_with('*') && !rest.starts_with("**") && rest.len() > 1 {
            if let Some(caps) = ITALIC_REGEX.captures(rest) {
                if !caps[0].contains("**") {
                    out.push(&caps[1], SpanStyle::Italic);
                    j += caps[0].len();
                    continue;
                }
            }
        }

        let ch_len = rest.chars().next().map(char::len_utf8).unwrap_or(1);
        out.push(&rest[..ch_len], SpanStyle::Plain);
        j += ch_len;
    }
}

/// Text of all spans with styling dropped.
pub fn to_plain_text(spans: &[StyledSpan]) -> String {
    spans.iter().map(|span| span.text.as_str()).collect()
}
