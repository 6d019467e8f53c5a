//! Markdown → Telegram legacy-Markdown converter.
//!
//! Model replies arrive as standard Markdown; Telegram's legacy
//! Markdown mode chokes on `## headings`, `- lists`, `> quotes`, and
//! fenced code blocks. Conversion keeps the basic formatting while
//! avoiding the parse errors that would force a plain-text fallback.

use regex::Regex;
use std::sync::LazyLock;

static HEADING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,4}) (.+)$").unwrap());
static BULLET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)[-*] (.*)$").unwrap());
static QUOTE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^> (.+)$").unwrap());
static BOLD_DOUBLE_ASTERISK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static CODE_BLOCK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[a-zA-Z0-9]*\n([\s\S]*?)\n```").unwrap());

/// Convert standard Markdown to Telegram-compatible format.
///
/// `# / ##` headings become `*bold*`, `### / ####` become `_italic_`,
/// `-`/`*` bullets become `•`, `> quotes` become `│`, fenced code
/// blocks collapse to inline code, and `**bold**` becomes `*bold*`.
pub fn convert_to_telegram_markdown(input: &str) -> String {
    let with_code_blocks = convert_code_blocks(input);

    let converted: Vec<String> = with_code_blocks.lines().map(convert_line).collect();

    BOLD_DOUBLE_ASTERISK
        .replace_all(&converted.join("\n"), "*$1*")
        .to_string()
}

/// Collapse fenced code blocks to inline code, joining lines with
/// semicolons. Long code loses newlines but keeps monospace formatting.
fn convert_code_blocks(input: &str) -> String {
    CODE_BLOCK_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let code = caps.get(1).map_or("", |m| m.as_str());
            let inline: String = code
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("; ");
            format!("`{inline}`")
        })
        .to_string()
}

fn convert_line(line: &str) -> String {
    if let Some(caps) = HEADING_PATTERN.captures(line) {
        let level = caps.get(1).map_or(0, |m| m.as_str().len());
        let title = caps.get(2).map_or("", |m| m.as_str());
        return if level <= 2 {
            format!("*{title}*")
        } else {
            format!("_{title}_")
        };
    }

    if let Some(caps) = QUOTE_PATTERN.captures(line) {
        let text = caps.get(1).map_or("", |m| m.as_str());
        return format!("│ {text}");
    }

    // Bullets keep their indentation; the pattern only matches at line
    // start so *bold* spans are untouched.
    if let Some(caps) = BULLET_PATTERN.captures(line) {
        let indent = caps.get(1).map_or("", |m| m.as_str());
        let item = caps.get(2).map_or("", |m| m.as_str());
        return format!("{indent}• {item}");
    }

    line.to_string()
}
