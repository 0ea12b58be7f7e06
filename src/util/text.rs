use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// Strips HTML tags and decodes entities, yielding trimmed plain text.
///
/// Remote titles arrive as `title.rendered`, i.e. HTML with entities such as
/// `&#8217;`, and the target stores titles as plain text.
///
/// ```
/// use autosync::util::strip_tags;
///
/// assert_eq!(strip_tags("<em>Rust</em> &amp; friends"), "Rust & friends");
/// assert_eq!(strip_tags("It&#8217;s here"), "It\u{2019}s here");
/// ```
pub fn strip_tags(html: &str) -> String {
    let without_tags = TAG_RE.replace_all(html, "");
    html_escape::decode_html_entities(&without_tags)
        .trim()
        .to_string()
}

/// Truncates to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => Cow::Owned(s[..byte_idx].to_string()),
        None => Cow::Borrowed(s),
    }
}

/// Flattens a value onto one line: CR/LF/TAB become spaces, other control
/// characters are dropped, and the result is trimmed.
///
/// The ledger is line-oriented, so every field written to it goes through here.
pub fn single_line(s: &str) -> Cow<'_, str> {
    let needs_work = s.chars().any(char::is_control) || s.trim().len() != s.len();
    if !needs_work {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\r' | '\n' | '\t' => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    Cow::Owned(out.trim().to_string())
}

/// Builds a URL slug from free text: lowercase alphanumerics separated by
/// single dashes.
///
/// ```
/// use autosync::util::slugify;
///
/// assert_eq!(slugify("  Hello, World!  "), "hello-world");
/// assert_eq!(slugify("Rust 2024 -- edition"), "rust-2024-edition");
/// ```
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Human-readable byte size, e.g. `512 bytes`, `1.50 KB`, `2.00 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}
