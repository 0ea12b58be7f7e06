//! Text-cleaning rules applied to every remote post before it is published.
//!
//! Rules compose left to right: removals first, then replacement pairs, then
//! link stripping. None of them can fail; a rule that matches nothing leaves
//! the text untouched.

use std::sync::LazyLock;

use regex::{NoExpand, Regex, RegexBuilder};
use serde::Deserialize;

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["'][^"']*["'][^>]*>(.*?)</a>"#).unwrap()
});
static BARE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://[^\s"']+"#).unwrap());
static IMG_SRC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<img[^>]+src\s*=\s*["']([^"']+)["']"#).unwrap());
static FIGURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<figure\b[^>]*>.*?</figure>").unwrap());
static EMPTY_P_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<p>\s*</p>").unwrap());

/// One literal search/replace rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReplacementPair {
    pub search: String,
    pub replace: String,
}

/// Ordered cleaning rules, read from the `[rules]` config table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransformRules {
    /// Case-insensitive fragments removed from titles.
    pub remove_from_title: Vec<String>,
    /// Case-insensitive fragments removed from the content HTML.
    pub remove_from_description: Vec<String>,
    /// Case-sensitive literal replacements applied to title and content.
    #[serde(rename = "replacements")]
    pub replacement_pairs: Vec<ReplacementPair>,
    /// Unwrap anchors to their text and delete remaining bare URLs.
    pub strip_all_links: bool,
}

impl TransformRules {
    /// Applies the rules to a title/content pair.
    ///
    /// ```
    /// use autosync::content::{ReplacementPair, TransformRules};
    ///
    /// let rules = TransformRules {
    ///     remove_from_title: vec!["BAD".into()],
    ///     replacement_pairs: vec![ReplacementPair { search: "BAD".into(), replace: "GOOD".into() }],
    ///     ..Default::default()
    /// };
    /// let (title, _) = rules.apply("This is BAD", "");
    /// assert_eq!(title, "This is ");
    /// ```
    pub fn apply(&self, title: &str, html: &str) -> (String, String) {
        let mut title = title.to_string();
        let mut html = html.to_string();

        for fragment in &self.remove_from_title {
            title = remove_case_insensitive(&title, fragment);
        }
        for fragment in &self.remove_from_description {
            html = remove_case_insensitive(&html, fragment);
        }

        for pair in &self.replacement_pairs {
            if pair.search.is_empty() {
                continue;
            }
            html = html.replace(&pair.search, &pair.replace);
            title = title.replace(&pair.search, &pair.replace);
        }

        if self.strip_all_links {
            html = strip_links(&html);
        }

        (title, html)
    }
}

fn remove_case_insensitive(text: &str, fragment: &str) -> String {
    if fragment.is_empty() || text.is_empty() {
        return text.to_string();
    }

    match RegexBuilder::new(&regex::escape(fragment))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.replace_all(text, NoExpand("")).into_owned(),
        Err(e) => {
            tracing::warn!(fragment = %fragment, error = %e, "Skipping removal rule that cannot be compiled");
            text.to_string()
        }
    }
}

/// Unwraps `<a href=...>` elements to their inner markup, then deletes any
/// remaining `http(s)://` URLs.
pub fn strip_links(html: &str) -> String {
    let unwrapped = ANCHOR_RE.replace_all(html, "$1");
    BARE_URL_RE.replace_all(&unwrapped, "").into_owned()
}

/// Returns the `src` of the first `<img>` element in `html`.
pub fn first_image_src(html: &str) -> Option<String> {
    IMG_SRC_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Removes every reference to `image_url` from a post body: `<figure>` blocks
/// wrapping it, bare `<img>` tags pointing at it, and the empty paragraphs
/// left behind.
pub fn strip_image_reference(html: &str, image_url: &str) -> String {
    if image_url.is_empty() {
        return html.to_string();
    }

    let escaped = regex::escape(image_url);
    let img_pattern = format!(r#"(?is)<img[^>]*src\s*=\s*["']{escaped}["'][^>]*>"#);
    let img_re = match Regex::new(&img_pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!(image_url = %image_url, error = %e, "Cannot build image pattern");
            return html.to_string();
        }
    };

    let without_figures = FIGURE_RE.replace_all(html, |caps: &regex::Captures<'_>| {
        let block = &caps[0];
        if img_re.is_match(block) {
            String::new()
        } else {
            block.to_string()
        }
    });
    let without_images = img_re.replace_all(&without_figures, "");
    EMPTY_P_RE.replace_all(&without_images, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn pair(search: &str, replace: &str) -> ReplacementPair {
        ReplacementPair {
            search: search.into(),
            replace: replace.into(),
        }
    }

    #[test]
    fn test_remove_runs_before_replace() {
        let rules = TransformRules {
            remove_from_title: vec!["BAD".into()],
            replacement_pairs: vec![pair("BAD", "GOOD")],
            ..Default::default()
        };
        let (title, _) = rules.apply("This is BAD", "");
        assert_eq!(title, "This is ");
    }

    #[test]
    fn test_removal_is_case_insensitive_and_global() {
        let rules = TransformRules {
            remove_from_title: vec!["[sponsored]".into()],
            remove_from_description: vec!["Read More".into()],
            ..Default::default()
        };
        let (title, html) = rules.apply(
            "[SPONSORED] Deal [Sponsored]",
            "<p>a</p>read more<p>b</p>READ MORE",
        );
        assert_eq!(title, " Deal ");
        assert_eq!(html, "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_removal_rules_apply_in_listed_order() {
        let rules = TransformRules {
            remove_from_title: vec!["ab".into(), "cd".into()],
            ..Default::default()
        };
        // Removing "ab" first exposes a fresh "cd".
        let (title, _) = rules.apply("cabd!", "");
        assert_eq!(title, "!");
    }

    #[test]
    fn test_replacements_are_case_sensitive_and_hit_both_fields() {
        let rules = TransformRules {
            replacement_pairs: vec![pair("Foo", "Bar"), pair("Bar", "Baz")],
            ..Default::default()
        };
        let (title, html) = rules.apply("Foo foo", "<b>Foo</b>");
        assert_eq!(title, "Baz foo");
        assert_eq!(html, "<b>Baz</b>");
    }

    #[test]
    fn test_empty_rules_are_no_ops() {
        let rules = TransformRules {
            remove_from_title: vec![String::new()],
            remove_from_description: vec![String::new()],
            replacement_pairs: vec![pair("", "x")],
            strip_all_links: false,
        };
        let (title, html) = rules.apply("Title", "<p>Body</p>");
        assert_eq!(title, "Title");
        assert_eq!(html, "<p>Body</p>");
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let rules = TransformRules {
            remove_from_title: vec!["(1+1)".into()],
            replacement_pairs: vec![pair("$1", "one")],
            ..Default::default()
        };
        let (title, _) = rules.apply("math (1+1) costs $1", "");
        assert_eq!(title, "math  costs one");
    }

    #[test]
    fn test_strip_all_links() {
        let rules = TransformRules {
            strip_all_links: true,
            ..Default::default()
        };
        let (_, html) = rules.apply("", r#"<a href="http://x.com">click</a> visit http://y.com"#);
        assert_eq!(html, "click visit ");
    }

    #[test]
    fn test_strip_links_keeps_inner_markup_and_anchors_without_href() {
        let html = r#"<A class="x" HREF='https://a.io/p?q=1'><em>hi</em></A> <a name="top">top</a>"#;
        assert_eq!(strip_links(html), r#"<em>hi</em> <a name="top">top</a>"#);
    }

    #[test]
    fn test_strip_links_disabled_leaves_urls() {
        let rules = TransformRules::default();
        let (_, html) = rules.apply("", "see https://example.com");
        assert_eq!(html, "see https://example.com");
    }

    #[test]
    fn test_first_image_src() {
        let html = r#"<p>x</p><IMG class="a" src='https://cdn.io/1.png'><img src="https://cdn.io/2.png">"#;
        assert_eq!(first_image_src(html).as_deref(), Some("https://cdn.io/1.png"));
        assert_eq!(first_image_src("<p>no images</p>"), None);
    }

    #[test]
    fn test_strip_image_reference_removes_figure_img_and_empty_paragraphs() {
        let url = "https://cdn.io/a.jpg?x=1";
        let html = format!(
            r#"<figure class="keep"><img src="https://cdn.io/other.jpg"></figure><figure><img src="{url}" /><figcaption>c</figcaption></figure><p> <img src="{url}"> </p><p>text</p>"#
        );
        let out = strip_image_reference(&html, url);
        assert_eq!(
            out,
            r#"<figure class="keep"><img src="https://cdn.io/other.jpg"></figure><p>text</p>"#
        );
    }

    #[test]
    fn test_strip_image_reference_empty_url_is_noop() {
        assert_eq!(strip_image_reference("<p></p>", ""), "<p></p>");
    }

    proptest! {
        #[test]
        fn prop_default_rules_are_identity(title in ".*", html in ".*") {
            let (t, h) = TransformRules::default().apply(&title, &html);
            prop_assert_eq!(t, title);
            prop_assert_eq!(h, html);
        }

        #[test]
        fn prop_removal_never_grows_text(text in "[a-zA-Z ]{0,40}", fragment in "[a-zA-Z]{1,4}") {
            let rules = TransformRules {
                remove_from_title: vec![fragment],
                ..Default::default()
            };
            let (t, _) = rules.apply(&text, "");
            prop_assert!(t.len() <= text.len());
        }

        #[test]
        fn prop_absent_search_leaves_text_unchanged(text in "[a-z ]{0,40}") {
            let rules = TransformRules {
                replacement_pairs: vec![pair("XYZ", "abc")],
                ..Default::default()
            };
            let (t, h) = rules.apply(&text, &text);
            prop_assert_eq!(&t, &text);
            prop_assert_eq!(&h, &text);
        }
    }
}
