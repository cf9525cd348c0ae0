//! The built-in renderer for the markdown dialect spoken by chat backends.
//!
//! Backends answer with lightweight markup: a few heading levels, emphasis, code fences and
//! spans, links, and simple lists. The renderer is a fixed sequence of text rewrites applied
//! left-to-right over the whole message, with HTML escaping as the first rewrite so nothing the
//! backend (or a prompt-injected document) says can smuggle markup into the page. Everything
//! after the escape pass only ever inserts tags of its own making.

use std::convert::Infallible;

use once_cell::sync::Lazy;
use regex::Regex;

use super::Renderer;

static HEADING_3: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^### (.*)$").expect("valid pattern"));
static HEADING_2: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^## (.*)$").expect("valid pattern"));
static HEADING_1: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^# (.*)$").expect("valid pattern"));

static BOLD_ASTERISKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid pattern"));
static BOLD_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.*?)__").expect("valid pattern"));
static ITALIC_ASTERISK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").expect("valid pattern"));
static ITALIC_UNDERSCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_(.*?)_").expect("valid pattern"));

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```(.*?)```").expect("valid pattern"));
static CODE_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").expect("valid pattern"));

static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid pattern"));

static BULLET_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[-*]\s+(.+)$").expect("valid pattern"));
static NUMBERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d+\.\s+(.+)$").expect("valid pattern"));
static ITEM_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)(<li>.*</li>)").expect("valid pattern"));

/// Renderer for the constrained markdown dialect used in backend replies.
///
/// This is not a CommonMark implementation. The grammar is deliberately small and the rewrite
/// order is part of the contract: some combinations (nested emphasis, markers inside fences,
/// numbered lists) resolve to whatever the sequential passes produce. Rendering never fails and
/// never panics, whatever the input.
#[derive(Debug)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    /// Create a new instance of the renderer.
    pub fn new() -> MarkdownRenderer {
        MarkdownRenderer
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for MarkdownRenderer {
    type Error = Infallible;

    fn render(&self, input: &str, html: &mut String) -> Result<(), Self::Error> {
        html.push_str(&rewrite(input));

        Ok(())
    }

    fn size_hint(&self, input: &str) -> usize {
        input.len() * 3 / 2
    }
}

/// The rewrite pipeline. Stage order is load-bearing: escaping must come first, bold before
/// italic (so doubled delimiters are gone when single ones are matched), fences before inline
/// code, list items before the one-shot `<ul>` wrap, and the double-newline rewrite before the
/// single-newline one.
fn rewrite(input: &str) -> String {
    // Neutralize every ampersand and angle bracket up front. Later stages are the only source
    // of real tags in the output.
    let mut text = input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");

    // Headings, longest marker first so `###` is not consumed by the single-hash rule. Four or
    // more hashes match none of these and stay literal.
    text = HEADING_3.replace_all(&text, "<h3>$1</h3>").into_owned();
    text = HEADING_2.replace_all(&text, "<h2>$1</h2>").into_owned();
    text = HEADING_1.replace_all(&text, "<h1>$1</h1>").into_owned();

    // Doubled delimiters before single ones.
    text = BOLD_ASTERISKS
        .replace_all(&text, "<strong>$1</strong>")
        .into_owned();
    text = BOLD_UNDERSCORES
        .replace_all(&text, "<strong>$1</strong>")
        .into_owned();
    text = ITALIC_ASTERISK.replace_all(&text, "<em>$1</em>").into_owned();
    text = ITALIC_UNDERSCORE.replace_all(&text, "<em>$1</em>").into_owned();

    // Fences span newlines; their contents were already escaped above. Single backticks that
    // survive fence extraction are inline code.
    text = CODE_FENCE
        .replace_all(&text, "<pre><code>$1</code></pre>")
        .into_owned();
    text = CODE_SPAN.replace_all(&text, "<code>$1</code>").into_owned();

    text = LINK
        .replace_all(&text, "<a href=\"$2\" target=\"_blank\">$1</a>")
        .into_owned();

    // Bullet lines become items, then a single wrap around the span from the first `<li>` to
    // the last `</li>` in the text. The wrap is applied once, not per run. Numbered lines are
    // converted after the wrap and so never receive a container of their own.
    text = BULLET_ITEM.replace_all(&text, "<li>$1</li>").into_owned();
    text = ITEM_SPAN.replace(&text, "<ul>$1</ul>").into_owned();
    text = NUMBERED_ITEM.replace_all(&text, "<li>$1</li>").into_owned();

    // Paragraph boundaries first, so leftover single newlines become plain breaks.
    text = text.replace("\n\n", "</p><p>");
    text = text.replace('\n', "<br>");

    if !text.starts_with('<') {
        text = format!("<p>{}</p>", text);
    }

    text.replace("<p></p>", "")
}

#[cfg(test)]
mod tests {
    use super::MarkdownRenderer;
    use crate::render::Renderer;

    fn render(input: &str) -> String {
        let mut html = String::new();
        MarkdownRenderer::new().render(input, &mut html).unwrap();
        html
    }

    #[test]
    fn empty_input_renders_empty() {
        assert_eq!(render(""), "");
    }

    #[test]
    fn plain_text_gets_a_paragraph() {
        assert_eq!(render("hello"), "<p>hello</p>");
    }

    #[test]
    fn whitespace_only_input_is_kept() {
        assert_eq!(render("   "), "<p>   </p>");
    }

    #[test]
    fn angle_brackets_are_escaped() {
        assert_eq!(render("<script>"), "<p>&lt;script&gt;</p>");
    }

    #[test]
    fn ampersands_are_escaped_before_brackets() {
        assert_eq!(render("a & b"), "<p>a &amp; b</p>");
        // An already-escaped entity is escaped again, not passed through.
        assert_eq!(render("&lt;"), "<p>&amp;lt;</p>");
    }

    #[test]
    fn escaping_runs_before_markup_generation() {
        assert_eq!(
            render("<b>**x**</b>"),
            "<p>&lt;b&gt;<strong>x</strong>&lt;/b&gt;</p>"
        );
    }

    #[test]
    fn headings_render_by_level() {
        assert_eq!(render("# Title"), "<h1>Title</h1>");
        assert_eq!(render("## Title"), "<h2>Title</h2>");
        assert_eq!(render("### Title"), "<h3>Title</h3>");
    }

    #[test]
    fn heading_output_contains_no_hash() {
        let html = render("# Title");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(!html.contains('#'));
    }

    #[test]
    fn heading_levels_do_not_shadow_each_other() {
        assert_eq!(
            render("### deep\n## mid\n# top"),
            "<h3>deep</h3><br><h2>mid</h2><br><h1>top</h1>"
        );
    }

    #[test]
    fn four_hashes_are_not_a_heading() {
        assert_eq!(render("#### nope"), "<p>#### nope</p>");
    }

    #[test]
    fn hash_without_space_is_not_a_heading() {
        assert_eq!(render("#Title"), "<p>#Title</p>");
    }

    #[test]
    fn heading_marker_must_start_the_line() {
        assert_eq!(render("say # this"), "<p>say # this</p>");
    }

    #[test]
    fn heading_in_the_middle_of_a_message() {
        assert_eq!(
            render("intro\n# Title\noutro"),
            "<p>intro<br><h1>Title</h1><br>outro</p>"
        );
    }

    #[test]
    fn bold_with_asterisks_and_underscores() {
        assert_eq!(render("**x**"), "<strong>x</strong>");
        assert_eq!(render("__x__"), "<strong>x</strong>");
    }

    #[test]
    fn italic_with_asterisk_and_underscore() {
        assert_eq!(render("a *x* b"), "<p>a <em>x</em> b</p>");
        assert_eq!(render("a _x_ b"), "<p>a <em>x</em> b</p>");
    }

    #[test]
    fn bold_and_italic_together() {
        // Output starts with a tag, so the paragraph wrap does not apply.
        assert_eq!(
            render("**bold** and *italic*"),
            "<strong>bold</strong> and <em>italic</em>"
        );
    }

    #[test]
    fn bold_matching_is_non_greedy() {
        assert_eq!(
            render("**a** b **c**"),
            "<strong>a</strong> b <strong>c</strong>"
        );
    }

    #[test]
    fn unterminated_double_asterisk_becomes_empty_emphasis() {
        // The bold pass needs four asterisks and skips this; the italic pass then pairs the two
        // adjacent ones around an empty span.
        assert_eq!(render("**x"), "<em></em>x");
    }

    #[test]
    fn lone_asterisk_is_left_literal() {
        assert_eq!(render("lone *"), "<p>lone *</p>");
    }

    #[test]
    fn underscores_inside_identifiers_pair_up() {
        // A known casualty of the dialect: snake_case text grows emphasis.
        assert_eq!(render("snake_case_name"), "<p>snake<em>case</em>name</p>");
    }

    #[test]
    fn fenced_block_spans_lines() {
        // The later newline pass rewrites fence-internal newlines too.
        assert_eq!(
            render("```\nlet x = 1;\n```"),
            "<pre><code><br>let x = 1;<br></code></pre>"
        );
    }

    #[test]
    fn fence_contents_are_escaped() {
        assert_eq!(
            render("```\n<tag>\n```"),
            "<pre><code><br>&lt;tag&gt;<br></code></pre>"
        );
    }

    #[test]
    fn emphasis_applies_inside_fences() {
        // Emphasis passes run before fence extraction; fences do not protect their contents.
        assert_eq!(
            render("```a *b* c```"),
            "<pre><code>a <em>b</em> c</code></pre>"
        );
    }

    #[test]
    fn inline_code_span() {
        assert_eq!(render("`code`"), "<code>code</code>");
        assert_eq!(render("run `ls` now"), "<p>run <code>ls</code> now</p>");
    }

    #[test]
    fn empty_backtick_pair_is_left_literal() {
        assert_eq!(render("``"), "<p>``</p>");
    }

    #[test]
    fn link_renders_with_target_blank() {
        assert_eq!(
            render("[x](http://y)"),
            "<a href=\"http://y\" target=\"_blank\">x</a>"
        );
        assert_eq!(
            render("see [docs](http://example.com) here"),
            "<p>see <a href=\"http://example.com\" target=\"_blank\">docs</a> here</p>"
        );
    }

    #[test]
    fn link_url_keeps_escaped_ampersand() {
        assert_eq!(
            render("[q](http://e/?a=1&b=2)"),
            "<a href=\"http://e/?a=1&amp;b=2\" target=\"_blank\">q</a>"
        );
    }

    #[test]
    fn bullet_list_is_wrapped_once() {
        assert_eq!(render("- a\n- b"), "<ul><li>a</li><br><li>b</li></ul>");
        assert_eq!(render("* a\n* b"), "<ul><li>a</li><br><li>b</li></ul>");
    }

    #[test]
    fn indented_bullet_still_counts() {
        assert_eq!(render("  - a"), "<ul><li>a</li></ul>");
    }

    #[test]
    fn bullet_without_content_is_left_literal() {
        assert_eq!(render("- "), "<p>- </p>");
    }

    #[test]
    fn numbered_items_get_no_container() {
        assert_eq!(render("1. a\n2. b"), "<li>a</li><br><li>b</li>");
    }

    #[test]
    fn numbered_after_bullets_stays_outside_the_wrap() {
        assert_eq!(render("- a\n1. b"), "<ul><li>a</li></ul><br><li>b</li>");
    }

    #[test]
    fn wrap_spans_from_first_to_last_item() {
        // The single wrap is greedy across the whole text, swallowing what sits between two
        // separated runs.
        assert_eq!(
            render("- a\n\nmiddle\n- b"),
            "<ul><li>a</li></p><p>middle<br><li>b</li></ul>"
        );
    }

    #[test]
    fn double_newline_is_a_paragraph_boundary() {
        assert_eq!(render("a\n\nb"), "<p>a</p><p>b</p>");
    }

    #[test]
    fn triple_newline_leaves_one_break() {
        assert_eq!(render("a\n\n\nb"), "<p>a</p><p><br>b</p>");
    }

    #[test]
    fn single_newline_is_a_break() {
        assert_eq!(render("a\nb"), "<p>a<br>b</p>");
    }

    #[test]
    fn leading_paragraph_boundary_is_not_cleaned_up() {
        // A boundary at the very start produces a dangling close tag; only literal `<p></p>`
        // pairs are removed.
        assert_eq!(render("\n\nx"), "</p><p>x");
    }

    #[test]
    fn rendering_output_again_escapes_its_tags() {
        let once = render("**x**");
        assert_eq!(once, "<strong>x</strong>");
        assert_eq!(render(&once), "<p>&lt;strong&gt;x&lt;/strong&gt;</p>");
    }

    #[test]
    fn delimiter_soup_never_panics() {
        for input in [
            "*", "**", "***", "****", "`", "``", "```", "````", "_", "__", "___", "[", "](", ")",
            "[]()", "# ", "## ", "- ", "1. ", "\n", "\n\n", "\n\n\n", "&", "<", ">", "&<>`*_-",
        ] {
            let _ = render(input);
        }
    }

    #[test]
    fn render_appends_to_the_buffer() {
        let mut html = String::from("existing");
        MarkdownRenderer::new().render("x", &mut html).unwrap();
        assert_eq!(html, "existing<p>x</p>");
    }
}
