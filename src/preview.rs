//! Markdown preview rendering: GFM to sanitized HTML.
//!
//! The preview is a convenience view over already-produced Markdown, so the
//! renderer is configured once (lazily, on first use) and must never fail:
//! comrak itself is infallible, and the highlighting adapter degrades
//! per-code-block — named language, then first-line detection, then a
//! literal escaped block.
//!
//! Sanitisation runs after rendering. Comrak is told to pass raw HTML
//! through (`render.unsafe_`) precisely so that ammonia sees everything and
//! strips what does not belong; the alternative (comrak-side escaping)
//! would double-escape legitimate inline HTML from the converter.

use comrak::adapters::SyntaxHighlighterAdapter;
use comrak::{markdown_to_html_with_plugins, Options, Plugins};
use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{self, Write};
use syntect::html::{ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

static RENDERER: Lazy<PreviewRenderer> = Lazy::new(PreviewRenderer::new);

/// Render Markdown to sanitized HTML with GFM semantics.
///
/// Never errors; the worst case for any individual code block is an escaped
/// literal rendering.
pub fn render_html(markdown: &str) -> String {
    RENDERER.render(markdown)
}

struct PreviewRenderer {
    options: Options<'static>,
    adapter: HighlightAdapter,
    sanitizer: ammonia::Builder<'static>,
}

impl PreviewRenderer {
    fn new() -> Self {
        let mut options = Options::default();
        options.extension.table = true;
        options.extension.strikethrough = true;
        options.extension.autolink = true;
        options.extension.tasklist = true;
        options.extension.footnotes = true;
        options.render.github_pre_lang = true;
        // Raw HTML flows through comrak and is stripped by ammonia below.
        options.render.r#unsafe = true;

        let adapter = HighlightAdapter {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            class_style: ClassStyle::SpacedPrefixed { prefix: "syntax-" },
        };

        let mut sanitizer = ammonia::Builder::default();
        sanitizer
            .add_tags(["span"])
            .add_tag_attributes("pre", ["class", "lang"])
            .add_tag_attributes("code", ["class"])
            .add_tag_attributes("span", ["class"])
            .add_tag_attributes("input", ["type", "checked", "disabled"])
            .add_tags(["input"]);

        Self {
            options,
            adapter,
            sanitizer,
        }
    }

    fn render(&self, markdown: &str) -> String {
        let mut plugins = Plugins::default();
        plugins.render.codefence_syntax_highlighter = Some(&self.adapter);

        let html = markdown_to_html_with_plugins(markdown, &self.options, &plugins);
        self.sanitizer.clean(&html).to_string()
    }
}

/// Syntect-backed code fence highlighter with a three-step fallback chain.
struct HighlightAdapter {
    syntax_set: SyntaxSet,
    class_style: ClassStyle,
}

impl HighlightAdapter {
    fn highlight(&self, lang: Option<&str>, code: &str) -> Result<String, syntect::Error> {
        let syntax = self
            .find_syntax(lang)
            .or_else(|| self.syntax_set.find_syntax_by_first_line(code))
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());

        // The line-wise parser requires newline-terminated input.
        let mut code = code.to_string();
        if !code.ends_with('\n') {
            code.push('\n');
        }

        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &self.syntax_set, self.class_style);
        for line in LinesWithEndings::from(&code) {
            generator.parse_html_for_line_which_includes_newline(line)?;
        }
        Ok(generator.finalize())
    }

    fn find_syntax(&self, lang: Option<&str>) -> Option<&SyntaxReference> {
        let token = lang?.trim();
        if token.is_empty() {
            return None;
        }
        let lowercase = token.to_ascii_lowercase();
        self.syntax_set
            .find_syntax_by_token(&lowercase)
            .or_else(|| self.syntax_set.find_syntax_by_extension(&lowercase))
    }
}

impl SyntaxHighlighterAdapter for HighlightAdapter {
    fn write_highlighted(
        &self,
        output: &mut dyn Write,
        lang: Option<&str>,
        code: &str,
    ) -> fmt::Result {
        match self.highlight(lang, code) {
            Ok(html) => output.write_str(&html),
            // Last resort: a literal, unhighlighted block.
            Err(_) => output.write_str(&escape_html(code)),
        }
    }

    fn write_pre_tag(
        &self,
        output: &mut dyn Write,
        attributes: HashMap<&'static str, Cow<'_, str>>,
    ) -> fmt::Result {
        write_open_tag(output, "pre", &attributes)
    }

    fn write_code_tag(
        &self,
        output: &mut dyn Write,
        attributes: HashMap<&'static str, Cow<'_, str>>,
    ) -> fmt::Result {
        write_open_tag(output, "code", &attributes)
    }
}

fn write_open_tag(
    output: &mut dyn Write,
    tag: &str,
    attributes: &HashMap<&'static str, Cow<'_, str>>,
) -> fmt::Result {
    write!(output, "<{tag}")?;
    // Deterministic attribute order keeps output stable for tests.
    let mut keys: Vec<&&'static str> = attributes.keys().collect();
    keys.sort();
    for key in keys {
        write!(output, " {key}=\"{}\"", escape_html(&attributes[key]))?;
    }
    write!(output, ">")
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
