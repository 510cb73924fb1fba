//! Lexical minification: comment stripping and blank-line folding.
//!
//! Deliberately shallow. Nothing is renamed, reordered or re-indented; the
//! output is the input minus comments and redundant blank lines. That keeps the
//! risk of breaking a page we cannot test close to zero, while still dropping
//! the bulk of what archived themes ship as commentary.
//!
//! # Scripts
//!
//! Comment stripping in JavaScript is only safe with a scanner that knows what
//! is code and what is a literal. [`strip_script_comments`] is a single-pass
//! state machine over the states
//!
//! ```text
//! code ─┬─ ' " ──▶ string      ─ closing quote ─▶ code
//!       ├─ ` ────▶ template    ─ ${ ─▶ code (brace depth tracked) ─ } ─▶ template
//!       ├─ / ────▶ regex       ─ unescaped / outside [...] ─▶ code
//!       ├─ // ───▶ line comment (dropped, line break kept)
//!       └─ /* ───▶ block comment (dropped unless /*! ... */)
//! ```
//!
//! A `/` opens a regex only in operand position: after an operator or opening
//! bracket, at the start of input, or after a keyword that takes an expression
//! (`return`, `typeof`, ...). After an identifier, number, literal or closing
//! bracket it is division.

use crate::index::FileIndex;
use crate::markup::{Document, Flavor, MarkupError};
use crate::paths;
use rayon::prelude::*;
use regex::Regex;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum MinifyError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("unparseable markup: {0}")]
    Markup(#[from] MarkupError),
    #[error("unterminated {construct} starting at byte {offset}")]
    Unterminated {
        construct: &'static str,
        offset: usize,
    },
}

/// What kind of text a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Markup,
    Stylesheet,
    Script,
}

impl Kind {
    /// Kind of a file by extension. Already-minified `*.min.css` / `*.min.js`
    /// and everything else yield `None`.
    pub fn for_path(rel: &str) -> Option<Self> {
        let lower = paths::basename(rel).to_ascii_lowercase();
        if lower.ends_with(".min.css") || lower.ends_with(".min.js") {
            return None;
        }
        match paths::extension(&lower)?.as_str() {
            "html" | "htm" => Some(Kind::Markup),
            "css" => Some(Kind::Stylesheet),
            "js" | "mjs" => Some(Kind::Script),
            _ => None,
        }
    }
}

static BLANKISH_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]+(\r?)$").expect("valid regex"));

static LINE_BREAK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\r?\n){3,}").expect("valid regex"));

/// Keywords after which `/` starts a regex literal.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "instanceof",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "case",
    "do",
    "else",
    "yield",
    "await",
];

/// Minify `content` according to `kind`.
pub fn minify(content: &str, kind: Kind) -> Result<String, MinifyError> {
    let stripped = match kind {
        Kind::Markup => strip_markup_comments(content)?,
        Kind::Stylesheet => strip_stylesheet_comments(content)?,
        Kind::Script => strip_script_comments(content)?,
    };
    Ok(fold_blank_lines(&stripped))
}

/// Empty out whitespace-only lines, collapse runs of blank lines to one, trim.
pub fn fold_blank_lines(text: &str) -> String {
    let emptied = BLANKISH_LINE.replace_all(text, "$1");
    let folded = LINE_BREAK_RUN.replace_all(&emptied, "$1$1");
    folded.trim().to_string()
}

// ============================================================================
// Markup
// ============================================================================

/// Whether a comment body must survive: conditional comments and the closers of
/// downlevel-revealed blocks.
fn is_conditional(body: &str) -> bool {
    let body = body.trim_start();
    body.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("[if")) || body.starts_with("<![endif]")
}

/// Remove every comment except conditional ones. Comments are located by the
/// markup parser, so `<!--` inside scripts and styles is left alone.
pub fn strip_markup_comments(html: &str) -> Result<String, MinifyError> {
    let mut doc = Document::parse(html.to_string(), Flavor::Html)?;
    let removable: Vec<_> = doc
        .comments()
        .iter()
        .filter(|c| !is_conditional(doc.text(c.body.clone())))
        .map(|c| c.span.clone())
        .collect();
    for span in removable {
        doc.remove_range(span);
    }
    Ok(doc.render())
}

// ============================================================================
// Shared scanner pieces
// ============================================================================

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Append a dropped comment's replacement: nothing, or a single space when the
/// comment was the only thing separating two tokens.
fn push_gap(out: &mut String, next: Option<u8>) {
    let before = out.as_bytes().last().copied();
    let separates = |b: Option<u8>| b.is_some_and(|b| !b.is_ascii_whitespace());
    if separates(before) && separates(next) {
        out.push(' ');
    }
}

/// Scan a block comment starting at `start` (`/*`). Returns the offset past
/// `*/`.
fn block_comment_end(src: &str, start: usize) -> Result<usize, MinifyError> {
    src[start + 2..]
        .find("*/")
        .map(|p| start + 2 + p + 2)
        .ok_or(MinifyError::Unterminated {
            construct: "block comment",
            offset: start,
        })
}

/// Handle a block comment at `i`: keep `/*! ... */` verbatim, drop the rest.
fn block_comment(src: &str, i: usize, out: &mut String) -> Result<usize, MinifyError> {
    let end = block_comment_end(src, i)?;
    if src.as_bytes().get(i + 2) == Some(&b'!') {
        out.push_str(&src[i..end]);
    } else {
        push_gap(out, src.as_bytes().get(end).copied());
    }
    Ok(end)
}

/// Scan a quoted string starting at `i` (the quote). Returns the offset past the
/// closing quote. `stop_at_newline` models CSS, where a raw line break ends a
/// string.
fn string_end(src: &str, i: usize, stop_at_newline: bool) -> Result<usize, MinifyError> {
    let b = src.as_bytes();
    let quote = b[i];
    let mut j = i + 1;
    while j < b.len() {
        match b[j] {
            b'\\' => j += 2,
            b'\n' if stop_at_newline => return Ok(j),
            c if c == quote => return Ok(j + 1),
            _ => j += 1,
        }
    }
    if stop_at_newline {
        Ok(b.len())
    } else {
        Err(MinifyError::Unterminated {
            construct: "string",
            offset: i,
        })
    }
}

// ============================================================================
// Stylesheets
// ============================================================================

/// Drop block comments outside strings, keeping `/*! ... */` license comments.
pub fn strip_stylesheet_comments(css: &str) -> Result<String, MinifyError> {
    let b = css.as_bytes();
    let mut out = String::with_capacity(css.len());
    let mut i = 0;
    let mut copied = 0;
    while i < b.len() {
        match b[i] {
            b'"' | b'\'' => i = string_end(css, i, true)?.min(b.len()),
            b'/' if b.get(i + 1) == Some(&b'*') => {
                out.push_str(&css[copied..i]);
                i = block_comment(css, i, &mut out)?;
                copied = i;
            }
            _ => i += 1,
        }
    }
    out.push_str(&css[copied..]);
    Ok(out)
}

// ============================================================================
// Scripts
// ============================================================================

/// What came before the current position, as far as `/` is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Prev {
    Start,
    Punct(u8),
    Word(String),
    /// A string, template or regex literal just closed.
    Literal,
}

impl Prev {
    fn regex_allowed(&self) -> bool {
        match self {
            Prev::Start => true,
            Prev::Punct(c) => b"([{,:=!+-*%&|^~?<>;".contains(c),
            Prev::Word(w) => EXPRESSION_KEYWORDS.contains(&w.as_str()),
            Prev::Literal => false,
        }
    }
}

struct ScriptScanner<'a> {
    src: &'a str,
    b: &'a [u8],
    out: String,
    i: usize,
    /// Start of the not-yet-copied run of source.
    copied: usize,
    prev: Prev,
    /// Open `${` substitutions, each with its own brace depth.
    templates: Vec<usize>,
}

/// Drop `//` and `/* */` comments from JavaScript, leaving literals intact and
/// keeping `/*! ... */` license comments.
pub fn strip_script_comments(js: &str) -> Result<String, MinifyError> {
    let mut scanner = ScriptScanner {
        src: js,
        b: js.as_bytes(),
        out: String::with_capacity(js.len()),
        i: 0,
        copied: 0,
        prev: Prev::Start,
        templates: Vec::new(),
    };
    scanner.run()?;
    Ok(scanner.out)
}

impl ScriptScanner<'_> {
    fn flush(&mut self) {
        self.out.push_str(&self.src[self.copied..self.i]);
        self.copied = self.i;
    }

    fn run(&mut self) -> Result<(), MinifyError> {
        while self.i < self.b.len() {
            let c = self.b[self.i];
            match c {
                b'\'' | b'"' => {
                    self.i = string_end(self.src, self.i, false)?;
                    self.prev = Prev::Literal;
                }
                b'`' => {
                    self.i += 1;
                    self.template()?;
                }
                b'/' if self.b.get(self.i + 1) == Some(&b'/') => {
                    self.flush();
                    let end = self.src[self.i..]
                        .find(['\n', '\r'])
                        .map_or(self.b.len(), |p| self.i + p);
                    self.i = end;
                    self.copied = end;
                }
                b'/' if self.b.get(self.i + 1) == Some(&b'*') => {
                    self.flush();
                    self.i = block_comment(self.src, self.i, &mut self.out)?;
                    self.copied = self.i;
                }
                b'/' if self.prev.regex_allowed() => {
                    self.regex();
                }
                b'}' if !self.templates.is_empty() => {
                    let depth = self.templates.last_mut().map_or(0, |d| {
                        let current = *d;
                        *d = d.saturating_sub(1);
                        current
                    });
                    self.i += 1;
                    if depth == 0 {
                        self.templates.pop();
                        self.template()?;
                    } else {
                        self.prev = Prev::Punct(c);
                    }
                }
                b'{' => {
                    if let Some(depth) = self.templates.last_mut() {
                        *depth += 1;
                    }
                    self.prev = Prev::Punct(c);
                    self.i += 1;
                }
                c if is_ident_byte(c) => {
                    let start = self.i;
                    while self.i < self.b.len() && is_ident_byte(self.b[self.i]) {
                        self.i += 1;
                    }
                    self.prev = Prev::Word(self.src[start..self.i].to_string());
                }
                c if c.is_ascii_whitespace() => self.i += 1,
                _ => {
                    self.prev = Prev::Punct(c);
                    self.i += 1;
                }
            }
        }
        if !self.templates.is_empty() {
            return Err(MinifyError::Unterminated {
                construct: "template substitution",
                offset: self.b.len(),
            });
        }
        self.flush();
        Ok(())
    }

    /// Scan template text up to the closing backtick or the next `${`.
    fn template(&mut self) -> Result<(), MinifyError> {
        let start = self.i;
        while self.i < self.b.len() {
            match self.b[self.i] {
                b'\\' => self.i += 2,
                b'`' => {
                    self.i += 1;
                    self.prev = Prev::Literal;
                    return Ok(());
                }
                b'$' if self.b.get(self.i + 1) == Some(&b'{') => {
                    self.i += 2;
                    self.templates.push(0);
                    self.prev = Prev::Punct(b'{');
                    return Ok(());
                }
                _ => self.i += 1,
            }
        }
        Err(MinifyError::Unterminated {
            construct: "template literal",
            offset: start,
        })
    }

    /// Scan a regex literal starting at `/`. A line break before the closing
    /// slash means it was not a regex after all; scanning resumes as code.
    fn regex(&mut self) {
        let start = self.i;
        let mut j = start + 1;
        let mut in_class = false;
        while j < self.b.len() {
            match self.b[j] {
                b'\\' => j += 2,
                b'[' => {
                    in_class = true;
                    j += 1;
                }
                b']' => {
                    in_class = false;
                    j += 1;
                }
                b'/' if !in_class => {
                    j += 1;
                    while j < self.b.len() && is_ident_byte(self.b[j]) {
                        j += 1;
                    }
                    self.i = j;
                    self.prev = Prev::Literal;
                    return;
                }
                b'\n' | b'\r' => break,
                _ => j += 1,
            }
        }
        self.i = start + 1;
        self.prev = Prev::Punct(b'/');
    }
}

// ============================================================================
// Tree
// ============================================================================

/// Counters for one minification pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MinifyStats {
    pub files: usize,
    pub changed: usize,
    pub bytes_saved: u64,
    /// Files left unchanged because minifying them failed.
    pub failures: usize,
}

impl MinifyStats {
    fn merge(mut self, other: MinifyStats) -> Self {
        self.files += other.files;
        self.changed += other.changed;
        self.bytes_saved += other.bytes_saved;
        self.failures += other.failures;
        self
    }
}

fn minify_file(root: &Path, rel: &str, kind: Kind) -> Result<MinifyStats, MinifyError> {
    let path = root.join(rel);
    let original = fs::read_to_string(&path)?;
    let minified = minify(&original, kind)?;

    let mut stats = MinifyStats {
        files: 1,
        ..MinifyStats::default()
    };
    if minified.is_empty() {
        debug!(file = rel, "minified to nothing, keeping original");
        return Ok(stats);
    }
    if minified != original {
        fs::write(&path, &minified)?;
        stats.changed = 1;
        stats.bytes_saved = original.len().saturating_sub(minified.len()) as u64;
    }
    Ok(stats)
}

/// Minify every page, stylesheet and script in `index`.
pub fn minify_tree(root: &Path, index: &FileIndex) -> MinifyStats {
    let targets: Vec<(&str, Kind)> = index
        .iter()
        .filter_map(|rel| Kind::for_path(rel).map(|k| (rel, k)))
        .collect();

    targets
        .par_iter()
        .map(|&(rel, kind)| {
            minify_file(root, rel, kind).unwrap_or_else(|e| {
                warn!(file = rel, error = %e, "minification failed, file left unchanged");
                MinifyStats {
                    failures: 1,
                    ..MinifyStats::default()
                }
            })
        })
        .reduce(MinifyStats::default, MinifyStats::merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{read, write_tree};
    use tempfile::TempDir;

    fn js(src: &str) -> String {
        minify(src, Kind::Script).unwrap()
    }

    // =========================================================================
    // Scripts
    // =========================================================================

    #[test]
    fn comment_markers_inside_strings_survive() {
        assert_eq!(js(r#"var a = "a // b"; // note"#), r#"var a = "a // b";"#);
        assert_eq!(js("var t = `/* not a comment */`;"), "var t = `/* not a comment */`;");
        assert_eq!(js(r"var s = 'it\'s // fine';"), r"var s = 'it\'s // fine';");
    }

    #[test]
    fn license_comment_kept_others_dropped() {
        assert_eq!(
            js("/*! keep me */\n/* drop me */\nvar x = 1;"),
            "/*! keep me */\n\nvar x = 1;"
        );
    }

    #[test]
    fn block_comment_between_tokens_leaves_a_space() {
        assert_eq!(js("return/**/x"), "return x");
        assert_eq!(js("a = 1 /* c */ + 2"), "a = 1  + 2");
    }

    #[test]
    fn regex_literals_in_operand_position() {
        assert_eq!(js(r"var r = /\/\/ not a comment/g; // c"), r"var r = /\/\/ not a comment/g;");
        assert_eq!(js(r"if (/[/*]/.test(s)) {}"), r"if (/[/*]/.test(s)) {}");
        assert_eq!(js(r"return /a\/b/.test(x) // c"), r"return /a\/b/.test(x)");
    }

    #[test]
    fn division_is_not_a_regex() {
        assert_eq!(js("var x = a / b; // half\nvar y = (c) / 2 / d;"), "var x = a / b; \nvar y = (c) / 2 / d;");
    }

    #[test]
    fn template_substitutions_are_code() {
        assert_eq!(
            js("let s = `a ${ {b: 1}.b /* x */ } c ${`nested ${d}`} // e`; // f"),
            "let s = `a ${ {b: 1}.b  } c ${`nested ${d}`} // e`;"
        );
    }

    #[test]
    fn line_comment_keeps_line_break() {
        assert_eq!(js("a(); // one\r\nb();"), "a(); \r\nb();");
    }

    #[test]
    fn unterminated_constructs_are_errors() {
        assert!(matches!(
            minify("var s = 'open", Kind::Script),
            Err(MinifyError::Unterminated { construct: "string", .. })
        ));
        assert!(matches!(
            minify("a /* open", Kind::Script),
            Err(MinifyError::Unterminated { construct: "block comment", .. })
        ));
        assert!(minify("x = `${a", Kind::Script).is_err());
    }

    // =========================================================================
    // Stylesheets
    // =========================================================================

    #[test]
    fn stylesheet_comments() {
        assert_eq!(
            minify("/*! keep me */\na { /* drop me */ color: red }\n", Kind::Stylesheet).unwrap(),
            "/*! keep me */\na {  color: red }"
        );
        assert_eq!(
            minify(r#"a::after { content: "/* not */" }"#, Kind::Stylesheet).unwrap(),
            r#"a::after { content: "/* not */" }"#
        );
        assert_eq!(
            minify("a { background: url(http://x/y.png) }", Kind::Stylesheet).unwrap(),
            "a { background: url(http://x/y.png) }"
        );
    }

    // =========================================================================
    // Markup
    // =========================================================================

    #[test]
    fn markup_keeps_conditional_comments() {
        let html = "<p>a</p><!-- drop --><!--[if lt IE 9]><script src=x.js></script><![endif]--><!-- [IF IE]>y<![endif]--><!--<![endif]-->";
        assert_eq!(
            minify(html, Kind::Markup).unwrap(),
            "<p>a</p><!--[if lt IE 9]><script src=x.js></script><![endif]--><!-- [IF IE]>y<![endif]--><!--<![endif]-->"
        );
    }

    #[test]
    fn markup_ignores_comment_markers_in_scripts() {
        let html = "<script>var s = '<!-- keep -->';</script>";
        assert_eq!(minify(html, Kind::Markup).unwrap(), html);
    }

    // =========================================================================
    // Whitespace
    // =========================================================================

    #[test]
    fn folds_blank_lines_and_trims() {
        assert_eq!(fold_blank_lines("\n\na\n  \t\n\n\n\nb\n\n"), "a\n\nb");
        assert_eq!(fold_blank_lines("a\r\n \r\n\r\n\r\nb"), "a\r\n\r\nb");
        assert_eq!(fold_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn kind_by_extension() {
        assert_eq!(Kind::for_path("a/b.HTML"), Some(Kind::Markup));
        assert_eq!(Kind::for_path("assets/css/a.css"), Some(Kind::Stylesheet));
        assert_eq!(Kind::for_path("assets/css/a.min.css"), None);
        assert_eq!(Kind::for_path("assets/js/jquery.min.js"), None);
        assert_eq!(Kind::for_path("assets/js/app.mjs"), Some(Kind::Script));
        assert_eq!(Kind::for_path("feed.xml"), None);
    }

    // =========================================================================
    // Tree
    // =========================================================================

    #[test]
    fn minify_tree_skips_min_files_and_never_empties() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("index.html", "<p>a</p>\n\n\n\n<!-- c -->\n"),
                ("assets/js/only-comment.js", "// nothing here\n"),
                ("assets/js/lib.min.js", "/* keep */ var a;"),
                ("assets/css/a.css", "a{}/* c */"),
                ("assets/js/broken.js", "var s = 'open"),
            ],
        );
        let index = FileIndex::build(tmp.path());
        let stats = minify_tree(tmp.path(), &index);

        assert_eq!(read(tmp.path(), "index.html"), "<p>a</p>");
        assert_eq!(read(tmp.path(), "assets/js/only-comment.js"), "// nothing here\n");
        assert_eq!(read(tmp.path(), "assets/js/lib.min.js"), "/* keep */ var a;");
        assert_eq!(read(tmp.path(), "assets/css/a.css"), "a{}");
        assert_eq!(read(tmp.path(), "assets/js/broken.js"), "var s = 'open");
        assert_eq!(stats.files, 3);
        assert_eq!(stats.changed, 2);
        assert_eq!(stats.failures, 1);
    }
}
