//! Markup parsing with span-based editing.
//!
//! Archive pages are rarely well-formed, and every byte we do not mean to touch
//! has to come out exactly as it went in: doctype, whitespace, unusual quoting,
//! unclosed `<p>` soup. So instead of building a tree and serializing it again,
//! [`Document`] records where each element, attribute and comment lives in the
//! source text and collects edits as `(byte range, replacement)` pairs.
//! [`Document::render`] splices them in; a document without edits renders to its
//! original text.
//!
//! # Parsers
//!
//! - HTML goes through `tl`, which finds elements and comments in tag soup.
//!   Its nodes borrow from the source, so their byte offsets are exact.
//! - Each start tag is then read with quick-xml (`html_attributes` for HTML),
//!   which gives the attribute keys and values as slices of the source too.
//! - `.xhtml` and `.xml` files ([`Flavor::Xml`]) are read with
//!   `quick_xml::Reader`. Positions come from `buffer_position()`, and a
//!   document the reader rejects (unclosed comment, CDATA or tag, mismatched
//!   end tag) is a [`MarkupError::Xml`].
//!
//! Raw-text elements (`script`, `style`, plus `textarea` and `title` in HTML)
//! end at the first matching close tag, and nothing inside them counts as an
//! element or comment.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;
use std::cmp::Reverse;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarkupError {
    #[error("document is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("HTML parser rejected the document")]
    Html,
    #[error("malformed XML at byte {offset}: {source}")]
    Xml {
        offset: u64,
        source: quick_xml::Error,
    },
}

/// Parsing rules for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Html,
    Xml,
}

impl Flavor {
    /// `.xhtml` and `.xml` are XML, everything else HTML.
    pub fn for_path(rel: &str) -> Self {
        match crate::paths::extension(rel).as_deref() {
            Some("xhtml" | "xml") => Flavor::Xml,
            _ => Flavor::Html,
        }
    }

    fn is_raw_text(self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        match self {
            Flavor::Html => matches!(lower.as_str(), "script" | "style" | "textarea" | "title"),
            Flavor::Xml => matches!(lower.as_str(), "script" | "style"),
        }
    }

    /// HTML names are case-insensitive, XML names are not.
    fn names_match(self, a: &str, b: &str) -> bool {
        match self {
            Flavor::Html => a.eq_ignore_ascii_case(b),
            Flavor::Xml => a == b,
        }
    }
}

// ============================================================================
// Typed element view
// ============================================================================

/// Element kinds the rewriter and scrubber care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    A,
    Area,
    Audio,
    Embed,
    Iframe,
    /// SVG `<image>`.
    Image,
    Img,
    Input,
    Link,
    Object,
    Script,
    Source,
    Style,
    Track,
    /// SVG `<use>`.
    Use,
    Video,
    Other,
}

impl Tag {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "a" => Tag::A,
            "area" => Tag::Area,
            "audio" => Tag::Audio,
            "embed" => Tag::Embed,
            "iframe" => Tag::Iframe,
            "image" => Tag::Image,
            "img" => Tag::Img,
            "input" => Tag::Input,
            "link" => Tag::Link,
            "object" => Tag::Object,
            "script" => Tag::Script,
            "source" => Tag::Source,
            "style" => Tag::Style,
            "track" => Tag::Track,
            "use" => Tag::Use,
            "video" => Tag::Video,
            _ => Tag::Other,
        }
    }
}

/// Attributes that carry URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlAttr {
    Href,
    Src,
    Srcset,
    ImageSrcset,
    Poster,
    /// `<object data>`.
    Data,
    DataSrc,
    DataOriginal,
    DataLazy,
    DataSrcset,
    XlinkHref,
}

impl UrlAttr {
    pub fn name(self) -> &'static str {
        match self {
            UrlAttr::Href => "href",
            UrlAttr::Src => "src",
            UrlAttr::Srcset => "srcset",
            UrlAttr::ImageSrcset => "imagesrcset",
            UrlAttr::Poster => "poster",
            UrlAttr::Data => "data",
            UrlAttr::DataSrc => "data-src",
            UrlAttr::DataOriginal => "data-original",
            UrlAttr::DataLazy => "data-lazy",
            UrlAttr::DataSrcset => "data-srcset",
            UrlAttr::XlinkHref => "xlink:href",
        }
    }

    /// Whether the value is a comma-separated candidate list.
    pub fn is_srcset(self) -> bool {
        matches!(
            self,
            UrlAttr::Srcset | UrlAttr::ImageSrcset | UrlAttr::DataSrcset
        )
    }
}

const LAZY_IMAGE_ATTRS: &[UrlAttr] = &[
    UrlAttr::Srcset,
    UrlAttr::DataSrc,
    UrlAttr::DataOriginal,
    UrlAttr::DataLazy,
    UrlAttr::DataSrcset,
];

/// URL-bearing attributes of an element, selected by its tag.
///
/// `href` and `src` are checked on every element; the rest only where they mean
/// something.
pub fn url_attrs(tag: Tag) -> Vec<UrlAttr> {
    let mut attrs = vec![UrlAttr::Href, UrlAttr::Src];
    match tag {
        Tag::Img => attrs.extend_from_slice(LAZY_IMAGE_ATTRS),
        Tag::Source => attrs.extend_from_slice(&[UrlAttr::Srcset, UrlAttr::DataSrc, UrlAttr::DataSrcset]),
        Tag::Link => attrs.push(UrlAttr::ImageSrcset),
        Tag::Video => attrs.push(UrlAttr::Poster),
        Tag::Object => attrs.push(UrlAttr::Data),
        Tag::Image | Tag::Use => attrs.push(UrlAttr::XlinkHref),
        _ => {}
    }
    attrs
}

// ============================================================================
// Parsed structure
// ============================================================================

#[derive(Debug, Clone)]
struct Attribute {
    /// Lowercased in HTML, as written in XML.
    name: String,
    span: Range<usize>,
    value: Option<Range<usize>>,
    quote: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    tag: Tag,
    span: Range<usize>,
    content: Option<Range<usize>>,
    attrs: Vec<Attribute>,
}

impl Element {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Whole element, from `<` of the start tag to `>` of the end tag.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }
}

/// `<!-- ... -->`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub span: Range<usize>,
    pub body: Range<usize>,
}

/// Handle to an element of one [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(usize);

#[derive(Debug, Clone)]
struct Edit {
    range: Range<usize>,
    text: String,
}

/// A parsed document plus the edits queued against it.
#[derive(Debug, Clone)]
pub struct Document {
    source: String,
    flavor: Flavor,
    elements: Vec<Element>,
    comments: Vec<Comment>,
    edits: Vec<Edit>,
}

impl Document {
    pub fn parse(source: String, flavor: Flavor) -> Result<Self, MarkupError> {
        let (elements, comments) = match flavor {
            Flavor::Html => parse_html(&source)?,
            Flavor::Xml => parse_xml(&source)?,
        };
        Ok(Self {
            source,
            flavor,
            elements,
            comments,
            edits: Vec::new(),
        })
    }

    pub fn from_bytes(bytes: Vec<u8>, flavor: Flavor) -> Result<Self, MarkupError> {
        Self::parse(String::from_utf8(bytes)?, flavor)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn text(&self, range: Range<usize>) -> &str {
        &self.source[range]
    }

    /// All element handles in document order.
    pub fn element_ids(&self) -> impl Iterator<Item = ElementId> + use<> {
        (0..self.elements.len()).map(ElementId)
    }

    pub fn element(&self, id: ElementId) -> &Element {
        &self.elements[id.0]
    }

    /// Handles of every element of one kind.
    pub fn find(&self, tag: Tag) -> Vec<ElementId> {
        self.element_ids()
            .filter(|id| self.element(*id).tag == tag)
            .collect()
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    fn find_attr(&self, id: ElementId, name: &str) -> Option<&Attribute> {
        self.elements[id.0]
            .attrs
            .iter()
            .find(|a| self.flavor.names_match(&a.name, name))
    }

    /// Entity-decoded attribute value. Valueless attributes read as `""`.
    pub fn attr(&self, id: ElementId, name: &str) -> Option<Cow<'_, str>> {
        let attr = self.find_attr(id, name)?;
        Some(match &attr.value {
            Some(range) => decode_entities(&self.source[range.clone()]),
            None => Cow::Borrowed(""),
        })
    }

    /// Replace an existing attribute's value. Missing attributes are left absent.
    pub fn set_attr(&mut self, id: ElementId, name: &str, value: &str) {
        let Some(attr) = self.find_attr(id, name) else {
            return;
        };
        let edit = match (&attr.value, attr.quote) {
            (Some(range), Some(quote)) => Edit {
                range: range.clone(),
                text: escape_attr(value, quote),
            },
            _ => {
                let name = &self.source[attr.span.start..attr.span.start + attr.name.len()];
                Edit {
                    range: attr.span.clone(),
                    text: format!("{name}=\"{}\"", escape_attr(value, b'"')),
                }
            }
        };
        self.edits.push(edit);
    }

    /// Delete an attribute along with the whitespace before it.
    pub fn remove_attr(&mut self, id: ElementId, name: &str) {
        let Some(attr) = self.find_attr(id, name) else {
            return;
        };
        let end = attr.span.end;
        let mut start = attr.span.start;
        while start > 0 && self.source.as_bytes()[start - 1].is_ascii_whitespace() {
            start -= 1;
        }
        self.remove_range(start..end);
    }

    /// Raw text content of `script`, `style` and the other raw-text elements.
    pub fn content(&self, id: ElementId) -> Option<&str> {
        self.element(id)
            .content
            .as_ref()
            .map(|r| &self.source[r.clone()])
    }

    pub fn set_content(&mut self, id: ElementId, text: String) {
        if let Some(range) = self.element(id).content.clone() {
            self.edits.push(Edit { range, text });
        }
    }

    pub fn remove_element(&mut self, id: ElementId) {
        let range = self.element(id).span();
        self.remove_range(range);
    }

    pub fn remove_range(&mut self, range: Range<usize>) {
        self.edits.push(Edit {
            range,
            text: String::new(),
        });
    }

    pub fn is_modified(&self) -> bool {
        !self.edits.is_empty()
    }

    /// Source text with every edit applied.
    ///
    /// An edit nested inside an earlier, wider edit is dropped: removing an
    /// element wins over rewriting one of its attributes.
    pub fn render(&self) -> String {
        let mut edits: Vec<&Edit> = self.edits.iter().collect();
        edits.sort_by_key(|e| (e.range.start, Reverse(e.range.end)));

        let mut out = String::with_capacity(self.source.len());
        let mut cursor = 0;
        for edit in edits {
            if edit.range.start < cursor {
                continue;
            }
            out.push_str(&self.source[cursor..edit.range.start]);
            out.push_str(&edit.text);
            cursor = edit.range.end;
        }
        out.push_str(&self.source[cursor..]);
        out
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Escape an attribute value for writing between `quote` characters.
fn escape_attr(value: &str, quote: u8) -> String {
    let escaped = quick_xml::escape::partial_escape(value);
    match quote {
        b'\'' => escaped.replace('\'', "&#39;"),
        _ => escaped.replace('"', "&quot;"),
    }
}

/// Decode the character references that matter inside attribute values.
/// Unknown named references are kept as written.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => {
                    let num = entity.strip_prefix('#')?;
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                        None => num.parse().ok()?,
                    };
                    char::from_u32(code)
                }
            }?;
            Some((ch, semi + 1))
        });
        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

// ============================================================================
// Parsing
// ============================================================================

/// Byte offset of `part` inside `source`, when `part` is a slice of it.
///
/// Both parsers hand out borrowed slices of their input, so this is how a
/// node or attribute gets its position.
fn offset_in(source: &str, part: &[u8]) -> Option<usize> {
    let at = (part.as_ptr() as usize).checked_sub(source.as_ptr() as usize)?;
    (at + part.len() <= source.len()).then_some(at)
}

/// Attribute spans of a start tag whose bytes borrow from `source`.
///
/// HTML uses quick-xml's lenient attribute mode (unquoted and valueless
/// attributes); a malformed attribute there is skipped. In XML it is an error.
fn read_attrs(
    source: &str,
    start: &BytesStart<'_>,
    flavor: Flavor,
) -> Result<Vec<Attribute>, quick_xml::Error> {
    let bytes = source.as_bytes();
    let mut iter = match flavor {
        Flavor::Html => start.html_attributes(),
        Flavor::Xml => start.attributes(),
    };
    iter.with_checks(false);

    let mut attrs = Vec::new();
    for attr in iter {
        let attr = match (attr, flavor) {
            (Ok(attr), _) => attr,
            (Err(_), Flavor::Html) => continue,
            (Err(e), Flavor::Xml) => return Err(e.into()),
        };
        let key = attr.key.as_ref();
        let Some(key_start) = offset_in(source, key) else {
            continue;
        };
        let raw_name = String::from_utf8_lossy(key);
        let mut parsed = Attribute {
            name: match flavor {
                Flavor::Html => raw_name.to_ascii_lowercase(),
                Flavor::Xml => raw_name.into_owned(),
            },
            span: key_start..key_start + key.len(),
            value: None,
            quote: None,
        };
        // A valueless attribute reads as an empty slice that is not part of the source.
        if let Some(value_start) = offset_in(source, &attr.value).filter(|&v| v > key_start) {
            let value_end = value_start + attr.value.len();
            let quote = bytes
                .get(value_start - 1)
                .copied()
                .filter(|q| matches!(q, b'"' | b'\''));
            parsed.value = Some(value_start..value_end);
            parsed.quote = quote;
            parsed.span.end = value_end + usize::from(quote.is_some());
        }
        attrs.push(parsed);
    }
    Ok(attrs)
}

fn new_element(
    source: &str,
    start: &BytesStart<'_>,
    span: Range<usize>,
    flavor: Flavor,
) -> Result<Element, quick_xml::Error> {
    let raw_name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let name = match flavor {
        Flavor::Html => raw_name.to_ascii_lowercase(),
        Flavor::Xml => raw_name,
    };
    Ok(Element {
        tag: Tag::from_name(&name),
        attrs: read_attrs(source, start, flavor)?,
        span,
        content: None,
        name,
    })
}

fn parse_xml(source: &str) -> Result<(Vec<Element>, Vec<Comment>), MarkupError> {
    let mut reader = Reader::from_str(source);
    let mut elements: Vec<Element> = Vec::new();
    let mut comments = Vec::new();
    // Open elements with the offset their content starts at.
    let mut open: Vec<(usize, usize)> = Vec::new();

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|source| MarkupError::Xml {
            offset: reader.error_position(),
            source,
        })?;
        let end = reader.buffer_position() as usize;
        let invalid = |source: quick_xml::Error| MarkupError::Xml {
            offset: start as u64,
            source,
        };
        match event {
            Event::Start(e) => {
                let element = new_element(source, &e, start..end, Flavor::Xml).map_err(invalid)?;
                open.push((elements.len(), end));
                elements.push(element);
            }
            Event::Empty(e) => {
                elements.push(new_element(source, &e, start..end, Flavor::Xml).map_err(invalid)?);
            }
            Event::End(_) => {
                if let Some((idx, content_start)) = open.pop() {
                    let element = &mut elements[idx];
                    if Flavor::Xml.is_raw_text(&element.name) {
                        element.content = Some(content_start..start);
                    }
                    element.span.end = end;
                }
            }
            Event::Comment(_) => comments.push(Comment {
                span: start..end,
                body: start + 4..end - 3,
            }),
            Event::Eof => break,
            _ => {}
        }
    }
    for (idx, _) in open {
        elements[idx].span.end = source.len();
    }
    Ok((elements, comments))
}

fn parse_html(source: &str) -> Result<(Vec<Element>, Vec<Comment>), MarkupError> {
    let dom = tl::parse(source, tl::ParserOptions::default()).map_err(|_| MarkupError::Html)?;
    let parser = dom.parser();

    let mut elements = Vec::new();
    let mut comments = Vec::new();
    for handle in dom.children() {
        collect_html(source, *handle, parser, &mut elements, &mut comments);
    }

    elements.sort_by_key(|e: &Element| e.span.start);
    elements.dedup_by_key(|e| e.span.start);
    comments.sort_by_key(|c: &Comment| c.span.start);

    // Whatever tl saw inside a script or style is text.
    let raw: Vec<Range<usize>> = elements.iter().filter_map(|e| e.content.clone()).collect();
    let in_raw_text = |at: usize| raw.iter().any(|r| r.start <= at && at < r.end);
    elements.retain(|e| !in_raw_text(e.span.start));
    comments.retain(|c| !in_raw_text(c.span.start));
    Ok((elements, comments))
}

fn collect_html(
    source: &str,
    handle: tl::NodeHandle,
    parser: &tl::Parser<'_>,
    elements: &mut Vec<Element>,
    comments: &mut Vec<Comment>,
) {
    let Some(node) = handle.get(parser) else {
        return;
    };
    match node {
        tl::Node::Tag(tag) => {
            let raw = tag.raw().as_bytes();
            if let Some(at) = offset_in(source, raw)
                && let Some(element) = html_element(source, at, at + raw.len())
            {
                elements.push(element);
            }
            for child in tag.children().top().iter() {
                collect_html(source, *child, parser, elements, comments);
            }
        }
        tl::Node::Comment(bytes) => {
            let bytes = bytes.as_bytes();
            if let Some(at) = offset_in(source, bytes) {
                comments.push(comment_around(source.as_bytes(), at..at + bytes.len()));
            }
        }
        tl::Node::Raw(_) => {}
    }
}

/// Element starting at `at`, whose extent according to tl ends at `raw_end`.
///
/// The start tag is read with quick-xml; doctypes and anything else that is
/// not a start tag yield `None`.
fn html_element(source: &str, at: usize, raw_end: usize) -> Option<Element> {
    let mut reader = Reader::from_str(&source[at..]);
    let (start, self_closing) = match reader.read_event().ok()? {
        Event::Start(e) => (e, false),
        Event::Empty(e) => (e, true),
        _ => return None,
    };
    let tag_end = at + reader.buffer_position() as usize;
    let mut element = new_element(source, &start, at..raw_end.max(tag_end), Flavor::Html).ok()?;

    if !self_closing && Flavor::Html.is_raw_text(&element.name) {
        let (close_lt, close_end) =
            find_raw_close(source.as_bytes(), tag_end, &element.name).unwrap_or((source.len(), source.len()));
        element.content = Some(tag_end..close_lt);
        element.span.end = close_end;
    }
    Some(element)
}

/// Comment span and body from the bytes tl reported, with or without the
/// `<!--`/`-->` delimiters. An unterminated comment runs to the end.
fn comment_around(bytes: &[u8], found: Range<usize>) -> Comment {
    let mut start = found.start;
    let mut end = found.end;
    if !bytes[start..].starts_with(b"<!--") && bytes[..start].ends_with(b"<!--") {
        start -= 4;
    }
    if !bytes[..end].ends_with(b"-->") && bytes[end..].starts_with(b"-->") {
        end += 3;
    }
    let body_start = (start + 4).min(end);
    let body_end = if bytes[..end].ends_with(b"-->") { end - 3 } else { end };
    Comment {
        span: start..end,
        body: body_start..body_end.max(body_start),
    }
}

/// Find `</name` (case-insensitive) followed by a delimiter, from `from`.
/// Returns the offset of `<` and the offset just past the closing `>`.
fn find_raw_close(bytes: &[u8], from: usize, name: &str) -> Option<(usize, usize)> {
    let mut pos = from;
    while let Some(found) = bytes.get(pos..)?.windows(2).position(|w| w == b"</") {
        let lt = pos + found;
        let name_end = lt + 2 + name.len();
        if name_end <= bytes.len()
            && bytes[lt + 2..name_end].eq_ignore_ascii_case(name.as_bytes())
            && bytes
                .get(name_end)
                .is_none_or(|c| c.is_ascii_whitespace() || *c == b'>' || *c == b'/')
        {
            let end = bytes[name_end..]
                .iter()
                .position(|&b| b == b'>')
                .map_or(bytes.len(), |gt| name_end + gt + 1);
            return Some((lt, end));
        }
        pos = lt + 2;
    }
    None
}
