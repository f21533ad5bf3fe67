//! Content chunker: partitions a DOM subtree's text into speakable units.
//!
//! A chunk is a maximal run of text nodes sharing one language and one
//! structural root (heading, paragraph, list item, ...). The walk is a
//! single depth-first pass; re-running it recomputes everything from
//! scratch, so content mutation is handled by discarding the old list.

use std::sync::Arc;

use once_cell::sync::Lazy;
use ego_tree::NodeId;
use scraper::{ElementRef, Selector};

use crate::config::NarrationConfig;
use crate::error::{Error, Result};
use crate::highlight::{NodePosition, TextRange, has_word};

/// Default chunk-root elements.
pub const DEFAULT_INCLUDE_SELECTOR: &str =
    "h1, h2, h3, h4, h5, h6, p, li, blockquote, q, dt, dd, figcaption";

/// Elements whose descendant text is never spoken.
pub const DEFAULT_EXCLUDE_SELECTOR: &str = "sup, sub";

static DEFAULT_INCLUDE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(DEFAULT_INCLUDE_SELECTOR).unwrap());
static DEFAULT_EXCLUDE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(DEFAULT_EXCLUDE_SELECTOR).unwrap());

/// How an element is matched: a CSS selector or an arbitrary predicate.
#[derive(Clone)]
pub enum ElementFilter {
    Selector(Selector),
    Predicate(Arc<dyn Fn(&ElementRef) -> bool + Send + Sync>),
}

impl ElementFilter {
    pub fn selector(css: &str) -> Result<Self> {
        let selector = Selector::parse(css).map_err(|_| Error::Selector(css.to_string()))?;
        Ok(ElementFilter::Selector(selector))
    }

    pub fn predicate(f: impl Fn(&ElementRef) -> bool + Send + Sync + 'static) -> Self {
        ElementFilter::Predicate(Arc::new(f))
    }

    fn matches(&self, element: &ElementRef) -> bool {
        match self {
            ElementFilter::Selector(selector) => selector.matches(element),
            ElementFilter::Predicate(predicate) => predicate(element),
        }
    }
}

#[derive(Clone)]
pub struct ChunkerOptions {
    /// Elements that open a chunk root.
    pub include: ElementFilter,
    /// Elements skipped entirely, descendants included. Exclusion wins
    /// when an element matches both filters.
    pub exclude: ElementFilter,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        ChunkerOptions {
            include: ElementFilter::Selector(DEFAULT_INCLUDE.clone()),
            exclude: ElementFilter::Selector(DEFAULT_EXCLUDE.clone()),
        }
    }
}

impl ChunkerOptions {
    pub fn from_config(config: &NarrationConfig) -> Result<Self> {
        Ok(ChunkerOptions {
            include: ElementFilter::selector(&config.include_selector)?,
            exclude: ElementFilter::selector(&config.exclude_selector)?,
        })
    }
}

/// Pause class of a chunk root, looked up when scheduling the gap between
/// two chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootClass {
    Heading,
    /// Paragraph-like blocks: paragraph, blockquote, definition term.
    Paragraph,
    Other,
}

impl RootClass {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => RootClass::Heading,
            "p" | "blockquote" | "dt" => RootClass::Paragraph,
            _ => RootClass::Other,
        }
    }
}

/// One text node's contribution to a chunk.
#[derive(Debug, Clone)]
pub struct ChunkNode {
    pub node: NodeId,
    pub text: String,
}

/// A maximal run of same-language, same-root text nodes, treated as one
/// speakable unit. Immutable once built.
#[derive(Debug, Clone)]
pub struct Chunk {
    nodes: Vec<ChunkNode>,
    language: Option<String>,
    root: NodeId,
    root_class: RootClass,
    text: String,
    char_len: usize,
}

impl Chunk {
    pub fn nodes(&self) -> &[ChunkNode] {
        &self.nodes
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_class(&self) -> RootClass {
        self.root_class
    }

    /// Concatenated text of all nodes, in document order.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length of [`Chunk::text`] in characters.
    pub fn char_len(&self) -> usize {
        self.char_len
    }

    /// Tail of the chunk text starting at a character offset; empty when
    /// the offset is at or past the end.
    pub fn text_from(&self, offset: usize) -> &str {
        match self.text.char_indices().nth(offset) {
            Some((byte, _)) => &self.text[byte..],
            None => "",
        }
    }

    /// Map an absolute character offset to the text node containing it.
    pub fn position_at(&self, offset: usize) -> Option<NodePosition> {
        let mut remaining = offset;
        for node in &self.nodes {
            let len = node.text.chars().count();
            if remaining < len {
                return Some(NodePosition {
                    node: node.node,
                    offset: remaining,
                });
            }
            remaining -= len;
        }
        None
    }

    /// Inverse of [`Chunk::position_at`]: absolute offset of a node-local
    /// position. `None` when the node is not part of this chunk.
    pub fn offset_of(&self, position: &NodePosition) -> Option<usize> {
        let mut absolute = 0;
        for node in &self.nodes {
            let len = node.text.chars().count();
            if node.node == position.node {
                return (position.offset <= len).then_some(absolute + position.offset);
            }
            absolute += len;
        }
        None
    }

    pub fn node_char_len(&self, node: NodeId) -> Option<usize> {
        self.nodes
            .iter()
            .find(|chunk_node| chunk_node.node == node)
            .map(|chunk_node| chunk_node.text.chars().count())
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.iter().any(|chunk_node| chunk_node.node == node)
    }

    /// Range covering the whole chunk, first node start to last node end.
    pub fn full_range(&self) -> Option<TextRange> {
        let first = self.nodes.first()?;
        let last = self.nodes.last()?;
        Some(TextRange {
            start: NodePosition {
                node: first.node,
                offset: 0,
            },
            end: NodePosition {
                node: last.node,
                offset: last.text.chars().count(),
            },
        })
    }
}

struct ChunkDraft {
    nodes: Vec<ChunkNode>,
    language: Option<String>,
    root: NodeId,
    root_class: RootClass,
}

impl ChunkDraft {
    fn freeze(self) -> Chunk {
        let text: String = self.nodes.iter().map(|node| node.text.as_str()).collect();
        let char_len = text.chars().count();
        Chunk {
            nodes: self.nodes,
            language: self.language,
            root: self.root,
            root_class: self.root_class,
            text,
            char_len,
        }
    }
}

/// Walk `container` and produce the ordered chunk list. Every qualifying
/// text node lands in exactly one chunk; text outside any recognized root
/// is not chunked.
pub fn chunkify(container: ElementRef<'_>, options: &ChunkerOptions) -> Vec<Chunk> {
    let mut drafts = Vec::new();
    let mut root_stack = Vec::new();
    process_element(container, options, &mut root_stack, &mut drafts);
    drafts.into_iter().map(ChunkDraft::freeze).collect()
}

fn process_element(
    element: ElementRef<'_>,
    options: &ChunkerOptions,
    root_stack: &mut Vec<(NodeId, RootClass)>,
    drafts: &mut Vec<ChunkDraft>,
) {
    let language = resolve_language(element);
    let is_root = options.include.matches(&element);
    if is_root {
        root_stack.push((
            element.id(),
            RootClass::from_tag(element.value().name()),
        ));
    }

    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            if !options.exclude.matches(&child_element) {
                process_element(child_element, options, root_stack, drafts);
            }
        } else if let Some(text) = child.value().as_text() {
            if let Some(&root) = root_stack.last() {
                push_text_node(drafts, root, child.id(), text, &language);
            }
        }
    }

    if is_root {
        root_stack.pop();
    }
}

fn push_text_node(
    drafts: &mut Vec<ChunkDraft>,
    root: (NodeId, RootClass),
    node: NodeId,
    text: &str,
    language: &Option<String>,
) {
    // Pure whitespace or punctuation runs neither get a chunk nor force a
    // boundary.
    if !has_word(text) {
        return;
    }

    let chunk_node = ChunkNode {
        node,
        text: text.to_string(),
    };
    match drafts.last_mut() {
        Some(draft) if draft.language == *language && draft.root == root.0 => {
            draft.nodes.push(chunk_node);
        }
        _ => drafts.push(ChunkDraft {
            nodes: vec![chunk_node],
            language: language.clone(),
            root: root.0,
            root_class: root.1,
        }),
    }
}

/// Nearest `lang` attribute on the element or its ancestors, lowercased.
/// `None` when no ancestor declares one; a missing language is never
/// guessed.
fn resolve_language(element: ElementRef<'_>) -> Option<String> {
    if let Some(lang) = element.value().attr("lang") {
        if !lang.is_empty() {
            return Some(lang.to_ascii_lowercase());
        }
    }
    for ancestor in element.ancestors() {
        if let Some(ancestor_element) = ElementRef::wrap(ancestor) {
            if let Some(lang) = ancestor_element.value().attr("lang") {
                if !lang.is_empty() {
                    return Some(lang.to_ascii_lowercase());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn chunks_of(html: &str) -> Vec<Chunk> {
        let document = Html::parse_fragment(html);
        chunkify(document.root_element(), &ChunkerOptions::default())
    }

    #[test]
    fn paragraphs_become_separate_chunks() {
        let chunks = chunks_of("<p>Hello world.</p><p>Second part.</p>");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text(), "Hello world.");
        assert_eq!(chunks[1].text(), "Second part.");
        assert_eq!(chunks[0].root_class(), RootClass::Paragraph);
        assert_ne!(chunks[0].root(), chunks[1].root());
        assert_eq!(chunks[0].language(), None);
    }

    #[test]
    fn inline_siblings_merge_into_one_chunk() {
        let chunks = chunks_of("<p>Text <b>bold</b> tail</p>");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), "Text bold tail");
        assert_eq!(chunks[0].nodes().len(), 3);
    }

    #[test]
    fn excluded_leaf_text_is_dropped() {
        let chunks = chunks_of("<p>Text<sup>1</sup> more</p>");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), "Text more");
    }

    #[test]
    fn exclusion_wins_over_inclusion() {
        let document = Html::parse_fragment("<p>a<sup>b</sup>c</p>");
        let options = ChunkerOptions {
            include: ElementFilter::selector("p, sup").unwrap(),
            exclude: ElementFilter::selector("sup").unwrap(),
        };
        let chunks = chunkify(document.root_element(), &options);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), "ac");
    }

    #[test]
    fn language_change_forces_boundary_inside_element() {
        let chunks = chunks_of(r#"<p>Hello <span lang="FR">bonjour</span> world</p>"#);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].language(), None);
        assert_eq!(chunks[1].language(), Some("fr"));
        assert_eq!(chunks[1].text(), "bonjour");
        assert_eq!(chunks[2].language(), None);
        // All three share the paragraph root; only the language differs.
        assert_eq!(chunks[0].root(), chunks[1].root());
    }

    #[test]
    fn innermost_root_wins() {
        let document = Html::parse_fragment("<blockquote><p>Quoted</p></blockquote>");
        let paragraph = document
            .select(&Selector::parse("p").unwrap())
            .next()
            .unwrap();
        let chunks = chunkify(document.root_element(), &ChunkerOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].root(), paragraph.id());
        assert_eq!(chunks[0].root_class(), RootClass::Paragraph);
    }

    #[test]
    fn text_outside_any_root_is_not_chunked() {
        let chunks = chunks_of("<div>loose text<p>In para</p></div>");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), "In para");
    }

    #[test]
    fn rootless_or_wordless_content_yields_no_chunks() {
        assert!(chunks_of("<p>   </p><p>?! ...</p>").is_empty());
        assert!(chunks_of("just text, no structure").is_empty());
    }

    #[test]
    fn rechunking_is_idempotent() {
        let html = r#"<h2>Title</h2><p>One <em>two</em> three.</p><ul><li>Four</li></ul>"#;
        let document = Html::parse_fragment(html);
        let options = ChunkerOptions::default();
        let first = chunkify(document.root_element(), &options);
        let second = chunkify(document.root_element(), &options);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.text(), b.text());
            assert_eq!(a.language(), b.language());
            assert_eq!(a.root(), b.root());
        }
    }

    #[test]
    fn chunks_cover_all_root_text_in_order() {
        let html = concat!(
            "<h2>Title</h2>",
            "<p>One <em>two</em> three.</p>",
            r#"<ul><li>Four</li><li lang="de">Fünf</li></ul>"#,
        );
        let chunks = chunks_of(html);
        let spoken: String = chunks.iter().map(Chunk::text).collect();
        assert_eq!(spoken, "TitleOne two three.FourFünf");

        // Adjacent chunks always differ in root or language.
        for pair in chunks.windows(2) {
            assert!(
                pair[0].root() != pair[1].root() || pair[0].language() != pair[1].language()
            );
        }
    }

    #[test]
    fn offsets_round_trip_through_node_positions() {
        let chunks = chunks_of("<p>One <em>two</em> three.</p>");
        let chunk = &chunks[0];
        for offset in 0..chunk.char_len() {
            let position = chunk.position_at(offset).expect("position");
            assert_eq!(chunk.offset_of(&position), Some(offset));
        }
        assert_eq!(chunk.position_at(chunk.char_len()), None);
    }

    #[test]
    fn predicate_filters_match_like_selectors() {
        let document = Html::parse_fragment("<p>Hello</p><nav>Skip</nav>");
        let options = ChunkerOptions {
            include: ElementFilter::predicate(|element| element.value().name() == "p"),
            exclude: ElementFilter::predicate(|_| false),
        };
        let chunks = chunkify(document.root_element(), &options);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), "Hello");
    }
}
