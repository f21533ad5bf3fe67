//! Word-token extraction and offset mapping for the live highlight.
//!
//! The engine reports spoken positions as character offsets into the text
//! it was handed; the page applies highlights as (text node, node offset)
//! ranges. This module converts between the two and isolates the token
//! heuristics from the state machine.

use once_cell::sync::Lazy;
use regex::Regex;
use ego_tree::NodeId;

use crate::chunker::Chunk;

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w").unwrap());

/// A character position inside one text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePosition {
    pub node: NodeId,
    /// Character offset within the node's text.
    pub offset: usize,
}

/// A range over the content's text nodes, as applied to the live selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub start: NodePosition,
    pub end: NodePosition,
}

/// Character span of a word token within a chunk's concatenated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

/// Whether the text contains at least one word character.
pub(crate) fn has_word(text: &str) -> bool {
    RE_WORD.is_match(text)
}

/// The word token at `offset` (a character offset): the run of
/// non-whitespace starting there, trimmed of leading and trailing
/// punctuation. `None` when nothing speakable starts at the offset.
pub fn word_token_at(text: &str, offset: usize) -> Option<TokenSpan> {
    let chars: Vec<char> = text.chars().collect();
    if offset >= chars.len() {
        return None;
    }

    let mut end = offset;
    while end < chars.len() && !chars[end].is_whitespace() {
        end += 1;
    }

    let mut start = offset;
    while start < end && !is_word_char(chars[start]) {
        start += 1;
    }
    while end > start && !is_word_char(chars[end - 1]) {
        end -= 1;
    }

    if start == end {
        return None;
    }
    Some(TokenSpan { start, end })
}

/// Highlight range for the word spoken at `offset` within `chunk`. The end
/// is clamped to the text node containing the token's start, mirroring how
/// the selection is applied one node at a time.
pub fn highlight_for(chunk: &Chunk, offset: usize) -> Option<TextRange> {
    let token = word_token_at(chunk.text(), offset)?;
    let start = chunk.position_at(token.start)?;
    let node_len = chunk.node_char_len(start.node)?;
    let end_offset = (start.offset + (token.end - token.start)).min(node_len);
    Some(TextRange {
        start,
        end: NodePosition {
            node: start.node,
            offset: end_offset,
        },
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
