//! The rendered note and the mapping between logical offsets and node
//! locations.
//!
//! A [`RenderedDocument`] is a flat list of [`Node`]s. Its logical text is the
//! concatenation of every node's contribution: a text node its characters, a
//! math node its original delimited source (not the rendered widget), a line
//! break one `'\n'`. Offsets are counted in characters.
//!
//! Selections live in the document as [`StructuralRange`]s. Before the node
//! list is replaced, [`RenderedDocument::capture`] turns the selection into a
//! [`SelectionSnapshot`] of logical offsets, and
//! [`RenderedDocument::restore`] maps it back onto the new nodes.

use crate::typesetter::RenderedWidget;
use notetex_syntax::Segment;
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Node {
    Text(String),
    Math(MathNode),
    LineBreak,
}

impl Node {
    /// Characters this node contributes to the logical text.
    pub fn logical_len(&self) -> usize {
        match self {
            Node::Text(text) => text.chars().count(),
            Node::Math(math) => math.raw.chars().count(),
            Node::LineBreak => 1,
        }
    }

    pub fn logical_text(&self) -> &str {
        match self {
            Node::Text(text) => text,
            Node::Math(math) => &math.raw,
            Node::LineBreak => "\n",
        }
    }
}

/// A math span substituted by its rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MathNode {
    pub raw: String,
    pub content: String,
    pub display_mode: bool,
    pub rendering: MathRendering,
    /// Definitions version the rendering was produced with.
    pub definitions_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MathRendering {
    Rendered(RenderedWidget),
    /// The typesetter rejected the span. `html` shows the raw source.
    Failed { html: String, message: String },
}

impl MathRendering {
    pub fn is_failed(&self) -> bool {
        matches!(self, MathRendering::Failed { .. })
    }
}

/// A point in the node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum Location {
    /// `offset` characters into the text node at `node`.
    Text { node: usize, offset: usize },
    /// Immediately before the math or line-break node at the index.
    Before { node: usize },
    /// Immediately after the math or line-break node at the index.
    After { node: usize },
    /// End of content.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralRange {
    pub start: Location,
    pub end: Location,
}

impl StructuralRange {
    pub fn collapsed(location: Location) -> Self {
        Self {
            start: location,
            end: location,
        }
    }
}

/// A selection as logical offsets. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionSnapshot {
    pub start: usize,
    pub end: usize,
}

impl SelectionSnapshot {
    /// Builds a snapshot, swapping the bounds when given backwards.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn caret(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedDocument {
    nodes: Vec<Node>,
    selection: StructuralRange,
}

impl Default for RenderedDocument {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            selection: StructuralRange::collapsed(Location::End),
        }
    }
}

impl RenderedDocument {
    /// An unrendered document: text and line breaks only, caret at the end.
    pub fn from_plain_text(text: &str) -> Self {
        Self {
            nodes: plain_nodes(text),
            selection: StructuralRange::collapsed(Location::End),
        }
    }

    /// Builds nodes from scanned segments, rendering math with `render`.
    pub fn from_segments<F>(segments: Vec<Segment>, mut render: F) -> Self
    where
        F: FnMut(usize, String, String, bool) -> MathNode,
    {
        let mut math_index = 0;
        let nodes = segments
            .into_iter()
            .map(|segment| match segment {
                Segment::Text { value } => Node::Text(value),
                Segment::Newline => Node::LineBreak,
                Segment::Math {
                    raw,
                    content,
                    display_mode,
                } => {
                    let node = render(math_index, raw, content, display_mode);
                    math_index += 1;
                    Node::Math(node)
                }
            })
            .collect();
        Self {
            nodes,
            selection: StructuralRange::collapsed(Location::End),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn math_nodes(&self) -> impl Iterator<Item = &MathNode> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Math(math) => Some(math),
            _ => None,
        })
    }

    /// The logical text, rebuilt from the nodes.
    pub fn raw_text(&self) -> String {
        self.nodes.iter().map(Node::logical_text).collect()
    }

    pub fn logical_len(&self) -> usize {
        self.nodes.iter().map(Node::logical_len).sum()
    }

    pub fn selection(&self) -> StructuralRange {
        self.selection
    }

    pub fn set_selection(&mut self, selection: StructuralRange) {
        self.selection = selection;
    }

    /// Logical offset of `location`. Locations pointing past the node list
    /// count as the end of content.
    pub fn offset_of(&self, location: Location) -> usize {
        let prefix = |index: usize| -> usize {
            self.nodes.iter().take(index).map(Node::logical_len).sum()
        };
        match location {
            Location::Text { node, offset } => match self.nodes.get(node) {
                Some(n) => prefix(node) + offset.min(n.logical_len()),
                None => self.logical_len(),
            },
            Location::Before { node } => prefix(node.min(self.nodes.len())),
            Location::After { node } => prefix((node + 1).min(self.nodes.len())),
            Location::End => self.logical_len(),
        }
    }

    /// Resolves a logical offset to a location.
    ///
    /// Walks the nodes, stopping at the first one where the running total
    /// reaches `offset`. Inside a text node this is an intra-text offset. On a
    /// math or line-break node it is `Before` when `offset` sits on the node's
    /// leading edge and `After` otherwise. Returns `None` when `offset` is past
    /// the end of content.
    pub fn locate(&self, offset: usize) -> Option<Location> {
        let mut total = 0;
        for (index, node) in self.nodes.iter().enumerate() {
            let len = node.logical_len();
            if total + len >= offset {
                let inner = offset - total;
                return Some(match node {
                    Node::Text(_) => Location::Text {
                        node: index,
                        offset: inner,
                    },
                    _ if inner == 0 => Location::Before { node: index },
                    _ => Location::After { node: index },
                });
            }
            total += len;
        }
        (offset == total).then_some(Location::End)
    }

    /// The current selection as logical offsets.
    pub fn capture(&self) -> SelectionSnapshot {
        self.capture_range(self.selection)
    }

    pub fn capture_range(&self, range: StructuralRange) -> SelectionSnapshot {
        SelectionSnapshot::new(self.offset_of(range.start), self.offset_of(range.end))
    }

    /// Maps `snapshot` onto the current nodes. When either bound can no longer
    /// be resolved the result is a caret at the end of content.
    pub fn restore(&self, snapshot: SelectionSnapshot) -> StructuralRange {
        match (self.locate(snapshot.start), self.locate(snapshot.end)) {
            (Some(start), Some(end)) => StructuralRange { start, end },
            _ => StructuralRange::collapsed(Location::End),
        }
    }

    /// Moves the selection to the given logical offsets.
    pub fn select(&mut self, snapshot: SelectionSnapshot) {
        self.selection = self.restore(snapshot);
    }

    /// Replaces the logical text in `range` with `text` and leaves a caret
    /// after the inserted text.
    ///
    /// Math nodes that the range cuts into, or that a caret sits strictly
    /// inside, revert to their raw source as plain text. Nodes entirely outside
    /// the range keep their rendering. Returns the number of math nodes
    /// reverted.
    pub fn replace(&mut self, range: Range<usize>, text: &str) -> usize {
        let len = self.logical_len();
        let start = range.start.min(len);
        let end = range.end.clamp(start, len);

        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut head = String::new();
        let mut tail = String::new();
        let mut reverted = 0;
        let mut offset = 0;

        for node in std::mem::take(&mut self.nodes) {
            let node_start = offset;
            let node_end = offset + node.logical_len();
            offset = node_end;

            if node_start >= end || node_end <= start {
                // A caret on a node boundary leaves both neighbours intact.
                if node_end <= start {
                    before.push(node);
                } else {
                    after.push(node);
                }
            } else {
                if matches!(node, Node::Math(_)) {
                    reverted += 1;
                }
                let chars = node.logical_text().chars();
                if node_start < start {
                    head.extend(chars.clone().take(start - node_start));
                }
                if node_end > end {
                    tail.extend(chars.skip(end - node_start));
                }
            }
        }

        let middle = format!("{head}{text}{tail}");
        self.nodes = before;
        self.nodes.extend(plain_nodes(&middle));
        self.nodes.extend(after);
        self.normalize();

        let caret = start + text.chars().count();
        self.select(SelectionSnapshot::caret(caret));
        reverted
    }

    /// Replaces the current selection with `text`.
    pub fn insert_text(&mut self, text: &str) -> usize {
        let selection = self.capture();
        self.replace(selection.range(), text)
    }

    /// Merges adjacent text nodes and drops empty ones.
    fn normalize(&mut self) {
        let mut nodes: Vec<Node> = Vec::with_capacity(self.nodes.len());
        for node in std::mem::take(&mut self.nodes) {
            match (nodes.last_mut(), node) {
                (_, Node::Text(text)) if text.is_empty() => {}
                (Some(Node::Text(previous)), Node::Text(text)) => previous.push_str(&text),
                (_, node) => nodes.push(node),
            }
        }
        self.nodes = nodes;
    }
}

/// Splits `text` into text nodes and line breaks.
fn plain_nodes(text: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    for (index, line) in text.split('\n').enumerate() {
        if index > 0 {
            nodes.push(Node::LineBreak);
        }
        if !line.is_empty() {
            nodes.push(Node::Text(line.to_string()));
        }
    }
    nodes
}
