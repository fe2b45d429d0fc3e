//! # NoteTeX Syntax
//!
//! Splits editable note text into literal text and math spans.
//!
//! ## Overview
//!
//! The [`scanner`] walks raw text left to right and finds math spans opened and
//! closed by configurable delimiter pairs (`$$`, `\[`, `\(`, `$` by default). A
//! delimiter preceded by an odd run of backslashes is escaped, so `\$` stays a
//! literal dollar sign while `\\$` still opens math.
//!
//! The [`parser`] turns the scanner's token stream into a lossless `rowan` tree.
//! The tree's text is always the input text, byte for byte, and the flat
//! [`Segment`] list is derived from it.
//!
//! ## Examples
//!
//! ```
//! use notetex_syntax::{scan, DelimiterSpec, Segment};
//!
//! let segments = scan(r"area $\pi r^2$", &DelimiterSpec::defaults());
//! assert_eq!(segments[0], Segment::Text { value: "area ".into() });
//! assert!(matches!(&segments[1], Segment::Math { content, .. } if content == r"\pi r^2"));
//! ```

pub mod group;
pub mod parser;
pub mod scanner;

pub use parser::{ParseResult, SyntaxError, parse};
pub use rowan::{TextRange, TextSize};
pub use scanner::{DelimiterSpec, Scanner, is_escaped};

use rowan::Language;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum SyntaxKind {
    // Tokens
    Text = 0,
    Newline,
    InlineOpen,   // $ or \(
    DisplayOpen,  // $$ or \[
    MathContent,  // inner LaTeX
    MathClose,    // matching right delimiter
    Unterminated, // opening delimiter without a closing partner

    // Composite Nodes
    Root,
    InlineMath,
    DisplayMath,

    // Technical
    Eof,
}

impl From<SyntaxKind> for rowan::SyntaxKind {
    fn from(kind: SyntaxKind) -> Self {
        Self(kind as u16)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NoteTexLanguage {}

impl Language for NoteTexLanguage {
    type Kind = SyntaxKind;

    fn kind_from_raw(raw: rowan::SyntaxKind) -> Self::Kind {
        assert!(raw.0 <= SyntaxKind::Eof as u16);
        unsafe { std::mem::transmute::<u16, SyntaxKind>(raw.0) }
    }

    fn kind_to_raw(kind: Self::Kind) -> rowan::SyntaxKind {
        kind.into()
    }
}

pub type SyntaxNode = rowan::SyntaxNode<NoteTexLanguage>;
pub type SyntaxToken = rowan::SyntaxToken<NoteTexLanguage>;
pub type SyntaxElement = rowan::SyntaxElement<NoteTexLanguage>;

/// One piece of a note, in document order.
///
/// Concatenating [`Segment::logical_text`] over a segment list reproduces the
/// scanned text exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Segment {
    /// Literal text. Never contains a line feed.
    Text { value: String },
    /// A matched math span.
    Math {
        /// The delimited source, e.g. `$x^2$`.
        raw: String,
        /// The LaTeX between the delimiters.
        content: String,
        display_mode: bool,
    },
    /// A single `'\n'`.
    Newline,
}

impl Segment {
    /// The text this segment contributes to the logical document.
    pub fn logical_text(&self) -> &str {
        match self {
            Segment::Text { value } => value,
            Segment::Math { raw, .. } => raw,
            Segment::Newline => "\n",
        }
    }

    /// Logical length in characters.
    pub fn logical_len(&self) -> usize {
        match self {
            Segment::Newline => 1,
            other => other.logical_text().chars().count(),
        }
    }

    pub fn is_math(&self) -> bool {
        matches!(self, Segment::Math { .. })
    }
}

/// Scans `input` into segments using the given delimiter precedence.
pub fn scan(input: &str, delimiters: &[DelimiterSpec]) -> Vec<Segment> {
    parse(input, delimiters).segments()
}

/// Joins the logical text of `segments` back into one string.
pub fn concat(segments: &[Segment]) -> String {
    segments.iter().map(Segment::logical_text).collect()
}
