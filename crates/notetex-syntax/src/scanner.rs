use crate::SyntaxKind;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A left/right delimiter pair that encloses math.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelimiterSpec {
    pub left: String,
    pub right: String,
    pub display: bool,
}

impl DelimiterSpec {
    pub fn new(left: impl Into<String>, right: impl Into<String>, display: bool) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            display,
        }
    }

    /// The standard precedence: `$$`, `\[`, `\(`, `$`.
    pub fn defaults() -> Vec<DelimiterSpec> {
        vec![
            DelimiterSpec::new("$$", "$$", true),
            DelimiterSpec::new(r"\[", r"\]", true),
            DelimiterSpec::new(r"\(", r"\)", false),
            DelimiterSpec::new("$", "$", false),
        ]
    }
}

/// Returns `true` when the byte at `index` is preceded by an odd number of
/// consecutive backslashes.
pub fn is_escaped(text: &str, index: usize) -> bool {
    let run = text.as_bytes()[..index]
        .iter()
        .rev()
        .take_while(|&&b| b == b'\\')
        .count();
    run % 2 == 1
}

/// Finds the first unescaped occurrence of `token` at or after `from`.
pub(crate) fn find_unescaped(text: &str, from: usize, token: &str) -> Option<usize> {
    let mut from = from;
    while from <= text.len() {
        let index = from + text[from..].find(token)?;
        if !is_escaped(text, index) {
            return Some(index);
        }
        from = index + token.len();
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Opening {
    index: usize,
    delimiter: usize,
}

fn find_opening(text: &str, from: usize, delimiters: &[DelimiterSpec]) -> Option<Opening> {
    let mut closest: Option<Opening> = None;
    for (delimiter, spec) in delimiters.iter().enumerate() {
        if spec.left.is_empty() || spec.right.is_empty() {
            continue;
        }
        if let Some(index) = find_unescaped(text, from, &spec.left) {
            // Strict comparison keeps declaration order on ties.
            if closest.is_none_or(|c| index < c.index) {
                closest = Some(Opening { index, delimiter });
            }
        }
    }
    closest
}

/// A scanner that splits note text into text, line breaks and math spans.
///
/// ## Overview
///
/// The scanner yields ([`SyntaxKind`], `&str`) pairs whose texts, concatenated,
/// are exactly the input. A math span comes out as three tokens: the opening
/// delimiter ([`SyntaxKind::InlineOpen`] or [`SyntaxKind::DisplayOpen`]), the
/// content ([`SyntaxKind::MathContent`], omitted when empty) and the closing
/// delimiter ([`SyntaxKind::MathClose`]).
///
/// Text runs never span a line feed; each `'\n'` outside math is its own
/// [`SyntaxKind::Newline`] token. Math content may contain line feeds.
///
/// ## Unterminated spans
///
/// When an opening delimiter has no unescaped partner, the opening is emitted as
/// [`SyntaxKind::Unterminated`] and everything after it is literal text. No
/// further math is recognised after that point.
///
/// ## Examples
///
/// ```
/// use notetex_syntax::{DelimiterSpec, Scanner, SyntaxKind};
///
/// let delimiters = DelimiterSpec::defaults();
/// let tokens: Vec<_> = Scanner::new("a $b$", &delimiters).collect();
///
/// assert_eq!(tokens[0], (SyntaxKind::Text, "a "));
/// assert_eq!(tokens[1], (SyntaxKind::InlineOpen, "$"));
/// assert_eq!(tokens[2], (SyntaxKind::MathContent, "b"));
/// assert_eq!(tokens[3], (SyntaxKind::MathClose, "$"));
/// ```
pub struct Scanner<'a, 'd> {
    input: &'a str,
    position: usize,
    delimiters: &'d [DelimiterSpec],
    /// Tokens of a matched span not yet handed out.
    pending: VecDeque<(SyntaxKind, &'a str)>,
    /// Next opening at or after `position`; `Some(None)` once none remain.
    opening: Option<Option<Opening>>,
    /// Set after an unterminated opening; the rest is literal.
    literal: bool,
}

impl<'a, 'd> Scanner<'a, 'd> {
    pub fn new(input: &'a str, delimiters: &'d [DelimiterSpec]) -> Self {
        Self {
            input,
            position: 0,
            delimiters,
            pending: VecDeque::new(),
            opening: None,
            literal: false,
        }
    }

    /// Returns the next token (kind, text).
    /// If EOF, returns (SyntaxKind::Eof, "").
    pub fn next_token(&mut self) -> (SyntaxKind, &'a str) {
        if let Some(token) = self.pending.pop_front() {
            return token;
        }
        if self.position >= self.input.len() {
            return (SyntaxKind::Eof, "");
        }

        let start = self.position;
        let rest = &self.input[start..];
        if rest.starts_with('\n') {
            self.position += 1;
            return (SyntaxKind::Newline, &self.input[start..self.position]);
        }

        let opening = if self.literal { None } else { self.next_opening() };
        match opening {
            Some(open) if open.index == start => self.scan_math(open),
            other => {
                let limit = other.map_or(self.input.len(), |o| o.index);
                let line_end = rest.find('\n').map_or(self.input.len(), |i| start + i);
                self.position = limit.min(line_end);
                (SyntaxKind::Text, &self.input[start..self.position])
            }
        }
    }

    fn next_opening(&mut self) -> Option<Opening> {
        match self.opening {
            Some(None) => None,
            Some(Some(open)) if open.index >= self.position => Some(open),
            _ => {
                let open = find_opening(self.input, self.position, self.delimiters);
                self.opening = Some(open);
                open
            }
        }
    }

    fn scan_math(&mut self, open: Opening) -> (SyntaxKind, &'a str) {
        let spec = &self.delimiters[open.delimiter];
        let content_start = open.index + spec.left.len();
        let left = &self.input[open.index..content_start];

        let Some(close) = find_unescaped(self.input, content_start, &spec.right) else {
            self.literal = true;
            self.position = content_start;
            return (SyntaxKind::Unterminated, left);
        };

        let end = close + spec.right.len();
        if close > content_start {
            self.pending
                .push_back((SyntaxKind::MathContent, &self.input[content_start..close]));
        }
        self.pending
            .push_back((SyntaxKind::MathClose, &self.input[close..end]));
        self.position = end;

        let kind = if spec.display {
            SyntaxKind::DisplayOpen
        } else {
            SyntaxKind::InlineOpen
        };
        (kind, left)
    }
}

impl<'a> Iterator for Scanner<'a, '_> {
    type Item = (SyntaxKind, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let (kind, text) = self.next_token();
        if kind == SyntaxKind::Eof {
            None
        } else {
            Some((kind, text))
        }
    }
}
