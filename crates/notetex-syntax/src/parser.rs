use crate::{DelimiterSpec, Segment, SyntaxElement, SyntaxKind, SyntaxNode, scanner::Scanner};
use rowan::{GreenNode, GreenNodeBuilder, TextRange, TextSize};
use std::iter::Peekable;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    pub range: TextRange,
}

pub struct Parser<'a, 'd> {
    scanner: Peekable<Scanner<'a, 'd>>,
    builder: GreenNodeBuilder<'static>,
    errors: Vec<SyntaxError>,
    current_offset: TextSize,
}

impl<'a, 'd> Parser<'a, 'd> {
    pub fn new(input: &'a str, delimiters: &'d [DelimiterSpec]) -> Self {
        Self {
            scanner: Scanner::new(input, delimiters).peekable(),
            builder: GreenNodeBuilder::new(),
            errors: Vec::new(),
            current_offset: TextSize::from(0),
        }
    }

    pub fn parse(mut self) -> ParseResult {
        self.builder.start_node(SyntaxKind::Root.into());
        while self.peek() != SyntaxKind::Eof {
            self.parse_element();
        }
        self.builder.finish_node();
        ParseResult {
            green_node: self.builder.finish(),
            errors: self.errors,
        }
    }

    fn peek(&mut self) -> SyntaxKind {
        self.scanner
            .peek()
            .map(|(k, _)| *k)
            .unwrap_or(SyntaxKind::Eof)
    }

    fn peek_text(&mut self) -> &str {
        self.scanner.peek().map(|(_, t)| *t).unwrap_or("")
    }

    fn bump(&mut self) {
        if let Some((kind, text)) = self.scanner.next() {
            self.builder.token(kind.into(), text);
            self.current_offset += TextSize::of(text);
        }
    }

    fn error(&mut self, message: String) {
        let start = self.current_offset;
        let len = TextSize::of(self.peek_text());
        let range = TextRange::at(start, len);
        self.errors.push(SyntaxError { message, range });
    }

    fn parse_element(&mut self) {
        match self.peek() {
            SyntaxKind::InlineOpen => self.parse_math(SyntaxKind::InlineMath),
            SyntaxKind::DisplayOpen => self.parse_math(SyntaxKind::DisplayMath),
            SyntaxKind::Unterminated => {
                let delimiter = self.peek_text().to_string();
                self.error(format!("Unterminated math delimiter '{delimiter}'"));
                self.bump();
            }
            SyntaxKind::Eof => {}
            _ => self.bump(),
        }
    }

    fn parse_math(&mut self, kind: SyntaxKind) {
        self.builder.start_node(kind.into());
        self.bump(); // Consume opening delimiter

        if self.peek() == SyntaxKind::MathContent {
            self.bump();
        }
        if self.peek() == SyntaxKind::MathClose {
            self.bump();
        } else {
            self.error("Expected closing math delimiter".into());
        }
        self.builder.finish_node();
    }
}

pub struct ParseResult {
    pub green_node: GreenNode,
    pub errors: Vec<SyntaxError>,
}

impl ParseResult {
    pub fn syntax(&self) -> SyntaxNode {
        SyntaxNode::new_root(self.green_node.clone())
    }

    /// Flattens the tree into [`Segment`]s, merging neighbouring literal runs.
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments = Vec::new();
        for element in self.syntax().children_with_tokens() {
            match element {
                SyntaxElement::Token(token) => match token.kind() {
                    SyntaxKind::Newline => segments.push(Segment::Newline),
                    _ => push_text(&mut segments, token.text()),
                },
                SyntaxElement::Node(node) => segments.push(math_segment(&node)),
            }
        }
        segments
    }
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text { value }) = segments.last_mut() {
        value.push_str(text);
    } else {
        segments.push(Segment::Text {
            value: text.to_string(),
        });
    }
}

fn math_segment(node: &SyntaxNode) -> Segment {
    let content = node
        .children_with_tokens()
        .filter_map(|element| element.into_token())
        .find(|token| token.kind() == SyntaxKind::MathContent)
        .map(|token| token.text().to_string())
        .unwrap_or_default();
    Segment::Math {
        raw: node.text().to_string(),
        content,
        display_mode: node.kind() == SyntaxKind::DisplayMath,
    }
}

pub fn parse(input: &str, delimiters: &[DelimiterSpec]) -> ParseResult {
    Parser::new(input, delimiters).parse()
}
