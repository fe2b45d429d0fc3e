//! Environment rewriting for math content.
//!
//! Every `\begin{name}...\end{name}` block is matched against its own closing
//! tag, counting nested blocks of the same name, and replaced according to the
//! [`EnvironmentTable`]. Bodies are rewritten from the inside out, so the
//! innermost block is expanded before the block that contains it.
//!
//! An environment without arguments becomes a boxed block labelled with its
//! title. One with arguments takes that many leading `{...}` groups and
//! substitutes them into its begin and end bodies. Blocks of undeclared
//! environments (`pmatrix`, `cases`, ...) are left exactly as written and are
//! resolved by the typesetter.

use crate::definitions::{EnvironmentDefinition, EnvironmentTable, MAX_ARGUMENTS, is_environment_name};
use log::warn;
use notetex_syntax::group::balanced_group;

/// Default limit on nested environment blocks.
pub const DEFAULT_MAX_DEPTH: usize = 256;

const BEGIN: &str = r"\begin{";
const END: &str = r"\end{";

/// Rewrites environment blocks using a fixed table snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Expander<'t> {
    environments: &'t EnvironmentTable,
    max_depth: usize,
}

impl<'t> Expander<'t> {
    pub fn new(environments: &'t EnvironmentTable) -> Self {
        Self {
            environments,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Blocks nested deeper than `max_depth` are left as written.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn expand(&self, latex: &str) -> String {
        self.transform(latex, 0)
    }

    fn transform(&self, latex: &str, depth: usize) -> String {
        let mut output = String::with_capacity(latex.len());
        let mut position = 0;

        while let Some(begin) = find_begin(latex, position) {
            output.push_str(&latex[position..begin.start]);

            let Some(end) = find_matching_end(latex, begin.body_start, begin.name) else {
                // No closing tag: keep the opening tag literally and move on.
                output.push_str(&latex[begin.start..begin.body_start]);
                position = begin.body_start;
                continue;
            };

            let block = &latex[begin.start..end.end];
            let body = &latex[begin.body_start..end.start];
            match self.environments.get(begin.name) {
                None => output.push_str(block),
                Some(_) if depth >= self.max_depth => {
                    warn!(
                        "environment nesting exceeds {} levels; leaving '{}' unexpanded",
                        self.max_depth, begin.name
                    );
                    output.push_str(block);
                }
                Some(definition) => {
                    output.push_str(&self.render(begin.name, definition, body, depth));
                }
            }
            position = end.end;
        }

        output.push_str(&latex[position..]);
        output
    }

    fn render(&self, name: &str, definition: &EnvironmentDefinition, body: &str, depth: usize) -> String {
        if definition.arg_count == 0 {
            let label = definition.label(name);
            let inner = self.transform(body.trim(), depth + 1);
            return format!(
                r"\boxed{{\textbf{{{label}.}}\quad {}{inner}{}}}",
                definition.begin_body, definition.end_body
            );
        }

        let (args, remainder) = take_arguments(body, definition);
        let begin = substitute(&definition.begin_body, &args);
        let end = substitute(&definition.end_body, &args);
        let inner = self.transform(remainder, depth + 1);
        format!("{begin}{inner}{end}")
    }
}

/// Rewrites every environment block in `latex` with the default depth limit.
pub fn expand_environments(latex: &str, environments: &EnvironmentTable) -> String {
    Expander::new(environments).expand(latex)
}

struct BeginTag<'a> {
    start: usize,
    name: &'a str,
    body_start: usize,
}

struct EndTag {
    start: usize,
    end: usize,
}

/// Next well-formed `\begin{name}` at or after `from`.
fn find_begin(latex: &str, from: usize) -> Option<BeginTag<'_>> {
    let mut position = from;
    while let Some(relative) = latex[position..].find(BEGIN) {
        let start = position + relative;
        let name_start = start + BEGIN.len();
        if let Some(close) = latex[name_start..].find('}') {
            let name = &latex[name_start..name_start + close];
            if is_environment_name(name) {
                return Some(BeginTag {
                    start,
                    name,
                    body_start: name_start + close + 1,
                });
            }
        }
        position = name_start;
    }
    None
}

/// Finds the `\end{name}` closing a block whose body starts at `from`,
/// skipping over nested blocks with the same name.
fn find_matching_end(latex: &str, from: usize, name: &str) -> Option<EndTag> {
    let open = format!(r"{BEGIN}{name}}}");
    let close = format!(r"{END}{name}}}");
    let mut depth = 1usize;
    let mut position = from;

    loop {
        let next_close = latex[position..].find(&close)? + position;
        match latex[position..].find(&open).map(|i| i + position) {
            Some(next_open) if next_open < next_close => {
                depth += 1;
                position = next_open + open.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(EndTag {
                        start: next_close,
                        end: next_close + close.len(),
                    });
                }
                position = next_close + close.len();
            }
        }
    }
}

/// Takes up to `arg_count` leading brace groups from `body`. Stops at the
/// first position that does not open a complete group.
fn take_arguments<'b>(body: &'b str, definition: &EnvironmentDefinition) -> (Vec<&'b str>, &'b str) {
    let mut args = Vec::new();
    let mut remainder = body;
    for _ in 0..definition.arg_count.min(MAX_ARGUMENTS) {
        let trimmed = remainder.trim_start();
        let Some(group) = balanced_group(trimmed) else {
            break;
        };
        args.push(group.content);
        remainder = &trimmed[group.len..];
    }
    (args, remainder)
}

/// Replaces `#1`..`#9` in `template` with the matching argument. Placeholders
/// without an argument are kept.
fn substitute(template: &str, args: &[&str]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c == '#' {
            if let Some(&(_, digit)) = chars.peek() {
                let index = digit.to_digit(10).filter(|d| *d >= 1).map(|d| d as usize - 1);
                if let Some(arg) = index.and_then(|i| args.get(i)) {
                    output.push_str(arg);
                    chars.next();
                    continue;
                }
            }
        }
        output.push(c);
    }
    output
}
