use crate::builtins;
use log::debug;
use notetex_syntax::group::{balanced_group, bracket_group, leading_whitespace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Highest positional argument count a declaration may ask for (`#1`..`#9`).
pub const MAX_ARGUMENTS: usize = 9;

const NEWCOMMAND: &str = r"\newcommand";
const DECLARE_OPERATOR: &str = r"\DeclareMathOperator";
const NEWENVIRONMENT: &str = r"\newenvironment";

/// Why one declaration was left out of the tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("{keyword} at byte {offset}: expected a {{...}} group for the {what}")]
    MissingGroup {
        keyword: &'static str,
        offset: usize,
        what: &'static str,
    },
    #[error("{keyword} at byte {offset}: unbalanced braces in the {what}")]
    Unbalanced {
        keyword: &'static str,
        offset: usize,
        what: &'static str,
    },
    #[error("{keyword} at byte {offset}: invalid name '{name}'")]
    InvalidName {
        keyword: &'static str,
        offset: usize,
        name: String,
    },
    #[error("{keyword} at byte {offset}: invalid argument count '{value}'")]
    InvalidArgCount {
        keyword: &'static str,
        offset: usize,
        value: String,
    },
}

/// A `\newcommand` or `\DeclareMathOperator` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroDefinition {
    pub replacement: String,
    /// Declared argument count. Stored only; arguments are never substituted.
    pub arg_count: usize,
    /// Optional-argument default from `\newcommand{\x}[n][default]{...}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_arg: Option<String>,
}

impl MacroDefinition {
    pub fn new(replacement: impl Into<String>) -> Self {
        Self {
            replacement: replacement.into(),
            arg_count: 0,
            default_arg: None,
        }
    }
}

/// Command name (with its leading backslash) to replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacroTable {
    entries: BTreeMap<String, MacroDefinition>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `name`.
    pub fn insert(&mut self, name: impl Into<String>, definition: MacroDefinition) {
        self.entries.insert(name.into(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&MacroDefinition> {
        self.entries.get(name)
    }

    pub fn replacement(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|d| d.replacement.as_str())
    }

    /// `(name, replacement)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, def)| (name.as_str(), def.replacement.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A `\newenvironment` entry, or a built-in titled environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDefinition {
    pub begin_body: String,
    pub end_body: String,
    pub arg_count: usize,
    /// Display name for the boxed presentation. Only built-ins carry one;
    /// other environments are labelled by their capitalized name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl EnvironmentDefinition {
    pub fn new(begin_body: impl Into<String>, end_body: impl Into<String>, arg_count: usize) -> Self {
        Self {
            begin_body: begin_body.into(),
            end_body: end_body.into(),
            arg_count,
            title: None,
        }
    }

    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// The label shown in front of a boxed block of environment `name`.
    pub fn label(&self, name: &str) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentTable {
    entries: BTreeMap<String, EnvironmentDefinition>,
}

impl EnvironmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, definition: EnvironmentDefinition) {
        self.entries.insert(name.into(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&EnvironmentDefinition> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EnvironmentDefinition)> {
        self.entries.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The macro and environment tables in force for one render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definitions {
    pub macros: MacroTable,
    pub environments: EnvironmentTable,
}

/// Result of reading a definitions source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub definitions: Definitions,
    /// Declarations that were recognised but malformed, in source order.
    pub skipped: Vec<DefinitionError>,
}

impl Definitions {
    /// The built-in defaults with nothing declared on top.
    pub fn builtin() -> Self {
        builtins::BUILTIN_DEFINITIONS.clone()
    }

    /// Builds fresh tables: the built-ins, then every declaration in `source`
    /// in order (last write wins).
    pub fn extract(source: &str) -> Extraction {
        let mut definitions = Self::builtin();
        let skipped = definitions.declare_from(source);
        Extraction {
            definitions,
            skipped,
        }
    }

    /// Applies every declaration in `source` on top of the current tables.
    ///
    /// Returns the declarations that had to be skipped.
    pub fn declare_from(&mut self, source: &str) -> Vec<DefinitionError> {
        let mut skipped = Vec::new();
        let mut position = 0;

        while let Some(relative) = source[position..].find('\\') {
            let offset = position + relative;
            let rest = &source[offset..];

            let Some(keyword) = [NEWCOMMAND, DECLARE_OPERATOR, NEWENVIRONMENT]
                .into_iter()
                .find(|keyword| starts_with_keyword(rest, keyword))
            else {
                position = offset + 1;
                continue;
            };

            let mut cursor = Cursor::new(source, offset, keyword);
            let result = match keyword {
                NEWCOMMAND => cursor.newcommand().map(|(name, def)| self.macros.insert(name, def)),
                DECLARE_OPERATOR => cursor.operator().map(|(name, def)| self.macros.insert(name, def)),
                _ => cursor
                    .newenvironment()
                    .map(|(name, def)| self.environments.insert(name, def)),
            };

            match result {
                Ok(()) => position = cursor.position,
                Err(err) => {
                    debug!("skipping declaration: {}", err);
                    skipped.push(err);
                    position = offset + keyword.len();
                }
            }
        }

        skipped
    }
}

/// `rest` starts with `keyword` and the control word ends there.
fn starts_with_keyword(rest: &str, keyword: &str) -> bool {
    rest.starts_with(keyword)
        && !rest[keyword.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '@')
}

fn is_command_name(name: &str) -> bool {
    name.strip_prefix('\\').is_some_and(|letters| {
        !letters.is_empty() && letters.chars().all(|c| c.is_ascii_alphabetic() || c == '@')
    })
}

pub(crate) fn is_environment_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphabetic() || c == '*' || c == '@')
}

/// Reads the groups of one declaration.
struct Cursor<'a> {
    source: &'a str,
    offset: usize,
    keyword: &'static str,
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str, offset: usize, keyword: &'static str) -> Self {
        Self {
            source,
            offset,
            keyword,
            position: offset + keyword.len(),
        }
    }

    fn skip_whitespace(&mut self) {
        self.position += leading_whitespace(&self.source[self.position..]);
    }

    fn group(&mut self, what: &'static str) -> Result<&'a str, DefinitionError> {
        self.skip_whitespace();
        let rest = &self.source[self.position..];
        match balanced_group(rest) {
            Some(group) => {
                self.position += group.len;
                Ok(group.content)
            }
            None if rest.starts_with('{') => Err(DefinitionError::Unbalanced {
                keyword: self.keyword,
                offset: self.offset,
                what,
            }),
            None => Err(DefinitionError::MissingGroup {
                keyword: self.keyword,
                offset: self.offset,
                what,
            }),
        }
    }

    fn optional_bracket(&mut self) -> Option<&'a str> {
        let skipped = leading_whitespace(&self.source[self.position..]);
        let group = bracket_group(&self.source[self.position + skipped..])?;
        self.position += skipped + group.len;
        Some(group.content)
    }

    fn star(&mut self) -> bool {
        if self.source[self.position..].starts_with('*') {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn arg_count(&mut self) -> Result<usize, DefinitionError> {
        let Some(value) = self.optional_bracket() else {
            return Ok(0);
        };
        match value.trim().parse::<usize>() {
            Ok(count) if count <= MAX_ARGUMENTS => Ok(count),
            _ => Err(DefinitionError::InvalidArgCount {
                keyword: self.keyword,
                offset: self.offset,
                value: value.to_string(),
            }),
        }
    }

    fn command_name(&mut self) -> Result<String, DefinitionError> {
        let name = self.group("command name")?.trim();
        if is_command_name(name) {
            Ok(name.to_string())
        } else {
            Err(DefinitionError::InvalidName {
                keyword: self.keyword,
                offset: self.offset,
                name: name.to_string(),
            })
        }
    }

    /// `\newcommand{\name}[n][default]{body}`
    fn newcommand(&mut self) -> Result<(String, MacroDefinition), DefinitionError> {
        let name = self.command_name()?;
        let arg_count = self.arg_count()?;
        let default_arg = if arg_count > 0 {
            self.optional_bracket().map(str::to_string)
        } else {
            None
        };
        let body = self.group("body")?;
        Ok((
            name,
            MacroDefinition {
                replacement: body.to_string(),
                arg_count,
                default_arg,
            },
        ))
    }

    /// `\DeclareMathOperator{\name}{text}` and its starred form.
    fn operator(&mut self) -> Result<(String, MacroDefinition), DefinitionError> {
        let starred = self.star();
        let name = self.command_name()?;
        let text = self.group("operator text")?;
        let wrapper = if starred { r"\operatorname*" } else { r"\operatorname" };
        Ok((name, MacroDefinition::new(format!("{wrapper}{{{text}}}"))))
    }

    /// `\newenvironment{name}[n]{begin}{end}`
    fn newenvironment(&mut self) -> Result<(String, EnvironmentDefinition), DefinitionError> {
        let name = self.group("environment name")?.trim();
        if !is_environment_name(name) {
            return Err(DefinitionError::InvalidName {
                keyword: self.keyword,
                offset: self.offset,
                name: name.to_string(),
            });
        }
        let arg_count = self.arg_count()?;
        let begin_body = self.group("begin body")?;
        let end_body = self.group("end body")?;
        Ok((
            name.to_string(),
            EnvironmentDefinition::new(begin_body, end_body, arg_count),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_only(source: &str) -> Extraction {
        let mut definitions = Definitions::default();
        let skipped = definitions.declare_from(source);
        Extraction {
            definitions,
            skipped,
        }
    }

    #[test]
    fn test_newcommand() {
        let extraction = user_only(r"\newcommand{\R}{\mathbb{R}}");
        assert!(extraction.skipped.is_empty());
        assert_eq!(
            extraction.definitions.macros.get(r"\R"),
            Some(&MacroDefinition::new(r"\mathbb{R}"))
        );
    }

    #[test]
    fn test_last_write_wins() {
        let source = r"
\newcommand{\R}{\mathbb{R}}
\newcommand{\R}{\mathcal{R}}
";
        let defs = user_only(source).definitions;
        assert_eq!(defs.macros.replacement(r"\R"), Some(r"\mathcal{R}"));
        assert_eq!(defs.macros.len(), 1);
    }

    #[test]
    fn test_nested_braces_in_body() {
        let defs = user_only(r"\newcommand{\half}{\frac{1}{2}} trailing").definitions;
        assert_eq!(defs.macros.replacement(r"\half"), Some(r"\frac{1}{2}"));
    }

    #[test]
    fn test_arg_count_is_stored_not_applied() {
        let defs = user_only(r"\newcommand{\norm}[1]{\left\| #1 \right\|}").definitions;
        let def = defs.macros.get(r"\norm").unwrap();
        assert_eq!(def.arg_count, 1);
        assert_eq!(def.replacement, r"\left\| #1 \right\|");
        assert_eq!(def.default_arg, None);
    }

    #[test]
    fn test_default_argument_is_recorded() {
        let defs = user_only(r"\newcommand{\seq}[2][n]{#2_{#1}}").definitions;
        let def = defs.macros.get(r"\seq").unwrap();
        assert_eq!(def.arg_count, 2);
        assert_eq!(def.default_arg.as_deref(), Some("n"));
        assert_eq!(def.replacement, "#2_{#1}");
    }

    #[test]
    fn test_whitespace_between_groups() {
        let defs = user_only("\\newcommand {\\C}  {\\mathbb{C}}\n\\newenvironment {box} \n{[}\n{]}")
            .definitions;
        assert_eq!(defs.macros.replacement(r"\C"), Some(r"\mathbb{C}"));
        assert_eq!(
            defs.environments.get("box"),
            Some(&EnvironmentDefinition::new("[", "]", 0))
        );
    }

    #[test]
    fn test_operator_forms() {
        let source = r"\DeclareMathOperator{\im}{im} \DeclareMathOperator*{\argmax}{arg\,max}";
        let defs = user_only(source).definitions;
        assert_eq!(defs.macros.replacement(r"\im"), Some(r"\operatorname{im}"));
        assert_eq!(
            defs.macros.replacement(r"\argmax"),
            Some(r"\operatorname*{arg\,max}")
        );
    }

    #[test]
    fn test_environment_with_arguments() {
        let source = r"\newenvironment{thm}[2]{\textbf{#1 (#2)}\;}{\square}";
        let defs = user_only(source).definitions;
        assert_eq!(
            defs.environments.get("thm"),
            Some(&EnvironmentDefinition::new(r"\textbf{#1 (#2)}\;", r"\square", 2))
        );
    }

    #[test]
    fn test_malformed_declarations_are_skipped() {
        let source = r"
\newcommand{\good}{ok}
\newcommand{\broken}{\frac{1}{2}
\newcommand{noslash}{x}
\newenvironment{env}{only-begin}
\newcommand{\many}[12]{x}
\newcommand{\after}{fine}
";
        let extraction = user_only(source);
        let defs = &extraction.definitions;
        assert_eq!(defs.macros.replacement(r"\good"), Some("ok"));
        assert_eq!(defs.macros.replacement(r"\after"), Some("fine"));
        assert!(defs.macros.get(r"\broken").is_none());
        assert!(defs.macros.get(r"\many").is_none());
        assert!(defs.environments.get("env").is_none());

        assert!(matches!(
            extraction.skipped[0],
            DefinitionError::Unbalanced { what: "body", .. }
        ));
        assert!(matches!(
            &extraction.skipped[1],
            DefinitionError::InvalidName { name, .. } if name == "noslash"
        ));
        assert!(matches!(
            extraction.skipped[2],
            DefinitionError::MissingGroup { what: "end body", .. }
        ));
        assert!(matches!(
            extraction.skipped[3],
            DefinitionError::InvalidArgCount { .. }
        ));
        assert_eq!(extraction.skipped.len(), 4);
    }

    #[test]
    fn test_longer_control_words_are_ignored() {
        let extraction = user_only(r"\newcommandx{\a}{b} \newenvironments{e}{}{}");
        assert!(extraction.definitions.macros.is_empty());
        assert!(extraction.definitions.environments.is_empty());
        assert!(extraction.skipped.is_empty());
    }

    #[test]
    fn test_extract_layers_on_builtins() {
        let extraction = Definitions::extract(r"\newcommand{\RR}{\mathsf{R}}");
        let defs = extraction.definitions;
        assert_eq!(defs.macros.replacement(r"\RR"), Some(r"\mathsf{R}"));
        assert_eq!(defs.macros.replacement(r"\QQ"), Some(r"\mathbb{Q}"));
        assert!(defs.environments.get("theorem").is_some());
    }

    #[test]
    fn test_extract_is_idempotent() {
        let source = r"\newcommand{\x}{y} \newenvironment{e}{a}{b}";
        assert_eq!(Definitions::extract(source), Definitions::extract(source));
    }

    #[test]
    fn test_error_messages() {
        let err = DefinitionError::MissingGroup {
            keyword: NEWCOMMAND,
            offset: 4,
            what: "body",
        };
        assert_eq!(
            err.to_string(),
            r"\newcommand at byte 4: expected a {...} group for the body"
        );
    }
}
