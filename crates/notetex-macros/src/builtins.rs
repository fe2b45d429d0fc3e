//! Definitions every note starts with, before any user declaration.

use crate::definitions::{Definitions, EnvironmentDefinition, MacroDefinition};
use once_cell::sync::Lazy;

/// Definitions source a fresh note is seeded with.
pub const DEFAULT_SOURCE: &str = r"\newcommand{\R}{\mathbb{R}}
\newcommand{\Q}{\mathbb{Q}}
\newcommand{\Z}{\mathbb{Z}}
\newcommand{\N}{\mathbb{N}}
\DeclareMathOperator{\im}{im}
\DeclareMathOperator{\Hom}{Hom}
\newenvironment{lemma}{\begin{aligned}}{\end{aligned}}
";

const MACROS: &[(&str, &str)] = &[
    (r"\RR", r"\mathbb{R}"),
    (r"\QQ", r"\mathbb{Q}"),
    (r"\ZZ", r"\mathbb{Z}"),
    (r"\NN", r"\mathbb{N}"),
    (r"\CC", r"\mathbb{C}"),
    (r"\EE", r"\mathbb{E}"),
    (r"\Var", r"\operatorname{Var}"),
    (r"\Cov", r"\operatorname{Cov}"),
    (r"\grad", r"\nabla"),
];

/// Environments shown as a boxed block headed by their title.
const TITLED_ENVIRONMENTS: &[(&str, &str)] = &[
    ("lemma", "Lemma"),
    ("theorem", "Theorem"),
    ("proposition", "Proposition"),
    ("corollary", "Corollary"),
    ("definition", "Definition"),
];

pub(crate) static BUILTIN_DEFINITIONS: Lazy<Definitions> = Lazy::new(|| {
    let mut definitions = Definitions::default();
    for (name, replacement) in MACROS {
        definitions
            .macros
            .insert(*name, MacroDefinition::new(*replacement));
    }
    for (name, title) in TITLED_ENVIRONMENTS {
        definitions
            .environments
            .insert(*name, EnvironmentDefinition::titled(*title));
    }
    definitions
});
