//! # NoteTeX Macros
//!
//! Definition tables for the macros and environments a note may use, and the
//! environment rewriting applied to math before it is typeset.
//!
//! ## Overview
//!
//! - [`definitions`] reads `\newcommand`, `\DeclareMathOperator` and
//!   `\newenvironment` declarations out of a free-form definitions source and
//!   builds a [`MacroTable`] and an [`EnvironmentTable`] on top of the
//!   [`builtins`]. Tables are always rebuilt from scratch; a malformed declaration
//!   is skipped on its own and never poisons the rest of the source.
//! - [`expander`] rewrites `\begin{name}...\end{name}` blocks found in math
//!   content using the environment table. Macro commands are left in place: the
//!   macro table travels with the expanded LaTeX and the typesetter resolves
//!   commands itself.
//!
//! ## Examples
//!
//! ```
//! use notetex_macros::{Definitions, expand_environments};
//!
//! let source = r"
//! \newcommand{\R}{\mathbb{R}}
//! \newenvironment{pf}{\text{Proof: }}{\;\blacksquare}
//! ";
//! let extraction = Definitions::extract(source);
//! assert!(extraction.skipped.is_empty());
//!
//! let defs = extraction.definitions;
//! assert_eq!(defs.macros.replacement(r"\R"), Some(r"\mathbb{R}"));
//!
//! let latex = expand_environments(r"\begin{pf}x \in \R\end{pf}", &defs.environments);
//! assert_eq!(latex, r"\boxed{\textbf{Pf.}\quad \text{Proof: }x \in \R\;\blacksquare}");
//! ```

pub mod builtins;
pub mod definitions;
pub mod expander;

pub use definitions::{
    DefinitionError, Definitions, EnvironmentDefinition, EnvironmentTable, Extraction,
    MacroDefinition, MacroTable,
};
pub use expander::{Expander, expand_environments};
