//! # NoteTeX Core
//!
//! The live rendering engine behind a NoteTeX note.
//!
//! ## Overview
//!
//! A note is plain text with `$...$`, `$$...$$`, `\(...\)` and `\[...\]` math
//! spans. This crate keeps a rendered version of that text in which every math
//! span has been replaced by a widget from an external typesetter, and keeps
//! the user's selection where it was while the structure changes under it.
//!
//! ## Modules
//!
//! - [`document`] - Rendered node list and the offset/location mapping
//! - [`coordinator`] - Render cycles: scan, expand, typeset, substitute, restore
//! - [`typesetter`] - The [`Typesetter`] trait and its KaTeX and placeholder backends
//! - [`config`] - [`EngineConfig`]
//! - [`settings`] - [`CommandSet`], the persisted definitions document
//!
//! Scanning lives in `notetex-syntax` and definition handling in
//! `notetex-macros`.
//!
//! ## Error Handling
//!
//! Failures stay as small as possible. An unterminated delimiter is literal
//! text, a malformed declaration is skipped, and a span the typesetter rejects
//! becomes an error placeholder. Only an unresponsive typesetter aborts a cycle
//! ([`RenderError::RendererUnavailable`]), and then the previous rendering is
//! kept.
//!
//! ## Examples
//!
//! ```no_run
//! use notetex_core::{CommandSet, EngineConfig, KatexTypesetter, RenderCoordinator};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> notetex_core::Result<()> {
//! let commands = CommandSet::load(Path::new("commands.json"))?;
//! let Some(katex) = KatexTypesetter::detect() else {
//!     eprintln!("katex is not installed");
//!     return Ok(());
//! };
//!
//! let mut coordinator = RenderCoordinator::new(Arc::new(katex), EngineConfig::default());
//! coordinator.set_definitions(&commands.macros_source);
//! coordinator.set_content_from_host("Euler: $e^{i\\pi} + 1 = 0$");
//! coordinator.render().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod settings;
pub mod typesetter;

pub use config::EngineConfig;
pub use coordinator::{
    CyclePhase, RenderBatch, RenderCoordinator, RenderJob, RenderOutcome, RenderReport,
};
pub use document::{
    Location, MathNode, MathRendering, Node, RenderedDocument, SelectionSnapshot,
    StructuralRange,
};
pub use error::{RenderError, Result, TypesetError};
pub use settings::CommandSet;
pub use typesetter::{KatexTypesetter, PlaceholderTypesetter, RenderedWidget, Typesetter};
