//! Math typesetting backends.
//!
//! The engine never typesets anything itself. Each math span is handed to a
//! [`Typesetter`] together with the macro table in force, and whatever widget
//! comes back is substituted into the rendered document.
//!
//! - [`PlaceholderTypesetter`] returns fixed-size widgets without running
//!   anything. Used offline and in tests.
//! - [`katex::KatexTypesetter`] runs the `katex` command-line tool.

use crate::error::TypesetError;
use async_trait::async_trait;
use notetex_macros::MacroTable;
use serde::{Deserialize, Serialize};

pub mod katex;

pub use katex::{CommandExecutor, KatexTypesetter, RealCommandExecutor};

/// Pixel size of a rendered widget, when the backend knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSize {
    pub width: u32,
    pub height: u32,
}

/// Display-ready output for one math span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedWidget {
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<WidgetSize>,
}

/// An external math renderer.
///
/// Implementations must be side-effect free from the engine's point of view:
/// typesetting the same input twice yields the same widget.
#[async_trait]
pub trait Typesetter: Send + Sync + std::fmt::Debug {
    /// Whether the renderer can accept work. Polled before every cycle.
    async fn is_ready(&self) -> bool {
        true
    }

    /// Typesets `latex`. Commands found in `macros` must be resolved by the
    /// backend.
    async fn typeset(
        &self,
        latex: &str,
        display_mode: bool,
        macros: &MacroTable,
    ) -> Result<RenderedWidget, TypesetError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Size of every inline placeholder.
pub const PLACEHOLDER_INLINE: WidgetSize = WidgetSize {
    width: 24,
    height: 16,
};

/// Size of every display placeholder.
pub const PLACEHOLDER_DISPLAY: WidgetSize = WidgetSize {
    width: 320,
    height: 48,
};

/// Typesetter that renders the LaTeX source as escaped code.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderTypesetter;

#[async_trait]
impl Typesetter for PlaceholderTypesetter {
    async fn typeset(
        &self,
        latex: &str,
        display_mode: bool,
        _macros: &MacroTable,
    ) -> Result<RenderedWidget, TypesetError> {
        let (class, size) = if display_mode {
            ("math-display", PLACEHOLDER_DISPLAY)
        } else {
            ("math-inline", PLACEHOLDER_INLINE)
        };
        Ok(RenderedWidget {
            html: format!(
                r#"<span class="math math-placeholder {class}"><code>{}</code></span>"#,
                escape_html(latex)
            ),
            size: Some(size),
        })
    }

    fn name(&self) -> &'static str {
        "placeholder"
    }
}

/// Fallback markup for a span that failed to typeset: the original delimited
/// text, with the error message as a tooltip.
pub fn error_html(raw: &str, message: &str, display_mode: bool) -> String {
    let mode_class = if display_mode {
        "math-display"
    } else {
        "math-inline"
    };
    format!(
        r#"<span class="math math-error {mode_class}" title="{}"><code>{}</code></span>"#,
        escape_html(message),
        escape_html(raw)
    )
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
