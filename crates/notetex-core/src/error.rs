use thiserror::Error;

/// Failures that abort a whole render cycle or a configuration load.
///
/// A cycle that fails keeps the previously rendered document untouched.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer did not become ready after {attempts} attempts")]
    RendererUnavailable { attempts: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Failure to typeset a single math span.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesetError {
    /// The typesetter refused the LaTeX (parse error, unknown command, ...).
    #[error("{0}")]
    Rejected(String),

    /// The typesetter itself could not run.
    #[error("typesetter backend failed: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;
