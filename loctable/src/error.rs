use thiserror::Error;

/// Error types for the text-safety layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// Placeholder markers could not be mapped back one-to-one onto the
    /// original substrings
    #[error(
        "token mismatch: missing {missing:?}, duplicated {duplicated:?}, unknown {unknown:?}"
    )]
    TokenMismatch {
        missing: Vec<String>,
        duplicated: Vec<String>,
        unknown: Vec<String>,
    },
    /// Glossary JSON could not be parsed
    #[error("invalid glossary: {0}")]
    InvalidGlossary(String),
    /// Locale tag is not valid BCP-47
    #[error("invalid locale '{0}'")]
    InvalidLocale(String),
    /// A segment was created with blank source text
    #[error("segment '{0}' has empty source text")]
    EmptySource(String),
}

/// Result type for text-safety operations
pub type GuardResult<T> = Result<T, GuardError>;
