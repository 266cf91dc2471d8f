//! Selection error types with position spans.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for selection operations.
pub type Result<T> = std::result::Result<T, SelectionError>;

/// One problem found while parsing, resolving or compiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub span: Option<(usize, usize)>,
    pub input: Option<String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: None,
            input: None,
        }
    }

    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = Some((start, end));
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let (Some((start, end)), Some(input)) = (self.span, &self.input) {
            write!(f, "\n  {}", input)?;
            write!(
                f,
                "\n  {}{}",
                " ".repeat(start),
                "^".repeat(end.saturating_sub(start).max(1))
            )?;
        } else if let Some(input) = &self.input {
            write!(f, "\n  in: {}", input)?;
        }
        Ok(())
    }
}

/// Aggregated diagnostics from one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn append(&mut self, other: &mut Diagnostics) {
        self.0.append(&mut other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// `Ok(())` when empty, otherwise the diagnostics wrapped by `wrap`.
    pub fn into_result(self, wrap: fn(Diagnostics) -> SelectionError) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(wrap(self))
        }
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Self(vec![diagnostic])
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => f.write_str("no errors"),
            [single] => write!(f, "{}", single),
            many => {
                write!(f, "{} errors:", many.len())?;
                for (i, d) in many.iter().enumerate() {
                    write!(f, "\n  {}. {}", i + 1, d)?;
                }
                Ok(())
            }
        }
    }
}

/// Errors raised by a selection collection.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("invalid selection text: {0}")]
    Parse(Diagnostics),

    #[error("unresolved group reference: {0}")]
    UnresolvedGroup(Diagnostics),

    #[error("duplicate binding: {0}")]
    DuplicateBinding(String),

    #[error("invalid selection: {0}")]
    TypeOrArity(Diagnostics),

    #[error("selection requires topology information, but none provided")]
    MissingTopology,

    #[error("evaluation of '{root}' failed: {message}")]
    Evaluation { root: String, message: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SelectionError {
    /// Diagnostics carried by aggregated variants.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            Self::Parse(d) | Self::UnresolvedGroup(d) | Self::TypeOrArity(d) => Some(d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caret_rendering() {
        let d = Diagnostic::new("Unexpected token")
            .with_span(5, 8)
            .with_input("name CA and");
        assert_eq!(d.to_string(), "Unexpected token\n  name CA and\n       ^^^");
    }

    #[test]
    fn test_single_and_plural() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::new("first"));
        assert_eq!(diags.to_string(), "first");
        diags.push(Diagnostic::new("second"));
        assert_eq!(diags.to_string(), "2 errors:\n  1. first\n  2. second");
    }

    #[test]
    fn test_into_result() {
        assert!(Diagnostics::new().into_result(SelectionError::Parse).is_ok());
        let err = Diagnostics::from(Diagnostic::new("bad"))
            .into_result(SelectionError::TypeOrArity)
            .unwrap_err();
        assert!(matches!(err, SelectionError::TypeOrArity(_)));
        assert_eq!(err.diagnostics().map(|d| d.len()), Some(1));
    }
}
