use thiserror::Error;

use crate::diagnostics::{SaxParseError, Severity};
use crate::foreign::ForeignNodeId;

#[derive(Debug, Error)]
pub enum LiaisonError {
    #[error("{0}")]
    Fatal(SaxParseError),
    #[error("{0}")]
    Error(SaxParseError),
    /// A custom error handler chose to abort on a warning.
    #[error("{0}")]
    Warning(SaxParseError),
    #[error("document handle is stale: the document was destroyed or the liaison was reset")]
    StaleDocument,
    #[error("invalid foreign node {id:?}: {reason}")]
    InvalidNode { id: ForeignNodeId, reason: &'static str },
    #[error("failed to read input source: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SaxParseError> for LiaisonError {
    fn from(err: SaxParseError) -> Self {
        match err.severity {
            Severity::Fatal => LiaisonError::Fatal(err),
            Severity::Error => LiaisonError::Error(err),
            Severity::Warning => LiaisonError::Warning(err),
        }
    }
}

impl LiaisonError {
    /// The parse diagnostic behind this error, if it came from the parser.
    pub fn parse_error(&self) -> Option<&SaxParseError> {
        match self {
            LiaisonError::Fatal(e) | LiaisonError::Error(e) | LiaisonError::Warning(e) => Some(e),
            _ => None,
        }
    }
}
