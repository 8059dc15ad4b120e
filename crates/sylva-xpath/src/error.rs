use core::fmt;
use std::sync::Arc;

/// Error codes emitted by the value runtime and the node model.
///
/// Document-order failures keep the W3C code (`err:FOER0000`) so that callers
/// matching on XPath error codes keep working; runtime-specific failures use the
/// `sylva:` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Handle used after `ValuePool::reset` or after the value was returned.
    UseAfterInvalidation,
    /// Handle belongs to a different pool.
    ForeignValue,
    /// `dereferenced` called on a value whose reference count is already zero.
    RefCountUnderflow,
    /// Dereferencing an `OwnershipGuard` that holds no value.
    EmptyGuard,
    /// Document order cannot be established (e.g. nodes from different roots).
    FOER0000,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UseAfterInvalidation => "sylva:use-after-invalidation",
            ErrorCode::ForeignValue => "sylva:foreign-value",
            ErrorCode::RefCountUnderflow => "sylva:refcount-underflow",
            ErrorCode::EmptyGuard => "sylva:empty-guard",
            ErrorCode::FOER0000 => "err:FOER0000",
            ErrorCode::Unknown => "sylva:unknown",
        }
    }

    pub fn from_code(s: &str) -> Self {
        match s {
            "sylva:use-after-invalidation" => ErrorCode::UseAfterInvalidation,
            "sylva:foreign-value" => ErrorCode::ForeignValue,
            "sylva:refcount-underflow" => ErrorCode::RefCountUnderflow,
            "sylva:empty-guard" => ErrorCode::EmptyGuard,
            "err:FOER0000" => ErrorCode::FOER0000,
            _ => ErrorCode::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), source: None }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub(crate) fn stale(what: &str) -> Self {
        Self::from_code(
            ErrorCode::UseAfterInvalidation,
            format!("{what} was invalidated by a pool reset or has already been returned"),
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
