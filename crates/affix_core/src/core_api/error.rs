use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreErrorCode {
    Io,
    Parse,
    /// No affix catalog is loaded; rolling operations are unavailable.
    ConfigUnavailable,
    /// A record stream ended inside a fixed-size field.
    StreamCorruption,
    /// A persisted form id no longer resolves in the current session.
    UnresolvableReference,
    /// The item fails type, slot or template eligibility.
    IneligibleItem,
    /// Fewer eligible affixes than the target count.
    ExhaustedPool,
    UnsupportedOperation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreError {
    pub code: CoreErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn new(code: CoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl Error for CoreError {}
