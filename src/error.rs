//! Error kinds the engine surfaces, per spec section 7.

use thiserror::Error;

/// One diagnostic line, as printed to the error stream by the binary.
#[derive(Debug, Error)]
pub enum SignError {
    /// Missing/conflicting parameters or malformed numeric/enum values.
    /// Carries every offending line so the caller sees all problems at once.
    #[error("{}", .0.join("\n"))]
    ArgError(Vec<String>),

    #[error("I/O error: {0}")]
    IoError(String),

    /// Input does not match its declared/detected kind, a region map is
    /// missing an expected area, or a key block failed verification.
    #[error("format error: {0}")]
    FormatError(String),

    /// Signature or key-block creation returned a null/empty result.
    #[error("crypto error: {0}")]
    CryptoError(String),

    /// Computed body or config would not fit in the available region.
    #[error("sizing error: {0}")]
    SizingError(String),

    /// A/B bodies differ but dev keys are absent, or vblock_only was
    /// requested without a distinct output file.
    #[error("policy error: {0}")]
    PolicyError(String),
}

impl From<std::io::Error> for SignError {
    fn from(e: std::io::Error) -> Self {
        SignError::IoError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SignError>;

/// Accumulates one error line per offending argument, per spec 4.2/7:
/// "missing any required item accumulates one error line per omission".
#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    lines: Vec<String>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn require(&mut self, present: bool, optname: &str) {
        if !present {
            self.push(format!("Missing --{optname} option"));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn into_result(self) -> Result<()> {
        if self.lines.is_empty() { Ok(()) } else { Err(SignError::ArgError(self.lines)) }
    }
}
