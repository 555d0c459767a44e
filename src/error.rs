//! Error types for the quantification engine.

use thiserror::Error;

use crate::annotation::io::ParseError;

/// Errors raised by the engine and its collaborators.
///
/// Ambiguous biological evidence is never an error; it is classified instead.
#[derive(Debug, Error)]
pub enum QuantError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The annotation could not be parsed.
    #[error(transparent)]
    Annotation(#[from] ParseError),

    /// A malformed CIGAR operator string.
    #[error("invalid CIGAR '{cigar}': {reason}")]
    Cigar { cigar: String, reason: String },

    /// A malformed alignment record.
    #[error("line {line_no}: {reason}")]
    Alignment { line_no: usize, reason: String },

    /// A malformed reference sequence file.
    #[error("reference: {0}")]
    Reference(String),

    /// Configuration that cannot be used.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An output stream could not be written.
    #[error("output {0}: writer unavailable")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, QuantError>;
