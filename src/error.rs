//! Error and result types shared across the crate.

use std::io;
use thiserror::Error;

/// Result type for revlog operations.
pub type Result<T> = std::result::Result<T, RevlogError>;

/// Errors that can occur while reading or mutating a revlog.
///
/// All failures are local and synchronous; nothing is retried internally.
/// Mutating operations (`append`, `truncate`, sidedata rewrite) either fully
/// succeed or leave the index unchanged.
#[derive(Debug, Error)]
pub enum RevlogError {
    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Nodemap lookup for a node hash that is not in the index.
    #[error("unknown node")]
    UnknownNode,

    /// A set revision flag has no registered processor.
    #[error("missing processor for flag 0x{0:04x}")]
    MissingProcessor(u16),

    /// A processor is already registered on this flag bit.
    #[error("cannot register multiple processors on flag 0x{0:04x}")]
    DuplicateProcessor(u16),

    /// Registration attempted on a bit outside the known flag set.
    #[error("cannot register processor on unknown flag 0x{0:04x}")]
    UnknownFlagBit(u16),

    /// Sidedata rewrite attempted on a revision that is already durable.
    #[error("cannot rewrite entries outside of the open transaction")]
    OutOfTransactionRewrite,

    /// Record size mismatch, truncated payload, or an inline scan landing
    /// on an inconsistent boundary.
    #[error("corrupt revlog: {0}")]
    CorruptFormat(String),

    /// A censored revision was reached without tolerance, or its stored
    /// content does not parse as a valid replacement marker.
    #[error("censored content: {0}")]
    CensoredContent(String),

    /// Invalid configuration or API misuse.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
