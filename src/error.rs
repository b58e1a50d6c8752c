//! Tokenizer and traversal error handling.

use std::{error::Error as StdError, fmt, io::Error as IoError, io::ErrorKind as IoErrorKind};

/// Errors encountered while reading from a tokenizer or walking a container.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Fewer bytes were available than a read, peek, or token decode required.
    ///
    /// This is the expected failure mode for truncated input, and for streams of
    /// unknown length. Format walkers commonly treat a trailing `EndOfStream` as the
    /// end of a best-effort parse, see [`Error::is_end_of_stream`].
    EndOfStream,
    /// A read or peek requested a position behind the tokenizer's cursor.
    PositionBehind {
        /// Position the caller asked for.
        requested: u64,
        /// Position of the tokenizer when the request was made.
        current: u64,
    },
    /// The container's declared structure was inconsistent.
    Structure(StructureError),
    /// The tokenizer's source was already closed.
    Closed,
    /// The operation is not available on this kind of source.
    Unsupported(&'static str),
    /// The destination of a read or peek could not hold the requested range.
    BufferTooSmall {
        /// End of the requested range within the destination.
        needed: usize,
        /// Length of the destination.
        available: usize,
    },
    /// Miscellaneous I/O error from the underlying source.
    Io(IoError),
}

impl Error {
    /// Indicates whether this failure was caused by running out of input.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    /// Indicates whether this failure was caused by inconsistent container structure.
    pub fn is_structural(&self) -> bool {
        matches!(self, Error::Structure(_))
    }

    pub(crate) fn structure(kind: StructureError) -> Self {
        Error::Structure(kind)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Error {
        if e.kind() == IoErrorKind::UnexpectedEof {
            Error::EndOfStream
        } else {
            Error::Io(e)
        }
    }
}

impl From<StructureError> for Error {
    fn from(e: StructureError) -> Error {
        Error::Structure(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;
        match self {
            EndOfStream => write!(f, "end of stream"),
            PositionBehind { requested, current } => write!(
                f,
                "requested position {} is behind the tokenizer position {}",
                requested, current
            ),
            Structure(e) => write!(f, "malformed container: {}", e),
            Closed => write!(f, "tokenizer source was already closed"),
            Unsupported(what) => write!(f, "operation not supported: {}", what),
            BufferTooSmall { needed, available } => write!(
                f,
                "destination holds {} bytes but {} were requested",
                available, needed
            ),
            Io(e) => e.fmt(f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::EndOfStream => None,
            Error::PositionBehind { .. } => None,
            Error::Structure(e) => Some(e),
            Error::Closed => None,
            Error::Unsupported(_) => None,
            Error::BufferTooSmall { .. } => None,
            Error::Io(e) => Some(e),
        }
    }
}

/// Reasons a container was rejected as structurally inconsistent.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum StructureError {
    /// A mandatory signature was missing.
    BadMagic {
        /// Human readable name of the expected signature.
        expected: &'static str,
        /// Bytes found in its place.
        found: Vec<u8>,
    },
    /// A child declared more bytes than its parent has left.
    ChildExceedsParent {
        /// Id of the offending child, rendered for display.
        id: String,
        /// Bytes the child (header, payload and padding) claims.
        declared: u64,
        /// Bytes remaining in the parent.
        remaining: u64,
    },
    /// A handler consumed more bytes than the chunk declared.
    Overrun {
        /// Id of the offending chunk, rendered for display.
        id: String,
        /// Bytes the chunk declared (header and payload).
        declared: u64,
        /// Bytes actually consumed.
        consumed: u64,
    },
    /// A declared size was smaller than the header which declared it.
    SizeTooSmall {
        /// Id of the offending chunk, rendered for display.
        id: String,
        /// The declared size.
        declared: u64,
    },
    /// A length-prefixed field did not fit within its enclosing structure.
    LengthOutOfBounds {
        /// Name of the field.
        field: &'static str,
        /// Implied length of the field.
        length: u64,
        /// Bytes available for it.
        available: u64,
    },
    /// An Ogg page started a new packet while a previous one was incomplete.
    OggContinuity {
        /// Serial number of the logical stream.
        serial: u32,
        /// Sequence number of the page which broke continuity.
        sequence: u32,
    },
    /// A field held a value outside of its legal range.
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// The offending value.
        value: u64,
    },
}

impl fmt::Display for StructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use StructureError::*;
        match self {
            BadMagic { expected, found } =>
                write!(f, "expected {} signature, found {:02x?}", expected, found),
            ChildExceedsParent {
                id,
                declared,
                remaining,
            } => write!(
                f,
                "chunk {:?} declares {} bytes but its parent has {} left",
                id, declared, remaining
            ),
            Overrun {
                id,
                declared,
                consumed,
            } => write!(
                f,
                "chunk {:?} declares {} bytes but {} were consumed",
                id, declared, consumed
            ),
            SizeTooSmall { id, declared } => write!(
                f,
                "chunk {:?} declares size {} which cannot hold its own header",
                id, declared
            ),
            LengthOutOfBounds {
                field,
                length,
                available,
            } => write!(
                f,
                "field {} has length {} but only {} bytes are available",
                field, length, available
            ),
            OggContinuity { serial, sequence } => write!(
                f,
                "ogg stream {:#010x} page {} started a new packet before the last one ended",
                serial, sequence
            ),
            InvalidValue { field, value } => write!(f, "field {} has illegal value {}", field, value),
        }
    }
}

impl StdError for StructureError {}

/// Convenience type for tokenizer and traversal error handling.
pub type Result<T> = std::result::Result<T, Error>;

/// Converts a trailing [`Error::EndOfStream`] into a successful `None`.
///
/// Other errors are passed through untouched. Walkers use this to keep results
/// gathered before a truncated tail.
pub fn recover_eof<T>(res: Result<T>) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(Error::EndOfStream) => Ok(None),
        Err(e) => Err(e),
    }
}
