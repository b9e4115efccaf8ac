use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrajectoryError {
    #[error("Corrupt trajectory record at byte offset {offset}: {reason}")]
    CorruptStream { offset: u64, reason: String },

    #[error("Frame {index} not found in trajectory '{path}'", path = path.display())]
    FrameNotFound { path: PathBuf, index: usize },

    #[error("Trajectory I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Log file error: {0}")]
    Log(#[from] csv::Error),
}

/// Outcome of one decode attempt against the bytes currently available.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// A complete item occupying exactly `consumed` bytes from the start of the input.
    Complete { value: T, consumed: usize },
    /// The input ends before the item does. Not an error: retry once more bytes exist.
    NeedMoreData,
}

impl<T> Decoded<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Decoded::Complete { .. })
    }
}

/// Decodes self-describing binary records made of a header followed by a payload.
///
/// Both steps operate on the bytes available starting at the record boundary. `offset`
/// is the absolute position of `bytes[0]` in the underlying stream and is only used to
/// report where corruption was found.
pub trait RecordDecoder {
    /// Header type carrying the payload layout.
    type Header: Clone;

    /// Fully decoded frame.
    type Frame;

    /// Attempts to decode one header.
    ///
    /// # Errors
    ///
    /// Returns [`TrajectoryError::CorruptStream`] if the bytes cannot be a valid header.
    fn read_header(
        &self,
        bytes: &[u8],
        offset: u64,
    ) -> Result<Decoded<Self::Header>, TrajectoryError>;

    /// Attempts to decode the payload announced by `header`.
    ///
    /// # Errors
    ///
    /// Returns [`TrajectoryError::CorruptStream`] if the payload is inconsistent with
    /// the header.
    fn read_data(
        &self,
        bytes: &[u8],
        header: &Self::Header,
        offset: u64,
    ) -> Result<Decoded<Self::Frame>, TrajectoryError>;

    /// Attempts to decode one complete record: header plus payload.
    fn read_record(
        &self,
        bytes: &[u8],
        offset: u64,
    ) -> Result<Decoded<Self::Frame>, TrajectoryError> {
        let (header, header_len) = match self.read_header(bytes, offset)? {
            Decoded::Complete { value, consumed } => (value, consumed),
            Decoded::NeedMoreData => return Ok(Decoded::NeedMoreData),
        };
        match self.read_data(&bytes[header_len..], &header, offset + header_len as u64)? {
            Decoded::Complete { value, consumed } => Ok(Decoded::Complete {
                value,
                consumed: header_len + consumed,
            }),
            Decoded::NeedMoreData => Ok(Decoded::NeedMoreData),
        }
    }

    /// Decodes every record of a byte buffer holding only complete records.
    ///
    /// # Errors
    ///
    /// Trailing bytes that do not form a complete record are reported as corruption,
    /// since a finished file must end on a record boundary.
    fn read_all(&self, bytes: &[u8]) -> Result<Vec<Self::Frame>, TrajectoryError> {
        let mut frames = Vec::new();
        let mut cursor = 0usize;
        while cursor < bytes.len() {
            match self.read_record(&bytes[cursor..], cursor as u64)? {
                Decoded::Complete { value, consumed } => {
                    frames.push(value);
                    cursor += consumed;
                }
                Decoded::NeedMoreData => {
                    return Err(TrajectoryError::CorruptStream {
                        offset: cursor as u64,
                        reason: format!(
                            "{} trailing bytes do not form a complete record",
                            bytes.len() - cursor
                        ),
                    });
                }
            }
        }
        Ok(frames)
    }

    /// Reads and decodes a finished trajectory file.
    fn read_from_path<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Self::Frame>, TrajectoryError> {
        let bytes = fs::read(path)?;
        self.read_all(&bytes)
    }
}
