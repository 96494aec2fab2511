//! Line codec for the agent's newline-delimited JSON stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a fixed maximum line length
//! so a single unterminated or oversized line from a misbehaving agent
//! process cannot grow the read buffer without bound.
//!
//! Use [`StreamCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] over the child's stdout.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted line length: 1 MiB.
///
/// Longer lines cause [`StreamCodec::decode`] to return
/// [`AppError::Protocol`] with `"line too long"` instead of allocating.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Bounded line codec for the agent stdout stream.
///
/// Delegates framing to [`LinesCodec`] with the [`MAX_LINE_BYTES`] limit.
/// Each `\n`-terminated UTF-8 string is one protocol message; JSON parsing
/// happens downstream in [`crate::protocol::parser`].
#[derive(Debug)]
pub struct StreamCodec(LinesCodec);

impl StreamCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for StreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StreamCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next complete line from `src`.
    ///
    /// Returns `Ok(None)` while the buffer holds no complete line yet.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when the line exceeds
    /// [`MAX_LINE_BYTES`], or [`AppError::Io`] on underlying I/O failure.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
