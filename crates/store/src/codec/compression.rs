//! Payload compression with fallback to raw storage.
//!
//! Compression is best effort: if the encoder fails, or its output is not
//! smaller than the input, the payload is stored raw and the header records
//! [`Compression::None`].

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Internal buffer size handed to the brotli encoder and decoder.
const BROTLI_BUFFER_SIZE: usize = 4096;

/// Brotli window size (log2).
const BROTLI_WINDOW: u32 = 22;

/// Compression algorithm recorded in the table header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Compression {
    /// Payload is stored raw.
    #[default]
    None = 0,
    /// Brotli stream.
    Brotli = 1,
    /// Zstandard frame.
    Zstd = 2,
}

impl Compression {
    /// Returns the header byte for this algorithm.
    #[inline]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a header byte.
    pub const fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Brotli),
            2 => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Level used when the table options leave it unset.
    pub const fn default_level(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Brotli => 5,
            Self::Zstd => 3,
        }
    }

    /// Accepted level range (inclusive).
    pub const fn level_bounds(self) -> (i32, i32) {
        match self {
            Self::None => (0, 0),
            Self::Brotli => (0, 11),
            Self::Zstd => (1, 22),
        }
    }
}

/// Compresses `data`, returning the algorithm actually applied and the bytes to store.
pub(crate) fn compress(algorithm: Compression, level: i32, data: &[u8]) -> (Compression, Vec<u8>) {
    if data.is_empty() {
        return (Compression::None, Vec::new());
    }

    let attempt = match algorithm {
        Compression::None => return (Compression::None, data.to_vec()),
        Compression::Brotli => brotli_compress(data, level),
        Compression::Zstd => zstd::bulk::compress(data, level),
    };

    match attempt {
        Ok(compressed) if compressed.len() < data.len() => (algorithm, compressed),
        Ok(compressed) => {
            tracing::debug!(
                ?algorithm,
                raw = data.len(),
                compressed = compressed.len(),
                "Compression did not shrink payload, storing raw"
            );
            (Compression::None, data.to_vec())
        },
        Err(error) => {
            tracing::warn!(?algorithm, %error, "Compression failed, storing raw");
            (Compression::None, data.to_vec())
        },
    }
}

/// Decompresses a stored payload and checks it against the header's length.
///
/// # Errors
///
/// Returns [`Error::Decompression`] if the decoder rejects the stream and
/// [`Error::DecompressedLengthMismatch`] if the output length differs from
/// `expected_len`.
pub(crate) fn decompress(
    algorithm: Compression,
    data: &[u8],
    expected_len: i32,
    origin: &str,
) -> Result<Vec<u8>> {
    let expected = usize::try_from(expected_len).map_err(|_| Error::Corrupted {
        origin: origin.to_string(),
        reason: format!("negative uncompressed length {expected_len}"),
    })?;

    let out = match algorithm {
        Compression::None => data.to_vec(),
        Compression::Brotli => {
            let reader = brotli::Decompressor::new(data, BROTLI_BUFFER_SIZE);
            read_bounded(reader, expected, data.len())
                .map_err(|source| Error::Decompression { origin: origin.to_string(), source })?
        },
        Compression::Zstd => zstd::stream::read::Decoder::new(data)
            .and_then(|reader| read_bounded(reader, expected, data.len()))
            .map_err(|source| Error::Decompression { origin: origin.to_string(), source })?,
    };

    if out.len() != expected {
        return Err(Error::DecompressedLengthMismatch {
            origin: origin.to_string(),
            expected: expected_len,
            actual: out.len(),
        });
    }
    Ok(out)
}

/// Largest expansion preallocated before decompression output is seen.
const MAX_INITIAL_RATIO: usize = 64;

fn brotli_compress(data: &[u8], level: i32) -> io::Result<Vec<u8>> {
    let quality = u32::try_from(level).unwrap_or(0);
    let mut writer = brotli::CompressorWriter::new(
        Vec::with_capacity(data.len() / 2),
        BROTLI_BUFFER_SIZE,
        quality,
        BROTLI_WINDOW,
    );
    writer.write_all(data)?;
    writer.flush()?;
    Ok(writer.into_inner())
}

/// Reads at most `expected + 1` bytes so an oversized stream is detected
/// without inflating it completely.
///
/// `expected` comes from the file header, so the initial allocation is also
/// capped relative to the compressed input.
fn read_bounded<R: Read>(reader: R, expected: usize, input_len: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected.min(input_len.saturating_mul(MAX_INITIAL_RATIO)));
    reader.take(expected as u64 + 1).read_to_end(&mut out)?;
    Ok(out)
}
