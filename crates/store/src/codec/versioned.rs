//! Version-aware selection of the on-disk page layout.
//!
//! Every format version this crate has written stays readable. Writes always
//! use [`CURRENT_FORMAT_VERSION`]: a file opened with an older reader is
//! upgraded the first time it is persisted again.
//!
//! | Version | Page entry header                                          |
//! |---------|------------------------------------------------------------|
//! | 1       | number, type, next offset, length (17 bytes)               |
//! | 2       | number, type, page format version, next offset, length (19) |

use super::page::{self, PageLayout};
use crate::{
    error::{Error, Result},
    header::{CURRENT_FORMAT_VERSION, TableHeader},
};

/// Reads and writes the paged payload region of one format version.
pub trait FormatCodec: Send + Sync {
    /// Format version handled by this codec.
    fn version(&self) -> u16;

    /// Page entry layout of this version.
    fn layout(&self) -> PageLayout;

    /// Joins the stored payload from the pages following the header.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the page sequence is malformed or the
    /// joined length differs from the header's stored length.
    fn read_payload(&self, bytes: &[u8], header: &TableHeader, origin: &str) -> Result<Vec<u8>> {
        let payload = page::assemble_pages(bytes, header.page_count, self.layout(), origin)?;
        if payload.len() != header.stored_length as usize {
            return Err(Error::StoredLengthMismatch {
                origin: origin.to_string(),
                declared: header.stored_length,
                actual: payload.len(),
            });
        }
        Ok(payload)
    }

    /// Appends the page entries for `payload`, returning the page count.
    fn write_payload(&self, out: &mut Vec<u8>, payload: &[u8], page_size: usize) -> usize {
        page::write_pages(out, payload, page_size, self.layout())
    }
}

/// Format 1: pages without a per-page version.
#[derive(Debug, Clone, Copy)]
pub struct FormatV1;

impl FormatCodec for FormatV1 {
    fn version(&self) -> u16 {
        1
    }

    fn layout(&self) -> PageLayout {
        PageLayout::Legacy
    }
}

/// Format 2: pages carry the writer's format version.
#[derive(Debug, Clone, Copy)]
pub struct FormatV2;

impl FormatCodec for FormatV2 {
    fn version(&self) -> u16 {
        CURRENT_FORMAT_VERSION
    }

    fn layout(&self) -> PageLayout {
        PageLayout::Versioned
    }
}

static FORMAT_V1: FormatV1 = FormatV1;
static FORMAT_V2: FormatV2 = FormatV2;

/// Picks the codec for a stored format version.
pub struct VersionedCodecFactory;

impl VersionedCodecFactory {
    /// Versions with a reader, oldest first.
    pub const SUPPORTED_VERSIONS: &'static [u16] = &[1, CURRENT_FORMAT_VERSION];

    /// Returns the reader for `version`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedVersion`] for any version without a reader,
    /// including versions newer than this build.
    pub fn reader(version: u16, origin: &str) -> Result<&'static dyn FormatCodec> {
        match version {
            1 => Ok(&FORMAT_V1),
            CURRENT_FORMAT_VERSION => Ok(&FORMAT_V2),
            _ => Err(Error::UnsupportedVersion {
                origin: origin.to_string(),
                version,
                supported: Self::SUPPORTED_VERSIONS
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Returns the codec all writes use.
    #[inline]
    pub fn writer() -> &'static dyn FormatCodec {
        &FORMAT_V2
    }
}
