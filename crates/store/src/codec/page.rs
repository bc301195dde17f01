//! Page entries: the serialized row blob split into fixed-size chunks.
//!
//! Each entry is a small header followed by its chunk:
//!
//! ```text
//! Versioned layout (format 2), 19-byte entry header:
//!   page number (i32, 1-based) | page type (u8) | page format version (u16)
//!   | next page offset (i64) | payload length (i32) | payload bytes
//!
//! Legacy layout (format 1), 17-byte entry header: as above without the
//! page format version.
//! ```
//!
//! The next-page offset is the absolute file offset of the following entry
//! (0 on the last page). It is computed when writing and never trusted when
//! reading; [`integrity`](crate::integrity) reports disagreements.

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    error::{Error, Result},
    header::{CURRENT_FORMAT_VERSION, HEADER_SIZE},
};

/// Page type of data pages, the only type written.
pub const PAGE_TYPE_DATA: u8 = 1;

/// Byte layout of page entry headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLayout {
    /// Format 1: no per-page format version.
    Legacy,
    /// Format 2: per-page format version after the page type.
    Versioned,
}

impl PageLayout {
    /// Size of an entry header in bytes.
    #[inline]
    pub const fn entry_header_size(self) -> usize {
        match self {
            Self::Legacy => 17,
            Self::Versioned => 19,
        }
    }
}

/// A parsed page entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    /// Stored page number.
    pub number: i32,
    /// Stored page type.
    pub page_type: u8,
    /// Stored page format version (`None` for the legacy layout).
    pub format_version: Option<u16>,
    /// Stored (advisory) offset of the next entry.
    pub next_offset: i64,
    /// Absolute offset of this entry's header.
    pub offset: usize,
    /// Absolute byte range of this entry's payload.
    pub payload: Range<usize>,
}

/// Appends one entry per `page_size` chunk of `payload` to `out`.
///
/// `out` must already hold everything that precedes the first entry, so
/// that offsets written into the entries are absolute file offsets.
/// Returns the number of entries written.
pub fn write_pages(
    out: &mut Vec<u8>,
    payload: &[u8],
    page_size: usize,
    layout: PageLayout,
) -> usize {
    let header_size = layout.entry_header_size();
    let chunk_count = payload.len().div_ceil(page_size.max(1));
    out.reserve(payload.len() + chunk_count * header_size);

    for (index, chunk) in payload.chunks(page_size.max(1)).enumerate() {
        let entry_start = out.len();
        let is_last = index + 1 == chunk_count;
        let next_offset =
            if is_last { 0 } else { (entry_start + header_size + chunk.len()) as i64 };

        let mut entry = [0u8; 19];
        LittleEndian::write_i32(&mut entry[0..4], index as i32 + 1);
        entry[4] = PAGE_TYPE_DATA;
        let rest = match layout {
            PageLayout::Legacy => 5,
            PageLayout::Versioned => {
                LittleEndian::write_u16(&mut entry[5..7], CURRENT_FORMAT_VERSION);
                7
            },
        };
        LittleEndian::write_i64(&mut entry[rest..rest + 8], next_offset);
        LittleEndian::write_i32(&mut entry[rest + 8..rest + 12], chunk.len() as i32);

        out.extend_from_slice(&entry[..header_size]);
        out.extend_from_slice(chunk);
    }

    chunk_count
}

/// Parses the entry starting at `offset`, or `None` if it is truncated.
pub fn read_page_entry(bytes: &[u8], offset: usize, layout: PageLayout) -> Option<PageEntry> {
    let header_end = offset.checked_add(layout.entry_header_size())?;
    let header = bytes.get(offset..header_end)?;

    let (format_version, rest) = match layout {
        PageLayout::Legacy => (None, 5),
        PageLayout::Versioned => (Some(LittleEndian::read_u16(&header[5..7])), 7),
    };
    let length = usize::try_from(LittleEndian::read_i32(&header[rest + 8..rest + 12])).ok()?;
    let payload_end = header_end.checked_add(length)?;
    if payload_end > bytes.len() {
        return None;
    }

    Some(PageEntry {
        number: LittleEndian::read_i32(&header[0..4]),
        page_type: header[4],
        format_version,
        next_offset: LittleEndian::read_i64(&header[rest..rest + 8]),
        offset,
        payload: header_end..payload_end,
    })
}

/// Walks exactly `page_count` entries after the file header and joins their payloads.
///
/// # Errors
///
/// Returns [`Error::PageOutOfSequence`] when an entry's number differs from
/// its position, [`Error::PageCountMismatch`] when the file holds fewer or
/// more entries than declared, and [`Error::Corrupted`] for non-data pages or
/// trailing bytes.
pub fn assemble_pages(
    bytes: &[u8],
    page_count: i32,
    layout: PageLayout,
    origin: &str,
) -> Result<Vec<u8>> {
    let mut offset = HEADER_SIZE;
    let mut payload = Vec::new();

    for expected in 1..=page_count {
        let Some(entry) = read_page_entry(bytes, offset, layout) else {
            return Err(Error::PageCountMismatch {
                origin: origin.to_string(),
                declared: page_count,
                found: expected - 1,
            });
        };
        if entry.number != expected {
            return Err(Error::PageOutOfSequence {
                origin: origin.to_string(),
                expected,
                found: entry.number,
            });
        }
        if entry.page_type != PAGE_TYPE_DATA {
            return Err(Error::Corrupted {
                origin: origin.to_string(),
                reason: format!("page {expected} has unknown type {}", entry.page_type),
            });
        }
        payload.extend_from_slice(&bytes[entry.payload.clone()]);
        offset = entry.payload.end;
    }

    if offset < bytes.len() {
        let mut extra = 0;
        let mut cursor = offset;
        while let Some(entry) = read_page_entry(bytes, cursor, layout) {
            extra += 1;
            cursor = entry.payload.end;
        }
        if extra > 0 {
            return Err(Error::PageCountMismatch {
                origin: origin.to_string(),
                declared: page_count,
                found: page_count.saturating_add(extra),
            });
        }
        return Err(Error::Corrupted {
            origin: origin.to_string(),
            reason: format!("{} trailing bytes after last page", bytes.len() - offset),
        });
    }

    Ok(payload)
}
