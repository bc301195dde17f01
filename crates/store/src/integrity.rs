//! Offline integrity scrubber for table files.
//!
//! Walks a table file image without opening the table and reports every
//! fault it finds rather than stopping at the first one. Structural faults
//! are the ones that make [`Table::open`](crate::Table::open) fail; advisory
//! findings (for example a next-page offset that disagrees with the actual
//! layout) are reported but do not prevent the file from loading.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    codec::{
        BinaryPageCodec, VersionedCodecFactory, decompress,
        page::{PAGE_TYPE_DATA, PageEntry, read_page_entry},
    },
    error::Result,
    header::{HEADER_SIZE, TableHeader},
};

/// Severity of a scrub finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The file cannot be loaded.
    Structural,
    /// The file loads, but a stored hint is wrong.
    Advisory,
}

/// A single problem found while scrubbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubError {
    /// Page the problem was found on (1-based position), if page-specific.
    pub page: Option<i32>,
    /// How serious the problem is.
    pub severity: Severity,
    /// Human-readable description of the problem.
    pub description: String,
}

/// Result of scrubbing one table file.
#[derive(Debug, Clone, Default)]
pub struct ScrubResult {
    /// Header, if it could be parsed.
    pub header: Option<TableHeader>,
    /// Page entries walked, in file order.
    pub pages: Vec<PageEntry>,
    /// Everything that was found.
    pub errors: Vec<ScrubError>,
}

impl ScrubResult {
    /// Whether the file would load.
    pub fn is_healthy(&self) -> bool {
        self.structural_errors() == 0
    }

    /// Number of structural findings.
    pub fn structural_errors(&self) -> usize {
        self.errors.iter().filter(|e| e.severity == Severity::Structural).count()
    }

    /// Number of advisory findings.
    pub fn advisory_warnings(&self) -> usize {
        self.errors.iter().filter(|e| e.severity == Severity::Advisory).count()
    }

    fn structural(&mut self, page: Option<i32>, description: String) {
        self.errors.push(ScrubError { page, severity: Severity::Structural, description });
    }

    fn advisory(&mut self, page: Option<i32>, description: String) {
        self.errors.push(ScrubError { page, severity: Severity::Advisory, description });
    }
}

/// Reads `path` and scrubs its contents.
///
/// # Errors
///
/// Returns [`Error::Io`](crate::Error::Io) if the file cannot be read.
/// Problems with the contents are reported in the result, not as errors.
pub fn scrub_file(path: impl AsRef<Path>) -> Result<ScrubResult> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    Ok(scrub_bytes(&bytes, &path.display().to_string()))
}

/// Scrubs a table file image.
pub fn scrub_bytes(bytes: &[u8], origin: &str) -> ScrubResult {
    let mut result = ScrubResult::default();

    let header = match TableHeader::from_bytes(bytes, origin) {
        Ok(header) => header,
        Err(error) => {
            result.structural(None, error.to_string());
            return result;
        },
    };
    result.header = Some(header.clone());

    let reader = match VersionedCodecFactory::reader(header.format_version, origin) {
        Ok(reader) => reader,
        Err(error) => {
            result.structural(None, error.to_string());
            return result;
        },
    };
    let layout = reader.layout();

    // Loading an empty table never reads its pages.
    if header.stored_length == 0 {
        if header.record_count != 0 {
            result.structural(
                None,
                format!("{} records declared with no stored data", header.record_count),
            );
        }
        if bytes.len() > HEADER_SIZE || header.page_count != 0 {
            result.advisory(
                None,
                format!(
                    "{} bytes after the header of an empty table are ignored",
                    bytes.len() - HEADER_SIZE
                ),
            );
        }
        return result;
    }

    let available = bytes.len().saturating_sub(HEADER_SIZE);
    let declared = usize::try_from(header.stored_length).unwrap_or(usize::MAX);
    if declared > available {
        result.structural(
            None,
            format!(
                "header declares {} stored bytes, file holds {available} after the header",
                header.stored_length
            ),
        );
    }

    let mut offset = HEADER_SIZE;
    let mut stored = Vec::with_capacity(declared.min(available));
    let mut position = 0i32;
    while let Some(entry) = read_page_entry(bytes, offset, layout) {
        position = position.saturating_add(1);
        if entry.number != position {
            result.structural(
                Some(position),
                format!("page number {} at position {position}", entry.number),
            );
        }
        if entry.page_type != PAGE_TYPE_DATA {
            result.structural(Some(position), format!("unknown page type {}", entry.page_type));
        }

        let is_last = entry.payload.end >= bytes.len();
        let expected_next = if is_last { 0 } else { entry.payload.end as i64 };
        if entry.next_offset != expected_next {
            result.advisory(
                Some(position),
                format!(
                    "next page offset {} but next entry is at {expected_next}",
                    entry.next_offset
                ),
            );
        }

        stored.extend_from_slice(&bytes[entry.payload.clone()]);
        offset = entry.payload.end;
        result.pages.push(entry);
    }

    if offset < bytes.len() {
        result.structural(
            None,
            format!("{} unreadable bytes after page {position}", bytes.len() - offset),
        );
    }
    if position != header.page_count {
        result.structural(
            None,
            format!("header declares {} pages, file holds {position}", header.page_count),
        );
    }
    if stored.len() != declared {
        if declared <= available {
            result.structural(
                None,
                format!(
                    "header declares {} stored bytes, pages hold {}",
                    header.stored_length,
                    stored.len()
                ),
            );
        }
    } else if !stored.is_empty() {
        let decompressed =
            decompress(header.compression, &stored, header.uncompressed_length, origin);
        if let Err(error) = decompressed {
            result.structural(None, error.to_string());
        }
    }

    if result.is_healthy() {
        debug!(
            origin,
            pages = result.pages.len(),
            advisory = result.advisory_warnings(),
            "Scrub passed"
        );
    } else {
        warn!(origin, structural = result.structural_errors(), "Scrub found structural errors");
    }
    result
}

/// Scrubs a table file image and additionally decodes its rows as `R`.
pub fn scrub_records<R: DeserializeOwned>(bytes: &[u8], origin: &str) -> ScrubResult {
    let mut result = scrub_bytes(bytes, origin);
    if result.is_healthy() {
        if let Err(error) = BinaryPageCodec::decode::<R>(bytes, origin) {
            result.structural(None, error.to_string());
        }
    }
    result
}
