//! Fixed 53-byte table file header.
//!
//! All integers are little-endian.
//!
//! ```text
//! Offset  Size  Field
//! 0       2     format version (u16)
//! 2       2     magic "PM"
//! 4       8     primary sequence (i64)
//! 12      8     secondary sequence (i64)
//! 20      12    reserved (3 x i32); slot 0 holds the reached seed version
//! 32      4     page size (i32)
//! 36      1     compression algorithm (u8)
//! 37      4     record count (i32)
//! 41      4     uncompressed length (i32)
//! 45      4     stored length (i32)
//! 49      4     page count (i32)
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    codec::Compression,
    error::{Error, Result},
};

/// Table file marker at offset 2.
pub const MAGIC: [u8; 2] = *b"PM";

/// Header size in bytes. Page entries start right after it.
pub const HEADER_SIZE: usize = 53;

/// Format version written by this build.
pub const CURRENT_FORMAT_VERSION: u16 = 2;

const OFFSET_MAGIC: usize = 2;
const OFFSET_PRIMARY_SEQUENCE: usize = 4;
const OFFSET_SECONDARY_SEQUENCE: usize = 12;
const OFFSET_RESERVED: usize = 20;
const OFFSET_PAGE_SIZE: usize = 32;
const OFFSET_COMPRESSION: usize = 36;
const OFFSET_RECORD_COUNT: usize = 37;
const OFFSET_UNCOMPRESSED_LENGTH: usize = 41;
const OFFSET_STORED_LENGTH: usize = 45;
const OFFSET_PAGE_COUNT: usize = 49;

/// Decoded table file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    /// On-disk format version.
    pub format_version: u16,
    /// Last issued primary key.
    pub primary_sequence: i64,
    /// Auxiliary counter.
    pub secondary_sequence: i64,
    /// Reserved slots. Slot 0 carries the reached seed version.
    pub reserved: [i32; 3],
    /// Physical page size in bytes.
    pub page_size: i32,
    /// Algorithm the stored payload is compressed with.
    pub compression: Compression,
    /// Number of stored rows.
    pub record_count: i32,
    /// Payload length before compression.
    pub uncompressed_length: i32,
    /// Payload length as written across pages.
    pub stored_length: i32,
    /// Number of page entries following the header.
    pub page_count: i32,
}

impl TableHeader {
    /// Creates the header of an empty table.
    pub fn new(page_size: i32) -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            primary_sequence: 0,
            secondary_sequence: 0,
            reserved: [0; 3],
            page_size,
            compression: Compression::None,
            record_count: 0,
            uncompressed_length: 0,
            stored_length: 0,
            page_count: 0,
        }
    }

    /// Serializes the header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        LittleEndian::write_u16(&mut buf[0..OFFSET_MAGIC], self.format_version);
        buf[OFFSET_MAGIC..OFFSET_PRIMARY_SEQUENCE].copy_from_slice(&MAGIC);
        LittleEndian::write_i64(
            &mut buf[OFFSET_PRIMARY_SEQUENCE..OFFSET_SECONDARY_SEQUENCE],
            self.primary_sequence,
        );
        LittleEndian::write_i64(
            &mut buf[OFFSET_SECONDARY_SEQUENCE..OFFSET_RESERVED],
            self.secondary_sequence,
        );
        LittleEndian::write_i32_into(&self.reserved, &mut buf[OFFSET_RESERVED..OFFSET_PAGE_SIZE]);
        LittleEndian::write_i32(&mut buf[OFFSET_PAGE_SIZE..OFFSET_COMPRESSION], self.page_size);
        buf[OFFSET_COMPRESSION] = self.compression.as_byte();
        LittleEndian::write_i32(
            &mut buf[OFFSET_RECORD_COUNT..OFFSET_UNCOMPRESSED_LENGTH],
            self.record_count,
        );
        LittleEndian::write_i32(
            &mut buf[OFFSET_UNCOMPRESSED_LENGTH..OFFSET_STORED_LENGTH],
            self.uncompressed_length,
        );
        LittleEndian::write_i32(
            &mut buf[OFFSET_STORED_LENGTH..OFFSET_PAGE_COUNT],
            self.stored_length,
        );
        LittleEndian::write_i32(&mut buf[OFFSET_PAGE_COUNT..HEADER_SIZE], self.page_count);
        buf
    }

    /// Parses a header, checking the magic marker and field ranges.
    ///
    /// The format version is returned as stored; callers pick a reader for
    /// it through [`VersionedCodecFactory`](crate::VersionedCodecFactory).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if `buf` is shorter than [`HEADER_SIZE`]
    /// or a field is out of range, and [`Error::InvalidMagic`] if the marker
    /// does not match.
    pub fn from_bytes(buf: &[u8], origin: &str) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Corrupted {
                origin: origin.to_string(),
                reason: format!("file is {} bytes, header needs {HEADER_SIZE}", buf.len()),
            });
        }

        let found = [buf[OFFSET_MAGIC], buf[OFFSET_MAGIC + 1]];
        if found != MAGIC {
            return Err(Error::InvalidMagic { origin: origin.to_string(), expected: MAGIC, found });
        }

        let compression_byte = buf[OFFSET_COMPRESSION];
        let compression = Compression::from_byte(compression_byte).ok_or_else(|| {
            Error::Corrupted {
                origin: origin.to_string(),
                reason: format!("unknown compression algorithm {compression_byte}"),
            }
        })?;

        let mut reserved = [0i32; 3];
        LittleEndian::read_i32_into(&buf[OFFSET_RESERVED..OFFSET_PAGE_SIZE], &mut reserved);

        let header = Self {
            format_version: LittleEndian::read_u16(&buf[0..OFFSET_MAGIC]),
            primary_sequence: LittleEndian::read_i64(&buf[OFFSET_PRIMARY_SEQUENCE..]),
            secondary_sequence: LittleEndian::read_i64(&buf[OFFSET_SECONDARY_SEQUENCE..]),
            reserved,
            page_size: LittleEndian::read_i32(&buf[OFFSET_PAGE_SIZE..]),
            compression,
            record_count: LittleEndian::read_i32(&buf[OFFSET_RECORD_COUNT..]),
            uncompressed_length: LittleEndian::read_i32(&buf[OFFSET_UNCOMPRESSED_LENGTH..]),
            stored_length: LittleEndian::read_i32(&buf[OFFSET_STORED_LENGTH..]),
            page_count: LittleEndian::read_i32(&buf[OFFSET_PAGE_COUNT..]),
        };

        for (field, value) in [
            ("page size", header.page_size),
            ("record count", header.record_count),
            ("uncompressed length", header.uncompressed_length),
            ("stored length", header.stored_length),
            ("page count", header.page_count),
        ] {
            if value < 0 {
                return Err(Error::Corrupted {
                    origin: origin.to_string(),
                    reason: format!("negative {field} {value}"),
                });
            }
        }
        if header.page_size == 0 && header.page_count > 0 {
            return Err(Error::Corrupted {
                origin: origin.to_string(),
                reason: "zero page size with pages present".to_string(),
            });
        }

        Ok(header)
    }

    /// Highest seed-data version applied to this table.
    #[inline]
    pub fn seed_version(&self) -> u32 {
        u32::try_from(self.reserved[0]).unwrap_or(0)
    }

    /// Records the highest seed-data version applied.
    #[inline]
    pub fn set_seed_version(&mut self, version: u32) {
        self.reserved[0] = i32::try_from(version).unwrap_or(i32::MAX);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn populated() -> TableHeader {
        TableHeader {
            format_version: CURRENT_FORMAT_VERSION,
            primary_sequence: 42,
            secondary_sequence: -7,
            reserved: [3, 0, 0],
            page_size: 4096,
            compression: Compression::Brotli,
            record_count: 10,
            uncompressed_length: 900,
            stored_length: 300,
            page_count: 1,
        }
    }

    #[test]
    fn test_field_offsets() {
        let bytes = populated().to_bytes();
        assert_eq!(&bytes[0..2], &CURRENT_FORMAT_VERSION.to_le_bytes());
        assert_eq!(&bytes[2..4], b"PM");
        assert_eq!(&bytes[4..12], &42i64.to_le_bytes());
        assert_eq!(&bytes[12..20], &(-7i64).to_le_bytes());
        assert_eq!(&bytes[20..24], &3i32.to_le_bytes());
        assert_eq!(&bytes[24..32], &[0u8; 8]);
        assert_eq!(&bytes[32..36], &4096i32.to_le_bytes());
        assert_eq!(bytes[36], 1);
        assert_eq!(&bytes[37..41], &10i32.to_le_bytes());
        assert_eq!(&bytes[41..45], &900i32.to_le_bytes());
        assert_eq!(&bytes[45..49], &300i32.to_le_bytes());
        assert_eq!(&bytes[49..53], &1i32.to_le_bytes());
    }

    #[test]
    fn test_parse_matches_written_header() {
        let header = populated();
        let parsed = TableHeader::from_bytes(&header.to_bytes(), "t.dat").unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.seed_version(), 3);
    }

    #[test]
    fn test_every_magic_byte_is_checked() {
        for offset in [2, 3] {
            let mut bytes = populated().to_bytes();
            bytes[offset] ^= 0x01;
            let err = TableHeader::from_bytes(&bytes, "t.dat").unwrap_err();
            assert!(matches!(err, Error::InvalidMagic { .. }), "offset {offset}: {err}");
            assert!(err.is_corruption());
        }
    }

    #[test]
    fn test_short_buffer_is_corrupt() {
        let bytes = populated().to_bytes();
        let err = TableHeader::from_bytes(&bytes[..HEADER_SIZE - 1], "t.dat").unwrap_err();
        assert!(matches!(err, Error::Corrupted { .. }));
    }

    #[test]
    fn test_unknown_compression_byte_is_corrupt() {
        let mut bytes = populated().to_bytes();
        bytes[36] = 0xEE;
        assert!(matches!(TableHeader::from_bytes(&bytes, "t.dat"), Err(Error::Corrupted { .. })));
    }

    #[test]
    fn test_negative_length_is_corrupt() {
        let mut header = populated();
        header.stored_length = -1;
        assert!(TableHeader::from_bytes(&header.to_bytes(), "t.dat").is_err());
    }
}
