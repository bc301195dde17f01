//! Translation between a row collection and the table file image.
//!
//! The whole collection is serialized as one postcard blob, optionally
//! compressed, and split across fixed-size pages after the 53-byte header.
//! See [`header`](crate::header) and [`page`] for the byte layouts.

mod compression;
pub mod page;
mod versioned;

pub use compression::Compression;
pub(crate) use compression::{compress, decompress};
use serde::{Serialize, de::DeserializeOwned};
use snafu::ResultExt;
use tracing::debug;
pub use versioned::{FormatCodec, FormatV1, FormatV2, VersionedCodecFactory};

use crate::{
    config::TableOptions,
    error::{CodecSnafu, Error, Result},
    header::{HEADER_SIZE, TableHeader},
};

/// Encodes and decodes table file images for one table's physical settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryPageCodec {
    page_size: usize,
    compression: Compression,
    level: i32,
}

impl BinaryPageCodec {
    /// Creates a codec with explicit settings.
    pub fn new(page_size: usize, compression: Compression, level: i32) -> Self {
        Self { page_size: page_size.max(1), compression, level }
    }

    /// Creates a codec from validated table options.
    pub fn from_options(options: &TableOptions) -> Self {
        Self::new(options.page_size, options.compression, options.effective_compression_level())
    }

    /// Physical page size.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Serializes `records` into a complete file image.
    ///
    /// The sequence and reserved fields of `header` are written as given;
    /// the layout fields (format version, page size, compression, lengths,
    /// counts) are overwritten to describe the new image, so on success
    /// `header` matches the returned bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if serialization fails and
    /// [`Error::PayloadTooLarge`] if the payload exceeds the 32-bit length
    /// fields.
    pub fn encode<R: Serialize>(
        &self,
        header: &mut TableHeader,
        records: &[R],
        origin: &str,
    ) -> Result<Vec<u8>> {
        let serialized = if records.is_empty() {
            Vec::new()
        } else {
            postcard::to_allocvec(records).context(CodecSnafu { origin })?
        };
        let uncompressed_length = checked_len(serialized.len(), origin)?;
        let record_count = checked_len(records.len(), origin)?;

        let (compression, stored) = compress(self.compression, self.level, &serialized);
        let stored_length = checked_len(stored.len(), origin)?;

        let writer = VersionedCodecFactory::writer();
        let mut out = Vec::with_capacity(HEADER_SIZE + stored.len() + 64);
        out.resize(HEADER_SIZE, 0);
        let page_count = writer.write_payload(&mut out, &stored, self.page_size);

        header.format_version = writer.version();
        header.page_size = checked_len(self.page_size, origin)?;
        header.compression = compression;
        header.record_count = record_count;
        header.uncompressed_length = uncompressed_length;
        header.stored_length = stored_length;
        header.page_count = checked_len(page_count, origin)?;
        out[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

        debug!(
            origin,
            records = record_count,
            stored_length,
            page_count,
            ?compression,
            "Encoded table image"
        );
        Ok(out)
    }

    /// Parses a complete file image.
    ///
    /// # Errors
    ///
    /// Returns a corruption error (see [`Error::is_corruption`]) for any
    /// structural fault: bad magic, unsupported version, page sequence or
    /// count faults, length mismatches, or undecodable rows.
    pub fn decode<R: DeserializeOwned>(
        bytes: &[u8],
        origin: &str,
    ) -> Result<(TableHeader, Vec<R>)> {
        let header = TableHeader::from_bytes(bytes, origin)?;
        let reader = VersionedCodecFactory::reader(header.format_version, origin)?;

        if header.stored_length == 0 {
            if header.record_count != 0 {
                return Err(Error::RecordCountMismatch {
                    origin: origin.to_string(),
                    declared: header.record_count,
                    actual: 0,
                });
            }
            return Ok((header, Vec::new()));
        }

        let stored = reader.read_payload(bytes, &header, origin)?;
        let raw = decompress(header.compression, &stored, header.uncompressed_length, origin)?;
        let records: Vec<R> = postcard::from_bytes(&raw).context(CodecSnafu { origin })?;

        if records.len() != header.record_count as usize {
            return Err(Error::RecordCountMismatch {
                origin: origin.to_string(),
                declared: header.record_count,
                actual: records.len(),
            });
        }
        Ok((header, records))
    }
}

fn checked_len(len: usize, origin: &str) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::PayloadTooLarge { table: origin.to_string(), size: len })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use byteorder::{ByteOrder, LittleEndian};
    use proptest::prelude::*;
    use serde::Deserialize;

    use super::*;
    use crate::header::MAGIC;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Country {
        id: i64,
        code: String,
        name: String,
    }

    fn countries(n: usize) -> Vec<Country> {
        (0..n)
            .map(|i| Country {
                id: i as i64 + 1,
                code: format!("C{i:03}"),
                name: format!("Country number {i}"),
            })
            .collect()
    }

    fn encode(codec: &BinaryPageCodec, rows: &[Country]) -> (TableHeader, Vec<u8>) {
        let mut header = TableHeader::new(codec.page_size() as i32);
        let bytes = codec.encode(&mut header, rows, "t.dat").unwrap();
        (header, bytes)
    }

    #[test]
    fn test_empty_collection_has_no_pages() {
        let codec = BinaryPageCodec::new(64, Compression::Brotli, 5);
        let (header, bytes) = encode(&codec, &[]);
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(header.stored_length, 0);
        assert_eq!(header.page_count, 0);

        let (_, rows) = BinaryPageCodec::decode::<Country>(&bytes, "t.dat").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_header_describes_image() {
        let codec = BinaryPageCodec::new(64, Compression::None, 0);
        let rows = countries(10);
        let (header, bytes) = encode(&codec, &rows);

        assert_eq!(&bytes[2..4], &MAGIC);
        assert_eq!(header.record_count, 10);
        assert_eq!(header.uncompressed_length, header.stored_length);
        assert_eq!(header.page_count as usize, (header.stored_length as usize).div_ceil(64));
        assert_eq!(TableHeader::from_bytes(&bytes, "t.dat").unwrap(), header);
    }

    #[test]
    fn test_sequences_are_preserved() {
        let codec = BinaryPageCodec::new(128, Compression::None, 0);
        let mut header = TableHeader::new(128);
        header.primary_sequence = 99;
        header.secondary_sequence = 7;
        header.set_seed_version(2);
        let bytes = codec.encode(&mut header, &countries(3), "t.dat").unwrap();

        let (decoded, _) = BinaryPageCodec::decode::<Country>(&bytes, "t.dat").unwrap();
        assert_eq!(decoded.primary_sequence, 99);
        assert_eq!(decoded.secondary_sequence, 7);
        assert_eq!(decoded.seed_version(), 2);
    }

    #[test]
    fn test_compressed_image_is_smaller() {
        let rows = countries(200);
        let (_, raw) = encode(&BinaryPageCodec::new(512, Compression::None, 0), &rows);
        let (header, brotli) = encode(&BinaryPageCodec::new(512, Compression::Brotli, 5), &rows);
        assert_eq!(header.compression, Compression::Brotli);
        assert!(brotli.len() < raw.len());
    }

    #[test]
    fn test_legacy_image_is_readable() {
        let rows = countries(20);
        let payload = postcard::to_allocvec(&rows).unwrap();
        let mut header = TableHeader::new(64);
        header.format_version = 1;
        header.record_count = rows.len() as i32;
        header.uncompressed_length = payload.len() as i32;
        header.stored_length = payload.len() as i32;

        let mut bytes = vec![0u8; HEADER_SIZE];
        header.page_count = FormatV1.write_payload(&mut bytes, &payload, 64) as i32;
        bytes[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

        let (decoded_header, decoded) =
            BinaryPageCodec::decode::<Country>(&bytes, "t.dat").unwrap();
        assert_eq!(decoded_header.format_version, 1);
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let (_, mut bytes) = encode(&BinaryPageCodec::new(64, Compression::None, 0), &countries(2));
        LittleEndian::write_u16(&mut bytes[0..2], 77);
        let err = BinaryPageCodec::decode::<Country>(&bytes, "t.dat").unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { version: 77, .. }));
    }

    #[test]
    fn test_record_count_mismatch_is_detected() {
        let (_, mut bytes) = encode(&BinaryPageCodec::new(64, Compression::None, 0), &countries(4));
        LittleEndian::write_i32(&mut bytes[37..41], 5);
        let err = BinaryPageCodec::decode::<Country>(&bytes, "t.dat").unwrap_err();
        assert!(matches!(err, Error::RecordCountMismatch { declared: 5, actual: 4, .. }));
    }

    #[test]
    fn test_stored_length_mismatch_is_detected() {
        let codec = BinaryPageCodec::new(64, Compression::None, 0);
        let (header, mut bytes) = encode(&codec, &countries(4));
        LittleEndian::write_i32(&mut bytes[45..49], header.stored_length + 1);
        let err = BinaryPageCodec::decode::<Country>(&bytes, "t.dat").unwrap_err();
        assert!(matches!(err, Error::StoredLengthMismatch { .. }));
    }

    #[test]
    fn test_decompressed_length_mismatch_is_detected() {
        let (header, mut bytes) =
            encode(&BinaryPageCodec::new(4096, Compression::Brotli, 5), &countries(100));
        assert_eq!(header.compression, Compression::Brotli);
        LittleEndian::write_i32(&mut bytes[41..45], header.uncompressed_length - 3);
        let err = BinaryPageCodec::decode::<Country>(&bytes, "t.dat").unwrap_err();
        assert!(matches!(err, Error::DecompressedLengthMismatch { .. }));
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(
            rows in proptest::collection::vec((any::<i64>(), "[A-Z]{2}", ".{0,40}"), 0..60),
            page_size in 64usize..1024,
            compression in prop_oneof![
                Just(Compression::None),
                Just(Compression::Brotli),
                Just(Compression::Zstd),
            ],
        ) {
            let rows: Vec<Country> = rows
                .into_iter()
                .map(|(id, code, name)| Country { id, code, name })
                .collect();
            let codec = BinaryPageCodec::new(page_size, compression, compression.default_level());
            let (_, bytes) = encode(&codec, &rows);
            let (_, decoded) = BinaryPageCodec::decode::<Country>(&bytes, "t.dat").unwrap();
            prop_assert_eq!(decoded, rows);
        }
    }
}
