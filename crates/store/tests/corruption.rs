//! Damaged table files are rejected on open and leave no table behind.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use common::{Country, countries_schema, open_countries};
use simpledb_store::{
    Catalog, Error, HEADER_SIZE, Table, TableExtensions, TableOptions, integrity,
};
use simpledb_test_utils::TestDir;

fn populated(dir: &TestDir) -> Vec<u8> {
    let options = TableOptions::builder().page_size(64).build().unwrap();
    let countries = open_countries(dir, &Arc::new(Catalog::new()), options);
    let rows =
        (0..20).map(|i| Country::new(&format!("C{i:02}"), &format!("Country {i}"))).collect();
    countries.insert(rows).unwrap();
    countries.close().unwrap();
    dir.read("countries.dat")
}

fn reopen(dir: &TestDir, catalog: &Arc<Catalog>) -> Result<Table<Country>, Error> {
    Table::open(
        dir.table_file("countries"),
        countries_schema(),
        TableOptions::default(),
        catalog,
        TableExtensions::default(),
    )
}

#[test]
fn test_flipped_magic_fails_open() {
    let dir = TestDir::new();
    let mut bytes = populated(&dir);
    bytes[3] ^= 0xFF;
    dir.write("countries.dat", &bytes);

    let catalog = Arc::new(Catalog::new());
    let err = reopen(&dir, &catalog).unwrap_err();
    assert!(matches!(err, Error::InvalidMagic { .. }), "{err}");
    assert!(err.is_corruption());
    assert!(catalog.open_tables().is_empty());
}

#[test]
fn test_wrong_page_number_fails_open() {
    let dir = TestDir::new();
    let mut bytes = populated(&dir);
    LittleEndian::write_i32(&mut bytes[HEADER_SIZE..HEADER_SIZE + 4], 2);
    dir.write("countries.dat", &bytes);

    let err = reopen(&dir, &Arc::new(Catalog::new())).unwrap_err();
    assert!(matches!(err, Error::PageOutOfSequence { expected: 1, found: 2, .. }), "{err}");
}

#[test]
fn test_unsupported_version_fails_open() {
    let dir = TestDir::new();
    let mut bytes = populated(&dir);
    LittleEndian::write_u16(&mut bytes[0..2], 9);
    dir.write("countries.dat", &bytes);

    let err = reopen(&dir, &Arc::new(Catalog::new())).unwrap_err();
    assert!(matches!(err, Error::UnsupportedVersion { version: 9, .. }), "{err}");
}

#[test]
fn test_truncated_file_fails_open() {
    let dir = TestDir::new();
    let bytes = populated(&dir);
    dir.write("countries.dat", &bytes[..bytes.len() - 10]);
    assert!(reopen(&dir, &Arc::new(Catalog::new())).unwrap_err().is_corruption());
}

#[test]
fn test_failed_open_releases_file() {
    let dir = TestDir::new();
    let good = populated(&dir);
    let mut bad = good.clone();
    bad[2] = 0;
    dir.write("countries.dat", &bad);

    let catalog = Arc::new(Catalog::new());
    assert!(reopen(&dir, &catalog).is_err());

    dir.write("countries.dat", &good);
    let countries = reopen(&dir, &catalog).unwrap();
    assert_eq!(countries.count().unwrap(), 20);
}

#[test]
fn test_scrubber_agrees_with_open() {
    let dir = TestDir::new();
    let bytes = populated(&dir);
    let clean = integrity::scrub_file(dir.table_file("countries")).unwrap();
    assert!(clean.is_healthy());
    assert_eq!(clean.header.unwrap().record_count, 20);

    let mut bad = bytes;
    LittleEndian::write_i32(&mut bad[HEADER_SIZE..HEADER_SIZE + 4], 7);
    let report = integrity::scrub_records::<Country>(&bad, "countries.dat");
    assert!(!report.is_healthy());
}
