//! Table lifecycle across process lifetimes: create, populate, close, reopen.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{Country, countries_schema, init_tracing, open_countries};
use simpledb_store::{
    CachingStrategy, Catalog, Compression, Database, DatabaseConfig, Error, HEADER_SIZE, Table,
    TableExtensions, TableOptions, TablePhase, WriteStrategy,
};
use proptest::prelude::*;
use simpledb_test_utils::{TestDir, strategies};

#[test]
fn test_countries_scenario() {
    init_tracing();
    let dir = TestDir::new();
    let catalog = Arc::new(Catalog::new());

    {
        let countries = open_countries(&dir, &catalog, TableOptions::default());
        countries.insert_one(Country::new("GB", "United Kingdom")).unwrap();

        let err = countries.insert_one(Country::new("GB", "Duplicate")).unwrap_err();
        assert!(matches!(err, Error::UniqueIndexViolation { .. }), "{err}");
        assert_eq!(countries.select().unwrap().len(), 1);

        countries.insert_one(Country::new("FR", "France")).unwrap();
        let rows = countries.select().unwrap();
        assert_eq!(rows.iter().map(|c| c.code.as_str()).collect::<Vec<_>>(), ["GB", "FR"]);
        assert!(countries.contains_key("ix_code", "FR").unwrap());

        countries.close().unwrap();
    }

    let countries = open_countries(&dir, &catalog, TableOptions::default());
    let rows = countries.select().unwrap();
    assert_eq!(rows, vec![
        Country { id: 1, code: "GB".into(), name: "United Kingdom".into() },
        Country { id: 2, code: "FR".into(), name: "France".into() },
    ]);
    assert!(countries.contains_key("ix_code", "GB").unwrap());
    assert_eq!(countries.insert_one(Country::new("DE", "Germany")).unwrap().id, 3);
}

#[test]
fn test_new_table_file_is_header_only() {
    let dir = TestDir::new();
    let catalog = Arc::new(Catalog::new());
    let countries = open_countries(&dir, &catalog, TableOptions::default());
    countries.close().unwrap();

    let bytes = dir.read("countries.dat");
    assert_eq!(bytes.len(), HEADER_SIZE);
    assert_eq!(&bytes[2..4], b"PM");
}

#[test]
fn test_reopen_preserves_rows_under_every_configuration() {
    let configurations = [
        (Compression::None, CachingStrategy::Memory, WriteStrategy::Forced),
        (Compression::Brotli, CachingStrategy::None, WriteStrategy::Forced),
        (Compression::Zstd, CachingStrategy::Lazy, WriteStrategy::Lazy),
        (Compression::Brotli, CachingStrategy::Memory, WriteStrategy::Lazy),
    ];

    for (compression, caching, write_strategy) in configurations {
        let dir = TestDir::new();
        let catalog = Arc::new(Catalog::new());
        let options = TableOptions::builder()
            .page_size(128)
            .compression(compression)
            .caching(caching)
            .write_strategy(write_strategy)
            .build()
            .unwrap();

        let rows: Vec<Country> =
            (0..150).map(|i| Country::new(&format!("C{i:03}"), &format!("Country {i}"))).collect();
        {
            let countries = open_countries(&dir, &catalog, options.clone());
            countries.insert(rows.clone()).unwrap();
            let mut first = countries.select_by_id(1).unwrap().unwrap();
            first.name = "Renamed".into();
            assert_eq!(countries.update(vec![first]).unwrap(), 1);
            countries.delete_by_id(150).unwrap();
            countries.close().unwrap();
        }

        let countries = open_countries(&dir, &catalog, options);
        let stored = countries.select().unwrap();
        assert_eq!(stored.len(), 149, "{compression:?} {caching:?} {write_strategy:?}");
        assert_eq!(stored[0].name, "Renamed");
        assert_eq!(stored[148].code, "C148");
        let stats = countries.stats().unwrap();
        assert!(stats.page_count > 1);
        assert_eq!(stats.primary_sequence, 150);
    }
}

#[test]
fn test_lazy_write_is_flushed_on_drop() {
    let dir = TestDir::new();
    let catalog = Arc::new(Catalog::new());
    let options = TableOptions::builder().write_strategy(WriteStrategy::Lazy).build().unwrap();
    {
        let countries = open_countries(&dir, &catalog, options.clone());
        countries.insert_one(Country::new("GB", "United Kingdom")).unwrap();
        assert_eq!(dir.read("countries.dat").len(), HEADER_SIZE);
    }

    let countries = open_countries(&dir, &catalog, options);
    assert_eq!(countries.count().unwrap(), 1);
}

#[test]
fn test_closed_table_reports_phase() {
    let dir = TestDir::new();
    let catalog = Arc::new(Catalog::new());
    let countries = open_countries(&dir, &catalog, TableOptions::default());
    assert_eq!(countries.phase().unwrap(), TablePhase::Open);

    let clone = countries.clone();
    countries.close().unwrap();
    assert_eq!(clone.phase().unwrap(), TablePhase::Closed);
    assert!(matches!(clone.count(), Err(Error::TableClosed { .. })));
}

#[test]
fn test_file_is_exclusive_while_open() {
    let dir = TestDir::new();
    let countries = open_countries(&dir, &Arc::new(Catalog::new()), TableOptions::default());

    let second = Table::<Country>::open(
        dir.table_file("countries"),
        countries_schema(),
        TableOptions::default(),
        &Arc::new(Catalog::new()),
        TableExtensions::default(),
    );
    assert!(matches!(second, Err(Error::FileLocked { .. })));

    countries.close().unwrap();
    drop(countries);
    assert!(
        Table::<Country>::open(
            dir.table_file("countries"),
            countries_schema(),
            TableOptions::default(),
            &Arc::new(Catalog::new()),
            TableExtensions::default(),
        )
        .is_ok()
    );
}

#[test]
fn test_database_resolves_paths_and_tracks_tables() {
    let dir = TestDir::new();
    let defaults = TableOptions::builder().domain("geo").build().unwrap();
    let config = DatabaseConfig::builder().root(dir.path()).table_defaults(defaults).build();
    let db = Database::open(config).unwrap();

    let countries = db.open_table::<Country>(countries_schema()).unwrap();
    countries.insert_one(Country::new("GB", "United Kingdom")).unwrap();
    assert_eq!(db.open_tables(), vec!["countries".to_string()]);
    assert!(dir.join("geo").join("countries.dat").exists());

    let again = db.open_table::<Country>(countries_schema());
    assert!(matches!(again, Err(Error::TableAlreadyRegistered { .. })));
    assert_eq!(countries.count().unwrap(), 1);

    countries.close().unwrap();
    assert!(db.open_tables().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_reopen_returns_inserted_rows(
        rows in strategies::arb_country_rows(0..40),
        page_size in strategies::arb_page_size(),
        compression in prop_oneof![
            Just(Compression::None),
            Just(Compression::Brotli),
            Just(Compression::Zstd),
        ],
    ) {
        let dir = TestDir::new();
        let catalog = Arc::new(Catalog::new());
        let options =
            TableOptions::builder().page_size(page_size).compression(compression).build().unwrap();
        let rows: Vec<Country> = rows.iter().map(|(code, name)| Country::new(code, name)).collect();

        let inserted = {
            let countries = open_countries(&dir, &catalog, options.clone());
            let inserted = countries.insert(rows).unwrap();
            countries.close().unwrap();
            inserted
        };

        let countries = open_countries(&dir, &catalog, options);
        prop_assert_eq!(countries.select().unwrap(), inserted.clone());
        for row in &inserted {
            prop_assert!(countries.contains_key("ix_code", row.code.as_str()).unwrap());
        }
    }
}
