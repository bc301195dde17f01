//! Records, schemas and helpers shared by the integration tests.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use simpledb_store::{
    Catalog, ColumnDef, ColumnKind, ColumnValue, ForeignKeyDef, IndexDef, Record, Table,
    TableExtensions, TableOptions, TableSchema,
};
use simpledb_test_utils::TestDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: i64,
    pub code: String,
    pub name: String,
}

impl Country {
    pub fn new(code: &str, name: &str) -> Self {
        Self { id: 0, code: code.to_string(), name: name.to_string() }
    }
}

impl Record for Country {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column(&self, name: &str) -> Option<ColumnValue> {
        match name {
            "code" => Some(self.code.as_str().into()),
            "name" => Some(self.name.as_str().into()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: i64,
    pub country_id: i64,
    pub name: String,
}

impl City {
    pub fn new(country_id: i64, name: &str) -> Self {
        Self { id: 0, country_id, name: name.to_string() }
    }
}

impl Record for City {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column(&self, name: &str) -> Option<ColumnValue> {
        match name {
            "country_id" => Some(ColumnValue::I64(self.country_id)),
            "name" => Some(self.name.as_str().into()),
            _ => None,
        }
    }

    fn set_column(&mut self, name: &str, value: ColumnValue) -> bool {
        match (name, value) {
            ("country_id", ColumnValue::I64(id)) => {
                self.country_id = id;
                true
            },
            _ => false,
        }
    }
}

pub fn countries_schema() -> TableSchema {
    TableSchema::builder()
        .name("countries")
        .columns(vec![
            ColumnDef::new("code", ColumnKind::Text),
            ColumnDef::new("name", ColumnKind::Text),
        ])
        .indexes(vec![IndexDef::unique("ix_code", ["code"])])
        .build()
}

/// Cities reference countries through `country_id`, with unique names per country.
pub fn cities_schema(fk: ForeignKeyDef) -> TableSchema {
    TableSchema::builder()
        .name("cities")
        .columns(vec![
            ColumnDef::new("country_id", ColumnKind::I64),
            ColumnDef::new("name", ColumnKind::Text),
        ])
        .indexes(vec![IndexDef::unique("ix_country_name", ["country_id", "name"])])
        .foreign_keys(vec![fk])
        .build()
}

pub fn open_countries(
    dir: &TestDir,
    catalog: &Arc<Catalog>,
    options: TableOptions,
) -> Table<Country> {
    Table::open(
        dir.table_file("countries"),
        countries_schema(),
        options,
        catalog,
        TableExtensions::default(),
    )
    .expect("open countries")
}

pub fn open_cities(dir: &TestDir, catalog: &Arc<Catalog>, fk: ForeignKeyDef) -> Table<City> {
    Table::open(
        dir.table_file("cities"),
        cities_schema(fk),
        TableOptions::default(),
        catalog,
        TableExtensions::default(),
    )
    .expect("open cities")
}

/// Routes store logs to the test harness. `RUST_LOG=simpledb_store=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
