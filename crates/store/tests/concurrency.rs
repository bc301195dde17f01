//! Concurrent access to tables from several threads.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::{collections::HashSet, sync::Arc, thread, time::Duration};

use common::{Country, open_countries};
use serde::{Deserialize, Serialize};
use simpledb_store::{
    Catalog, ColumnDef, ColumnKind, ColumnValue, Error, ForeignKeyDef, Record, Table,
    TableExtensions, TableOptions, TableSchema, WriteStrategy,
};
use simpledb_test_utils::TestDir;

const THREADS: usize = 8;
const PER_THREAD: usize = 25;

#[test]
fn test_concurrent_inserts_get_distinct_ids() {
    let dir = TestDir::new();
    let countries = open_countries(&dir, &Arc::new(Catalog::new()), TableOptions::default());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let countries = countries.clone();
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|i| {
                        countries.insert_one(Country::new(&format!("T{t}-{i}"), "x")).unwrap().id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: HashSet<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    assert_eq!(ids.len(), THREADS * PER_THREAD);
    assert_eq!(countries.count().unwrap(), THREADS * PER_THREAD);
    assert_eq!(countries.stats().unwrap().primary_sequence, (THREADS * PER_THREAD) as i64);
}

#[test]
fn test_racing_duplicate_inserts_admit_one() {
    let dir = TestDir::new();
    let countries = open_countries(&dir, &Arc::new(Catalog::new()), TableOptions::default());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let countries = countries.clone();
            thread::spawn(move || countries.insert_one(Country::new("GB", "United Kingdom")))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::UniqueIndexViolation { .. }))
    );
    assert_eq!(countries.count().unwrap(), 1);
}

#[test]
fn test_readers_see_whole_writes() {
    let dir = TestDir::new();
    let countries = open_countries(&dir, &Arc::new(Catalog::new()), TableOptions::default());

    let writer = {
        let countries = countries.clone();
        thread::spawn(move || {
            for i in 0..50 {
                let batch = vec![
                    Country::new(&format!("A{i}"), "first"),
                    Country::new(&format!("B{i}"), "second"),
                ];
                countries.insert(batch).unwrap();
            }
        })
    };
    let reader = {
        let countries = countries.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                assert_eq!(countries.select().unwrap().len() % 2, 0);
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(countries.count().unwrap(), 100);
}

/// A team names its captain; a player names its team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Member {
    id: i64,
    link: i64,
}

impl Record for Member {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column(&self, name: &str) -> Option<ColumnValue> {
        (name == "link").then_some(ColumnValue::I64(self.link))
    }

    fn set_column(&mut self, name: &str, value: ColumnValue) -> bool {
        match (name, value.as_i64()) {
            ("link", Some(link)) => {
                self.link = link;
                true
            },
            _ => false,
        }
    }
}

fn open_linked(dir: &TestDir, catalog: &Arc<Catalog>, name: &str, target: &str) -> Table<Member> {
    let schema = TableSchema::builder()
        .name(name)
        .columns(vec![ColumnDef::new("link", ColumnKind::I64)])
        .foreign_keys(vec![ForeignKeyDef::new("link", target).allow_default()])
        .build();
    let options = TableOptions::builder()
        .write_strategy(WriteStrategy::Lazy)
        .lock_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    Table::open(dir.table_file(name), schema, options, catalog, TableExtensions::default()).unwrap()
}

/// Links a new row in `near` to a new row in `far` both ways, then deletes
/// both. Each delete resets the reference held by the other table.
fn link_and_unlink(near: &Table<Member>, far: &Table<Member>) -> Result<(), Error> {
    let mut a = near.insert_one(Member { id: 0, link: 0 })?;
    let b = far.insert_one(Member { id: 0, link: a.id })?;
    a.link = b.id;
    near.update(vec![a.clone()])?;

    far.delete(&[b])?;
    let a = near.select_by_id(a.id)?.expect("row still stored");
    assert_eq!(a.link, 0);
    near.delete(&[a])?;
    Ok(())
}

#[test]
fn test_mutually_referencing_tables_do_not_deadlock() {
    let dir = TestDir::new();
    let catalog = Arc::new(Catalog::new());
    let teams = open_linked(&dir, &catalog, "teams", "players");
    let players = open_linked(&dir, &catalog, "players", "teams");

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let (teams, players) = (teams.clone(), players.clone());
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    if t % 2 == 0 {
                        link_and_unlink(&teams, &players)?;
                    } else {
                        link_and_unlink(&players, &teams)?;
                    }
                }
                Ok::<(), Error>(())
            })
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap();
        assert!(!matches!(result, Err(Error::LockTimeout { .. })), "{result:?}");
        result.unwrap();
    }
    assert_eq!(teams.count().unwrap(), 0);
    assert_eq!(players.count().unwrap(), 0);
}
