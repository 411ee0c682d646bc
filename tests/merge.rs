//! Database merge: whole-table copies, row conflicts, schema mismatches.

use msidb::storage::memory::MemoryContainer;
use msidb::{Database, Error};

fn db_with(rows: &[(i32, &str)]) -> Database {
    let db = Database::create_memory(MemoryContainer::new()).unwrap();
    db.exec("CREATE TABLE `t` (`k` SHORT, `v` CHAR(32) PRIMARY KEY `k`)").unwrap();
    for (k, v) in rows {
        db.exec(&format!("INSERT INTO `t` (`k`,`v`) VALUES ({k},'{v}')"))
            .unwrap();
    }
    db
}

fn select_all(db: &Database, sql: &str) -> Vec<Vec<String>> {
    let mut query = db.query(sql).unwrap();
    query.execute(None).unwrap();
    let cols = query.column_count().unwrap() as usize;
    let mut out = Vec::new();
    while let Some(rec) = query.fetch().unwrap() {
        out.push((1..=cols).map(|i| rec.get_string(i)).collect());
    }
    out
}

#[test]
fn test_merge_copies_missing_tables_and_rows() {
    let mut dst = Database::create_memory(MemoryContainer::new()).unwrap();
    let src = db_with(&[(1, "one"), (2, "two")]);

    dst.merge(&src, "MergeErrors").unwrap();
    assert_eq!(
        select_all(&dst, "SELECT * FROM `t`"),
        vec![vec!["1", "one"], vec!["2", "two"]]
    );
    // No conflicts, no error table.
    assert!(dst.query("SELECT * FROM `MergeErrors`").is_err());
}

#[test]
fn test_merge_identical_rows_are_not_conflicts() {
    let mut dst = db_with(&[(1, "one")]);
    let src = db_with(&[(1, "one"), (2, "two")]);

    dst.merge(&src, "MergeErrors").unwrap();
    assert_eq!(select_all(&dst, "SELECT * FROM `t`").len(), 2);
}

#[test]
fn test_merge_conflicting_rows_counted() {
    let mut dst = db_with(&[(1, "mine"), (3, "three")]);
    let src = db_with(&[(1, "theirs"), (2, "two")]);

    let result = dst.merge(&src, "MergeErrors");
    assert!(matches!(result, Err(Error::FunctionFailed(_))));

    // The non-conflicting row still arrived; the conflicting one kept the
    // destination value.
    assert_eq!(
        select_all(&dst, "SELECT * FROM `t`"),
        vec![
            vec!["1", "mine"],
            vec!["2", "two"],
            vec!["3", "three"],
        ]
    );
    assert_eq!(
        select_all(&dst, "SELECT * FROM `MergeErrors`"),
        vec![vec!["t", "1"]]
    );
}

#[test]
fn test_merge_schema_mismatch_aborts() {
    let mut dst = Database::create_memory(MemoryContainer::new()).unwrap();
    dst.exec("CREATE TABLE `t` (`k` SHORT, `v` LONG PRIMARY KEY `k`)").unwrap();
    let src = db_with(&[(1, "one")]);

    assert!(matches!(
        dst.merge(&src, "MergeErrors"),
        Err(Error::DatatypeMismatch(_))
    ));
}

#[test]
fn test_merge_codepage_mismatch_aborts() {
    let mut dst = Database::create_memory(MemoryContainer::new()).unwrap();
    dst.set_codepage(1252).unwrap();
    let src = db_with(&[(1, "one")]);

    assert!(matches!(
        dst.merge(&src, "MergeErrors"),
        Err(Error::DatatypeMismatch(_))
    ));
}
