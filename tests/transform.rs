//! Transform application: hand-crafted difference storages against a host
//! database.

use msidb::storage::Container;
use msidb::storage::memory::MemoryContainer;
use msidb::storage::name::encode;
use msidb::strings::{Persistence, StringPool};
use msidb::{Database, OpenMode};

fn le16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Type words used by the crafted `_Columns` rows, biased for storage.
const TYPE_INT16_KEY: u16 = 0x2102; // VALID | KEY | width 2
const TYPE_STRING32: u16 = 0x1920; // VALID | STRING | NULLABLE | width 32
const TYPE_BINARY: u16 = 0x9900; // binary, nullable

fn bias_type(bits: u16) -> u16 {
    bits.wrapping_add(0x8000)
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

/// Build the S4-style transform: update MOO row 1, delete MOO row 3, and
/// create table AAR with two rows, one carrying a binary stream.
fn build_transform() -> MemoryContainer {
    let mut st = StringPool::new();
    let s_c = st.intern("c", 1, Persistence::Persistent);
    let s_aar = st.intern("AAR", 1, Persistence::Persistent);
    let s_k = st.intern("k", 1, Persistence::Persistent);
    let s_v = st.intern("v", 1, Persistence::Persistent);
    let s_d = st.intern("d", 1, Persistence::Persistent);
    let s_vw = st.intern("vw", 1, Persistence::Persistent);
    let s_bmw = st.intern("bmw", 1, Persistence::Persistent);
    let (data, pool_blob, _) = st.serialize();

    let mut container = MemoryContainer::new();
    container
        .write_stream(&encode(true, "_StringPool"), &pool_blob)
        .unwrap();
    container
        .write_stream(&encode(true, "_StringData"), &data)
        .unwrap();

    // _Tables: full insert of "AAR".
    let mut tables = Vec::new();
    le16(&mut tables, 0x0101);
    le16(&mut tables, s_aar as u16);
    container
        .write_stream(&encode(true, "_Tables"), &tables)
        .unwrap();

    // _Columns: three full inserts with null Number (fixed up on apply).
    let mut columns = Vec::new();
    for (name, ty) in [
        (s_k, TYPE_INT16_KEY),
        (s_v, TYPE_STRING32),
        (s_d, TYPE_BINARY),
    ] {
        le16(&mut columns, 0x0401);
        le16(&mut columns, s_aar as u16); // Table
        le16(&mut columns, 0); // Number: null
        le16(&mut columns, name as u16); // Name
        le16(&mut columns, bias_type(ty)); // Type
    }
    container
        .write_stream(&encode(true, "_Columns"), &columns)
        .unwrap();

    // MOO: sparse update of row k=1 (set v='c'), then delete of row k=3.
    let mut moo = Vec::new();
    le16(&mut moo, 0x0002); // column 2 present
    le16(&mut moo, 0x8001); // k = 1
    le16(&mut moo, s_c as u16); // v = 'c'
    le16(&mut moo, 0x0000); // delete
    le16(&mut moo, 0x8003); // k = 3
    container.write_stream(&encode(true, "MOO"), &moo).unwrap();

    // AAR: two full-row inserts; row 1 references a binary stream.
    let mut aar = Vec::new();
    le16(&mut aar, 0x0301);
    le16(&mut aar, 0x8001);
    le16(&mut aar, s_vw as u16);
    le16(&mut aar, 0x0001);
    le16(&mut aar, 0x0301);
    le16(&mut aar, 0x8002);
    le16(&mut aar, s_bmw as u16);
    le16(&mut aar, 0x0000);
    container.write_stream(&encode(true, "AAR"), &aar).unwrap();
    container
        .write_stream(&encode(false, "AAR.1"), b"wheel-data")
        .unwrap();

    // A substorage that must survive into the host on apply.
    container
        .create_storage(&encode(false, "SubImage"))
        .unwrap()
        .write_stream("payload", b"cab")
        .unwrap();

    container
}

fn host_db() -> Database {
    let db = Database::create_memory(MemoryContainer::new()).unwrap();
    db.exec("CREATE TABLE `MOO` (`k` SHORT, `v` CHAR(32) PRIMARY KEY `k`)").unwrap();
    for (k, v) in [(1, "a"), (2, "b"), (3, "c")] {
        db.exec(&format!("INSERT INTO `MOO` (`k`,`v`) VALUES ({k},'{v}')"))
            .unwrap();
    }
    db
}

#[test]
fn test_transform_updates_deletes_and_creates_tables() {
    let mut db = host_db();
    db.apply_transform_container(Box::new(build_transform())).unwrap();

    assert_eq!(
        select_all(&db, "SELECT * FROM `MOO`"),
        vec![vec!["1", "c"], vec!["2", "b"]]
    );
    assert_eq!(
        select_all(&db, "SELECT `k`,`v` FROM `AAR`"),
        vec![vec!["1", "vw"], vec!["2", "bmw"]]
    );
}

#[test]
fn test_transform_binary_stream_lands_under_composite_key() {
    let mut db = host_db();
    db.apply_transform_container(Box::new(build_transform())).unwrap();

    let mut query = db.query("SELECT * FROM `AAR`").unwrap();
    query.execute(None).unwrap();
    let first = query.fetch().unwrap().unwrap();
    let stream = first.get_stream(3).expect("row 1 carries a stream");
    assert_eq!(stream.name(), Some("AAR.1"));
    assert_eq!(stream.bytes(), b"wheel-data");

    // Row 2 shipped no stream.
    let second = query.fetch().unwrap().unwrap();
    assert!(second.get_stream(3).is_none());
}

#[test]
fn test_transform_survives_commit() {
    let target = MemoryContainer::new();
    let mut db = Database::create_memory(target.clone()).unwrap();
    db.exec("CREATE TABLE `MOO` (`k` SHORT, `v` CHAR(32) PRIMARY KEY `k`)").unwrap();
    for (k, v) in [(1, "a"), (2, "b"), (3, "c")] {
        db.exec(&format!("INSERT INTO `MOO` (`k`,`v`) VALUES ({k},'{v}')"))
            .unwrap();
    }
    db.apply_transform_container(Box::new(build_transform())).unwrap();
    db.commit().unwrap();

    let reopened = Database::open_memory(target.clone(), OpenMode::ReadOnly).unwrap();
    assert_eq!(
        select_all(&reopened, "SELECT * FROM `AAR`"),
        vec![vec!["1", "vw"], vec!["2", "bmw"]]
    );

    // The transform's substorage was appended to the container.
    let mut committed: Box<dyn Container> = Box::new(target);
    let mut sub = committed.open_storage(&encode(false, "SubImage")).unwrap();
    assert_eq!(sub.read_stream("payload").unwrap(), b"cab");
}
