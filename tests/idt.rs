//! IDT export/import round trips.

use std::fs;

use msidb::storage::memory::MemoryContainer;
use msidb::{Database, Record, idt};

fn sample_db() -> Database {
    let db = Database::create_memory(MemoryContainer::new()).unwrap();
    db.exec(
        "CREATE TABLE `Property` (`Property` CHAR(72) NOT NULL, \
         `Value` LONGCHAR NOT NULL LOCALIZABLE PRIMARY KEY `Property`)",
    )
    .unwrap();
    db.exec("INSERT INTO `Property` (`Property`,`Value`) VALUES ('ProductName','Demo')")
        .unwrap();
    db.exec("INSERT INTO `Property` (`Property`,`Value`) VALUES ('ProductVersion','1.2.3')")
        .unwrap();
    db
}

#[test]
fn test_export_layout() {
    let db = sample_db();
    let mut out = Vec::new();
    idt::export(&db, "Property", &mut out, None).unwrap();
    let text = String::from_utf8(out).unwrap();

    let lines: Vec<&str> = text.split("\r\n").collect();
    assert_eq!(lines[0], "Property\tValue");
    assert_eq!(lines[1], "s72\tl0");
    assert_eq!(lines[2], "Property\tProperty");
    assert_eq!(lines[3], "ProductName\tDemo");
    assert_eq!(lines[4], "ProductVersion\t1.2.3");
    assert_eq!(lines[5], "");
}

#[test]
fn test_force_codepage_export() {
    let db = sample_db();
    db.set_codepage(932).unwrap();
    let mut out = Vec::new();
    idt::export(&db, "_ForceCodepage", &mut out, None).unwrap();
    assert_eq!(out, b"\r\n\r\n932\t_ForceCodepage\r\n");
}

#[test]
fn test_import_export_roundtrip() {
    let db = sample_db();
    let mut exported = Vec::new();
    idt::export(&db, "Property", &mut exported, None).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Property.idt");
    fs::write(&path, &exported).unwrap();

    let fresh = Database::create_memory(MemoryContainer::new()).unwrap();
    idt::import(&fresh, &path).unwrap();

    let mut back = Vec::new();
    idt::export(&fresh, "Property", &mut back, None).unwrap();
    assert_eq!(exported, back);
}

#[test]
fn test_force_codepage_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("_ForceCodepage.idt");
    fs::write(&path, b"\r\n\r\n1252\t_ForceCodepage\r\n").unwrap();

    let db = Database::create_memory(MemoryContainer::new()).unwrap();
    idt::import(&db, &path).unwrap();
    assert_eq!(db.codepage(), 1252);

    // Unknown codepages are refused.
    fs::write(&path, b"\r\n\r\n1234\t_ForceCodepage\r\n").unwrap();
    assert!(idt::import(&db, &path).is_err());
}

#[test]
fn test_nul_byte_escapes_in_cells() {
    let db = Database::create_memory(MemoryContainer::new()).unwrap();
    db.exec("CREATE TABLE `t` (`k` CHAR(8), `v` CHAR(32) PRIMARY KEY `k`)").unwrap();
    let mut rec = Record::new(2);
    rec.set_string(1, "a").unwrap();
    rec.set_string(2, "one\0two").unwrap();
    db.exec_with("INSERT INTO `t` (`k`,`v`) VALUES (?,?)", Some(&rec))
        .unwrap();

    let mut out = Vec::new();
    idt::export(&db, "t", &mut out, None).unwrap();
    let text = String::from_utf8(out.clone()).unwrap();
    assert!(!text.contains('\0'));
    assert!(text.contains("one\u{11}\u{19}two"));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.idt");
    fs::write(&path, &out).unwrap();
    let fresh = Database::create_memory(MemoryContainer::new()).unwrap();
    idt::import(&fresh, &path).unwrap();

    let mut query = fresh.query("SELECT `v` FROM `t`").unwrap();
    query.execute(None).unwrap();
    let rec = query.fetch().unwrap().unwrap();
    assert_eq!(rec.get_string(1), "one\0two");
}

#[test]
fn test_binary_cells_exported_as_files() {
    let db = Database::create_memory(MemoryContainer::new()).unwrap();
    db.exec("CREATE TABLE `Icon` (`Name` CHAR(72), `Data` OBJECT PRIMARY KEY `Name`)")
        .unwrap();
    let mut rec = Record::new(2);
    rec.set_string(1, "app.ico").unwrap();
    rec.set_stream(2, msidb::StreamHandle::new(b"pixels".to_vec())).unwrap();
    db.exec_with("INSERT INTO `Icon` (`Name`,`Data`) VALUES (?,?)", Some(&rec))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut out = Vec::new();
    idt::export(&db, "Icon", &mut out, Some(dir.path())).unwrap();

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("app.ico\tapp.ico"));
    let payload = fs::read(dir.path().join("Icon").join("app.ico")).unwrap();
    assert_eq!(payload, b"pixels");
}
