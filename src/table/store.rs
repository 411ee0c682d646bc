//! Table catalog and persistence.
//!
//! `_Tables` and `_Columns` are self-describing: their own schemas are baked
//! in, and every other table's column list is materialised from `_Columns`
//! rows before any query touches it. Loaded tables are cached on the
//! database core and shared with executing views.

use std::cell::RefCell;
use std::rc::Rc;

use log::{trace, warn};

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::strings::LONG_STR_BYTES;
use crate::table::{Column, ColumnAttrs, ColumnType, Table, TableKind, calc_column_offsets};

pub const TABLES: &str = "_Tables";
pub const COLUMNS: &str = "_Columns";
pub const STREAMS: &str = "_Streams";
pub const STORAGES: &str = "_Storages";

/// Baked-in schemas for the two catalog tables.
fn default_columns(name: &str) -> Option<Vec<Column>> {
    match name {
        TABLES => Some(vec![Column::new(
            TABLES,
            1,
            "Name",
            ColumnType::string(64).with(ColumnAttrs::KEY),
        )]),
        COLUMNS => Some(vec![
            Column::new(COLUMNS, 1, "Table", ColumnType::string(64).with(ColumnAttrs::KEY)),
            Column::new(COLUMNS, 2, "Number", ColumnType::int16().with(ColumnAttrs::KEY)),
            Column::new(COLUMNS, 3, "Name", ColumnType::string(64)),
            Column::new(COLUMNS, 4, "Type", ColumnType::int16()),
        ]),
        _ => None,
    }
}

/// Fetch a table from the cache, loading schema and rows on first use.
pub fn get_table(core: &DbCore, name: &str) -> Result<Rc<RefCell<Table>>> {
    if let Some(t) = core.tables.borrow().get(name) {
        return Ok(t.clone());
    }

    let columns = match default_columns(name) {
        Some(cols) => cols,
        None => table_columns(core, name)?,
    };
    let kind = if name == TABLES || name == COLUMNS {
        TableKind::System
    } else {
        TableKind::Persistent
    };
    let mut table = Table::new(name, columns, kind);
    load_rows(core, &mut table)?;

    let rc = Rc::new(RefCell::new(table));
    core.tables.borrow_mut().insert(name.to_owned(), rc.clone());
    Ok(rc)
}

/// Build a table's column list from its `_Columns` rows.
fn table_columns(core: &DbCore, name: &str) -> Result<Vec<Column>> {
    let table_id = core
        .strings
        .borrow()
        .lookup_id(name)
        .ok_or_else(|| Error::InvalidTable(name.to_owned()))?;

    let columns_table = get_table(core, COLUMNS)?;
    let columns_table = columns_table.borrow();
    let strings = core.strings.borrow();

    let mut found: Vec<Column> = Vec::new();
    for row in 0..columns_table.row_count() {
        if columns_table.read_raw(row, 0)? != table_id {
            continue;
        }
        let number_raw = columns_table.read_raw(row, 1)?;
        let name_id = columns_table.read_raw(row, 2)?;
        let type_raw = columns_table.read_raw(row, 3)?;
        if number_raw == 0 {
            warn!("column of {name} has a null number, skipping");
            continue;
        }
        let number = (number_raw.wrapping_sub(0x8000)) as usize;
        let col_name = strings
            .lookup_str(name_id)
            .ok_or_else(|| Error::InvalidData(format!("column name id {name_id} dangling")))?
            .to_owned();
        let ty = ColumnType((type_raw.wrapping_sub(0x8000)) as u16);
        found.push(Column::new(name, number, col_name, ty));
    }

    if found.is_empty() {
        return Err(Error::InvalidTable(name.to_owned()));
    }
    found.sort_by_key(|c| c.number);
    for (i, col) in found.iter().enumerate() {
        if col.number != i + 1 {
            return Err(Error::InvalidData(format!(
                "table {name} has a gap at column {}",
                i + 1
            )));
        }
    }
    trace!("{name} has {} columns", found.len());
    Ok(found)
}

/// On-disk row width under the database's string-ref width.
fn disk_row_size(table: &Table, bytes_per_strref: usize) -> usize {
    table
        .columns
        .iter()
        .map(|c| c.ty.bytes_per_cell(bytes_per_strref))
        .sum()
}

/// Read and un-transpose a table's row stream. A missing stream is an empty
/// table.
fn load_rows(core: &DbCore, table: &mut Table) -> Result<()> {
    let Some(raw) = core.read_table_stream(&table.name)? else {
        return Ok(());
    };
    let bytes_per_strref = core.bytes_per_strref.get();
    let row_size = disk_row_size(table, bytes_per_strref);
    if row_size == 0 {
        return Ok(());
    }
    if raw.len() % row_size != 0 {
        return Err(Error::InvalidData(format!(
            "table {} stream is {} bytes, not a multiple of the {row_size}-byte row",
            table.name,
            raw.len()
        )));
    }
    let row_count = raw.len() / row_size;
    trace!("loading {} rows of {}", row_count, table.name);

    let row_size_mem = table.row_size();
    table.rows = vec![vec![0u8; row_size_mem]; row_count];
    table.row_persistent = vec![true; row_count];

    for i in 0..row_count {
        let mut ofs = 0usize;
        let mut ofs_mem = 0usize;
        for col in &table.columns {
            let n = col.ty.bytes_per_cell(bytes_per_strref);
            let m = col.ty.bytes_per_cell(LONG_STR_BYTES);
            for k in 0..m.min(n) {
                table.rows[i][ofs_mem + k] = raw[ofs * row_count + i * n + k];
            }
            ofs += n;
            ofs_mem += m;
        }
    }
    Ok(())
}

/// Serialise one table back into its transposed row stream. Only the
/// prefix of persistent rows is written; a string id too wide for the target
/// ref width aborts the save.
fn save_table(core: &DbCore, table: &Table, bytes_per_strref: usize) -> Result<()> {
    if table.kind == TableKind::Transient {
        return Ok(());
    }
    if table.row_count() == 0 && table.name != TABLES {
        return Ok(());
    }

    let row_size = disk_row_size(table, bytes_per_strref);
    let row_count = table
        .row_persistent
        .iter()
        .position(|p| !p)
        .unwrap_or(table.row_count());

    let mut raw = vec![0u8; row_count * row_size];
    for i in 0..row_count {
        let mut ofs = 0usize;
        for (c, col) in table.columns.iter().enumerate() {
            let n = col.ty.bytes_per_cell(bytes_per_strref);
            let val = table.read_raw(i, c)?;
            if col.ty.is_string() && n < LONG_STR_BYTES && val > 0xffff {
                return Err(Error::failed(format!(
                    "string id {val} in {} does not fit a 2-byte reference",
                    table.name
                )));
            }
            for k in 0..n {
                raw[ofs * row_count + i * n + k] = ((val >> (k * 8)) & 0xff) as u8;
            }
            ofs += n;
        }
    }

    trace!("saving {} ({} bytes)", table.name, raw.len());
    core.write_table_stream(&table.name, raw)
}

/// Write every cached table (and always `_Tables`) into the stream overlay.
pub fn commit_tables(core: &DbCore, bytes_per_strref: usize) -> Result<()> {
    get_table(core, TABLES)?;
    let tables: Vec<Rc<RefCell<Table>>> = core.tables.borrow().values().cloned().collect();
    for table in tables {
        let table = table.borrow();
        save_table(core, &table, bytes_per_strref)?;
    }
    Ok(())
}

/// Whether a table is present in the catalog (or is one of the virtual
/// tables, which always exist).
pub fn table_exists(core: &DbCore, name: &str) -> bool {
    if matches!(name, TABLES | COLUMNS | STREAMS | STORAGES) {
        return true;
    }
    let Some(id) = core.strings.borrow().lookup_id(name) else {
        return false;
    };
    let Ok(tables) = get_table(core, TABLES) else {
        return false;
    };
    let tables = tables.borrow();
    (0..tables.row_count()).any(|row| tables.read_raw(row, 0).unwrap_or(0) == id)
}

/// The persistence kind recorded for a table, if it exists at all.
pub fn table_kind(core: &DbCore, name: &str) -> Option<TableKind> {
    if !table_exists(core, name) {
        return None;
    }
    get_table(core, name).ok().map(|t| t.borrow().kind)
}

/// Create a table: one `_Tables` row, one `_Columns` row per column (for
/// persistent tables), and an empty cached page.
pub fn create_table(core: &DbCore, name: &str, columns: Vec<Column>, kind: TableKind) -> Result<()> {
    if table_exists(core, name) {
        return Err(Error::BadQuerySyntax(format!("table {name} already exists")));
    }

    let transient = kind == TableKind::Transient;
    let table = Table::new(name, columns.clone(), kind);

    let tables_rc = get_table(core, TABLES)?;
    let mut rec = Record::new(1);
    rec.set_string(1, name)?;
    insert_row(core, &tables_rc, &rec, None, transient)?;

    if !transient {
        let columns_rc = get_table(core, COLUMNS)?;
        let mut rec = Record::new(4);
        rec.set_string(1, name)?;
        for col in &columns {
            rec.set_int(2, col.number as i32)?;
            rec.set_string(3, &col.name)?;
            // The type word goes through the signed 16-bit bias encoding.
            rec.set_int(4, col.ty.bits() as i16 as i32)?;
            insert_row(core, &columns_rc, &rec, None, false)?;
        }
    }

    core.tables
        .borrow_mut()
        .insert(name.to_owned(), Rc::new(RefCell::new(table)));
    Ok(())
}

/// Null and duplicate-key checks run before any mutation.
fn validate_new(core: &DbCore, table: &Table, rec: &Record) -> Result<()> {
    for (i, col) in table.columns.iter().enumerate() {
        if col.ty.is_nullable() || col.ty.is_binary() {
            continue;
        }
        if col.ty.is_string() {
            if rec.get_string(i + 1).is_empty() {
                return Err(Error::InvalidData(format!(
                    "column {} may not be null",
                    col.name
                )));
            }
        } else if rec.get_int(i + 1) == crate::record::NULL_INT {
            return Err(Error::InvalidData(format!(
                "column {} may not be null",
                col.name
            )));
        }
    }

    let strings = core.strings.borrow();
    match table.find_row(rec, &strings) {
        Ok(_) => Err(Error::failed(format!(
            "duplicate primary key in {}",
            table.name
        ))),
        Err(Error::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Insert a record. `row` of `None` means "ordered position by primary key".
/// Returns the row index the record landed on.
pub fn insert_row(
    core: &DbCore,
    table: &Rc<RefCell<Table>>,
    rec: &Record,
    row: Option<usize>,
    temporary: bool,
) -> Result<usize> {
    {
        let table = table.borrow();
        validate_new(core, &table, rec)?;
    }
    let pos = match row {
        Some(pos) => pos.min(table.borrow().row_count()),
        None => {
            let table = table.borrow();
            let strings = core.strings.borrow();
            table.find_insert_index(rec, &strings)
        }
    };
    table.borrow_mut().create_row_at(pos, temporary);
    let mask = ((1u64 << table.borrow().col_count()) - 1) as u32;
    set_row(core, table, pos, rec, mask)?;
    Ok(pos)
}

/// Update the fields selected by `mask`. String cells swap their pool
/// references; binary cells only record presence (the caller persists the
/// stream payload).
pub fn set_row(
    core: &DbCore,
    table: &Rc<RefCell<Table>>,
    row: usize,
    rec: &Record,
    mask: u32,
) -> Result<()> {
    let col_count = table.borrow().col_count();
    if (mask as u64) >= 1u64 << col_count {
        return Err(Error::InvalidParameter(format!("mask {mask:#x} has stray bits")));
    }
    if row >= table.borrow().row_count() {
        return Err(Error::InvalidParameter(format!("row {row} out of range")));
    }

    for i in 0..col_count {
        if mask & (1 << i) == 0 {
            continue;
        }
        let (ty, persistence) = {
            let t = table.borrow();
            (t.columns[i].ty, t.string_persistence(row))
        };

        let val = if rec.is_null(i + 1) {
            if ty.is_string() {
                let old = table.borrow().read_raw(row, i)?;
                if old != 0 {
                    core.strings.borrow_mut().release(old, persistence);
                }
            }
            0
        } else if ty.is_binary() {
            1
        } else if ty.is_string() {
            let s = rec.get_string(i + 1);
            let new = core.strings.borrow_mut().intern(&s, 1, persistence);
            let old = table.borrow().read_raw(row, i)?;
            // One reference per cell: the intern above covers the new value
            // (or re-covers the unchanged one).
            if old != 0 {
                core.strings.borrow_mut().release(old, persistence);
            }
            new
        } else {
            let t = table.borrow();
            t.raw_from_record(rec, i + 1, i, &core.strings.borrow())?
        };

        table.borrow_mut().write_raw(row, i, val)?;
    }
    Ok(())
}

/// Delete a row, shifting later rows up.
pub fn delete_row(core: &DbCore, table: &Rc<RefCell<Table>>, row: usize) -> Result<()> {
    let mut strings = core.strings.borrow_mut();
    table.borrow_mut().delete_row(row, &mut strings)
}

/// Append a `_Columns` row and rebuild the target table's layout. `hold`
/// additionally pins the new column with a reference.
pub fn add_column(
    core: &DbCore,
    table_name: &str,
    number: usize,
    column: &str,
    ty: ColumnType,
    hold: bool,
) -> Result<()> {
    let columns_rc = get_table(core, COLUMNS)?;
    let mut rec = Record::new(4);
    rec.set_string(1, table_name)?;
    rec.set_int(2, number as i32)?;
    rec.set_string(3, column)?;
    rec.set_int(4, ty.bits() as i16 as i32)?;
    insert_row(core, &columns_rc, &rec, None, false)?;

    update_table_columns(core, table_name)?;

    if hold
        && let Ok(table) = get_table(core, table_name)
    {
        let mut table = table.borrow_mut();
        if let Some(col) = table.columns.iter_mut().find(|c| c.name == column) {
            col.ref_count += 1;
        }
    }
    Ok(())
}

/// Remove a column's `_Columns` row and rebuild the table layout.
pub fn remove_column(core: &DbCore, table_name: &str, number: usize) -> Result<()> {
    let columns_rc = get_table(core, COLUMNS)?;
    let mut key = Record::new(4);
    key.set_string(1, table_name)?;
    key.set_int(2, number as i32)?;
    let row = {
        let t = columns_rc.borrow();
        let strings = core.strings.borrow();
        t.find_row(&key, &strings)?
    };
    delete_row(core, &columns_rc, row)?;
    update_table_columns(core, table_name)
}

/// Refresh a cached table's column list after a `_Columns` change, keeping
/// row data for the surviving prefix of the layout.
pub fn update_table_columns(core: &DbCore, name: &str) -> Result<()> {
    let Some(table_rc) = core.tables.borrow().get(name).cloned() else {
        return Ok(());
    };
    let mut columns = match table_columns(core, name) {
        Ok(cols) => cols,
        // Last column removed: the table keeps an empty layout.
        Err(Error::InvalidTable(_)) => Vec::new(),
        Err(e) => return Err(e),
    };
    calc_column_offsets(&mut columns);

    let mut table = table_rc.borrow_mut();
    let new_size = columns
        .last()
        .map(|c| c.offset + c.ty.bytes_per_cell(LONG_STR_BYTES))
        .unwrap_or(0);
    for row in &mut table.rows {
        row.resize(new_size, 0);
    }
    table.columns = columns;
    Ok(())
}

/// Drop a table: its `_Columns` rows, its `_Tables` row, its cached page,
/// and its row stream.
pub fn drop_table(core: &DbCore, name: &str) -> Result<()> {
    let table_rc = get_table(core, name)?;

    let numbers: Vec<usize> = table_rc
        .borrow()
        .columns
        .iter()
        .map(|c| c.number)
        .collect();
    for number in numbers.into_iter().rev() {
        remove_column(core, name, number)?;
    }

    let tables_rc = get_table(core, TABLES)?;
    let mut key = Record::new(1);
    key.set_string(1, name)?;
    let row = {
        let t = tables_rc.borrow();
        let strings = core.strings.borrow();
        t.find_row(&key, &strings)?
    };
    delete_row(core, &tables_rc, row)?;

    core.tables.borrow_mut().remove(name);
    core.remove_table_stream(name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, OpenMode};
    use crate::storage::memory::MemoryContainer;
    use crate::table::ColumnAttrs;

    /// Fluent schema helper for store-level tests.
    struct TableSpec {
        name: String,
        columns: Vec<Column>,
    }

    impl TableSpec {
        fn new(name: &str) -> TableSpec {
            TableSpec {
                name: name.to_owned(),
                columns: Vec::new(),
            }
        }

        fn string_col(mut self, name: &str, key: bool) -> TableSpec {
            let mut ty = ColumnType::string(32);
            if key {
                ty = ty.with(ColumnAttrs::KEY);
            } else {
                ty = ty.with(ColumnAttrs::NULLABLE);
            }
            let number = self.columns.len() + 1;
            self.columns.push(Column::new(&self.name, number, name, ty));
            self
        }

        fn int_col(mut self, name: &str, key: bool) -> TableSpec {
            let mut ty = ColumnType::int16();
            if key {
                ty = ty.with(ColumnAttrs::KEY);
            } else {
                ty = ty.with(ColumnAttrs::NULLABLE);
            }
            let number = self.columns.len() + 1;
            self.columns.push(Column::new(&self.name, number, name, ty));
            self
        }

        fn create(self, core: &DbCore) -> Rc<RefCell<Table>> {
            create_table(core, &self.name, self.columns, TableKind::Persistent).unwrap();
            get_table(core, &self.name).unwrap()
        }
    }

    fn test_db() -> Database {
        Database::create_memory(MemoryContainer::new()).unwrap()
    }

    fn phone_rec(id: i32, name: &str, number: &str) -> Record {
        let mut rec = Record::new(3);
        rec.set_int(1, id).unwrap();
        rec.set_string(2, name).unwrap();
        rec.set_string(3, number).unwrap();
        rec
    }

    #[test]
    fn test_create_table_registers_catalog_rows() {
        let db = test_db();
        let core = db.core();
        TableSpec::new("phone")
            .int_col("id", true)
            .string_col("name", false)
            .create(&core);

        assert!(table_exists(&core, "phone"));
        let tables = get_table(&core, TABLES).unwrap();
        assert_eq!(tables.borrow().row_count(), 1);
        let columns = get_table(&core, COLUMNS).unwrap();
        assert_eq!(columns.borrow().row_count(), 2);
    }

    #[test]
    fn test_create_duplicate_table_is_query_error() {
        let db = test_db();
        let core = db.core();
        TableSpec::new("t").int_col("a", true).create(&core);
        let again = create_table(
            &core,
            "t",
            vec![Column::new("t", 1, "a", ColumnType::int16().with(ColumnAttrs::KEY))],
            TableKind::Persistent,
        );
        assert!(matches!(again, Err(Error::BadQuerySyntax(_))));
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let db = test_db();
        let core = db.core();
        let table = TableSpec::new("phone")
            .int_col("id", true)
            .string_col("name", false)
            .string_col("number", false)
            .create(&core);

        insert_row(&core, &table, &phone_rec(1, "Abe", "8675309"), None, false).unwrap();
        let dup = insert_row(&core, &table, &phone_rec(1, "Zeke", "5551212"), None, false);
        assert!(matches!(dup, Err(Error::FunctionFailed(_))));
        assert_eq!(table.borrow().row_count(), 1);
    }

    #[test]
    fn test_insert_orders_rows_by_key() {
        let db = test_db();
        let core = db.core();
        let table = TableSpec::new("t").int_col("k", true).create(&core);

        for k in [30, 10, 20] {
            let mut rec = Record::new(1);
            rec.set_int(1, k).unwrap();
            insert_row(&core, &table, &rec, None, false).unwrap();
        }
        let t = table.borrow();
        let keys: Vec<u32> = (0..3).map(|r| t.read_raw(r, 0).unwrap()).collect();
        assert_eq!(keys, vec![0x8000 + 10, 0x8000 + 20, 0x8000 + 30]);
    }

    #[test]
    fn test_string_cells_reuse_pool_ids() {
        let db = test_db();
        let core = db.core();
        let table = TableSpec::new("t").string_col("k", true).create(&core);

        let mut rec = Record::new(1);
        rec.set_string(1, "foo").unwrap();
        insert_row(&core, &table, &rec, None, false).unwrap();
        let id = core.strings.borrow().lookup_id("foo").unwrap();
        assert_eq!(core.strings.borrow().refcounts(id).0, 1);

        delete_row(&core, &table, 0).unwrap();
        assert_eq!(core.strings.borrow().lookup_id("foo"), None);

        // Re-inserting lands in the same freed slot.
        insert_row(&core, &table, &rec, None, false).unwrap();
        assert_eq!(core.strings.borrow().lookup_id("foo"), Some(id));
        assert_eq!(core.strings.borrow().refcounts(id).0, 1);
    }

    #[test]
    fn test_set_row_swaps_string_references() {
        let db = test_db();
        let core = db.core();
        let table = TableSpec::new("t")
            .int_col("k", true)
            .string_col("v", false)
            .create(&core);

        let mut rec = Record::new(2);
        rec.set_int(1, 1).unwrap();
        rec.set_string(2, "old").unwrap();
        insert_row(&core, &table, &rec, None, false).unwrap();

        let mut update = Record::new(2);
        update.set_string(2, "new").unwrap();
        set_row(&core, &table, 0, &update, 0b10).unwrap();

        let strings = core.strings.borrow();
        assert_eq!(strings.lookup_id("old"), None);
        assert!(strings.lookup_id("new").is_some());
    }

    #[test]
    fn test_add_and_remove_column_relayout() {
        let db = test_db();
        let core = db.core();
        let table = TableSpec::new("t")
            .int_col("k", true)
            .string_col("a", false)
            .create(&core);

        let mut rec = Record::new(2);
        rec.set_int(1, 7).unwrap();
        rec.set_string(2, "kept").unwrap();
        insert_row(&core, &table, &rec, None, false).unwrap();

        add_column(&core, "t", 3, "b", ColumnType::int32().with(ColumnAttrs::NULLABLE), false)
            .unwrap();
        {
            let t = table.borrow();
            assert_eq!(t.col_count(), 3);
            // Existing data survives; the new cell starts null.
            assert_eq!(t.read_raw(0, 0).unwrap(), 0x8000 + 7);
            assert_eq!(t.read_raw(0, 2).unwrap(), 0);
        }

        remove_column(&core, "t", 3).unwrap();
        assert_eq!(table.borrow().col_count(), 2);
        assert_eq!(table.borrow().read_raw(0, 0).unwrap(), 0x8000 + 7);
    }

    #[test]
    fn test_drop_table_clears_catalog() {
        let db = test_db();
        let core = db.core();
        TableSpec::new("t")
            .int_col("k", true)
            .string_col("v", false)
            .create(&core);

        drop_table(&core, "t").unwrap();
        assert!(!table_exists(&core, "t"));
        assert_eq!(get_table(&core, COLUMNS).unwrap().borrow().row_count(), 0);
        assert_eq!(get_table(&core, TABLES).unwrap().borrow().row_count(), 0);
    }

    #[test]
    fn test_commit_skips_empty_tables_but_writes_catalog() {
        let target = MemoryContainer::new();
        let mut db = Database::create_memory(target.clone()).unwrap();
        {
            let core = db.core();
            TableSpec::new("empty").int_col("k", true).create(&core);
        }
        db.commit().unwrap();

        let reopened = Database::open_memory(target, OpenMode::ReadOnly).unwrap();
        let core = reopened.core();
        // The empty table has no data stream yet still exists as a table.
        assert!(table_exists(&core, "empty"));
        assert_eq!(get_table(&core, "empty").unwrap().borrow().row_count(), 0);
    }

    #[test]
    fn test_temporary_rows_stop_serialisation() {
        let target = MemoryContainer::new();
        let mut db = Database::create_memory(target.clone()).unwrap();
        {
            let core = db.core();
            let table = TableSpec::new("t").int_col("k", true).create(&core);
            let mut rec = Record::new(1);
            rec.set_int(1, 1).unwrap();
            insert_row(&core, &table, &rec, None, false).unwrap();
            rec.set_int(1, 2).unwrap();
            insert_row(&core, &table, &rec, None, true).unwrap();
            rec.set_int(1, 3).unwrap();
            insert_row(&core, &table, &rec, None, false).unwrap();
        }
        db.commit().unwrap();

        let reopened = Database::open_memory(target, OpenMode::ReadOnly).unwrap();
        let core = reopened.core();
        let table = get_table(&core, "t").unwrap();
        // Row 1 persists; the transient row 2 cut serialisation before 3.
        assert_eq!(table.borrow().row_count(), 1);
        assert_eq!(table.borrow().read_raw(0, 0).unwrap(), 0x8000 + 1);
    }
}
