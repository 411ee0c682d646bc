//! Database facade: open/commit lifecycle, stream bookkeeping, merge.
//!
//! The core state (string pool, table cache, stream overlay) lives behind a
//! shared [`DbCore`] so that query handles stay valid for as long as they
//! exist; the [`Database`] wrapper adds the lifecycle operations around it.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use crate::error::{Error, Result};
use crate::query::Query;
use crate::record::Record;
use crate::storage::memory::MemoryContainer;
use crate::storage::name::{SUMMARY_INFO_NAME, decode, encode};
use crate::storage::{ChildKind, Container, copy_tree};
use crate::strings::StringPool;
use crate::summary::SummaryInfo;
use crate::table::store::{self, TABLES};
use crate::table::{Column, ColumnAttrs, ColumnType, Table, TableKind};
use crate::views::table::TableView;
use crate::views::{View, view_get_row};

/// Windows Installer database storage class id, in its on-disk byte order.
const MSI_DATABASE_CLSID: [u8; 16] = [
    0x84, 0x10, 0x0c, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x46,
];

const STRING_POOL_STREAM: &str = "_StringPool";
const STRING_DATA_STREAM: &str = "_StringData";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    /// Mutations buffered in memory; `commit` persists them atomically.
    Transact,
    /// Like `Transact`, but intended for callers that commit eagerly.
    Direct,
    /// Start from an empty container; the file exists only after `commit`.
    Create,
    CreateDirect,
}

impl OpenMode {
    fn creates(self) -> bool {
        matches!(self, OpenMode::Create | OpenMode::CreateDirect)
    }
}

/// Where committed bytes end up.
enum Backing {
    File(PathBuf),
    Memory(MemoryContainer),
}

/// Raw stream state: the source container plus an overlay of writes.
/// Keys are encoded stream names; a `None` value is a deletion marker.
pub(crate) struct StreamState {
    input: Option<Box<dyn Container>>,
    overlay: BTreeMap<String, Option<Vec<u8>>>,
    /// Substorages appended by transforms, copied out at commit.
    added_storages: BTreeMap<String, MemoryContainer>,
    backing: Backing,
}

/// Shared engine state. Queries, views and the summary-information object
/// all hold an `Rc` of this.
pub struct DbCore {
    pub(crate) strings: RefCell<StringPool>,
    pub(crate) tables: RefCell<HashMap<String, Rc<RefCell<Table>>>>,
    pub(crate) streams: RefCell<StreamState>,
    pub(crate) bytes_per_strref: Cell<usize>,
    pub(crate) mode: OpenMode,
}

impl DbCore {
    /// Read a raw stream by encoded name, overlay first.
    pub(crate) fn read_raw_stream(&self, encoded: &str) -> Result<Vec<u8>> {
        let mut streams = self.streams.borrow_mut();
        if let Some(entry) = streams.overlay.get(encoded) {
            return match entry {
                Some(data) => Ok(data.clone()),
                None => Err(Error::NotFound(format!("stream {encoded:?}"))),
            };
        }
        match &mut streams.input {
            Some(input) => input.read_stream(encoded),
            None => Err(Error::NotFound(format!("stream {encoded:?}"))),
        }
    }

    pub(crate) fn write_raw_stream(&self, encoded: &str, data: Vec<u8>) -> Result<()> {
        self.streams
            .borrow_mut()
            .overlay
            .insert(encoded.to_owned(), Some(data));
        Ok(())
    }

    pub(crate) fn remove_raw_stream(&self, encoded: &str) {
        self.streams
            .borrow_mut()
            .overlay
            .insert(encoded.to_owned(), None);
    }

    /// All live raw stream names (encoded), input plus overlay.
    pub(crate) fn list_raw_streams(&self) -> Vec<String> {
        let streams = self.streams.borrow();
        let mut names: Vec<String> = Vec::new();
        if let Some(input) = &streams.input {
            if let Ok(children) = input.children() {
                for (name, kind) in children {
                    if kind == ChildKind::Stream && !streams.overlay.contains_key(&name) {
                        names.push(name);
                    }
                }
            }
        }
        for (name, entry) in &streams.overlay {
            if entry.is_some() {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }

    /// All live substorage names (encoded).
    pub(crate) fn list_storages(&self) -> Vec<String> {
        let streams = self.streams.borrow();
        let mut names: Vec<String> = Vec::new();
        if let Some(input) = &streams.input {
            if let Ok(children) = input.children() {
                for (name, kind) in children {
                    if kind == ChildKind::Storage {
                        names.push(name);
                    }
                }
            }
        }
        for name in streams.added_storages.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }

    pub(crate) fn add_storage_copy(&self, encoded: &str, contents: MemoryContainer) {
        self.streams
            .borrow_mut()
            .added_storages
            .insert(encoded.to_owned(), contents);
    }

    /// Table row streams carry the table marker in their encoded name.
    pub(crate) fn read_table_stream(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.read_raw_stream(&encode(true, name)) {
            Ok(data) => Ok(Some(data)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn write_table_stream(&self, name: &str, data: Vec<u8>) -> Result<()> {
        self.write_raw_stream(&encode(true, name), data)
    }

    pub(crate) fn remove_table_stream(&self, name: &str) {
        self.remove_raw_stream(&encode(true, name));
    }
}

pub struct Database {
    core: Rc<DbCore>,
}

impl Database {
    /// Open an installer database file.
    pub fn open(path: &Path, mode: OpenMode) -> Result<Database> {
        let input = if mode.creates() {
            None
        } else {
            Some(crate::storage::open_read(path)?)
        };
        Self::build(input, Backing::File(path.to_path_buf()), mode)
    }

    /// Create an empty database committing into the given memory container.
    pub fn create_memory(target: MemoryContainer) -> Result<Database> {
        Self::build(None, Backing::Memory(target), OpenMode::Create)
    }

    /// Open a database from a memory container (commit writes back into a
    /// clone of the same tree).
    pub fn open_memory(source: MemoryContainer, mode: OpenMode) -> Result<Database> {
        Self::build(
            Some(Box::new(source.clone())),
            Backing::Memory(source),
            mode,
        )
    }

    fn build(
        mut input: Option<Box<dyn Container>>,
        backing: Backing,
        mode: OpenMode,
    ) -> Result<Database> {
        let mut strings = StringPool::new();
        let mut bytes_per_strref = 2;
        if let Some(container) = &mut input {
            let pool = container.read_stream(&encode(true, STRING_POOL_STREAM));
            let data = container.read_stream(&encode(true, STRING_DATA_STREAM));
            if let (Ok(pool), Ok(data)) = (pool, data) {
                let (loaded, width) = StringPool::deserialize(&pool, &data)?;
                strings = loaded;
                bytes_per_strref = width;
            }
        }
        let core = DbCore {
            strings: RefCell::new(strings),
            tables: RefCell::new(HashMap::new()),
            streams: RefCell::new(StreamState {
                input,
                overlay: BTreeMap::new(),
                added_storages: BTreeMap::new(),
                backing,
            }),
            bytes_per_strref: Cell::new(bytes_per_strref),
            mode,
        };
        Ok(Database {
            core: Rc::new(core),
        })
    }

    pub(crate) fn core(&self) -> Rc<DbCore> {
        self.core.clone()
    }

    /// Compile a SQL statement into an executable query.
    pub fn query(&self, sql: &str) -> Result<Query> {
        Query::open(self.core.clone(), sql)
    }

    /// Parse, execute without parameters, and close. For DDL/DML one-shots.
    pub fn exec(&self, sql: &str) -> Result<()> {
        self.exec_with(sql, None)
    }

    pub fn exec_with(&self, sql: &str, rec: Option<&Record>) -> Result<()> {
        let mut query = self.query(sql)?;
        query.execute(rec)?;
        query.close()
    }

    pub fn codepage(&self) -> u32 {
        self.core.strings.borrow().codepage()
    }

    pub fn set_codepage(&self, codepage: u32) -> Result<()> {
        self.core.strings.borrow_mut().set_codepage(codepage)
    }

    /// Whether a table's rows survive commit. `None` when the table does not
    /// exist; the virtual stream tables report `Some(false)`.
    pub fn is_table_persistent(&self, name: &str) -> Option<bool> {
        if matches!(name, store::STREAMS | store::STORAGES) {
            return Some(false);
        }
        match store::table_kind(&self.core, name)? {
            TableKind::Persistent => Some(true),
            TableKind::System | TableKind::Transient => Some(false),
        }
    }

    /// Summary information with a budget of `update_count` new properties.
    pub fn summary_info(&self, update_count: u32) -> Result<SummaryInfo> {
        SummaryInfo::load(self.core.clone(), update_count)
    }

    /// Serialise everything into the backing container. String pool first
    /// (its width decides the row encoding), then tables, then raw streams
    /// and substorages.
    pub fn commit(&mut self) -> Result<()> {
        if self.core.mode == OpenMode::ReadOnly {
            return Err(Error::failed("database opened read-only"));
        }

        let (data, pool, bytes_per_strref) = self.core.strings.borrow().serialize();
        store::commit_tables(&self.core, bytes_per_strref)?;
        self.core
            .write_raw_stream(&encode(true, STRING_DATA_STREAM), data)?;
        self.core
            .write_raw_stream(&encode(true, STRING_POOL_STREAM), pool)?;
        self.core.bytes_per_strref.set(bytes_per_strref);

        let mut out: Box<dyn Container> = {
            let streams = self.core.streams.borrow();
            match &streams.backing {
                Backing::File(path) => crate::storage::open_write(path, true)?,
                Backing::Memory(target) => Box::new(target.clone()),
            }
        };
        out.set_class(MSI_DATABASE_CLSID)?;

        for name in self.core.list_raw_streams() {
            let data = self.core.read_raw_stream(&name)?;
            out.write_stream(&name, &data)?;
        }

        // Substorages: passthrough from the input, then transform additions.
        let mut streams = self.core.streams.borrow_mut();
        let mut input_storages: Vec<String> = Vec::new();
        if let Some(input) = &streams.input {
            if let Ok(children) = input.children() {
                input_storages.extend(
                    children
                        .into_iter()
                        .filter(|(_, k)| *k == ChildKind::Storage)
                        .map(|(n, _)| n),
                );
            }
        }
        for name in input_storages {
            if streams.added_storages.contains_key(&name) {
                continue;
            }
            let mut src = streams.input.as_mut().unwrap().open_storage(&name)?;
            let mut dst = out.create_storage(&name)?;
            copy_tree(src.as_mut(), dst.as_mut())?;
        }
        for (name, contents) in streams.added_storages.clone() {
            let mut src: Box<dyn Container> = Box::new(contents);
            let mut dst = out.create_storage(&name)?;
            copy_tree(src.as_mut(), dst.as_mut())?;
        }
        drop(streams);

        out.commit()?;
        debug!("commit complete");
        Ok(())
    }

    /// Apply a transform storage from a file.
    pub fn apply_transform(&mut self, path: &Path) -> Result<()> {
        let container = crate::storage::open_read(path)?;
        self.apply_transform_container(container)
    }

    /// Apply a transform from an already-open container.
    pub fn apply_transform_container(&mut self, container: Box<dyn Container>) -> Result<()> {
        crate::transform::apply(&self.core, container)
    }

    /// Names of all user tables, in `_Tables` order.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let tables = store::get_table(&self.core, TABLES)?;
        let tables = tables.borrow();
        let strings = self.core.strings.borrow();
        let mut out = Vec::with_capacity(tables.row_count());
        for row in 0..tables.row_count() {
            let id = tables.read_raw(row, 0)?;
            if let Some(name) = strings.lookup_str(id) {
                out.push(name.to_owned());
            }
        }
        Ok(out)
    }

    /// Decoded names of the non-table streams in the container.
    pub fn stream_names(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for encoded in self.core.list_raw_streams() {
            let (is_table, name) = decode(&encoded);
            if is_table || name == SUMMARY_INFO_NAME {
                continue;
            }
            out.push(name);
        }
        Ok(out)
    }

    /// Copy every row of every user table of `other` into this database.
    ///
    /// Schema mismatches abort with `DatatypeMismatch`. Rows whose primary
    /// key exists here with different non-key fields are counted per table
    /// into `error_table`; any conflict makes the merge report failure after
    /// the copy completes.
    pub fn merge(&mut self, other: &Database, error_table: &str) -> Result<()> {
        if self.codepage() != other.codepage() {
            return Err(Error::DatatypeMismatch(
                "merge source has a different codepage".into(),
            ));
        }

        let mut conflicts: Vec<(String, i32)> = Vec::new();
        for name in other.table_names()? {
            let count = self.merge_table(other, &name)?;
            if count > 0 {
                conflicts.push((name, count));
            }
        }

        if conflicts.is_empty() {
            return Ok(());
        }
        self.record_merge_conflicts(error_table, &conflicts)?;
        Err(Error::failed("merge completed with row conflicts"))
    }

    fn merge_table(&mut self, other: &Database, name: &str) -> Result<i32> {
        let src_core = other.core();
        let src_table = store::get_table(&src_core, name)?;

        if store::table_exists(&self.core, name) {
            let dst_table = store::get_table(&self.core, name)?;
            check_merge_schema(&src_table.borrow(), &dst_table.borrow())?;
        } else {
            let columns: Vec<Column> = src_table.borrow().columns.clone();
            store::create_table(&self.core, name, columns, TableKind::Persistent)?;
        }

        let mut src_view = TableView::new(src_core.clone(), name)?;
        src_view.execute(None)?;
        let (rows, _) = src_view.dimensions()?;

        let mut dst_view = TableView::new(self.core.clone(), name)?;
        dst_view.execute(None)?;

        let mut conflicts = 0;
        for row in 0..rows {
            let rec = view_get_row(&src_core, &src_view, row)?;
            let existing = {
                let t = store::get_table(&self.core, name)?;
                let found = {
                    let t = t.borrow();
                    let strings = self.core.strings.borrow();
                    t.find_row(&rec, &strings)
                };
                found
            };
            match existing {
                Ok(dst_row) => {
                    let dst_rec = view_get_row(&self.core, &dst_view, dst_row as u32)?;
                    let identical = (0..rec.field_count())
                        .all(|i| rec.compare_field(&dst_rec, i + 1));
                    if !identical {
                        conflicts += 1;
                    }
                }
                Err(Error::NotFound(_)) => {
                    dst_view.insert_row(&rec, -1, false)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(conflicts)
    }

    fn record_merge_conflicts(&mut self, error_table: &str, conflicts: &[(String, i32)]) -> Result<()> {
        if !store::table_exists(&self.core, error_table) {
            let columns = vec![
                Column::new(
                    error_table,
                    1,
                    "Table",
                    ColumnType::string(255).with(ColumnAttrs::KEY),
                ),
                Column::new(error_table, 2, "NumRowMergeConflicts", ColumnType::int16()),
            ];
            store::create_table(&self.core, error_table, columns, TableKind::Persistent)?;
        }
        let table = store::get_table(&self.core, error_table)?;
        for (name, count) in conflicts {
            let mut rec = Record::new(2);
            rec.set_string(1, name)?;
            rec.set_int(2, *count)?;
            match store::insert_row(&self.core, &table, &rec, None, false) {
                Ok(_) => {}
                Err(Error::FunctionFailed(_)) => {
                    // Row already present from an earlier merge: update it.
                    let row = {
                        let t = table.borrow();
                        let strings = self.core.strings.borrow();
                        t.find_row(&rec, &strings)?
                    };
                    store::set_row(&self.core, &table, row, &rec, 0b10)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Merge requires identical column names, types, and key sets.
fn check_merge_schema(src: &Table, dst: &Table) -> Result<()> {
    if src.col_count() != dst.col_count() {
        return Err(Error::DatatypeMismatch(format!(
            "{}: column counts differ",
            src.name
        )));
    }
    for (a, b) in src.columns.iter().zip(&dst.columns) {
        if a.name != b.name || a.ty.bits() != b.ty.bits() {
            return Err(Error::DatatypeMismatch(format!(
                "{}.{}: column definitions differ",
                src.name, a.name
            )));
        }
    }
    Ok(())
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("mode", &self.core.mode)
            .field("tables_cached", &self.core.tables.borrow().len())
            .finish()
    }
}
