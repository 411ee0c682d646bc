//! View pipeline.
//!
//! Every SQL construct compiles into a tree of view nodes sharing one
//! contract. Execution streams rows through the tree; only nodes that need
//! a materialised result (where/order, distinct) buffer anything. Methods a
//! node cannot support fall through to defaults returning `FunctionFailed`.

pub mod alter;
pub mod create;
pub mod delete;
pub mod distinct;
pub mod drop;
pub mod insert;
pub mod select;
pub mod storages;
pub mod streams;
pub mod table;
pub mod update;
pub mod where_view;

use std::rc::Rc;

use log::warn;

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::record::{Record, StreamHandle};
use crate::table::ColumnType;
use crate::table::store::{STORAGES, STREAMS};

/// Row-modification modes accepted by [`View::modify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyMode {
    Seek,
    Refresh,
    Insert,
    Update,
    Assign,
    Replace,
    Merge,
    Delete,
    InsertTemporary,
    Validate,
    ValidateNew,
    ValidateField,
    ValidateDelete,
}

/// Description of one result column.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub ty: ColumnType,
    pub temporary: bool,
    pub table: String,
}

/// Iteration state for [`View::find_matching_rows`].
#[derive(Debug, Default)]
pub struct FindCursor {
    next: usize,
}

pub trait View {
    /// Run the node (and its children), binding `?` parameters from `rec`.
    fn execute(&mut self, rec: Option<&Record>) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// `(rows, cols)` of the result.
    fn dimensions(&self) -> Result<(u32, u32)> {
        Err(Error::failed("view has no dimensions"))
    }

    fn column_info(&self, _n: u32) -> Result<ColumnInfo> {
        Err(Error::failed("view has no columns"))
    }

    /// Raw cell value, bias and string ids included.
    fn fetch_int(&self, _row: u32, _col: u32) -> Result<u32> {
        Err(Error::failed("view has no rows"))
    }

    fn fetch_stream(&self, _row: u32, _col: u32) -> Result<StreamHandle> {
        Err(Error::failed("view has no streams"))
    }

    fn set_row(&mut self, _row: u32, _rec: &Record, _mask: u32) -> Result<()> {
        Err(Error::failed("view is not writable"))
    }

    /// `row` of -1 appends at the key-ordered position.
    fn insert_row(&mut self, _rec: &Record, _row: i64, _temporary: bool) -> Result<()> {
        Err(Error::failed("view does not support insertion"))
    }

    fn delete_row(&mut self, _row: u32) -> Result<()> {
        Err(Error::failed("view does not support deletion"))
    }

    /// Next row whose raw value in `col` equals `val`.
    fn find_matching_rows(&mut self, _col: u32, _val: u32, _cursor: &mut FindCursor) -> Result<u32> {
        Err(Error::failed("view does not support matching"))
    }

    fn modify(&mut self, _mode: ModifyMode, _rec: &Record, _row: u32) -> Result<()> {
        Err(Error::failed("view does not support modify"))
    }

    fn add_ref(&mut self) {}

    fn release(&mut self) -> Result<i32> {
        Err(Error::failed("view holds no table reference"))
    }

    fn add_column(
        &mut self,
        _table: &str,
        _number: u32,
        _name: &str,
        _ty: ColumnType,
        _hold: bool,
    ) -> Result<()> {
        Err(Error::failed("view does not support adding columns"))
    }

    fn remove_column(&mut self, _table: &str, _number: u32) -> Result<()> {
        Err(Error::failed("view does not support removing columns"))
    }

    fn drop(&mut self) -> Result<()> {
        Err(Error::failed("view does not support dropping tables"))
    }

    /// Attach an ORDER BY column list; takes effect on the next `execute`.
    fn sort(&mut self, _columns: &[(Option<String>, String)]) -> Result<()> {
        Err(Error::failed("view does not support ordering"))
    }
}

/// Open a view over a stored table, dispatching the virtual stream tables to
/// their own implementations.
pub fn create_table_view(core: Rc<DbCore>, name: &str) -> Result<Box<dyn View>> {
    match name {
        STREAMS => Ok(Box::new(streams::StreamsView::new(core)?)),
        STORAGES => Ok(Box::new(storages::StoragesView::new(core)?)),
        _ => Ok(Box::new(table::TableView::new(core, name)?)),
    }
}

/// Materialise one result row as a record: strings resolved through the
/// pool, integers un-biased, binary cells fetched as streams.
pub fn view_get_row(core: &DbCore, view: &dyn View, row: u32) -> Result<Record> {
    let (row_count, col_count) = view.dimensions()?;
    if row >= row_count {
        return Err(Error::NoMoreItems);
    }
    let mut rec = Record::new(col_count as usize);
    for col in 1..=col_count {
        let info = view.column_info(col)?;
        if info.ty.is_binary() {
            match view.fetch_stream(row, col) {
                Ok(stream) => rec.set_stream(col as usize, stream)?,
                Err(e) => warn!("failed to fetch stream for column {col}: {e}"),
            }
            continue;
        }
        let raw = view.fetch_int(row, col)?;
        if info.ty.is_string() {
            let strings = core.strings.borrow();
            let s = strings.lookup_str(raw).unwrap_or_default();
            rec.set_string(col as usize, s)?;
        } else if raw == 0 {
            // Zero bit pattern is NULL for numeric cells.
            rec.set_null(col as usize)?;
        } else if info.ty.bytes_per_cell(crate::strings::LONG_STR_BYTES) == 2 {
            rec.set_int(col as usize, raw as i32 - 0x8000)?;
        } else {
            rec.set_int(col as usize, (raw ^ 0x8000_0000) as i32)?;
        }
    }
    Ok(rec)
}

/// Find the 1-based index of a named column, optionally qualified by table.
pub fn find_column(view: &dyn View, name: &str, table: Option<&str>) -> Result<u32> {
    let (_, cols) = view.dimensions()?;
    for n in 1..=cols {
        let info = view.column_info(n)?;
        if info.name == name && table.is_none_or(|t| t == info.table) {
            return Ok(n);
        }
    }
    Err(Error::InvalidField(name.to_owned()))
}
