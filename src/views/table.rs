//! Direct view over one stored table.
//!
//! Columns and rows map straight onto the table page; `fetch_int` returns
//! raw (biased) cell values. Binary cells resolve to container streams named
//! by the table name plus the row's key values.

use std::cell::RefCell;
use std::rc::Rc;

use log::warn;

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::record::{Record, StreamHandle};
use crate::storage::name::encode;
use crate::strings::LONG_STR_BYTES;
use crate::table::store;
use crate::table::{ColumnType, Table, TableKind};
use crate::views::{ColumnInfo, FindCursor, ModifyMode, View};

pub struct TableView {
    core: Rc<DbCore>,
    table: Rc<RefCell<Table>>,
    name: String,
}

impl TableView {
    pub fn new(core: Rc<DbCore>, name: &str) -> Result<TableView> {
        let table = store::get_table(&core, name)?;
        Ok(TableView {
            core,
            table,
            name: name.to_owned(),
        })
    }

    /// Stream name for a row's binary cells: the table name followed by
    /// `.key` for every KEY column, with numeric keys un-biased.
    fn stream_name(&self, row: u32) -> Result<String> {
        let table = self.table.borrow();
        let strings = self.core.strings.borrow();
        let mut name = self.name.clone();
        for (i, col) in table.columns.iter().enumerate() {
            if !col.ty.is_key() {
                continue;
            }
            let raw = table.read_raw(row as usize, i)?;
            name.push('.');
            if col.ty.is_string() {
                let s = strings
                    .lookup_str(raw)
                    .ok_or_else(|| Error::InvalidParameter(format!("dangling string id {raw}")))?;
                name.push_str(s);
            } else if col.ty.bytes_per_cell(LONG_STR_BYTES) == 2 {
                name.push_str(&(raw as i32 - 0x8000).to_string());
            } else {
                name.push_str(&((raw ^ 0x8000_0000) as i32).to_string());
            }
        }
        Ok(name)
    }

    /// Stream name built from a record's key fields rather than a stored row.
    pub fn record_stream_name(&self, rec: &Record) -> Result<String> {
        let table = self.table.borrow();
        let mut name = self.name.clone();
        for (i, col) in table.columns.iter().enumerate() {
            if !col.ty.is_key() {
                continue;
            }
            name.push('.');
            name.push_str(&rec.get_string(i + 1));
        }
        Ok(name)
    }

    /// Persist the payloads of binary fields selected by `mask`.
    fn write_binary_streams(&mut self, row: u32, rec: &Record, mask: u32) -> Result<()> {
        let binary_cols: Vec<usize> = {
            let table = self.table.borrow();
            table
                .columns
                .iter()
                .enumerate()
                .filter(|(i, c)| mask & (1 << i) != 0 && c.ty.is_binary())
                .map(|(i, _)| i)
                .collect()
        };
        for i in binary_cols {
            if rec.is_null(i + 1) {
                continue;
            }
            let stream = rec
                .get_stream(i + 1)
                .ok_or_else(|| Error::InvalidDatatype(format!("field {} is not a stream", i + 1)))?
                .clone();
            let name = self.stream_name(row)?;
            self.core
                .write_raw_stream(&encode(false, &name), stream.bytes().to_vec())?;
        }
        Ok(())
    }
}

impl View for TableView {
    fn execute(&mut self, _rec: Option<&Record>) -> Result<()> {
        Ok(())
    }

    fn dimensions(&self) -> Result<(u32, u32)> {
        let table = self.table.borrow();
        Ok((table.row_count() as u32, table.col_count() as u32))
    }

    fn column_info(&self, n: u32) -> Result<ColumnInfo> {
        let table = self.table.borrow();
        let col = table
            .columns
            .get(n as usize - 1)
            .ok_or_else(|| Error::InvalidParameter(format!("column {n} out of range")))?;
        Ok(ColumnInfo {
            name: col.name.clone(),
            ty: col.ty,
            temporary: col.temporary,
            table: col.table.clone(),
        })
    }

    fn fetch_int(&self, row: u32, col: u32) -> Result<u32> {
        let table = self.table.borrow();
        if col == 0 || col > table.col_count() as u32 {
            return Err(Error::InvalidParameter(format!("column {col} out of range")));
        }
        table.read_raw(row as usize, col as usize - 1)
    }

    fn fetch_stream(&self, row: u32, _col: u32) -> Result<StreamHandle> {
        let name = self.stream_name(row)?;
        let data = self.core.read_raw_stream(&encode(false, &name))?;
        Ok(StreamHandle::with_name(name, data))
    }

    fn set_row(&mut self, row: u32, rec: &Record, mask: u32) -> Result<()> {
        store::set_row(&self.core, &self.table, row as usize, rec, mask)?;
        self.write_binary_streams(row, rec, mask)
    }

    fn insert_row(&mut self, rec: &Record, row: i64, temporary: bool) -> Result<()> {
        let pos = if row < 0 { None } else { Some(row as usize) };
        let landed = store::insert_row(&self.core, &self.table, rec, pos, temporary)?;
        let mask = ((1u64 << self.table.borrow().col_count()) - 1) as u32;
        self.write_binary_streams(landed as u32, rec, mask)
    }

    fn delete_row(&mut self, row: u32) -> Result<()> {
        store::delete_row(&self.core, &self.table, row as usize)
    }

    fn find_matching_rows(&mut self, col: u32, val: u32, cursor: &mut FindCursor) -> Result<u32> {
        if col == 0 || col > self.table.borrow().col_count() as u32 {
            return Err(Error::InvalidParameter(format!("column {col} out of range")));
        }
        let matches = self
            .table
            .borrow_mut()
            .find_matching_rows(col as usize - 1, val)?;
        let row = matches.get(cursor.next).copied().ok_or(Error::NoMoreItems)?;
        cursor.next += 1;
        Ok(row as u32)
    }

    fn modify(&mut self, mode: ModifyMode, rec: &Record, _row: u32) -> Result<()> {
        match mode {
            ModifyMode::Update => {
                let row = {
                    let table = self.table.borrow();
                    let strings = self.core.strings.borrow();
                    table.find_row(rec, &strings)?
                };
                let mask = ((1u64 << self.table.borrow().col_count()) - 1) as u32;
                self.set_row(row as u32, rec, mask)
            }
            ModifyMode::Insert => self.insert_row(rec, -1, false),
            ModifyMode::InsertTemporary => self.insert_row(rec, -1, true),
            _ => Err(Error::failed("modify mode not supported on a table")),
        }
    }

    fn add_ref(&mut self) {
        let mut table = self.table.borrow_mut();
        table.ref_count += 1;
        for col in &mut table.columns {
            if col.ty.is_temporary() {
                col.ref_count += 1;
            }
        }
    }

    fn release(&mut self) -> Result<i32> {
        let (dropped_columns, refs) = {
            let mut table = self.table.borrow_mut();
            let mut dropped = Vec::new();
            for col in &mut table.columns {
                if col.ty.is_temporary() {
                    col.ref_count -= 1;
                    if col.ref_count == 0 {
                        dropped.push((col.table.clone(), col.number));
                    }
                }
            }
            table.ref_count -= 1;
            (dropped, table.ref_count)
        };
        for (table_name, number) in dropped_columns {
            if let Err(e) = store::remove_column(&self.core, &table_name, number) {
                warn!("failed to reap held column {number} of {table_name}: {e}");
            }
        }
        if refs == 0 && self.table.borrow().row_count() == 0 {
            self.core.tables.borrow_mut().remove(&self.name);
        }
        Ok(refs)
    }

    fn add_column(
        &mut self,
        table: &str,
        number: u32,
        name: &str,
        ty: ColumnType,
        hold: bool,
    ) -> Result<()> {
        store::add_column(&self.core, table, number as usize, name, ty, hold)
    }

    fn remove_column(&mut self, table: &str, number: u32) -> Result<()> {
        store::remove_column(&self.core, table, number as usize)
    }

    fn drop(&mut self) -> Result<()> {
        if self.table.borrow().kind == TableKind::System {
            return Err(Error::failed("cannot drop a catalog table"));
        }
        store::drop_table(&self.core, &self.name)
    }
}
