//! `_Storages` virtual table.
//!
//! Exposes the container's substorages as `(Name, Data)` rows. The data
//! column never materialises (substorages are not byte streams); fetching it
//! reports invalid data like the on-disk format would.

use std::rc::Rc;

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::record::{Record, StreamHandle};
use crate::storage::memory::MemoryContainer;
use crate::storage::name::{decode, encode};
use crate::strings::Persistence;
use crate::table::{ColumnAttrs, ColumnType};
use crate::views::{ColumnInfo, FindCursor, View};

const MAX_STORAGE_NAME_LEN: u16 = 62;

struct StorageRow {
    str_index: u32,
    name: String,
}

pub struct StoragesView {
    core: Rc<DbCore>,
    rows: Vec<StorageRow>,
}

impl StoragesView {
    pub fn new(core: Rc<DbCore>) -> Result<StoragesView> {
        let mut rows = Vec::new();
        for encoded in core.list_storages() {
            let (_, name) = decode(&encoded);
            let str_index = core
                .strings
                .borrow_mut()
                .intern(&name, 1, Persistence::NonPersistent);
            rows.push(StorageRow { str_index, name });
        }
        Ok(StoragesView { core, rows })
    }
}

impl View for StoragesView {
    fn execute(&mut self, _rec: Option<&Record>) -> Result<()> {
        Ok(())
    }

    fn dimensions(&self) -> Result<(u32, u32)> {
        Ok((self.rows.len() as u32, 2))
    }

    fn column_info(&self, n: u32) -> Result<ColumnInfo> {
        match n {
            1 => Ok(ColumnInfo {
                name: "Name".into(),
                ty: ColumnType::string(MAX_STORAGE_NAME_LEN).with(ColumnAttrs::KEY),
                temporary: false,
                table: "_Storages".into(),
            }),
            2 => Ok(ColumnInfo {
                name: "Data".into(),
                ty: ColumnType::binary().with(ColumnAttrs::NULLABLE),
                temporary: false,
                table: "_Storages".into(),
            }),
            _ => Err(Error::InvalidParameter(format!("column {n} out of range"))),
        }
    }

    fn fetch_int(&self, row: u32, col: u32) -> Result<u32> {
        if col != 1 {
            return Err(Error::InvalidParameter("only Name holds an integer".into()));
        }
        self.rows
            .get(row as usize)
            .map(|r| r.str_index)
            .ok_or(Error::NoMoreItems)
    }

    fn fetch_stream(&self, row: u32, _col: u32) -> Result<StreamHandle> {
        if row as usize >= self.rows.len() {
            return Err(Error::failed(format!("row {row} out of range")));
        }
        Err(Error::InvalidData("a substorage is not a stream".into()))
    }

    fn insert_row(&mut self, rec: &Record, row: i64, _temporary: bool) -> Result<()> {
        let name = rec.get_string(1);
        if name.is_empty() {
            return Err(Error::failed("storage name may not be empty"));
        }
        self.core
            .add_storage_copy(&encode(false, &name), MemoryContainer::new());
        let str_index = self
            .core
            .strings
            .borrow_mut()
            .intern(&name, 1, Persistence::NonPersistent);
        let pos = if row < 0 || row as usize > self.rows.len() {
            self.rows.len()
        } else {
            row as usize
        };
        self.rows.insert(pos, StorageRow { str_index, name });
        Ok(())
    }

    fn delete_row(&mut self, row: u32) -> Result<()> {
        if row as usize >= self.rows.len() {
            return Err(Error::failed(format!("row {row} out of range")));
        }
        let entry = self.rows.remove(row as usize);
        self.core
            .strings
            .borrow_mut()
            .release(entry.str_index, Persistence::NonPersistent);
        Ok(())
    }

    fn find_matching_rows(&mut self, col: u32, val: u32, cursor: &mut FindCursor) -> Result<u32> {
        if col != 1 {
            return Err(Error::InvalidParameter("only Name is indexed".into()));
        }
        for row in cursor.next..self.rows.len() {
            if self.rows[row].str_index == val {
                cursor.next = row + 1;
                return Ok(row as u32);
            }
        }
        Err(Error::NoMoreItems)
    }
}
