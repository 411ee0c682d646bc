//! `_Streams` virtual table.
//!
//! Two columns, `Name` and `Data`, materialised by enumerating the
//! container's non-table streams. Inserting writes a stream, deleting
//! removes one, and an update with the name bit clear replaces stream
//! contents in place.

use std::rc::Rc;

use log::warn;

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::record::{Record, StreamHandle};
use crate::storage::name::{SUMMARY_INFO_NAME, decode, encode};
use crate::strings::Persistence;
use crate::table::{ColumnAttrs, ColumnType};
use crate::views::{ColumnInfo, FindCursor, ModifyMode, View};

const MAX_STREAM_NAME_LEN: u16 = 62;

struct StreamRow {
    str_index: u32,
    name: String,
}

pub struct StreamsView {
    core: Rc<DbCore>,
    rows: Vec<StreamRow>,
}

impl StreamsView {
    pub fn new(core: Rc<DbCore>) -> Result<StreamsView> {
        let mut rows = Vec::new();
        for encoded in core.list_raw_streams() {
            let (is_table, name) = decode(&encoded);
            if is_table || name == SUMMARY_INFO_NAME {
                continue;
            }
            let str_index = core
                .strings
                .borrow_mut()
                .intern(&name, 1, Persistence::NonPersistent);
            rows.push(StreamRow { str_index, name });
        }
        Ok(StreamsView { core, rows })
    }

    fn row(&self, row: u32) -> Result<&StreamRow> {
        self.rows.get(row as usize).ok_or(Error::NoMoreItems)
    }
}

impl View for StreamsView {
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
                ty: ColumnType::string(MAX_STREAM_NAME_LEN).with(ColumnAttrs::KEY),
                temporary: false,
                table: "_Streams".into(),
            }),
            2 => Ok(ColumnInfo {
                name: "Data".into(),
                ty: ColumnType::binary().with(ColumnAttrs::NULLABLE),
                temporary: false,
                table: "_Streams".into(),
            }),
            _ => Err(Error::InvalidParameter(format!("column {n} out of range"))),
        }
    }

    fn fetch_int(&self, row: u32, col: u32) -> Result<u32> {
        if col != 1 {
            return Err(Error::InvalidParameter("only Name holds an integer".into()));
        }
        Ok(self.row(row)?.str_index)
    }

    fn fetch_stream(&self, row: u32, _col: u32) -> Result<StreamHandle> {
        let name = &self.row(row)?.name;
        let data = self.core.read_raw_stream(&encode(false, name))?;
        Ok(StreamHandle::with_name(name.clone(), data))
    }

    fn set_row(&mut self, row: u32, rec: &Record, mask: u32) -> Result<()> {
        if row as usize >= self.rows.len() {
            return Err(Error::failed(format!("row {row} out of range")));
        }
        if mask & 1 != 0 {
            warn!("renaming a stream through _Streams is not supported");
            return Err(Error::failed("stream rename not supported"));
        }
        let stream = rec
            .get_stream(2)
            .ok_or_else(|| Error::InvalidDatatype("Data field is not a stream".into()))?;
        let name = self.rows[row as usize].name.clone();
        self.core
            .write_raw_stream(&encode(false, &name), stream.bytes().to_vec())
    }

    fn insert_row(&mut self, rec: &Record, row: i64, _temporary: bool) -> Result<()> {
        let name = rec.get_string(1);
        if name.is_empty() {
            return Err(Error::failed("stream name may not be empty"));
        }
        let stream = rec
            .get_stream(2)
            .ok_or_else(|| Error::InvalidDatatype("Data field is not a stream".into()))?;
        self.core
            .write_raw_stream(&encode(false, &name), stream.bytes().to_vec())?;

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
        self.rows.insert(pos, StreamRow { str_index, name });
        Ok(())
    }

    fn delete_row(&mut self, row: u32) -> Result<()> {
        if row as usize >= self.rows.len() {
            return Err(Error::failed(format!("row {row} out of range")));
        }
        let entry = self.rows.remove(row as usize);
        self.core.remove_raw_stream(&encode(false, &entry.name));
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

    fn modify(&mut self, mode: ModifyMode, rec: &Record, row: u32) -> Result<()> {
        match mode {
            ModifyMode::Insert | ModifyMode::InsertTemporary => self.insert_row(rec, -1, false),
            ModifyMode::Update => self.set_row(row.saturating_sub(1), rec, 0),
            _ => Err(Error::failed("modify mode not supported on _Streams")),
        }
    }
}
