//! Column projection node.
//!
//! Maps result columns onto a slice of the parent's columns. A zero entry is
//! a literal-empty placeholder that fetches as 0 and carries no column info.

use std::rc::Rc;

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::record::{Record, StreamHandle};
use crate::table::{ColumnAttrs, ColumnType};
use crate::views::{ColumnInfo, FindCursor, ModifyMode, View, find_column, view_get_row};

pub struct SelectView {
    core: Rc<DbCore>,
    child: Box<dyn View>,
    /// 1-based parent column per result column; 0 for placeholders.
    cols: Vec<u32>,
}

impl SelectView {
    pub fn new(
        core: Rc<DbCore>,
        child: Box<dyn View>,
        columns: &[(Option<String>, String)],
    ) -> Result<SelectView> {
        let mut cols = Vec::with_capacity(columns.len());
        for (table, name) in columns {
            if name.is_empty() {
                cols.push(0);
            } else {
                cols.push(find_column(child.as_ref(), name, table.as_deref())?);
            }
        }
        Ok(SelectView { core, child, cols })
    }

    fn parent_col(&self, col: u32) -> Result<u32> {
        self.cols
            .get(col as usize - 1)
            .copied()
            .ok_or_else(|| Error::failed(format!("column {col} out of range")))
    }

    /// UPDATE through the projection: read the parent row, overlay the
    /// record's fields at their parent positions, hand back to the child.
    fn update(&mut self, rec: &Record, row: u32) -> Result<()> {
        if row == 0 {
            return Err(Error::InvalidParameter("no row has been fetched".into()));
        }
        let core = self.core.clone();
        let mut mod_rec = view_get_row(&core, self.child.as_ref(), row - 1)?;
        for (i, &col) in self.cols.iter().enumerate() {
            if col == 0 {
                continue;
            }
            let info = self.column_info(i as u32 + 1)?;
            if info.ty.is_binary() {
                return Err(Error::failed("cannot update a binary column"));
            }
            if info.ty.is_string() {
                mod_rec.set_string(col as usize, &rec.get_string(i + 1))?;
            } else if rec.is_null(i + 1) {
                mod_rec.set_null(col as usize)?;
            } else {
                mod_rec.set_int(col as usize, rec.get_int(i + 1))?;
            }
        }
        self.child.modify(ModifyMode::Update, &mod_rec, row)
    }
}

impl View for SelectView {
    fn execute(&mut self, rec: Option<&Record>) -> Result<()> {
        self.child.execute(rec)
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn dimensions(&self) -> Result<(u32, u32)> {
        let (rows, _) = self.child.dimensions()?;
        Ok((rows, self.cols.len() as u32))
    }

    fn column_info(&self, n: u32) -> Result<ColumnInfo> {
        let col = self.parent_col(n)?;
        if col == 0 {
            return Ok(ColumnInfo {
                name: String::new(),
                ty: ColumnType(ColumnAttrs::UNKNOWN.bits() | ColumnAttrs::VALID.bits()),
                temporary: false,
                table: String::new(),
            });
        }
        self.child.column_info(col)
    }

    fn fetch_int(&self, row: u32, col: u32) -> Result<u32> {
        let col = self.parent_col(col)?;
        if col == 0 {
            return Ok(0);
        }
        self.child.fetch_int(row, col)
    }

    fn fetch_stream(&self, row: u32, col: u32) -> Result<StreamHandle> {
        let col = self.parent_col(col)?;
        if col == 0 {
            return Err(Error::failed("placeholder column has no stream"));
        }
        self.child.fetch_stream(row, col)
    }

    fn set_row(&mut self, row: u32, rec: &Record, mask: u32) -> Result<()> {
        if (mask as u64) >= 1u64 << self.cols.len() {
            return Err(Error::InvalidParameter("mask has stray bits".into()));
        }
        let (_, parent_cols) = self.child.dimensions()?;
        let mut expanded = Record::new(parent_cols as usize);
        let mut expanded_mask = 0u32;
        for (i, &col) in self.cols.iter().enumerate() {
            if col == 0 || mask & (1 << i) == 0 {
                continue;
            }
            rec.copy_field(i + 1, &mut expanded, col as usize)?;
            expanded_mask |= 1 << (col - 1);
        }
        self.child.set_row(row, &expanded, expanded_mask)
    }

    fn insert_row(&mut self, rec: &Record, row: i64, temporary: bool) -> Result<()> {
        let (_, parent_cols) = self.child.dimensions()?;
        let mut expanded = Record::new(parent_cols as usize);
        for (i, &col) in self.cols.iter().enumerate() {
            if col == 0 {
                continue;
            }
            rec.copy_field(i + 1, &mut expanded, col as usize)?;
        }
        self.child.insert_row(&expanded, row, temporary)
    }

    fn delete_row(&mut self, row: u32) -> Result<()> {
        self.child.delete_row(row)
    }

    fn find_matching_rows(&mut self, col: u32, val: u32, cursor: &mut FindCursor) -> Result<u32> {
        let col = self.parent_col(col)?;
        if col == 0 {
            return Err(Error::failed("placeholder column has no index"));
        }
        self.child.find_matching_rows(col, val, cursor)
    }

    fn modify(&mut self, mode: ModifyMode, rec: &Record, row: u32) -> Result<()> {
        if mode == ModifyMode::Update {
            return self.update(rec, row);
        }
        self.child.modify(mode, rec, row)
    }

    fn sort(&mut self, columns: &[(Option<String>, String)]) -> Result<()> {
        self.child.sort(columns)
    }
}
