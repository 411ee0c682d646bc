//! DISTINCT node.
//!
//! During execution, collects each parent row's tuple of raw column values;
//! the first row producing an unseen tuple is recorded in a translation
//! table, and every read goes through that indirection.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::record::Record;
use crate::views::{ColumnInfo, FindCursor, ModifyMode, View};

pub struct DistinctView {
    child: Box<dyn View>,
    translation: Vec<u32>,
}

impl DistinctView {
    pub fn new(child: Box<dyn View>) -> DistinctView {
        DistinctView {
            child,
            translation: Vec::new(),
        }
    }

    fn translate(&self, row: u32) -> Result<u32> {
        self.translation
            .get(row as usize)
            .copied()
            .ok_or(Error::NoMoreItems)
    }
}

impl View for DistinctView {
    fn execute(&mut self, rec: Option<&Record>) -> Result<()> {
        self.translation.clear();
        self.child.execute(rec)?;

        let (rows, cols) = self.child.dimensions()?;
        let mut seen: HashSet<Vec<u32>> = HashSet::new();
        for row in 0..rows {
            let mut tuple = Vec::with_capacity(cols as usize);
            for col in 1..=cols {
                tuple.push(self.child.fetch_int(row, col)?);
            }
            if seen.insert(tuple) {
                self.translation.push(row);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.translation.clear();
        self.child.close()
    }

    fn dimensions(&self) -> Result<(u32, u32)> {
        let (_, cols) = self.child.dimensions()?;
        Ok((self.translation.len() as u32, cols))
    }

    fn column_info(&self, n: u32) -> Result<ColumnInfo> {
        self.child.column_info(n)
    }

    fn fetch_int(&self, row: u32, col: u32) -> Result<u32> {
        self.child.fetch_int(self.translate(row)?, col)
    }

    fn fetch_stream(&self, row: u32, col: u32) -> Result<crate::record::StreamHandle> {
        self.child.fetch_stream(self.translate(row)?, col)
    }

    fn find_matching_rows(&mut self, col: u32, val: u32, cursor: &mut FindCursor) -> Result<u32> {
        for row in cursor.next..self.translation.len() {
            if self.fetch_int(row as u32, col)? == val {
                cursor.next = row + 1;
                return Ok(row as u32);
            }
        }
        Err(Error::NoMoreItems)
    }

    fn modify(&mut self, mode: ModifyMode, rec: &Record, row: u32) -> Result<()> {
        self.child.modify(mode, rec, row)
    }

    fn sort(&mut self, columns: &[(Option<String>, String)]) -> Result<()> {
        self.child.sort(columns)
    }
}
