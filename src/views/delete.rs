//! DELETE node: execute the filter, then remove every matched row.

use crate::error::Result;
use crate::record::Record;
use crate::views::{ColumnInfo, View};

pub struct DeleteView {
    child: Box<dyn View>,
}

impl DeleteView {
    pub fn new(child: Box<dyn View>) -> DeleteView {
        DeleteView { child }
    }
}

impl View for DeleteView {
    fn execute(&mut self, rec: Option<&Record>) -> Result<()> {
        self.child.execute(rec)?;
        let (rows, _) = self.child.dimensions()?;
        // The filter keeps its row tuples in step with the shrinking table,
        // so every matched index stays valid while we walk them.
        for row in 0..rows {
            self.child.delete_row(row)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn dimensions(&self) -> Result<(u32, u32)> {
        let (_, cols) = self.child.dimensions()?;
        Ok((0, cols))
    }

    fn column_info(&self, n: u32) -> Result<ColumnInfo> {
        self.child.column_info(n)
    }
}
