//! UPDATE node.
//!
//! The parameter record supplies SET values first, then WHERE wildcards: the
//! trailing fields beyond the assignment count are split into a sub-record
//! bound to the filter, and every matched row receives the SET values.

use std::rc::Rc;

use crate::database::DbCore;
use crate::error::Result;
use crate::query::ast::Expr;
use crate::record::Record;
use crate::views::insert::merge_record;
use crate::views::select::SelectView;
use crate::views::{ColumnInfo, View};

pub struct UpdateView {
    /// Select over the filtered rows, projecting the assigned columns.
    child: SelectView,
    values: Vec<Expr>,
}

impl UpdateView {
    pub fn new(
        core: Rc<DbCore>,
        filtered: Box<dyn View>,
        columns: &[(Option<String>, String)],
        values: Vec<Expr>,
    ) -> Result<UpdateView> {
        let child = SelectView::new(core, filtered, columns)?;
        Ok(UpdateView { child, values })
    }
}

impl View for UpdateView {
    fn execute(&mut self, rec: Option<&Record>) -> Result<()> {
        // Trailing record fields belong to the WHERE clause wildcards.
        let where_rec = match rec {
            Some(rec) if rec.field_count() > self.values.len() => {
                let extra = rec.field_count() - self.values.len();
                let mut sub = Record::new(extra);
                for i in 1..=extra {
                    rec.copy_field(self.values.len() + i, &mut sub, i)?;
                }
                Some(sub)
            }
            _ => None,
        };

        self.child.execute(where_rec.as_ref())?;
        let (row_count, col_count) = self.child.dimensions()?;

        let values = merge_record(col_count as usize, &self.values, rec)?;
        let mask = ((1u64 << col_count) - 1) as u32;
        for row in 0..row_count {
            self.child.set_row(row, &values, mask)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn dimensions(&self) -> Result<(u32, u32)> {
        self.child.dimensions()
    }

    fn column_info(&self, n: u32) -> Result<ColumnInfo> {
        self.child.column_info(n)
    }
}
