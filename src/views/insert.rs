//! INSERT node.
//!
//! Combines the parsed value list with the parameter record, rearranges the
//! result into the target table's column order, and hands the row to the
//! table view. Rows whose primary key is entirely null go to position 0.

use std::rc::Rc;

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::query::ast::Expr;
use crate::record::Record;
use crate::views::select::SelectView;
use crate::views::{ColumnInfo, View, create_table_view};

pub struct InsertView {
    table: Box<dyn View>,
    select: SelectView,
    values: Vec<Expr>,
    temporary: bool,
}

impl InsertView {
    pub fn new(
        core: Rc<DbCore>,
        table: &str,
        columns: &[(Option<String>, String)],
        values: Vec<Expr>,
        temporary: bool,
    ) -> Result<InsertView> {
        if columns.len() != values.len() {
            return Err(Error::BadQuerySyntax(format!(
                "{} columns but {} values",
                columns.len(),
                values.len()
            )));
        }
        let table_view = create_table_view(core.clone(), table)?;
        let select_child = create_table_view(core.clone(), table)?;
        let select = SelectView::new(core, select_child, columns)?;
        Ok(InsertView {
            table: table_view,
            select,
            values,
            temporary,
        })
    }

    /// Replace wildcard entries in the value list with fields pulled
    /// sequentially from the parameter record.
    fn merge_values(&self, fields: usize, rec: Option<&Record>) -> Result<Record> {
        merge_record(fields, &self.values, rec)
    }

    /// True when the query's column order equals the table's.
    fn columns_in_order(&self, col_count: usize) -> Result<bool> {
        for i in 1..=col_count {
            let a = self.select.column_info(i as u32)?;
            let b = self.table.column_info(i as u32)?;
            if a.name != b.name {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Rearrange the record into table column order, padding columns the
    /// query omitted with nulls.
    fn arrange_record(&self, values: Record) -> Result<Record> {
        let (_, table_cols) = self.table.dimensions()?;
        if values.field_count() == table_cols as usize
            && self.columns_in_order(table_cols as usize)?
        {
            return Ok(values);
        }

        let mut padded = Record::new(table_cols as usize);
        for i in 1..=values.field_count() {
            let name = self.select.column_info(i as u32)?.name;
            for t in 1..=table_cols {
                if self.table.column_info(t)?.name == name {
                    values.copy_field(i, &mut padded, t as usize)?;
                    break;
                }
            }
        }
        Ok(padded)
    }

    fn has_null_primary_key(&self, rec: &Record) -> Result<bool> {
        let (_, cols) = self.table.dimensions()?;
        for i in 1..=cols {
            let info = self.table.column_info(i)?;
            if info.ty.is_key() && rec.is_null(i as usize) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl View for InsertView {
    fn execute(&mut self, rec: Option<&Record>) -> Result<()> {
        self.select.execute(None)?;
        let (_, col_count) = self.select.dimensions()?;

        let values = self.merge_values(col_count as usize, rec)?;
        let values = self.arrange_record(values)?;

        // Null primary keys sort to the front of the table.
        let row = if self.has_null_primary_key(&values)? {
            0
        } else {
            -1
        };
        self.table.insert_row(&values, row, self.temporary)
    }

    fn close(&mut self) -> Result<()> {
        self.select.close()
    }

    fn dimensions(&self) -> Result<(u32, u32)> {
        self.select.dimensions()
    }

    fn column_info(&self, n: u32) -> Result<ColumnInfo> {
        self.select.column_info(n)
    }
}

/// Build a record of `fields` fields from an expression list, pulling `?`
/// entries out of `rec` in order. Shared by INSERT and UPDATE.
pub(crate) fn merge_record(fields: usize, values: &[Expr], rec: Option<&Record>) -> Result<Record> {
    let mut merged = Record::new(fields);
    let mut wildcard = 0usize;
    for i in 1..=fields {
        let value = values
            .get(i - 1)
            .ok_or_else(|| Error::BadQuerySyntax("not enough values to insert".into()))?;
        match value {
            Expr::Str(s) => merged.set_string(i, s)?,
            Expr::Int(v) => merged.set_int(i, *v)?,
            Expr::Wildcard => {
                let rec = rec.ok_or_else(|| {
                    Error::InvalidParameter("query has parameters but no record".into())
                })?;
                wildcard += 1;
                rec.copy_field(wildcard, &mut merged, i)?;
            }
            other => {
                return Err(Error::BadQuerySyntax(format!(
                    "unsupported value expression {other:?}"
                )));
            }
        }
    }
    Ok(merged)
}
