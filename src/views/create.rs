//! CREATE TABLE node.

use std::rc::Rc;

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::query::ast::ColumnDef;
use crate::record::Record;
use crate::table::store;
use crate::table::{Column, TableKind};
use crate::views::View;

pub struct CreateView {
    core: Rc<DbCore>,
    table: String,
    columns: Vec<ColumnDef>,
    /// All columns temporary makes the table transient.
    transient: bool,
    hold: bool,
}

impl CreateView {
    pub fn new(
        core: Rc<DbCore>,
        table: &str,
        columns: Vec<ColumnDef>,
        hold: bool,
    ) -> Result<CreateView> {
        // Duplicate column names are a parse-time error.
        for (i, a) in columns.iter().enumerate() {
            if columns[i + 1..].iter().any(|b| b.name == a.name) {
                return Err(Error::BadQuerySyntax(format!(
                    "duplicate column {}",
                    a.name
                )));
            }
        }

        let transient = columns.iter().all(|c| c.ty.is_temporary());
        // A temporary key on an otherwise persistent table cannot work.
        let temp_key = columns
            .iter()
            .any(|c| c.ty.is_temporary() && c.ty.is_key());
        if !transient && temp_key {
            return Err(Error::failed(
                "temporary key columns require an all-temporary table",
            ));
        }

        Ok(CreateView {
            core,
            table: table.to_owned(),
            columns,
            transient,
            hold,
        })
    }
}

impl View for CreateView {
    fn execute(&mut self, _rec: Option<&Record>) -> Result<()> {
        // An unheld transient table has nothing to create yet.
        if self.transient && !self.hold {
            return Ok(());
        }
        let kind = if self.transient {
            TableKind::Transient
        } else {
            TableKind::Persistent
        };
        let columns: Vec<Column> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, def)| Column::new(&self.table, i + 1, &def.name, def.ty))
            .collect();
        store::create_table(&self.core, &self.table, columns, kind)
    }
}
