//! ALTER TABLE node: HOLD/FREE reference counting and ADD COLUMN.

use std::rc::Rc;

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::query::ast::{AlterAction, ColumnDef};
use crate::record::Record;
use crate::table::store::{self, COLUMNS};
use crate::views::table::TableView;
use crate::views::View;

pub struct AlterView {
    core: Rc<DbCore>,
    table: TableView,
    name: String,
    action: AlterAction,
}

impl AlterView {
    pub fn new(core: Rc<DbCore>, name: &str, action: AlterAction) -> Result<AlterView> {
        let table = TableView::new(core.clone(), name)?;
        Ok(AlterView {
            core,
            table,
            name: name.to_owned(),
            action,
        })
    }

    fn add_column(&mut self, def: &ColumnDef, hold: bool) -> Result<()> {
        let columns = store::get_table(&self.core, COLUMNS)?;
        let columns = columns.borrow();
        let strings = self.core.strings.borrow();

        // Reject duplicates and find the next free position.
        let table_id = strings.lookup_id(&self.name);
        let mut next_number = 1;
        for row in 0..columns.row_count() {
            if Some(columns.read_raw(row, 0)?) != table_id {
                continue;
            }
            let name_id = columns.read_raw(row, 2)?;
            if strings.lookup_str(name_id) == Some(def.name.as_str()) {
                return Err(Error::BadQuerySyntax(format!(
                    "column {} already exists",
                    def.name
                )));
            }
            next_number += 1;
        }
        drop(strings);
        drop(columns);

        self.table
            .add_column(&self.name.clone(), next_number, &def.name, def.ty, hold)
    }
}

impl View for AlterView {
    fn execute(&mut self, _rec: Option<&Record>) -> Result<()> {
        match self.action.clone() {
            AlterAction::Hold => {
                self.table.add_ref();
                Ok(())
            }
            AlterAction::Free => {
                self.table.release()?;
                Ok(())
            }
            AlterAction::Add { column, hold } => self.add_column(&column, hold),
        }
    }
}
