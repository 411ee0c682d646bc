//! DROP TABLE node.

use std::rc::Rc;

use crate::database::DbCore;
use crate::error::Result;
use crate::record::Record;
use crate::views::table::TableView;
use crate::views::View;

pub struct DropView {
    table: TableView,
}

impl DropView {
    pub fn new(core: Rc<DbCore>, name: &str) -> Result<DropView> {
        Ok(DropView {
            table: TableView::new(core, name)?,
        })
    }
}

impl View for DropView {
    fn execute(&mut self, rec: Option<&Record>) -> Result<()> {
        self.table.execute(rec)?;
        self.table.drop()
    }
}
