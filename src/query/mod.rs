//! Query handles.
//!
//! A query is a parsed statement compiled into a view pipeline. `execute`
//! binds parameters and runs the pipeline; `fetch` walks result rows as
//! records. The handle shares ownership of the database core, so it stays
//! valid for its whole lifetime.

pub mod ast;
pub mod parser;
pub mod tokenize;

use std::rc::Rc;

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::query::ast::{ColumnRef, Statement};
use crate::record::Record;
use crate::views::alter::AlterView;
use crate::views::create::CreateView;
use crate::views::delete::DeleteView;
use crate::views::distinct::DistinctView;
use crate::views::drop::DropView;
use crate::views::insert::InsertView;
use crate::views::select::SelectView;
use crate::views::update::UpdateView;
use crate::views::where_view::WhereView;
use crate::views::{ColumnInfo, ModifyMode, View, view_get_row};

pub struct Query {
    core: Rc<DbCore>,
    view: Box<dyn View>,
    /// 1-based position of the last fetched row; 0 before the first fetch.
    row: u32,
    executed: bool,
}

impl Query {
    pub(crate) fn open(core: Rc<DbCore>, sql: &str) -> Result<Query> {
        let stmt = parser::parse(sql)?;
        let view = build_view(core.clone(), stmt)?;
        Ok(Query {
            core,
            view,
            row: 0,
            executed: false,
        })
    }

    /// Run the pipeline, binding `?` markers from `rec` in order.
    pub fn execute(&mut self, rec: Option<&Record>) -> Result<()> {
        self.view.execute(rec)?;
        self.row = 0;
        self.executed = true;
        Ok(())
    }

    /// Next result row, or `None` when the result set is exhausted.
    pub fn fetch(&mut self) -> Result<Option<Record>> {
        if !self.executed {
            return Err(Error::failed("query has not been executed"));
        }
        match view_get_row(&self.core, self.view.as_ref(), self.row) {
            Ok(rec) => {
                self.row += 1;
                Ok(Some(rec))
            }
            Err(Error::NoMoreItems) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All remaining rows.
    pub fn fetch_all(&mut self) -> Result<Vec<Record>> {
        let mut rows = Vec::new();
        while let Some(rec) = self.fetch()? {
            rows.push(rec);
        }
        Ok(rows)
    }

    pub fn column_count(&self) -> Result<u32> {
        Ok(self.view.dimensions()?.1)
    }

    pub fn column_info(&self, n: u32) -> Result<ColumnInfo> {
        self.view.column_info(n)
    }

    /// Apply a modification relative to the last fetched row.
    pub fn modify(&mut self, mode: ModifyMode, rec: &Record) -> Result<()> {
        if !self.executed {
            return Err(Error::failed("query has not been executed"));
        }
        self.view.modify(mode, rec, self.row)
    }

    pub fn close(&mut self) -> Result<()> {
        self.view.close()
    }
}

fn refs(columns: &[ColumnRef]) -> Vec<(Option<String>, String)> {
    columns
        .iter()
        .map(|c| (c.table.clone(), c.column.clone()))
        .collect()
}

/// Turn a parsed statement into its view pipeline.
fn build_view(core: Rc<DbCore>, stmt: Statement) -> Result<Box<dyn View>> {
    match stmt {
        Statement::Select {
            distinct,
            columns,
            tables,
            cond,
            order,
        } => {
            let mut wv = WhereView::new(core.clone(), &tables, cond.map(|c| *c))?;
            if !order.is_empty() {
                wv.sort(&refs(&order))?;
            }
            let mut view: Box<dyn View> = Box::new(wv);
            if !columns.is_empty() {
                view = Box::new(SelectView::new(core, view, &refs(&columns))?);
            }
            if distinct {
                view = Box::new(DistinctView::new(view));
            }
            Ok(view)
        }
        Statement::Insert {
            table,
            columns,
            values,
            temporary,
        } => Ok(Box::new(InsertView::new(
            core,
            &table,
            &refs(&columns),
            values,
            temporary,
        )?)),
        Statement::Update {
            table,
            assignments,
            cond,
        } => {
            let filtered = WhereView::new(core.clone(), std::slice::from_ref(&table), cond.map(|c| *c))?;
            let (columns, values): (Vec<ColumnRef>, Vec<_>) = assignments.into_iter().unzip();
            Ok(Box::new(UpdateView::new(
                core,
                Box::new(filtered),
                &refs(&columns),
                values,
            )?))
        }
        Statement::Delete { table, cond } => {
            let filtered = WhereView::new(core, std::slice::from_ref(&table), cond.map(|c| *c))?;
            Ok(Box::new(DeleteView::new(Box::new(filtered))))
        }
        Statement::CreateTable {
            table,
            columns,
            hold,
        } => Ok(Box::new(CreateView::new(core, &table, columns, hold)?)),
        Statement::AlterTable { table, action } => {
            Ok(Box::new(AlterView::new(core, &table, action)?))
        }
        Statement::DropTable { table } => Ok(Box::new(DropView::new(core, &table)?)),
    }
}
