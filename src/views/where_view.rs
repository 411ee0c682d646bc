//! Join, filter and ordering node.
//!
//! Holds a chain of table views and an expression tree. Execution reorders
//! the join so tables compared against constants scan first, then runs a
//! nested-loop scan collecting matching row tuples. Expression evaluation is
//! three-valued: a reference to a table whose row is not yet bound yields
//! `Continue` rather than a value, and AND/OR short-circuit around it.

use std::rc::Rc;

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::query::ast::{BinaryOp, Expr, UnaryOp, WireKind};
use crate::record::{NULL_INT, Record, StreamHandle};
use crate::strings::LONG_STR_BYTES;
use crate::views::{ColumnInfo, FindCursor, ModifyMode, View, create_table_view, view_get_row};

const INVALID_ROW: u32 = u32::MAX;

/// Reorder flags: a comparison against a constant, and a comparison joining
/// to a table already known to be constant-filtered.
const CONST_EXPR: u32 = 1;
const JOIN_TO_CONST_EXPR: u32 = 0x10000;

struct JoinTable {
    view: Box<dyn View>,
    table_index: usize,
    col_count: u32,
    row_count: u32,
}

enum EvalResult {
    Value(i32),
    /// A referenced row is still unbound; the scan proceeds anyway.
    Continue,
}

pub struct WhereView {
    core: Rc<DbCore>,
    tables: Vec<JoinTable>,
    cond: Option<Expr>,
    /// ORDER BY columns resolved to (table index, column).
    order: Vec<(usize, u32)>,
    /// Unresolved ORDER BY names attached before execution.
    pending_order: Vec<(Option<String>, String)>,
    /// Matched row tuples: one row index per table, by table index.
    rows: Vec<Vec<u32>>,
    col_count: u32,
}

impl WhereView {
    pub fn new(core: Rc<DbCore>, table_names: &[String], cond: Option<Expr>) -> Result<WhereView> {
        let mut tables = Vec::with_capacity(table_names.len());
        let mut col_count = 0;
        for (i, name) in table_names.iter().enumerate() {
            let view = create_table_view(core.clone(), name)
                .map_err(|_| Error::BadQuerySyntax(format!("no such table {name}")))?;
            let (_, cols) = view.dimensions()?;
            col_count += cols;
            tables.push(JoinTable {
                view,
                table_index: i,
                col_count: cols,
                row_count: 0,
            });
        }
        let mut wv = WhereView {
            core,
            tables,
            cond: None,
            order: Vec::new(),
            pending_order: Vec::new(),
            rows: Vec::new(),
            col_count,
        };
        if let Some(mut cond) = cond {
            wv.verify_condition(&mut cond)?;
            wv.cond = Some(cond);
        }
        Ok(wv)
    }

    /// Resolve a column reference to (table index, column number, kind).
    fn resolve_column(
        &self,
        table: Option<&str>,
        column: &str,
    ) -> Result<(usize, u32, WireKind)> {
        for jt in &self.tables {
            if let Some(table) = table {
                let info = jt.view.column_info(1)?;
                if info.table != table {
                    continue;
                }
            }
            let (_, cols) = jt.view.dimensions()?;
            for n in 1..=cols {
                let info = jt.view.column_info(n)?;
                if info.name == column {
                    let kind = if info.ty.is_string() {
                        WireKind::StringId
                    } else if info.ty.bytes_per_cell(LONG_STR_BYTES) == 2 {
                        WireKind::Int16
                    } else {
                        WireKind::Int32
                    };
                    return Ok((jt.table_index, n, kind));
                }
            }
        }
        Err(Error::BadQuerySyntax(format!(
            "unknown column {}{}{column}",
            table.unwrap_or(""),
            if table.is_some() { "." } else { "" },
        )))
    }

    /// Bind column references and split string comparisons off into their
    /// own node kind, rejecting orderings on strings.
    fn verify_condition(&self, expr: &mut Expr) -> Result<()> {
        match expr {
            Expr::Column(col) => {
                let (table_index, column, kind) =
                    self.resolve_column(col.table.as_deref(), &col.column)?;
                *expr = Expr::ColumnResolved {
                    table_index,
                    column,
                    kind,
                };
                Ok(())
            }
            Expr::Binary { op, left, right } => {
                self.verify_condition(left)?;
                self.verify_condition(right)?;
                let stringy = |e: &Expr| {
                    matches!(e, Expr::Str(_))
                        || matches!(
                            e,
                            Expr::ColumnResolved {
                                kind: WireKind::StringId,
                                ..
                            }
                        )
                };
                if stringy(left) || stringy(right) {
                    if !matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
                        return Err(Error::BadQuerySyntax(
                            "strings compare only with = or <>".into(),
                        ));
                    }
                    let op = *op;
                    let left = std::mem::replace(left, Box::new(Expr::Wildcard));
                    let right = std::mem::replace(right, Box::new(Expr::Wildcard));
                    *expr = Expr::StrCmp { op, left, right };
                }
                Ok(())
            }
            Expr::Unary { expr: inner, .. } => {
                if !matches!(**inner, Expr::Column(_)) {
                    return Err(Error::BadQuerySyntax("IS NULL needs a column".into()));
                }
                self.verify_condition(inner)
            }
            Expr::Int(v) => {
                *expr = Expr::UInt(*v as u32);
                Ok(())
            }
            Expr::UInt(_) | Expr::Str(_) | Expr::Wildcard => Ok(()),
            Expr::StrCmp { .. } | Expr::ColumnResolved { .. } => Ok(()),
        }
    }

    /// Raw cell value of a resolved column under the current row bindings.
    fn fetch_value(&self, table_index: usize, column: u32, rows: &[u32]) -> Result<EvalResult> {
        if rows[table_index] == INVALID_ROW {
            return Ok(EvalResult::Continue);
        }
        let jt = &self.tables[table_index];
        let raw = jt.view.fetch_int(rows[table_index], column)?;
        Ok(EvalResult::Value(raw as i32))
    }

    fn eval_string<'a>(
        &'a self,
        expr: &'a Expr,
        rows: &[u32],
        rec: Option<&'a Record>,
        rec_index: &mut usize,
    ) -> Result<Option<String>> {
        match expr {
            Expr::ColumnResolved {
                table_index,
                column,
                ..
            } => match self.fetch_value(*table_index, *column, rows)? {
                EvalResult::Continue => Ok(None),
                EvalResult::Value(raw) => {
                    let strings = self.core.strings.borrow();
                    Ok(Some(
                        strings.lookup_str(raw as u32).unwrap_or_default().to_owned(),
                    ))
                }
            },
            Expr::Str(s) => Ok(Some(s.clone())),
            Expr::Wildcard => {
                *rec_index += 1;
                Ok(Some(
                    rec.map(|r| r.get_string(*rec_index)).unwrap_or_default(),
                ))
            }
            _ => Err(Error::failed("expression is not a string")),
        }
    }

    fn eval_strcmp(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        rows: &[u32],
        rec: Option<&Record>,
        rec_index: &mut usize,
    ) -> Result<EvalResult> {
        let Some(l) = self.eval_string(left, rows, rec, rec_index)? else {
            return Ok(EvalResult::Continue);
        };
        let Some(r) = self.eval_string(right, rows, rec, rec_index)? else {
            return Ok(EvalResult::Continue);
        };
        let equal = l == r;
        let val = match op {
            BinaryOp::Eq => equal,
            BinaryOp::Ne => !equal,
            _ => return Err(Error::failed("bad string comparison operator")),
        };
        Ok(EvalResult::Value(val as i32))
    }

    fn eval(
        &self,
        expr: &Expr,
        rows: &[u32],
        rec: Option<&Record>,
        rec_index: &mut usize,
    ) -> Result<EvalResult> {
        match expr {
            Expr::ColumnResolved {
                table_index,
                column,
                kind,
            } => match self.fetch_value(*table_index, *column, rows)? {
                EvalResult::Continue => Ok(EvalResult::Continue),
                EvalResult::Value(raw) => {
                    let v = match kind {
                        WireKind::Int16 => raw - 0x8000,
                        _ => ((raw as u32) ^ 0x8000_0000) as i32,
                    };
                    Ok(EvalResult::Value(v))
                }
            },
            Expr::UInt(v) => Ok(EvalResult::Value(*v as i32)),
            Expr::Int(v) => Ok(EvalResult::Value(*v)),
            Expr::Wildcard => {
                *rec_index += 1;
                let v = rec.map(|r| r.get_int(*rec_index)).unwrap_or(NULL_INT);
                Ok(EvalResult::Value(v))
            }
            Expr::Unary { op, expr } => {
                let Expr::ColumnResolved {
                    table_index,
                    column,
                    ..
                } = &**expr
                else {
                    return Err(Error::failed("IS NULL operand must be a column"));
                };
                match self.fetch_value(*table_index, *column, rows)? {
                    EvalResult::Continue => Ok(EvalResult::Continue),
                    EvalResult::Value(raw) => {
                        let val = match op {
                            UnaryOp::IsNull => raw == 0,
                            UnaryOp::NotNull => raw != 0,
                        };
                        Ok(EvalResult::Value(val as i32))
                    }
                }
            }
            Expr::StrCmp { op, left, right } => {
                self.eval_strcmp(*op, left, right, rows, rec, rec_index)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, rows, rec, rec_index)?;
                let r = self.eval(right, rows, rec, rec_index)?;
                match (l, r) {
                    (EvalResult::Continue, EvalResult::Continue) => Ok(EvalResult::Continue),
                    (EvalResult::Continue, EvalResult::Value(v))
                    | (EvalResult::Value(v), EvalResult::Continue) => match op {
                        // A known-false AND side prunes; a known-true OR
                        // side accepts. Anything else stays undecided.
                        BinaryOp::And if v == 0 => Ok(EvalResult::Value(0)),
                        BinaryOp::Or if v != 0 => Ok(EvalResult::Value(1)),
                        _ => Ok(EvalResult::Continue),
                    },
                    (EvalResult::Value(l), EvalResult::Value(r)) => {
                        let val = match op {
                            BinaryOp::Eq => l == r,
                            BinaryOp::Ne => l != r,
                            BinaryOp::Gt => l > r,
                            BinaryOp::Lt => l < r,
                            BinaryOp::Le => l <= r,
                            BinaryOp::Ge => l >= r,
                            BinaryOp::And => l != 0 && r != 0,
                            BinaryOp::Or => l != 0 || r != 0,
                        };
                        Ok(EvalResult::Value(val as i32))
                    }
                }
            }
            Expr::Column(_) => Err(Error::failed("unresolved column survived verification")),
            Expr::Str(_) => Err(Error::failed("expression is not numeric")),
        }
    }

    /// Classify `expr` for the join reorder and collect tables into
    /// `ordered` (one pass for constant comparisons, one for joins onto
    /// already-collected tables).
    fn reorder_check(
        &self,
        expr: &Expr,
        ordered: &mut Vec<usize>,
        process_joins: bool,
        lastused: &mut Option<usize>,
    ) -> u32 {
        match expr {
            Expr::Wildcard | Expr::Str(_) | Expr::UInt(_) | Expr::Int(_) => 0,
            Expr::ColumnResolved { table_index, .. } => {
                if ordered.contains(table_index) {
                    JOIN_TO_CONST_EXPR
                } else {
                    *lastused = Some(*table_index);
                    CONST_EXPR
                }
            }
            Expr::Binary { left, right, .. } | Expr::StrCmp { left, right, .. } => {
                let mut res = self.reorder_check(right, ordered, process_joins, lastused);
                res += self.reorder_check(left, ordered, process_joins, lastused);
                self.reorder_collect(res, ordered, process_joins, lastused)
            }
            Expr::Unary { expr, .. } => {
                let res = self.reorder_check(expr, ordered, process_joins, lastused);
                self.reorder_collect(res, ordered, process_joins, lastused)
            }
            Expr::Column(_) => 0,
        }
    }

    fn reorder_collect(
        &self,
        res: u32,
        ordered: &mut Vec<usize>,
        process_joins: bool,
        lastused: &mut Option<usize>,
    ) -> u32 {
        if res == 0 {
            return 0;
        }
        if res == CONST_EXPR
            && let Some(t) = *lastused
            && !ordered.contains(&t)
        {
            ordered.push(t);
        }
        if process_joins
            && res == JOIN_TO_CONST_EXPR + CONST_EXPR
            && let Some(t) = *lastused
            && !ordered.contains(&t)
        {
            ordered.push(t);
        }
        res
    }

    /// Scan order: constant-filtered tables first, then tables joined onto
    /// them, then everything else in declaration order.
    fn order_tables(&self) -> Vec<usize> {
        let mut ordered: Vec<usize> = Vec::new();
        if let Some(cond) = &self.cond {
            let mut last = None;
            self.reorder_check(cond, &mut ordered, false, &mut last);
            let mut last = None;
            self.reorder_check(cond, &mut ordered, true, &mut last);
        }
        for jt in &self.tables {
            if !ordered.contains(&jt.table_index) {
                ordered.push(jt.table_index);
            }
        }
        ordered
    }

    /// Recursive nested-loop scan over `ordered[depth..]`.
    fn scan(
        &mut self,
        ordered: &[usize],
        depth: usize,
        rows: &mut Vec<u32>,
        rec: Option<&Record>,
    ) -> Result<()> {
        let table_index = ordered[depth];
        let row_count = self.tables[table_index].row_count;
        for row in 0..row_count {
            rows[table_index] = row;
            let mut rec_index = 0;
            let keep = match &self.cond {
                None => EvalResult::Value(1),
                Some(cond) => self.eval(cond, rows, rec, &mut rec_index)?,
            };
            let val = match keep {
                EvalResult::Value(v) => v != 0,
                EvalResult::Continue => true,
            };
            if val {
                if depth + 1 < ordered.len() {
                    self.scan(ordered, depth + 1, rows, rec)?;
                } else {
                    self.rows.push(rows.clone());
                }
            }
        }
        rows[table_index] = INVALID_ROW;
        Ok(())
    }

    /// Map a pipeline column number onto (table index, table-local column).
    fn find_table(&self, col: u32) -> Result<(usize, u32)> {
        if col == 0 || col > self.col_count {
            return Err(Error::failed(format!("column {col} out of range")));
        }
        let mut col = col;
        for jt in &self.tables {
            if col <= jt.col_count {
                return Ok((jt.table_index, col));
            }
            col -= jt.col_count;
        }
        Err(Error::failed("column mapping ran out of tables"))
    }

    fn row_tuple(&self, row: u32) -> Result<&Vec<u32>> {
        self.rows.get(row as usize).ok_or(Error::NoMoreItems)
    }

    /// UPDATE across a join: locate the row whose first column matches the
    /// record's first field, diff the rest, and write the changed fields.
    fn join_modify_update(&mut self, rec: &Record) -> Result<()> {
        let id = {
            let strings = self.core.strings.borrow();
            let s = rec.get_string(1);
            strings
                .lookup_id(&s)
                .ok_or_else(|| Error::NotFound(format!("string {s:?} not in pool")))?
        };
        let mut target = None;
        for row in 0..self.rows.len() as u32 {
            if self.fetch_int(row, 1)? == id {
                target = Some(row);
                break;
            }
        }
        let row = target.ok_or_else(|| Error::failed("no row matches the update key"))?;

        let core = self.core.clone();
        let current = view_get_row(&core, self, row)?;
        let mut mask = 0u32;
        for i in (1..=rec.field_count()).rev() {
            if !rec.compare_field(&current, i) {
                mask |= 1 << (i - 1);
            }
        }
        self.set_row(row, rec, mask)
    }
}

impl View for WhereView {
    fn execute(&mut self, rec: Option<&Record>) -> Result<()> {
        self.rows.clear();

        for jt in &mut self.tables {
            jt.view.execute(None)?;
            let (row_count, _) = jt.view.dimensions()?;
            jt.row_count = row_count;
            // A joined table with no rows empties the whole result.
            if row_count == 0 {
                return Ok(());
            }
        }

        // Late ORDER BY resolution: the columns were attached by name.
        if !self.pending_order.is_empty() {
            let pending = std::mem::take(&mut self.pending_order);
            for (table, column) in &pending {
                let (table_index, column, _) = self.resolve_column(table.as_deref(), column)?;
                self.order.push((table_index, column));
            }
        }

        let ordered = self.order_tables();
        let mut rows = vec![INVALID_ROW; self.tables.len()];
        if !ordered.is_empty() {
            self.scan(&ordered, 0, &mut rows, rec)?;
        }

        // Total order: ORDER BY columns first, then the natural tuple order
        // as tie-break (also what restores declaration order after the join
        // reorder).
        let order = self.order.clone();
        let mut sort_err = None;
        let mut matched = std::mem::take(&mut self.rows);
        matched.sort_by(|a, b| {
            for &(table_index, column) in &order {
                let jt = &self.tables[table_index];
                let l = jt.view.fetch_int(a[table_index], column);
                let r = jt.view.fetch_int(b[table_index], column);
                match (l, r) {
                    (Ok(l), Ok(r)) => match l.cmp(&r) {
                        std::cmp::Ordering::Equal => continue,
                        other => return other,
                    },
                    _ => {
                        sort_err = Some(Error::failed("ORDER BY column fetch failed"));
                        return std::cmp::Ordering::Equal;
                    }
                }
            }
            a.cmp(b)
        });
        self.rows = matched;
        match sort_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        for jt in &mut self.tables {
            jt.view.close()?;
        }
        Ok(())
    }

    fn dimensions(&self) -> Result<(u32, u32)> {
        Ok((self.rows.len() as u32, self.col_count))
    }

    fn column_info(&self, n: u32) -> Result<ColumnInfo> {
        let (table_index, col) = self.find_table(n)?;
        self.tables[table_index].view.column_info(col)
    }

    fn fetch_int(&self, row: u32, col: u32) -> Result<u32> {
        let tuple = self.row_tuple(row)?;
        let (table_index, col) = self.find_table(col)?;
        self.tables[table_index].view.fetch_int(tuple[table_index], col)
    }

    fn fetch_stream(&self, row: u32, col: u32) -> Result<StreamHandle> {
        let tuple = self.row_tuple(row)?;
        let (table_index, col) = self.find_table(col)?;
        self.tables[table_index]
            .view
            .fetch_stream(tuple[table_index], col)
    }

    fn set_row(&mut self, row: u32, rec: &Record, mask: u32) -> Result<()> {
        let tuple = self.row_tuple(row)?.clone();
        if self.col_count < 32 && mask >= 1u32 << self.col_count {
            return Err(Error::InvalidParameter("mask has stray bits".into()));
        }

        // Updating key columns through a filter is refused.
        let mut offset = 0;
        for jt in &self.tables {
            for i in 0..jt.col_count {
                if offset + i < 32 && mask & (1u32 << (offset + i)) != 0 {
                    let info = jt.view.column_info(i + 1)?;
                    if info.ty.is_key() {
                        return Err(Error::failed(format!(
                            "cannot update key column {}",
                            info.name
                        )));
                    }
                }
            }
            offset += jt.col_count;
        }

        let mut offset = 0usize;
        for jt in &mut self.tables {
            let col_count = jt.col_count as usize;
            let reduced_mask = if offset >= 32 {
                0
            } else {
                (mask >> offset) & ((1u64 << col_count) - 1) as u32
            };
            if reduced_mask != 0 {
                let mut reduced = Record::new(col_count);
                for i in 1..=col_count {
                    rec.copy_field(i + offset, &mut reduced, i)?;
                }
                jt.view
                    .set_row(tuple[jt.table_index], &reduced, reduced_mask)?;
            }
            offset += col_count;
        }
        Ok(())
    }

    fn delete_row(&mut self, row: u32) -> Result<()> {
        if self.tables.len() > 1 {
            return Err(Error::failed("cannot delete through a multi-table join"));
        }
        let target = self.row_tuple(row)?[0];
        // Later tuples pointing past the removed row shift up with it.
        for tuple in &mut self.rows {
            if tuple[0] > target {
                tuple[0] -= 1;
            }
        }
        self.tables[0].view.delete_row(target)
    }

    fn find_matching_rows(&mut self, col: u32, val: u32, cursor: &mut FindCursor) -> Result<u32> {
        if col == 0 || col > self.col_count {
            return Err(Error::InvalidParameter(format!("column {col} out of range")));
        }
        for row in cursor.next..self.rows.len() {
            if self.fetch_int(row as u32, col)? == val {
                cursor.next = row + 1;
                return Ok(row as u32);
            }
        }
        Err(Error::NoMoreItems)
    }

    fn modify(&mut self, mode: ModifyMode, rec: &Record, row: u32) -> Result<()> {
        if self.tables.len() == 1 {
            return self.tables[0].view.modify(mode, rec, row);
        }
        match mode {
            ModifyMode::Update => self.join_modify_update(rec),
            _ => Err(Error::failed("modify mode not supported across a join")),
        }
    }

    fn sort(&mut self, columns: &[(Option<String>, String)]) -> Result<()> {
        self.pending_order.extend(columns.iter().cloned());
        Ok(())
    }
}
