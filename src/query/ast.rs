//! Statement and expression trees.
//!
//! The parser emits these; the view builder turns them into a pipeline.
//! Expressions start out with unresolved column references; the where view
//! resolves them against its join tables before the first scan.

use crate::table::ColumnType;

/// A possibly table-qualified column reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn unqualified(column: impl Into<String>) -> ColumnRef {
        ColumnRef {
            table: None,
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    IsNull,
    NotNull,
}

/// Cell encoding of a resolved column, deciding how comparisons read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Int16,
    Int32,
    StringId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Unresolved reference, straight from the parser.
    Column(ColumnRef),
    /// Reference bound to a join table and column index.
    ColumnResolved {
        table_index: usize,
        column: u32,
        kind: WireKind,
    },
    Int(i32),
    UInt(u32),
    Str(String),
    /// Positional `?` parameter.
    Wildcard,
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// String equality/inequality, split off from `Binary` once operand
    /// types are known.
    StrCmp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// One column of a CREATE TABLE or ALTER ADD, with the packed type word
/// already assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterAction {
    Hold,
    Free,
    Add { column: ColumnDef, hold: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select {
        distinct: bool,
        /// Empty for `SELECT *`.
        columns: Vec<ColumnRef>,
        tables: Vec<String>,
        cond: Option<Box<Expr>>,
        order: Vec<ColumnRef>,
    },
    Insert {
        table: String,
        columns: Vec<ColumnRef>,
        values: Vec<Expr>,
        temporary: bool,
    },
    Update {
        table: String,
        assignments: Vec<(ColumnRef, Expr)>,
        cond: Option<Box<Expr>>,
    },
    Delete {
        table: String,
        cond: Option<Box<Expr>>,
    },
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
        hold: bool,
    },
    AlterTable {
        table: String,
        action: AlterAction,
    },
    DropTable {
        table: String,
    },
}
