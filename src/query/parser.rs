//! Recursive-descent parser for the installer SQL dialect.
//!
//! Produces a [`Statement`]; the query layer builds the view pipeline from
//! it. Grammar errors are all `BadQuerySyntax` with a short description.

use crate::error::{Error, Result};
use crate::query::ast::*;
use crate::query::tokenize::{Tok, Token, tokenize};
use crate::table::{ColumnAttrs, ColumnType};

pub fn parse(sql: &str) -> Result<Statement> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser { tokens, pos: 0 };
    let stmt = parser.statement()?;
    parser.expect(Tok::End)?;
    Ok(stmt)
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Tok {
        self.tokens[self.pos].kind
    }

    fn advance(&mut self) -> Token<'a> {
        let t = self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn accept(&mut self, kind: Tok) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: Tok) -> Result<Token<'a>> {
        if self.peek() == kind {
            Ok(self.advance())
        } else {
            Err(Error::BadQuerySyntax(format!(
                "expected {kind:?}, found {:?}",
                self.tokens[self.pos].span
            )))
        }
    }

    fn ident(&mut self) -> Result<String> {
        let t = self.expect(Tok::Id)?;
        Ok(t.text().to_owned())
    }

    fn statement(&mut self) -> Result<Statement> {
        match self.peek() {
            Tok::Select => self.select(),
            Tok::Insert => self.insert(),
            Tok::Update => self.update(),
            Tok::Delete => self.delete(),
            Tok::Create => self.create(),
            Tok::Alter => self.alter(),
            Tok::Drop => self.drop(),
            _ => Err(Error::BadQuerySyntax(format!(
                "statement cannot start with {:?}",
                self.tokens[self.pos].span
            ))),
        }
    }

    fn select(&mut self) -> Result<Statement> {
        self.expect(Tok::Select)?;
        let distinct = self.accept(Tok::Distinct);

        let columns = if self.accept(Tok::Star) {
            Vec::new()
        } else {
            self.column_ref_list()?
        };

        self.expect(Tok::From)?;
        let mut tables = vec![self.ident()?];
        while self.accept(Tok::Comma) {
            tables.push(self.ident()?);
        }

        let cond = if self.accept(Tok::Where) {
            Some(Box::new(self.expr()?))
        } else {
            None
        };

        let order = if self.accept(Tok::Order) {
            self.expect(Tok::By)?;
            self.column_ref_list()?
        } else {
            Vec::new()
        };

        Ok(Statement::Select {
            distinct,
            columns,
            tables,
            cond,
            order,
        })
    }

    fn insert(&mut self) -> Result<Statement> {
        self.expect(Tok::Insert)?;
        self.expect(Tok::Into)?;
        let table = self.ident()?;

        self.expect(Tok::Lp)?;
        let columns = self.column_ref_list()?;
        self.expect(Tok::Rp)?;

        self.expect(Tok::Values)?;
        self.expect(Tok::Lp)?;
        let mut values = vec![self.const_value()?];
        while self.accept(Tok::Comma) {
            values.push(self.const_value()?);
        }
        self.expect(Tok::Rp)?;

        if columns.len() != values.len() {
            return Err(Error::BadQuerySyntax(format!(
                "{} columns but {} values",
                columns.len(),
                values.len()
            )));
        }

        let temporary = self.accept(Tok::Temporary);
        Ok(Statement::Insert {
            table,
            columns,
            values,
            temporary,
        })
    }

    fn update(&mut self) -> Result<Statement> {
        self.expect(Tok::Update)?;
        let table = self.ident()?;
        self.expect(Tok::Set)?;

        let mut assignments = Vec::new();
        loop {
            let column = self.column_ref()?;
            self.expect(Tok::Eq)?;
            let value = self.const_value()?;
            assignments.push((column, value));
            if !self.accept(Tok::Comma) {
                break;
            }
        }

        let cond = if self.accept(Tok::Where) {
            Some(Box::new(self.expr()?))
        } else {
            None
        };

        Ok(Statement::Update {
            table,
            assignments,
            cond,
        })
    }

    fn delete(&mut self) -> Result<Statement> {
        self.expect(Tok::Delete)?;
        self.expect(Tok::From)?;
        let table = self.ident()?;
        let cond = if self.accept(Tok::Where) {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        Ok(Statement::Delete { table, cond })
    }

    fn create(&mut self) -> Result<Statement> {
        self.expect(Tok::Create)?;
        self.expect(Tok::Table)?;
        let table = self.ident()?;
        self.expect(Tok::Lp)?;

        let mut columns = Vec::new();
        loop {
            columns.push(self.column_def()?);
            if !self.accept(Tok::Comma) {
                break;
            }
        }

        // The primary key clause follows the last column without a comma.
        self.expect(Tok::Primary)?;
        self.expect(Tok::Key)?;
        let mut keys = vec![self.ident()?];
        while self.accept(Tok::Comma) {
            keys.push(self.ident()?);
        }
        self.expect(Tok::Rp)?;

        for key in &keys {
            let col = columns
                .iter_mut()
                .find(|c| &c.name == key)
                .ok_or_else(|| Error::BadQuerySyntax(format!("unknown key column {key}")))?;
            col.ty = col.ty.with(ColumnAttrs::KEY);
        }

        let hold = self.accept(Tok::Hold);
        Ok(Statement::CreateTable {
            table,
            columns,
            hold,
        })
    }

    fn alter(&mut self) -> Result<Statement> {
        self.expect(Tok::Alter)?;
        self.expect(Tok::Table)?;
        let table = self.ident()?;
        let action = match self.peek() {
            Tok::Hold => {
                self.advance();
                AlterAction::Hold
            }
            Tok::Free => {
                self.advance();
                AlterAction::Free
            }
            Tok::Add => {
                self.advance();
                let column = self.column_def()?;
                let hold = self.accept(Tok::Hold);
                AlterAction::Add { column, hold }
            }
            _ => {
                return Err(Error::BadQuerySyntax(
                    "ALTER TABLE needs HOLD, FREE or ADD".into(),
                ));
            }
        };
        Ok(Statement::AlterTable { table, action })
    }

    fn drop(&mut self) -> Result<Statement> {
        self.expect(Tok::Drop)?;
        self.expect(Tok::Table)?;
        let table = self.ident()?;
        Ok(Statement::DropTable { table })
    }

    /// `name type [NOT NULL] [TEMPORARY] [LOCALIZABLE]`
    fn column_def(&mut self) -> Result<ColumnDef> {
        let name = self.ident()?;
        let base = match self.advance().kind {
            Tok::Char => {
                if self.accept(Tok::Lp) {
                    let width = self.int_literal()?;
                    self.expect(Tok::Rp)?;
                    ColumnType::string((width & 0xff) as u16)
                } else {
                    ColumnType::string(0)
                }
            }
            Tok::Longchar => ColumnType::string(0),
            Tok::Short | Tok::Int => ColumnType::int16(),
            Tok::Long => ColumnType::int32(),
            Tok::Object => ColumnType::binary(),
            other => {
                return Err(Error::BadQuerySyntax(format!(
                    "expected a column type, found {other:?}"
                )));
            }
        };

        // Columns are nullable unless NOT NULL says otherwise.
        let mut bits = base.bits() | ColumnAttrs::NULLABLE.bits();
        loop {
            if self.accept(Tok::Not) {
                self.expect(Tok::Null)?;
                bits &= !ColumnAttrs::NULLABLE.bits();
            } else if self.accept(Tok::Temporary) {
                bits |= ColumnAttrs::TEMPORARY.bits();
            } else if self.accept(Tok::Localizable) {
                bits |= ColumnAttrs::LOCALIZABLE.bits();
            } else {
                break;
            }
        }

        Ok(ColumnDef {
            name,
            ty: ColumnType(bits),
        })
    }

    fn column_ref_list(&mut self) -> Result<Vec<ColumnRef>> {
        let mut out = vec![self.column_ref()?];
        while self.accept(Tok::Comma) {
            out.push(self.column_ref()?);
        }
        Ok(out)
    }

    /// `column` or `table.column`.
    fn column_ref(&mut self) -> Result<ColumnRef> {
        let first = self.ident()?;
        if self.accept(Tok::Dot) {
            let column = self.ident()?;
            Ok(ColumnRef {
                table: Some(first),
                column,
            })
        } else {
            Ok(ColumnRef {
                table: None,
                column: first,
            })
        }
    }

    fn int_literal(&mut self) -> Result<i32> {
        let neg = self.accept(Tok::Minus);
        let t = self.expect(Tok::IntLit)?;
        let v: i64 = t
            .span
            .trim_start_matches('.')
            .parse()
            .map_err(|_| Error::BadQuerySyntax(format!("bad integer {:?}", t.span)))?;
        Ok(if neg { -v as i32 } else { v as i32 })
    }

    /// A literal or parameter usable in VALUES and SET lists.
    fn const_value(&mut self) -> Result<Expr> {
        match self.peek() {
            Tok::StringLit => {
                let t = self.advance();
                Ok(Expr::Str(t.text().to_owned()))
            }
            Tok::IntLit | Tok::Minus => Ok(Expr::Int(self.int_literal()?)),
            Tok::Wildcard => {
                self.advance();
                Ok(Expr::Wildcard)
            }
            Tok::Null => {
                self.advance();
                Ok(Expr::Str(String::new()))
            }
            other => Err(Error::BadQuerySyntax(format!(
                "expected a value, found {other:?}"
            ))),
        }
    }

    /// `or_expr := and_expr (OR and_expr)*`
    fn expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.accept(Tok::Or) {
            let right = self.and_expr()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        while self.accept(Tok::And) {
            let right = self.comparison()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// A parenthesised expression, `col op value`, or `col IS [NOT] NULL`.
    fn comparison(&mut self) -> Result<Expr> {
        if self.accept(Tok::Lp) {
            let inner = self.expr()?;
            self.expect(Tok::Rp)?;
            return Ok(inner);
        }

        let column = Expr::Column(self.column_ref()?);

        if self.accept(Tok::Is) {
            let op = if self.accept(Tok::Not) {
                UnaryOp::NotNull
            } else {
                UnaryOp::IsNull
            };
            self.expect(Tok::Null)?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(column),
            });
        }

        let op = match self.advance().kind {
            Tok::Eq => BinaryOp::Eq,
            Tok::Ne => BinaryOp::Ne,
            Tok::Lt => BinaryOp::Lt,
            Tok::Le => BinaryOp::Le,
            Tok::Gt => BinaryOp::Gt,
            Tok::Ge => BinaryOp::Ge,
            other => {
                return Err(Error::BadQuerySyntax(format!(
                    "expected a comparison operator, found {other:?}"
                )));
            }
        };

        let right = match self.peek() {
            Tok::Id => Expr::Column(self.column_ref()?),
            Tok::StringLit | Tok::IntLit | Tok::Minus | Tok::Wildcard | Tok::Null => {
                self.const_value()?
            }
            other => {
                return Err(Error::BadQuerySyntax(format!(
                    "expected a comparison operand, found {other:?}"
                )));
            }
        };

        Ok(Expr::Binary {
            op,
            left: Box::new(column),
            right: Box::new(right),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_with_primary_key() {
        let stmt = parse(
            "CREATE TABLE `phone` (`id` INT, `name` CHAR(32), `number` CHAR(32) PRIMARY KEY `id`)",
        )
        .unwrap();
        let Statement::CreateTable { table, columns, hold } = stmt else {
            panic!("wrong statement kind");
        };
        assert_eq!(table, "phone");
        assert!(!hold);
        assert_eq!(columns.len(), 3);
        assert!(columns[0].ty.is_key());
        assert!(!columns[0].ty.is_string());
        assert!(columns[1].ty.is_string());
        assert!(columns[1].ty.is_nullable());
    }

    #[test]
    fn test_parse_not_null_clears_nullable() {
        let stmt =
            parse("CREATE TABLE `t` (`a` CHAR(4) NOT NULL, `b` LONG PRIMARY KEY `a`)").unwrap();
        let Statement::CreateTable { columns, .. } = stmt else {
            panic!();
        };
        assert!(!columns[0].ty.is_nullable());
        assert!(columns[1].ty.is_nullable());
        assert_eq!(columns[1].ty.width(), 4);
    }

    #[test]
    fn test_parse_insert_counts_must_match() {
        assert!(matches!(
            parse("INSERT INTO `t` (`a`,`b`) VALUES ('x')"),
            Err(Error::BadQuerySyntax(_))
        ));
        let stmt = parse("INSERT INTO `t` (`a`,`b`) VALUES ('x', ?) TEMPORARY").unwrap();
        let Statement::Insert { values, temporary, .. } = stmt else {
            panic!();
        };
        assert_eq!(values, vec![Expr::Str("x".into()), Expr::Wildcard]);
        assert!(temporary);
    }

    #[test]
    fn test_parse_select_join_where_order() {
        let stmt = parse(
            "SELECT Component.D1, FeatureComponents.F FROM Component, FeatureComponents \
             WHERE Component.C = FeatureComponents.C2 ORDER BY F",
        )
        .unwrap();
        let Statement::Select { columns, tables, cond, order, distinct } = stmt else {
            panic!();
        };
        assert!(!distinct);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].table.as_deref(), Some("Component"));
        assert_eq!(tables, vec!["Component", "FeatureComponents"]);
        assert!(cond.is_some());
        assert_eq!(order, vec![ColumnRef::unqualified("F")]);
    }

    #[test]
    fn test_parse_select_star_has_no_projection() {
        let stmt = parse("SELECT * FROM `_Tables`").unwrap();
        let Statement::Select { columns, .. } = stmt else {
            panic!();
        };
        assert!(columns.is_empty());
    }

    #[test]
    fn test_parse_where_is_null_and_parens() {
        let stmt =
            parse("SELECT * FROM t WHERE (`a` IS NULL OR `a` = 2) AND `b` IS NOT NULL").unwrap();
        let Statement::Select { cond: Some(cond), .. } = stmt else {
            panic!();
        };
        let Expr::Binary { op: BinaryOp::And, left, .. } = *cond else {
            panic!("expected AND at the root");
        };
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Or, .. }));
    }

    #[test]
    fn test_parse_update_with_wildcards() {
        let stmt = parse("UPDATE `t` SET `a` = ?, `b` = 3 WHERE `k` = ?").unwrap();
        let Statement::Update { assignments, cond, .. } = stmt else {
            panic!();
        };
        assert_eq!(assignments.len(), 2);
        assert!(cond.is_some());
    }

    #[test]
    fn test_parse_alter_actions() {
        assert!(matches!(
            parse("ALTER TABLE `t` HOLD").unwrap(),
            Statement::AlterTable { action: AlterAction::Hold, .. }
        ));
        assert!(matches!(
            parse("ALTER TABLE `t` FREE").unwrap(),
            Statement::AlterTable { action: AlterAction::Free, .. }
        ));
        let stmt = parse("ALTER TABLE `t` ADD `c` LONG HOLD").unwrap();
        let Statement::AlterTable { action: AlterAction::Add { column, hold }, .. } = stmt else {
            panic!();
        };
        assert_eq!(column.name, "c");
        assert!(hold);
    }

    #[test]
    fn test_parse_negative_literal() {
        let stmt = parse("INSERT INTO `t` (`a`) VALUES (-32767)").unwrap();
        let Statement::Insert { values, .. } = stmt else {
            panic!();
        };
        assert_eq!(values, vec![Expr::Int(-32767)]);
    }

    #[test]
    fn test_parse_trailing_garbage_rejected() {
        assert!(parse("DROP TABLE `t` garbage").is_err());
    }
}
