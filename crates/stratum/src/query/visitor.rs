//! Expression-to-SQL translation.
//!
//! A visitor renders one predicate tree into a SQL fragment (no leading
//! `WHERE`/`SET` keyword) while accumulating the parameter table. Captured
//! values always become named parameters so statements stay injection-safe
//! and cacheable. A visitor instance serves exactly one top-level expression
//! and is then discarded.

use crate::dialect::SqlHelper;
use crate::error::{Result, StratumError};
use crate::query::expr::{BinaryOp, Expr, MatchKind};
use crate::value::{Parameters, Value};

/// Stateful renderer for a single predicate expression.
pub struct ExpressionVisitor<'a> {
    sql_helper: &'a dyn SqlHelper,
    parameters: Parameters,
}

impl<'a> ExpressionVisitor<'a> {
    /// Create a fresh visitor bound to the active dialect.
    pub fn new(sql_helper: &'a dyn SqlHelper) -> Self {
        Self::with_parameters(sql_helper, Parameters::new())
    }

    /// Create a visitor seeded with already-claimed parameters, so the names
    /// it generates never collide with them.
    pub fn with_parameters(sql_helper: &'a dyn SqlHelper, parameters: Parameters) -> Self {
        Self {
            sql_helper,
            parameters,
        }
    }

    /// Render the expression into a SQL fragment.
    pub fn visit(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Binary { op, left, right } if op.is_logical() => {
                let left = self.visit_condition(left)?;
                let right = self.visit_condition(right)?;
                Ok(format!("({} {} {})", left, op.sql(), right))
            }
            Expr::Binary { op, left, right } => self.visit_comparison(*op, left, right),
            Expr::Like {
                column,
                pattern,
                kind,
            } => {
                let placeholder = self.add_parameter(column, like_pattern(pattern, *kind).into());
                Ok(format!(
                    "{} LIKE {}",
                    self.sql_helper.delimit_identifier(column),
                    placeholder
                ))
            }
            Expr::In { column, values } => {
                if values.is_empty() {
                    return Err(StratumError::translation(format!(
                        "IN over an empty value list (column {})",
                        column
                    )));
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|value| self.add_parameter(column, value.clone()))
                    .collect();
                Ok(format!(
                    "{} IN ({})",
                    self.sql_helper.delimit_identifier(column),
                    placeholders.join(",")
                ))
            }
            Expr::Column(name) => Err(StratumError::translation(format!(
                "bare column reference '{}' is not a condition",
                name
            ))),
            Expr::Literal(value) => Err(StratumError::translation(format!(
                "bare literal {:?} is not a condition",
                value
            ))),
        }
    }

    /// The parameter table accumulated so far.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Consume the visitor, yielding its parameter table.
    pub fn into_parameters(self) -> Parameters {
        self.parameters
    }

    fn visit_condition(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Binary { .. } | Expr::Like { .. } | Expr::In { .. } => self.visit(expr),
            other => Err(StratumError::translation(format!(
                "expected a boolean condition, found {:?}",
                other
            ))),
        }
    }

    fn visit_comparison(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<String> {
        match (left, right) {
            (Expr::Column(column), Expr::Literal(value)) => {
                let placeholder = self.add_parameter(column, value.clone());
                Ok(format!(
                    "{}{}{}",
                    self.sql_helper.delimit_identifier(column),
                    op.sql(),
                    placeholder
                ))
            }
            (Expr::Literal(value), Expr::Column(column)) => {
                let placeholder = self.add_parameter(column, value.clone());
                Ok(format!(
                    "{}{}{}",
                    placeholder,
                    op.sql(),
                    self.sql_helper.delimit_identifier(column)
                ))
            }
            (Expr::Column(left), Expr::Column(right)) => Ok(format!(
                "{}{}{}",
                self.sql_helper.delimit_identifier(left),
                op.sql(),
                self.sql_helper.delimit_identifier(right)
            )),
            _ => Err(StratumError::translation(format!(
                "comparison {:?} must relate a column to a captured value or another column",
                op
            ))),
        }
    }

    fn add_parameter(&mut self, base: &str, value: Value) -> String {
        let name = self.parameters.unique_name(base);
        self.parameters.add(name.clone(), value);
        self.sql_helper.parameterized(&name)
    }
}

/// Build the LIKE pattern for a match kind: user content has its wildcard
/// characters bracket-escaped, then the match wildcards are concatenated.
fn like_pattern(pattern: &str, kind: MatchKind) -> String {
    let escaped = pattern
        .replace('[', "[[]")
        .replace('%', "[%]")
        .replace('_', "[_]");
    match kind {
        MatchKind::StartsWith => format!("{}%", escaped),
        MatchKind::Contains => format!("%{}%", escaped),
        MatchKind::EndsWith => format!("%{}", escaped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlServerHelper;
    use crate::query::expr::col;

    fn translate(expr: &Expr) -> (String, Parameters) {
        let mut visitor = ExpressionVisitor::new(&SqlServerHelper);
        let fragment = visitor.visit(expr).unwrap();
        (fragment, visitor.into_parameters())
    }

    #[test]
    fn test_equality_becomes_parameter() {
        let (fragment, params) = translate(&col("Id").eq(5));
        assert_eq!(fragment, "[Id]=@Id");
        assert_eq!(params.get("Id"), Some(&Value::I32(5)));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_starts_with_becomes_like() {
        let (fragment, params) = translate(&col("Name").starts_with("ab"));
        assert_eq!(fragment, "[Name] LIKE @Name");
        assert_eq!(params.get("Name"), Some(&Value::Text("ab%".to_string())));
    }

    #[test]
    fn test_contains_escapes_wildcards() {
        let (_, params) = translate(&col("Name").contains("50%_off"));
        assert_eq!(
            params.get("Name"),
            Some(&Value::Text("%50[%][_]off%".to_string()))
        );
    }

    #[test]
    fn test_included_renders_in_list() {
        let (fragment, params) = translate(&col("Id").included([1, 2, 3]));
        assert_eq!(fragment, "[Id] IN (@Id,@Id_1,@Id_2)");
        assert_eq!(params.get("Id"), Some(&Value::I32(1)));
        assert_eq!(params.get("Id_1"), Some(&Value::I32(2)));
        assert_eq!(params.get("Id_2"), Some(&Value::I32(3)));
    }

    #[test]
    fn test_logical_combination_and_collision_suffix() {
        let (fragment, params) = translate(&col("Id").gt(1).and(col("Id").lt(10)));
        assert_eq!(fragment, "([Id]>@Id AND [Id]<@Id_1)");
        assert_eq!(params.get("Id"), Some(&Value::I32(1)));
        assert_eq!(params.get("Id_1"), Some(&Value::I32(10)));
    }

    #[test]
    fn test_column_to_column_comparison() {
        let (fragment, params) = translate(&col("ParentId").eq_column("Id"));
        assert_eq!(fragment, "[ParentId]=[Id]");
        assert!(params.is_empty());
    }

    #[test]
    fn test_empty_in_list_fails() {
        let mut visitor = ExpressionVisitor::new(&SqlServerHelper);
        let err = visitor
            .visit(&col("Id").included(Vec::<i32>::new()))
            .unwrap_err();
        assert!(matches!(err, StratumError::Translation(_)));
    }

    #[test]
    fn test_bare_literal_fails() {
        let mut visitor = ExpressionVisitor::new(&SqlServerHelper);
        let err = visitor.visit(&Expr::Literal(Value::Bool(true))).unwrap_err();
        assert!(matches!(err, StratumError::Translation(_)));
    }

    #[test]
    fn test_logical_over_non_condition_fails() {
        let expr = Expr::Binary {
            op: BinaryOp::And,
            left: Box::new(Expr::Column("Id".to_string())),
            right: Box::new(col("Id").eq(1)),
        };
        let mut visitor = ExpressionVisitor::new(&SqlServerHelper);
        assert!(matches!(
            visitor.visit(&expr).unwrap_err(),
            StratumError::Translation(_)
        ));
    }
}
