//! Typed predicate expression trees.
//!
//! Callers build conditions with the [`col`] combinator API; the visitor
//! module renders the resulting [`Expr`] into a SQL fragment plus
//! parameters.

use crate::value::Value;

/// Comparison and logical operators supported in predicates.
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

impl BinaryOp {
    /// The SQL token for this operator.
    pub fn sql(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    /// Whether this operator combines two boolean sub-conditions.
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// String match shapes mapped onto LIKE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    StartsWith,
    Contains,
    EndsWith,
}

/// A predicate expression over one entity shape's properties.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Reference to a property of the predicate's subject.
    Column(String),
    /// Captured constant; always bound as a parameter, never inlined.
    Literal(Value),
    /// Binary comparison or logical combination.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// String match rendered as LIKE with wildcard concatenation.
    Like {
        column: String,
        pattern: String,
        kind: MatchKind,
    },
    /// Membership test rendered as IN with one parameter per element.
    In { column: String, values: Vec<Value> },
}

impl Expr {
    /// Combine with another condition using AND.
    pub fn and(self, other: Expr) -> Expr {
        Expr::Binary {
            op: BinaryOp::And,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// Combine with another condition using OR.
    pub fn or(self, other: Expr) -> Expr {
        Expr::Binary {
            op: BinaryOp::Or,
            left: Box::new(self),
            right: Box::new(other),
        }
    }
}

/// Start a condition on the named property.
pub fn col(name: impl Into<String>) -> ColumnRef {
    ColumnRef { name: name.into() }
}

/// A column reference waiting for its comparison.
#[derive(Debug, Clone)]
pub struct ColumnRef {
    name: String,
}

impl ColumnRef {
    fn binary(self, op: BinaryOp, value: impl Into<Value>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(Expr::Column(self.name)),
            right: Box::new(Expr::Literal(value.into())),
        }
    }

    fn binary_column(self, op: BinaryOp, other: impl Into<String>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(Expr::Column(self.name)),
            right: Box::new(Expr::Column(other.into())),
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> Expr {
        self.binary(BinaryOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Expr {
        self.binary(BinaryOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Expr {
        self.binary(BinaryOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Expr {
        self.binary(BinaryOp::Le, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Expr {
        self.binary(BinaryOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Expr {
        self.binary(BinaryOp::Ge, value)
    }

    /// Compare against another column of the same subject.
    pub fn eq_column(self, other: impl Into<String>) -> Expr {
        self.binary_column(BinaryOp::Eq, other)
    }

    pub fn starts_with(self, pattern: impl Into<String>) -> Expr {
        Expr::Like {
            column: self.name,
            pattern: pattern.into(),
            kind: MatchKind::StartsWith,
        }
    }

    pub fn contains(self, pattern: impl Into<String>) -> Expr {
        Expr::Like {
            column: self.name,
            pattern: pattern.into(),
            kind: MatchKind::Contains,
        }
    }

    pub fn ends_with(self, pattern: impl Into<String>) -> Expr {
        Expr::Like {
            column: self.name,
            pattern: pattern.into(),
            kind: MatchKind::EndsWith,
        }
    }

    /// Membership test: the column's value is one of the given values.
    pub fn included<V, I>(self, values: I) -> Expr
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Expr::In {
            column: self.name,
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combinators_build_expected_tree() {
        let expr = col("Id").eq(5).and(col("Name").starts_with("ab"));
        match expr {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                assert_eq!(
                    *left,
                    Expr::Binary {
                        op: BinaryOp::Eq,
                        left: Box::new(Expr::Column("Id".to_string())),
                        right: Box::new(Expr::Literal(Value::I32(5))),
                    }
                );
                assert_eq!(
                    *right,
                    Expr::Like {
                        column: "Name".to_string(),
                        pattern: "ab".to_string(),
                        kind: MatchKind::StartsWith,
                    }
                );
            }
            other => panic!("unexpected expression: {:?}", other),
        }
    }

    #[test]
    fn test_included_collects_values() {
        let expr = col("Id").included([1, 2, 3]);
        assert_eq!(
            expr,
            Expr::In {
                column: "Id".to_string(),
                values: vec![Value::I32(1), Value::I32(2), Value::I32(3)],
            }
        );
    }
}
