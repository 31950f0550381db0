//! Statement generation contract and shared composition.
//!
//! The trait carries the dialect-independent composition as default methods
//! (column lists, WHERE stitching, caching); implementations supply the
//! dialect-specific pieces: identity capture, existence probes, paging and
//! recursive queries.

use std::sync::Arc;

use crate::dialect::SqlHelper;
use crate::error::{Result, StratumError};
use crate::metadata::{EntityType, Ignore, Model};
use crate::query::expr::Expr;
use crate::query::script::{SqlScript, StatementCache};
use crate::query::visitor::ExpressionVisitor;
use crate::value::{Parameters, Value};

/// A pre-assembled query request for the paging surface: the select list,
/// FROM clause and ordering are rendered by the caller, the generator only
/// wraps them into the dialect's plain/limited/paged statement forms.
#[derive(Debug, Clone)]
pub struct QuerySql {
    /// Rendered select list.
    pub fields: String,
    /// Rendered FROM clause content (table reference, joins).
    pub from: String,
    /// Optional condition fragment (no WHERE keyword).
    pub where_sql: Option<String>,
    /// Rendered ORDER BY column list (no ORDER BY keyword).
    pub order_by: Option<String>,
    /// SELECT DISTINCT.
    pub is_distinct: bool,
    /// Aggregation field for the paged COUNT companion query.
    pub aggregation: String,
    /// 1-based page index; selects the paged statement form.
    pub page_index: Option<i32>,
    /// Page size / row limit; with no page index selects the limited form.
    pub size: Option<i32>,
    /// Parameters referenced by the rendered fragments.
    pub parameters: Parameters,
}

impl QuerySql {
    /// Start a request over the given select list and FROM content.
    pub fn new(fields: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            fields: fields.into(),
            from: from.into(),
            where_sql: None,
            order_by: None,
            is_distinct: false,
            aggregation: "1".to_string(),
            page_index: None,
            size: None,
            parameters: Parameters::new(),
        }
    }
}

/// SQL statement generation for one database dialect.
pub trait SqlGenerator: Send + Sync {
    /// The dialect seam used for identifiers and placeholders.
    fn sql_helper(&self) -> &dyn SqlHelper;

    /// The metadata model statements are generated against.
    fn model(&self) -> &Model;

    /// The whole-row statement cache.
    fn cache(&self) -> &StatementCache;

    /// Fragment appended to an insert to return the generated identity
    /// value in the same round trip.
    fn select_identity(&self) -> &'static str;

    /// Existence probe: selects a constant for the first matching row.
    fn any(&self, entity: &EntityType, filter: Option<&Expr>) -> Result<SqlScript>;

    /// Render the plain (unlimited) form of a query request.
    fn plain_query(&self, sql: &QuerySql, out: &mut String);

    /// Render the row-limited form of a query request.
    fn size_query(&self, sql: &QuerySql, out: &mut String);

    /// Render the paged form of a query request, including the COUNT
    /// companion statement.
    fn page_query(&self, sql: &QuerySql, out: &mut String);

    /// Recursive hierarchy query joining rows to their parent (`parent` =
    /// true) or children transitively.
    fn recurse(&self, entity: &EntityType, filter: Option<&Expr>, parent: bool)
        -> Result<SqlScript>;

    /// Translate an optional predicate into a fragment plus parameters. A
    /// fresh visitor serves each call.
    fn translate(&self, filter: Option<&Expr>) -> Result<(Option<String>, Parameters)> {
        match filter {
            None => Ok((None, Parameters::new())),
            Some(expr) => {
                let mut visitor = ExpressionVisitor::new(self.sql_helper());
                let fragment = visitor.visit(expr)?;
                Ok((Some(fragment), visitor.into_parameters()))
            }
        }
    }

    /// Whole-row INSERT for the shape, identity capture appended when the
    /// shape has an identity property. Cached per shape.
    fn create(&self, entity: &Arc<EntityType>) -> Result<Arc<SqlScript>> {
        let generator_entity = Arc::clone(entity);
        self.cache().get_or_create(entity, "Create", move || {
            let entity = generator_entity;
            let helper = self.sql_helper();
            let names: Vec<String> = entity
                .properties_for(Ignore::INSERT)
                .map(|p| p.name().to_string())
                .collect();
            if names.is_empty() {
                return Err(StratumError::model(format!(
                    "type {} has no insertable properties",
                    entity.name()
                )));
            }

            let table = self.model().table_for(&entity);
            let columns: Vec<String> = names.iter().map(|n| helper.delimit_identifier(n)).collect();
            let placeholders: Vec<String> = names.iter().map(|n| helper.parameterized(n)).collect();

            let mut sql = format!(
                "INSERT INTO {}({})VALUES({}){}",
                table,
                columns.join(","),
                placeholders.join(","),
                helper.statement_terminator()
            );
            if entity.identity().is_some() {
                sql.push_str(self.select_identity());
            }

            Ok(SqlScript::with_binder(sql, entity, names))
        })
    }

    /// Whole-row UPDATE filtered by the primary key's columns. Cached per
    /// shape.
    fn update(&self, entity: &Arc<EntityType>) -> Result<Arc<SqlScript>> {
        let generator_entity = Arc::clone(entity);
        self.cache().get_or_create(entity, "Update", move || {
            let entity = generator_entity;
            let helper = self.sql_helper();
            let mut names: Vec<String> = entity
                .properties_for(Ignore::UPDATE)
                .map(|p| p.name().to_string())
                .collect();
            if names.is_empty() {
                return Err(StratumError::model(format!(
                    "type {} has no updatable properties",
                    entity.name()
                )));
            }
            let key = entity.primary_key().ok_or_else(|| {
                StratumError::model(format!(
                    "type {} has no primary key for a whole-row update",
                    entity.name()
                ))
            })?;

            let table = self.model().table_for(&entity);
            let assignments: Vec<String> = names
                .iter()
                .map(|n| {
                    format!(
                        "{}={}",
                        helper.delimit_identifier(n),
                        helper.parameterized(n)
                    )
                })
                .collect();
            let conditions: Vec<String> = key
                .properties()
                .iter()
                .map(|n| {
                    format!(
                        "{}={}",
                        helper.delimit_identifier(n),
                        helper.parameterized(n)
                    )
                })
                .collect();

            let sql = format!(
                "UPDATE {} SET {} WHERE {}{}",
                table,
                assignments.join(","),
                conditions.join(" AND "),
                helper.statement_terminator()
            );

            for key_name in key.properties() {
                if !names.iter().any(|n| n.eq_ignore_ascii_case(key_name)) {
                    names.push(key_name.clone());
                }
            }

            Ok(SqlScript::with_binder(sql, entity, names))
        })
    }

    /// Predicate UPDATE over an explicit column/value statement set.
    /// Condition parameters are renamed on collision with statement columns.
    fn update_where(
        &self,
        entity: &EntityType,
        statement: &Parameters,
        filter: Option<&Expr>,
    ) -> Result<SqlScript> {
        if statement.is_empty() {
            return Err(StratumError::model(format!(
                "predicate update on {} carries no columns",
                entity.name()
            )));
        }

        let helper = self.sql_helper();
        let table = self.model().table_for(entity);
        let assignments: Vec<String> = statement
            .names()
            .map(|n| {
                format!(
                    "{}={}",
                    helper.delimit_identifier(n),
                    helper.parameterized(n)
                )
            })
            .collect();

        let mut sql = format!("UPDATE {} SET {}", table, assignments.join(","));

        // Seed the visitor with the statement parameters so condition
        // placeholders never collide with assignment placeholders.
        let mut visitor = ExpressionVisitor::with_parameters(helper, statement.clone());
        if let Some(expr) = filter {
            let fragment = visitor.visit(expr)?;
            sql.push_str(" WHERE ");
            sql.push_str(&fragment);
        }
        sql.push_str(helper.statement_terminator());

        Ok(SqlScript::new(sql, visitor.into_parameters()))
    }

    /// SELECT of the shape's rows under an optional condition.
    fn list(&self, entity: &EntityType, filter: Option<&Expr>) -> Result<SqlScript> {
        let table = self.model().table_for(entity);
        let (fragment, parameters) = self.translate(filter)?;
        let mut sql = format!("SELECT * FROM {}", table);
        if let Some(fragment) = fragment {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment);
        }
        sql.push_str(self.sql_helper().statement_terminator());
        Ok(SqlScript::new(sql, parameters))
    }

    /// DELETE under an optional condition.
    fn delete(&self, entity: &EntityType, filter: Option<&Expr>) -> Result<SqlScript> {
        let table = self.model().table_for(entity);
        let (fragment, parameters) = self.translate(filter)?;
        let mut sql = format!("DELETE FROM {}", table);
        if let Some(fragment) = fragment {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment);
        }
        sql.push_str(self.sql_helper().statement_terminator());
        Ok(SqlScript::new(sql, parameters))
    }

    /// Aggregate scalar query: `SELECT func(column) FROM ... WHERE ...`.
    /// With no inner column the aggregate runs over the constant 1.
    fn scalar(
        &self,
        entity: &EntityType,
        func_name: &str,
        inner: Option<&str>,
        filter: Option<&Expr>,
    ) -> Result<SqlScript> {
        let table = self.model().table_for(entity);
        let selection = match inner {
            Some(column) => self.sql_helper().delimit_identifier(column),
            None => "1".to_string(),
        };
        let (fragment, parameters) = self.translate(filter)?;
        let mut sql = format!("SELECT {}({}) FROM {}", func_name, selection, table);
        if let Some(fragment) = fragment {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment);
        }
        sql.push_str(self.sql_helper().statement_terminator());
        Ok(SqlScript::new(sql, parameters))
    }

    /// Atomic arithmetic update adding `value` to each named column. The
    /// amount is bound under the `Value` parameter.
    fn increase_by(
        &self,
        entity: &EntityType,
        filter: Option<&Expr>,
        columns: &[&str],
        value: Value,
    ) -> Result<SqlScript> {
        self.arithmetic_update(entity, filter, columns, value, '+')
    }

    /// Atomic arithmetic update subtracting `value` from each named column.
    fn decrease_by(
        &self,
        entity: &EntityType,
        filter: Option<&Expr>,
        columns: &[&str],
        value: Value,
    ) -> Result<SqlScript> {
        self.arithmetic_update(entity, filter, columns, value, '-')
    }

    /// Shared body of the arithmetic updates.
    fn arithmetic_update(
        &self,
        entity: &EntityType,
        filter: Option<&Expr>,
        columns: &[&str],
        value: Value,
        operator: char,
    ) -> Result<SqlScript> {
        if columns.is_empty() {
            return Err(StratumError::model(format!(
                "arithmetic update on {} names no columns",
                entity.name()
            )));
        }

        let helper = self.sql_helper();
        let table = self.model().table_for(entity);
        let assignments: Vec<String> = columns
            .iter()
            .map(|column| {
                let delimited = helper.delimit_identifier(column);
                format!(
                    "{}={}{}{}",
                    delimited,
                    delimited,
                    operator,
                    helper.parameterized("Value")
                )
            })
            .collect();

        let mut parameters = Parameters::new();
        parameters.add("Value", value);
        let mut visitor = ExpressionVisitor::with_parameters(helper, parameters);

        let mut sql = format!("UPDATE {} SET {}", table, assignments.join(","));
        if let Some(expr) = filter {
            let fragment = visitor.visit(expr)?;
            sql.push_str(" WHERE ");
            sql.push_str(&fragment);
        }
        sql.push_str(helper.statement_terminator());

        Ok(SqlScript::new(sql, visitor.into_parameters()))
    }

    /// Compose a query request into its plain, limited or paged statement
    /// form depending on the request's page index and size.
    fn query(&self, sql: &QuerySql) -> Result<SqlScript> {
        let mut out = String::new();
        if sql.page_index.is_some() {
            self.page_query(sql, &mut out);
        } else if sql.size.is_some() {
            self.size_query(sql, &mut out);
        } else {
            self.plain_query(sql, &mut out);
        }
        Ok(SqlScript::new(out, sql.parameters.clone()))
    }
}
