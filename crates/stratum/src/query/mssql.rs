//! SQL Server statement generation.

use std::sync::Arc;

use crate::dialect::SqlHelper;
use crate::error::{Result, StratumError};
use crate::metadata::{EntityType, Ignore, Model};
use crate::query::expr::Expr;
use crate::query::generator::{QuerySql, SqlGenerator};
use crate::query::script::{SqlScript, StatementCache};

/// SQL Server implementation of the statement generator.
pub struct SqlServerGenerator {
    model: Arc<Model>,
    cache: Arc<StatementCache>,
}

impl SqlServerGenerator {
    /// Create a generator over the given model and statement cache.
    pub fn new(model: Arc<Model>, cache: Arc<StatementCache>) -> Self {
        Self { model, cache }
    }

    fn select_head(&self, sql: &QuerySql) -> String {
        if sql.is_distinct {
            "SELECT DISTINCT ".to_string()
        } else {
            "SELECT ".to_string()
        }
    }

    fn append_body(&self, sql: &QuerySql, out: &mut String) {
        out.push_str(" FROM ");
        out.push_str(&sql.from);
        if let Some(where_sql) = &sql.where_sql {
            out.push_str(" WHERE ");
            out.push_str(where_sql);
        }
    }
}

impl SqlGenerator for SqlServerGenerator {
    fn sql_helper(&self) -> &dyn SqlHelper {
        self.model.sql_helper().as_ref()
    }

    fn model(&self) -> &Model {
        &self.model
    }

    fn cache(&self) -> &StatementCache {
        &self.cache
    }

    fn select_identity(&self) -> &'static str {
        "SELECT SCOPE_IDENTITY();"
    }

    fn any(&self, entity: &EntityType, filter: Option<&Expr>) -> Result<SqlScript> {
        let table = self.model.table_for(entity);
        let (fragment, parameters) = self.translate(filter)?;
        let mut sql = format!("SELECT TOP(1) 1 FROM {}", table);
        if let Some(fragment) = fragment {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment);
        }
        sql.push_str(self.sql_helper().statement_terminator());
        Ok(SqlScript::new(sql, parameters))
    }

    fn plain_query(&self, sql: &QuerySql, out: &mut String) {
        out.push_str(&self.select_head(sql));
        out.push_str(&sql.fields);
        self.append_body(sql, out);
        if let Some(order_by) = &sql.order_by {
            out.push_str(" ORDER BY ");
            out.push_str(order_by);
        }
        out.push(';');
    }

    fn size_query(&self, sql: &QuerySql, out: &mut String) {
        out.push_str(&self.select_head(sql));
        out.push_str(&format!("TOP({}) ", sql.size.unwrap_or(20)));
        out.push_str(&sql.fields);
        self.append_body(sql, out);
        if let Some(order_by) = &sql.order_by {
            out.push_str(" ORDER BY ");
            out.push_str(order_by);
        }
        out.push(';');
    }

    fn page_query(&self, sql: &QuerySql, out: &mut String) {
        let size = sql.size.unwrap_or(20);
        let offset = (sql.page_index.unwrap_or(1) - 1).max(0) * size;

        out.push_str(&self.select_head(sql));
        out.push_str(&sql.fields);
        self.append_body(sql, out);
        // OFFSET requires an ORDER BY; a constant subquery keeps arbitrary
        // requests valid when the caller supplies none.
        out.push_str(" ORDER BY ");
        out.push_str(sql.order_by.as_deref().unwrap_or("(SELECT NULL)"));
        out.push_str(&format!(
            " OFFSET {} ROWS FETCH NEXT {} ROWS ONLY;",
            offset, size
        ));

        // Companion COUNT for total-row bookkeeping.
        out.push_str("SELECT COUNT(");
        if sql.is_distinct {
            out.push_str("DISTINCT ");
            out.push_str(&sql.aggregation);
        } else {
            out.push('1');
        }
        out.push(')');
        out.push_str(" FROM ");
        out.push_str(&sql.from);
        if let Some(where_sql) = &sql.where_sql {
            out.push_str(" WHERE ");
            out.push_str(where_sql);
        }
        out.push(';');
    }

    fn recurse(
        &self,
        entity: &EntityType,
        filter: Option<&Expr>,
        parent: bool,
    ) -> Result<SqlScript> {
        let helper = self.sql_helper();
        for required in ["Id", "ParentId"] {
            if entity.find_property(required).is_none() {
                return Err(StratumError::model(format!(
                    "type {} has no {} property for a hierarchy query",
                    entity.name(),
                    required
                )));
            }
        }

        let table = self.model.table_for(entity);
        let fields: Vec<String> = entity
            .properties_for(Ignore::LIST)
            .map(|p| helper.delimit_identifier(p.name()))
            .collect();
        let field_list = fields.join(",");
        let qualified: Vec<String> = fields.iter().map(|f| format!("a.{}", f)).collect();

        let (fragment, parameters) = self.translate(filter)?;

        let mut sql = format!("WITH _recursive({}) AS (SELECT {} FROM {}", field_list, field_list, table);
        if let Some(fragment) = fragment {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment);
        }
        sql.push_str(&format!(
            " UNION ALL SELECT {} FROM {} a INNER JOIN _recursive b ON ",
            qualified.join(","),
            table
        ));
        let id = helper.delimit_identifier("Id");
        let parent_id = helper.delimit_identifier("ParentId");
        if parent {
            // Walk up: each round pulls the parent of the previous rows.
            sql.push_str(&format!("a.{}=b.{}", id, parent_id));
        } else {
            // Walk down: each round pulls the children of the previous rows.
            sql.push_str(&format!("a.{}=b.{}", parent_id, id));
        }
        sql.push_str(") SELECT * FROM _recursive;");

        Ok(SqlScript::new(sql, parameters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlServerHelper;
    use crate::metadata::{Entity, PropertyDef};
    use crate::query::expr::col;
    use crate::value::{Value, ValueKind};

    #[derive(Debug, Default)]
    struct Category {
        id: i32,
        parent_id: i32,
        name: Option<String>,
        status: i32,
    }

    impl Entity for Category {
        fn entity_name() -> &'static str {
            "site::categories::Category"
        }

        fn properties() -> Vec<PropertyDef<Self>> {
            vec![
                PropertyDef::new(
                    "Id",
                    ValueKind::I32,
                    |m: &Category| m.id.into(),
                    |m, v| m.id = v.as_i64().unwrap_or_default() as i32,
                )
                .identity(),
                PropertyDef::new(
                    "ParentId",
                    ValueKind::I32,
                    |m: &Category| m.parent_id.into(),
                    |m, v| m.parent_id = v.as_i64().unwrap_or_default() as i32,
                ),
                PropertyDef::new(
                    "Name",
                    ValueKind::Text,
                    |m: &Category| m.name.clone().into(),
                    |m, v| m.name = v.as_str().map(str::to_string),
                )
                .nullable()
                .max_length(64),
                PropertyDef::new(
                    "Status",
                    ValueKind::I32,
                    |m: &Category| m.status.into(),
                    |m, v| m.status = v.as_i64().unwrap_or_default() as i32,
                ),
            ]
        }
    }

    #[derive(Debug, Default)]
    struct Bare {}

    impl Entity for Bare {
        fn entity_name() -> &'static str {
            "site::Bare"
        }

        fn properties() -> Vec<PropertyDef<Self>> {
            Vec::new()
        }
    }

    fn generator() -> SqlServerGenerator {
        let model = Arc::new(Model::new(Arc::new(SqlServerHelper)));
        SqlServerGenerator::new(model, Arc::new(StatementCache::new()))
    }

    /// Collect the distinct `@Name` placeholders appearing in a statement.
    fn placeholders(sql: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut chars = sql.char_indices().peekable();
        while let Some((_, c)) = chars.next() {
            if c != '@' {
                continue;
            }
            let mut name = String::new();
            while let Some(&(_, next)) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if !name.is_empty() && !found.contains(&name) {
                found.push(name);
            }
        }
        found
    }

    #[test]
    fn test_create_names_insertable_columns_and_captures_identity() {
        let generator = generator();
        let entity = generator.model().get_entity::<Category>();
        let script = generator.create(&entity).unwrap();

        assert_eq!(
            script.sql(),
            "INSERT INTO [$pre:site_categories_Category]([ParentId],[Name],[Status])\
             VALUES(@ParentId,@Name,@Status);SELECT SCOPE_IDENTITY();"
        );

        let params = script.create_parameters(&Category {
            id: 9,
            parent_id: 2,
            name: Some("news".to_string()),
            status: 1,
        });
        assert_eq!(params.get("ParentId"), Some(&Value::I32(2)));
        assert_eq!(params.get("Name"), Some(&Value::Text("news".to_string())));
        assert_eq!(params.get("Status"), Some(&Value::I32(1)));
        // the identity column never appears in the parameter set
        assert!(params.get("Id").is_none());
    }

    #[test]
    fn test_update_filters_by_primary_key() {
        let generator = generator();
        let entity = generator.model().get_entity::<Category>();
        let script = generator.update(&entity).unwrap();

        assert_eq!(
            script.sql(),
            "UPDATE [$pre:site_categories_Category] SET [ParentId]=@ParentId,[Name]=@Name,\
             [Status]=@Status WHERE [Id]=@Id;"
        );

        let params = script.create_parameters(&Category {
            id: 7,
            parent_id: 0,
            name: None,
            status: 2,
        });
        assert_eq!(params.get("Id"), Some(&Value::I32(7)));
        assert_eq!(params.get("Name"), Some(&Value::Null));
    }

    #[test]
    fn test_create_and_update_are_cached() {
        let generator = generator();
        let entity = generator.model().get_entity::<Category>();
        let a = generator.create(&entity).unwrap();
        let b = generator.create(&entity).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_create_on_empty_shape_is_model_error() {
        let generator = generator();
        let entity = generator.model().get_entity::<Bare>();
        assert!(matches!(
            generator.create(&entity).unwrap_err(),
            StratumError::Model(_)
        ));
        assert!(matches!(
            generator.update(&entity).unwrap_err(),
            StratumError::Model(_)
        ));
    }

    #[test]
    fn test_update_where_suffixes_colliding_condition_parameter() {
        let generator = generator();
        let entity = generator.model().get_entity::<Category>();
        let mut statement = crate::value::Parameters::new();
        statement.add("Status", 2i32);

        let script = generator
            .update_where(&entity, &statement, Some(&col("Status").eq(1).and(col("Id").eq(7))))
            .unwrap();

        assert_eq!(
            script.sql(),
            "UPDATE [$pre:site_categories_Category] SET [Status]=@Status \
             WHERE ([Status]=@Status_1 AND [Id]=@Id);"
        );
        assert_eq!(script.parameters().get("Status"), Some(&Value::I32(2)));
        assert_eq!(script.parameters().get("Status_1"), Some(&Value::I32(1)));
        assert_eq!(script.parameters().get("Id"), Some(&Value::I32(7)));
    }

    #[test]
    fn test_parameter_completeness() {
        let generator = generator();
        let entity = generator.model().get_entity::<Category>();

        let scripts = vec![
            generator
                .list(&entity, Some(&col("Id").included([1, 2, 3])))
                .unwrap(),
            generator
                .delete(&entity, Some(&col("Name").starts_with("ab")))
                .unwrap(),
            generator
                .scalar(&entity, "COUNT", None, Some(&col("Status").eq(1)))
                .unwrap(),
            generator
                .increase_by(&entity, Some(&col("Id").eq(3)), &["Status"], Value::I32(1))
                .unwrap(),
        ];

        for script in scripts {
            let in_text = placeholders(script.sql());
            let declared: Vec<String> =
                script.parameters().names().map(str::to_string).collect();
            assert_eq!(in_text, declared, "script: {}", script.sql());
        }
    }

    #[test]
    fn test_any_renders_top_probe() {
        let generator = generator();
        let entity = generator.model().get_entity::<Category>();
        let script = generator.any(&entity, Some(&col("Id").eq(3))).unwrap();
        assert_eq!(
            script.sql(),
            "SELECT TOP(1) 1 FROM [$pre:site_categories_Category] WHERE [Id]=@Id;"
        );
    }

    #[test]
    fn test_delete_without_condition_omits_where() {
        let generator = generator();
        let entity = generator.model().get_entity::<Category>();
        let script = generator.delete(&entity, None).unwrap();
        assert_eq!(
            script.sql(),
            "DELETE FROM [$pre:site_categories_Category];"
        );
        assert!(script.parameters().is_empty());
    }

    #[test]
    fn test_increase_by_binds_value_parameter() {
        let generator = generator();
        let entity = generator.model().get_entity::<Category>();
        let script = generator
            .increase_by(&entity, Some(&col("Id").eq(3)), &["Status"], Value::I32(5))
            .unwrap();
        assert_eq!(
            script.sql(),
            "UPDATE [$pre:site_categories_Category] SET [Status]=[Status]+@Value WHERE [Id]=@Id;"
        );
        assert_eq!(script.parameters().get("Value"), Some(&Value::I32(5)));
    }

    #[test]
    fn test_decrease_by_uses_minus() {
        let generator = generator();
        let entity = generator.model().get_entity::<Category>();
        let script = generator
            .decrease_by(&entity, None, &["Status"], Value::I32(1))
            .unwrap();
        assert!(script.sql().contains("[Status]=[Status]-@Value"));
    }

    #[test]
    fn test_paged_query_emits_offset_and_count() {
        let generator = generator();
        let mut request = QuerySql::new("[Id],[Name]", "[$pre:site_categories_Category]");
        request.where_sql = Some("[Status]=@Status".to_string());
        request.order_by = Some("[Id]".to_string());
        request.page_index = Some(3);
        request.size = Some(10);
        request.parameters.add("Status", 1i32);

        let script = generator.query(&request).unwrap();
        assert!(script
            .sql()
            .contains("ORDER BY [Id] OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY;"));
        assert!(script.sql().contains("SELECT COUNT(1) FROM"));
        assert_eq!(script.parameters().get("Status"), Some(&Value::I32(1)));
    }

    #[test]
    fn test_size_query_uses_top() {
        let generator = generator();
        let mut request = QuerySql::new("*", "[$pre:site_categories_Category]");
        request.size = Some(5);
        let script = generator.query(&request).unwrap();
        assert!(script.sql().starts_with("SELECT TOP(5) *"));
    }

    #[test]
    fn test_recurse_children_direction() {
        let generator = generator();
        let entity = generator.model().get_entity::<Category>();
        let script = generator
            .recurse(&entity, Some(&col("Id").eq(1)), false)
            .unwrap();
        assert!(script.sql().starts_with(
            "WITH _recursive([Id],[ParentId],[Name],[Status]) AS (SELECT"
        ));
        assert!(script.sql().contains("ON a.[ParentId]=b.[Id])"));
        assert!(script.sql().ends_with("SELECT * FROM _recursive;"));
    }

    #[test]
    fn test_recurse_parent_direction() {
        let generator = generator();
        let entity = generator.model().get_entity::<Category>();
        let script = generator.recurse(&entity, None, true).unwrap();
        assert!(script.sql().contains("ON a.[Id]=b.[ParentId])"));
    }

    #[test]
    fn test_recurse_requires_hierarchy_columns() {
        let generator = generator();
        let entity = generator.model().get_entity::<Bare>();
        assert!(matches!(
            generator.recurse(&entity, None, false).unwrap_err(),
            StratumError::Model(_)
        ));
    }
}
