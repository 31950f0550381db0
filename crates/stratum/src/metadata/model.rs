//! Process-wide metadata cache and physical table naming.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::dialect::SqlHelper;
use crate::metadata::{Entity, EntityType};

/// Prefix substitution marker embedded in derived table names. A deployment
/// prefix replaces the marker when statements are executed; an empty prefix
/// collapses it to nothing.
pub const PREFIX_TOKEN: &str = "$pre:";

/// Substitute the prefix marker in rendered SQL text. `$pre:$` is the
/// explicit no-prefix form and always collapses.
pub fn replace_prefix(sql: &str, prefix: &str) -> String {
    sql.replace("$pre:$", "")
        .replace(PREFIX_TOKEN, &escape_prefix(prefix))
}

/// Normalize a deployment prefix: non-empty prefixes get a trailing
/// underscore separator.
pub fn escape_prefix(prefix: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() || prefix.ends_with('_') {
        prefix.to_string()
    } else {
        format!("{}_", prefix)
    }
}

/// Derive a physical table name from a logical entity name: path segments
/// folded into underscores, `models` filler segments dropped. Deterministic,
/// so unrelated call sites agree on the same name for the same shape.
pub(crate) fn derive_table_name(logical: &str) -> String {
    logical
        .split("::")
        .filter(|segment| !segment.is_empty() && !segment.eq_ignore_ascii_case("models"))
        .collect::<Vec<_>>()
        .join("_")
}

/// Resolved physical table reference.
///
/// `name` still carries the prefix marker; the `Display` rendering is the
/// delimited reference used inside statements.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    schema: Option<String>,
    delimited: String,
    entity_id: Option<TypeId>,
}

impl Table {
    /// Logical name including the prefix marker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional schema.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// The shape this table was derived from, if any.
    pub fn entity_id(&self) -> Option<TypeId> {
        self.entity_id
    }

    /// Logical name with the prefix marker stripped, for comparisons.
    pub fn bare_name(&self) -> &str {
        self.name.strip_prefix(PREFIX_TOKEN).unwrap_or(&self.name)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.delimited)
    }
}

/// Process-wide model: lazily builds and caches entity descriptions and
/// table references keyed by shape identity.
///
/// Descriptions are computed outside the lock; a concurrent first-request
/// race may compute twice, but both results are pure and equal and only the
/// first insert wins.
pub struct Model {
    sql_helper: Arc<dyn SqlHelper>,
    entities: RwLock<HashMap<TypeId, Arc<EntityType>>>,
    tables: RwLock<HashMap<TypeId, Arc<Table>>>,
}

impl Model {
    /// Create an empty model bound to the active dialect.
    pub fn new(sql_helper: Arc<dyn SqlHelper>) -> Self {
        Self {
            sql_helper,
            entities: RwLock::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// The dialect seam this model renders identifiers through.
    pub fn sql_helper(&self) -> &Arc<dyn SqlHelper> {
        &self.sql_helper
    }

    /// Get (building and caching on first request) the description of `T`.
    /// Concurrent callers receive the same instance once cached.
    pub fn get_entity<T: Entity>(&self) -> Arc<EntityType> {
        let type_id = TypeId::of::<T>();
        if let Some(entity) = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
        {
            return Arc::clone(entity);
        }

        let built = Arc::new(EntityType::of::<T>());
        debug!("built entity metadata for {}", built.name());

        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entities.entry(type_id).or_insert(built))
    }

    /// Get the table reference of `T`.
    pub fn get_table<T: Entity>(&self) -> Arc<Table> {
        let entity = self.get_entity::<T>();
        self.table_for(&entity)
    }

    /// Get (rendering and caching on first request) the table reference for
    /// an entity description. The rendered reference carries the prefix
    /// marker inside its delimited form.
    pub fn table_for(&self, entity: &EntityType) -> Arc<Table> {
        let type_id = entity.entity_id();
        if let Some(table) = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
        {
            return Arc::clone(table);
        }

        let name = format!("{}{}", PREFIX_TOKEN, entity.table_name());
        let delimited = self.sql_helper.delimit_qualified(&name, entity.table_schema());
        let built = Arc::new(Table {
            name,
            schema: entity.table_schema().map(str::to_string),
            delimited,
            entity_id: Some(type_id),
        });

        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(tables.entry(type_id).or_insert(built))
    }

    /// Build an uncached table reference from an explicit name, used for
    /// schema operations against tables with no entity shape.
    pub fn table(&self, name: &str, schema: Option<&str>) -> Table {
        Table {
            name: name.to_string(),
            schema: schema.map(str::to_string),
            delimited: self.sql_helper.delimit_qualified(name, schema),
            entity_id: None,
        }
    }

    /// Find a cached entity description by its fully-qualified logical
    /// name. Shapes become findable once requested through this model.
    pub fn find_entity_by_logical_name(&self, name: &str) -> Option<Arc<EntityType>> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|entity| entity.name() == name)
            .map(Arc::clone)
    }

    /// Find the entity shape owning a physical table name, if the shape has
    /// been requested through this model before.
    pub fn find_entity(&self, name: &str, schema: Option<&str>) -> Option<Arc<EntityType>> {
        let bare = name.strip_prefix(PREFIX_TOKEN).unwrap_or(name);
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|entity| {
                entity.table_name().eq_ignore_ascii_case(bare)
                    && match (schema, entity.table_schema()) {
                        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                        (None, None) => true,
                        _ => false,
                    }
            })
            .map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlServerHelper;
    use crate::metadata::PropertyDef;
    use crate::value::ValueKind;

    #[derive(Debug, Default)]
    struct User {
        id: i32,
    }

    impl Entity for User {
        fn entity_name() -> &'static str {
            "site::models::User"
        }

        fn properties() -> Vec<PropertyDef<Self>> {
            vec![PropertyDef::new(
                "Id",
                ValueKind::I32,
                |m: &User| m.id.into(),
                |m, v| m.id = v.as_i64().unwrap_or_default() as i32,
            )
            .identity()]
        }
    }

    #[derive(Debug, Default)]
    struct Setting {
        name: String,
    }

    impl Entity for Setting {
        fn entity_name() -> &'static str {
            "site::settings::Setting"
        }

        fn table() -> Option<(&'static str, Option<&'static str>)> {
            Some(("core_Settings", Some("admin")))
        }

        fn properties() -> Vec<PropertyDef<Self>> {
            vec![PropertyDef::new(
                "Name",
                ValueKind::Text,
                |m: &Setting| m.name.clone().into(),
                |m, v| m.name = v.as_str().unwrap_or_default().to_string(),
            )
            .key()]
        }
    }

    fn model() -> Model {
        Model::new(Arc::new(SqlServerHelper))
    }

    #[test]
    fn test_derived_table_name_folds_segments() {
        let model = model();
        let table = model.get_table::<User>();
        // "models" filler segment dropped, rest folded with underscores
        assert_eq!(table.name(), "$pre:site_User");
        assert_eq!(table.to_string(), "[$pre:site_User]");
    }

    #[test]
    fn test_explicit_table_used_verbatim() {
        let model = model();
        let table = model.get_table::<Setting>();
        assert_eq!(table.name(), "$pre:core_Settings");
        assert_eq!(table.schema(), Some("admin"));
        assert_eq!(table.to_string(), "[admin].[$pre:core_Settings]");
    }

    #[test]
    fn test_caches_return_same_instance() {
        let model = model();
        let a = model.get_entity::<User>();
        let b = model.get_entity::<User>();
        assert!(Arc::ptr_eq(&a, &b));

        let ta = model.get_table::<User>();
        let tb = model.table_for(&b);
        assert!(Arc::ptr_eq(&ta, &tb));
    }

    #[test]
    fn test_find_entity_by_table_name() {
        let model = model();
        model.get_entity::<Setting>();
        let found = model.find_entity("core_Settings", Some("admin")).unwrap();
        assert_eq!(found.name(), "site::settings::Setting");
        assert!(model.find_entity("core_Settings", None).is_none());
        assert!(model.find_entity("missing", None).is_none());
    }

    #[test]
    fn test_replace_prefix() {
        assert_eq!(
            replace_prefix("SELECT * FROM [$pre:site_User]", "moz"),
            "SELECT * FROM [moz_site_User]"
        );
        assert_eq!(
            replace_prefix("SELECT * FROM [$pre:site_User]", ""),
            "SELECT * FROM [site_User]"
        );
        assert_eq!(
            replace_prefix("SELECT * FROM [$pre:$Fixed]", "moz"),
            "SELECT * FROM [Fixed]"
        );
    }

    #[test]
    fn test_escape_prefix() {
        assert_eq!(escape_prefix("moz"), "moz_");
        assert_eq!(escape_prefix("moz_"), "moz_");
        assert_eq!(escape_prefix(""), "");
        assert_eq!(escape_prefix("  "), "");
    }
}
