//! Rendered SQL scripts and the generated-statement cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::Result;
use crate::metadata::{Entity, EntityType};
use crate::value::Parameters;

/// An immutable rendered SQL string plus its parameters.
///
/// Scripts either carry an eager name→value parameter map (predicate-driven
/// statements) or a lazy binder (the owning entity description plus an
/// ordered parameter-name list) evaluated against a model instance at
/// execution time (whole-row insert/update).
#[derive(Debug, Clone)]
pub struct SqlScript {
    sql: String,
    parameters: Parameters,
    binder: Option<Binder>,
}

#[derive(Debug, Clone)]
struct Binder {
    entity: Arc<EntityType>,
    parameter_names: Vec<String>,
}

impl SqlScript {
    /// Create a script with eagerly captured parameters.
    pub fn new(sql: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            sql: sql.into(),
            parameters,
            binder: None,
        }
    }

    /// Create a script whose parameters are extracted from a model instance
    /// through the entity's compiled getters.
    pub fn with_binder(
        sql: impl Into<String>,
        entity: Arc<EntityType>,
        parameter_names: Vec<String>,
    ) -> Self {
        Self {
            sql: sql.into(),
            parameters: Parameters::new(),
            binder: Some(Binder {
                entity,
                parameter_names,
            }),
        }
    }

    /// The rendered SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Eagerly captured parameters (empty for binder-backed scripts).
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Names the script's placeholders refer to, in placeholder order.
    pub fn parameter_names(&self) -> Vec<&str> {
        match &self.binder {
            Some(binder) => binder.parameter_names.iter().map(String::as_str).collect(),
            None => self.parameters.names().collect(),
        }
    }

    /// Extract the parameter set for a model instance through the bound
    /// entity's getters. Falls back to the eager parameters when the script
    /// has no binder.
    pub fn create_parameters<T: Entity>(&self, model: &T) -> Parameters {
        match &self.binder {
            Some(binder) => binder
                .parameter_names
                .iter()
                .filter_map(|name| {
                    binder
                        .entity
                        .find_property(name)
                        .map(|property| (name.clone(), property.get(model)))
                })
                .collect(),
            None => self.parameters.clone(),
        }
    }
}

impl std::fmt::Display for SqlScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

const DEFAULT_TTL: Duration = Duration::from_secs(3 * 60);

/// Cache for generated CRUD statement text, keyed by shape display name and
/// operation name.
///
/// Schema does not change at runtime, so expiry is purely a memory bound:
/// entries expire a fixed interval after creation (absolute expiration, not
/// LRU) and are rebuilt on the next request.
pub struct StatementCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Arc<SqlScript>)>>,
}

impl StatementCache {
    /// Create a cache with the default few-minute TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a cache with an explicit TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the cached script for (entity, operation), building it on a
    /// miss or after expiry. The key incorporates the shape-unique display
    /// name, so distinct shapes can never collide.
    pub fn get_or_create(
        &self,
        entity: &EntityType,
        operation: &str,
        build: impl FnOnce() -> Result<SqlScript>,
    ) -> Result<Arc<SqlScript>> {
        let key = format!("{}[{}]", entity.name(), operation);

        if let Some((created, script)) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            if created.elapsed() < self.ttl {
                return Ok(Arc::clone(script));
            }
        }

        trace!("rendering statement {}", key);
        let script = Arc::new(build()?);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, (Instant::now(), Arc::clone(&script)));
        Ok(script)
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PropertyDef;
    use crate::value::{Value, ValueKind};

    #[derive(Debug, Default)]
    struct Tag {
        id: i32,
        name: String,
    }

    impl Entity for Tag {
        fn entity_name() -> &'static str {
            "site::tags::Tag"
        }

        fn properties() -> Vec<PropertyDef<Self>> {
            vec![
                PropertyDef::new(
                    "Id",
                    ValueKind::I32,
                    |m: &Tag| m.id.into(),
                    |m, v| m.id = v.as_i64().unwrap_or_default() as i32,
                )
                .identity(),
                PropertyDef::new(
                    "Name",
                    ValueKind::Text,
                    |m: &Tag| m.name.clone().into(),
                    |m, v| m.name = v.as_str().unwrap_or_default().to_string(),
                ),
            ]
        }
    }

    #[test]
    fn test_binder_extracts_values() {
        let entity = Arc::new(EntityType::of::<Tag>());
        let script = SqlScript::with_binder("INSERT ...", entity, vec!["Name".to_string()]);
        let params = script.create_parameters(&Tag {
            id: 1,
            name: "rust".to_string(),
        });
        assert_eq!(params.get("Name"), Some(&Value::Text("rust".to_string())));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_cache_hit_returns_same_script() {
        let cache = StatementCache::new();
        let entity = EntityType::of::<Tag>();
        let a = cache
            .get_or_create(&entity, "Create", || {
                Ok(SqlScript::new("INSERT 1", Parameters::new()))
            })
            .unwrap();
        let b = cache
            .get_or_create(&entity, "Create", || {
                panic!("second request must hit the cache")
            })
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_cache_expires_after_ttl() {
        let cache = StatementCache::with_ttl(Duration::from_millis(0));
        let entity = EntityType::of::<Tag>();
        let a = cache
            .get_or_create(&entity, "Create", || {
                Ok(SqlScript::new("INSERT 1", Parameters::new()))
            })
            .unwrap();
        let b = cache
            .get_or_create(&entity, "Create", || {
                Ok(SqlScript::new("INSERT 2", Parameters::new()))
            })
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.sql(), "INSERT 2");
    }

    #[test]
    fn test_cache_key_distinguishes_operations() {
        let cache = StatementCache::new();
        let entity = EntityType::of::<Tag>();
        cache
            .get_or_create(&entity, "Create", || {
                Ok(SqlScript::new("INSERT", Parameters::new()))
            })
            .unwrap();
        let update = cache
            .get_or_create(&entity, "Update", || {
                Ok(SqlScript::new("UPDATE", Parameters::new()))
            })
            .unwrap();
        assert_eq!(update.sql(), "UPDATE");
    }
}
