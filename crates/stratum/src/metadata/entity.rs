//! Entity shape descriptions.
//!
//! An entity declares its persisted properties once through
//! [`Entity::properties`]; [`EntityType::of`] compiles that declaration into
//! an erased, immutable description with pre-bound accessor closures, so no
//! name-based lookups happen while statements execute.

use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::metadata::{Annotations, DeleteBehavior, Ignore};
use crate::value::{Row, Value, ValueKind};

/// A persistent entity shape.
///
/// `Default` supplies the blank instance row readback starts from. The
/// logical name uses `::`-separated path segments; the physical table name
/// is derived from it deterministically unless [`Entity::table`] overrides
/// it (see the model module).
pub trait Entity: Default + Send + Sync + 'static {
    /// Fully-qualified logical name, e.g. `"site::categories::Category"`.
    fn entity_name() -> &'static str;

    /// Explicit physical table name and schema, used verbatim when present.
    fn table() -> Option<(&'static str, Option<&'static str>)> {
        None
    }

    /// The declarative property table for this shape.
    fn properties() -> Vec<PropertyDef<Self>>;

    /// Declared foreign keys, consumed by the migration builder.
    fn foreign_keys() -> Vec<ForeignKeyDef> {
        Vec::new()
    }
}

/// One property declaration: name, shape facts and accessor pair.
pub struct PropertyDef<T> {
    name: &'static str,
    kind: ValueKind,
    nullable: bool,
    identity: bool,
    key: bool,
    row_version: bool,
    max_length: Option<i32>,
    ignore: Ignore,
    get: fn(&T) -> Value,
    set: fn(&mut T, Value),
}

impl<T> PropertyDef<T> {
    /// Declare a property with its accessor pair.
    pub fn new(
        name: &'static str,
        kind: ValueKind,
        get: fn(&T) -> Value,
        set: fn(&mut T, Value),
    ) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            identity: false,
            key: false,
            row_version: false,
            max_length: None,
            ignore: Ignore::NONE,
            get,
            set,
        }
    }

    /// Mark the property nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark the property as the auto-increment identity column. Implies
    /// primary-key membership and exclusion from insert/update column lists;
    /// the generated value comes back via return-value capture instead.
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    /// Mark the property as a primary-key member. Key members are filtered
    /// out of whole-row update SET lists and used in the WHERE clause.
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Mark the property as a row-version (concurrency token) column.
    pub fn row_version(mut self) -> Self {
        self.row_version = true;
        self
    }

    /// Maximum length for string/binary content.
    pub fn max_length(mut self, length: i32) -> Self {
        self.max_length = Some(length);
        self
    }

    /// Exclude the property from the given statement classes.
    pub fn ignore(mut self, ignore: Ignore) -> Self {
        self.ignore = self.ignore | ignore;
        self
    }
}

/// Declared foreign key: dependent columns referencing a principal shape.
#[derive(Debug, Clone)]
pub struct ForeignKeyDef {
    /// Dependent-side column names.
    pub columns: Vec<&'static str>,
    /// Logical entity name of the principal shape.
    pub principal: &'static str,
    /// Principal-side column names.
    pub principal_columns: Vec<&'static str>,
    /// Behavior when the principal row is deleted.
    pub on_delete: DeleteBehavior,
}

/// Erased foreign key stored on an [`EntityType`].
#[derive(Debug, Clone)]
pub struct ForeignKey {
    columns: Vec<String>,
    principal: String,
    principal_columns: Vec<String>,
    on_delete: DeleteBehavior,
}

impl ForeignKey {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Logical entity name of the principal shape.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn principal_columns(&self) -> &[String] {
        &self.principal_columns
    }

    pub fn on_delete(&self) -> DeleteBehavior {
        self.on_delete
    }
}

/// Ordered, non-empty property-name list forming a uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    properties: Vec<String>,
}

impl Key {
    fn new(properties: Vec<String>) -> Self {
        debug_assert!(!properties.is_empty());
        Self { properties }
    }

    /// Member property names in declaration order.
    pub fn properties(&self) -> &[String] {
        &self.properties
    }
}

type Getter = Arc<dyn Fn(&dyn Any) -> Value + Send + Sync>;
type Setter = Arc<dyn Fn(&mut dyn Any, Value) + Send + Sync>;

/// One persisted property with compiled accessors.
#[derive(Clone)]
pub struct Property {
    name: String,
    kind: ValueKind,
    is_nullable: bool,
    is_identity: bool,
    is_row_version: bool,
    max_length: Option<i32>,
    ignore: Ignore,
    getter: Getter,
    setter: Setter,
}

impl Property {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.is_nullable
    }

    pub fn is_identity(&self) -> bool {
        self.is_identity
    }

    pub fn is_row_version(&self) -> bool {
        self.is_row_version
    }

    pub fn max_length(&self) -> Option<i32> {
        self.max_length
    }

    /// Statement classes this property is excluded from.
    pub fn ignore(&self) -> Ignore {
        self.ignore
    }

    /// Read the property value from an entity instance.
    pub fn get<T: Entity>(&self, instance: &T) -> Value {
        (self.getter)(instance)
    }

    /// Write a value onto an entity instance.
    pub fn set<T: Entity>(&self, instance: &mut T, value: Value) {
        (self.setter)(instance, value);
    }
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("is_nullable", &self.is_nullable)
            .field("is_identity", &self.is_identity)
            .field("ignore", &self.ignore)
            .finish()
    }
}

/// Immutable description of one entity shape.
#[derive(Debug, Clone)]
pub struct EntityType {
    name: String,
    entity_id: TypeId,
    table_name: String,
    table_schema: Option<String>,
    properties: Vec<Property>,
    primary_key: Option<Key>,
    identity: Option<usize>,
    foreign_keys: Vec<ForeignKey>,
    annotations: Annotations,
}

impl EntityType {
    /// Compile the declarative property table of `T` into an erased
    /// description.
    ///
    /// Marker precedence: an identity marker wins over a key marker, which
    /// wins over explicit ignore flags. The identity property is implicitly
    /// primary-key and excluded from insert/update lists; key members are
    /// excluded from update SET lists.
    pub fn of<T: Entity>() -> Self {
        let mut properties = Vec::new();
        let mut key_members = Vec::new();
        let mut identity = None;

        for def in T::properties() {
            let mut ignore = def.ignore;
            if def.identity {
                debug_assert!(
                    identity.is_none(),
                    "entity {} declares more than one identity property",
                    T::entity_name()
                );
                if identity.is_none() {
                    identity = Some(properties.len());
                }
                ignore = ignore | Ignore::UPSERT;
                key_members.push(def.name.to_string());
            } else if def.key {
                ignore = ignore | Ignore::UPDATE;
                key_members.push(def.name.to_string());
            }

            let get = def.get;
            let set = def.set;
            properties.push(Property {
                name: def.name.to_string(),
                kind: def.kind,
                is_nullable: def.nullable,
                is_identity: def.identity,
                is_row_version: def.row_version,
                max_length: def.max_length,
                ignore,
                getter: Arc::new(move |any: &dyn Any| match any.downcast_ref::<T>() {
                    Some(instance) => get(instance),
                    None => Value::Null,
                }),
                setter: Arc::new(move |any: &mut dyn Any, value: Value| {
                    if let Some(instance) = any.downcast_mut::<T>() {
                        set(instance, value);
                    }
                }),
            });
        }

        // An identity column owns the primary key on its own.
        let primary_key = if let Some(idx) = identity {
            Some(Key::new(vec![properties[idx].name.clone()]))
        } else if key_members.is_empty() {
            None
        } else {
            Some(Key::new(key_members))
        };

        let foreign_keys = T::foreign_keys()
            .into_iter()
            .map(|def| ForeignKey {
                columns: def.columns.iter().map(|c| c.to_string()).collect(),
                principal: def.principal.to_string(),
                principal_columns: def
                    .principal_columns
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
                on_delete: def.on_delete,
            })
            .collect();

        let (table_name, table_schema) = match T::table() {
            Some((name, schema)) => (name.to_string(), schema.map(str::to_string)),
            None => (
                crate::metadata::model::derive_table_name(T::entity_name()),
                None,
            ),
        };

        Self {
            name: T::entity_name().to_string(),
            entity_id: TypeId::of::<T>(),
            table_name,
            table_schema,
            properties,
            primary_key,
            identity,
            foreign_keys,
            annotations: Annotations::for_owner(T::entity_name()),
        }
    }

    /// Shape-unique display name (the fully-qualified logical name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime identity of the shape.
    pub fn entity_id(&self) -> TypeId {
        self.entity_id
    }

    /// Physical table name (explicit override or derived), without the
    /// prefix marker.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Schema of the physical table, if explicitly declared.
    pub fn table_schema(&self) -> Option<&str> {
        self.table_schema.as_deref()
    }

    /// All properties in declaration order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Look up a property by name (case-insensitive).
    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Properties that participate in the given statement class, i.e. are
    /// not carrying the corresponding ignore flag.
    pub fn properties_for(&self, operation: Ignore) -> impl Iterator<Item = &Property> {
        self.properties
            .iter()
            .filter(move |p| !p.ignore.intersects(operation))
    }

    /// The primary key, if one is declared.
    pub fn primary_key(&self) -> Option<&Key> {
        self.primary_key.as_ref()
    }

    /// The auto-increment identity property, if one is declared.
    pub fn identity(&self) -> Option<&Property> {
        self.identity.map(|idx| &self.properties[idx])
    }

    /// Declared foreign keys.
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Extension bag.
    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    /// Map a result row into an entity instance through the compiled
    /// setters of list-visible properties.
    pub fn read<T: Entity>(&self, row: &Row) -> T {
        debug_assert_eq!(TypeId::of::<T>(), self.entity_id);
        let mut instance = T::default();
        for property in self.properties_for(Ignore::LIST) {
            if let Some(value) = row.get(&property.name) {
                property.set(&mut instance, value.clone());
            }
        }
        instance
    }
}
