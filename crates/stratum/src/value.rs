//! SQL value types shared by metadata accessors, generated statements and
//! the executor boundary.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Type tag for a persisted property or column.
///
/// Used by the metadata model to describe property shapes and by the
/// migration type mapper to pick provider column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    I16,
    I32,
    I64,
    F64,
    Decimal,
    Text,
    Bytes,
    Uuid,
    DateTime,
}

impl ValueKind {
    /// Whether the kind is an integer type usable as an identity column.
    pub fn is_integer(self) -> bool {
        matches!(self, ValueKind::I16 | ValueKind::I32 | ValueKind::I64)
    }
}

/// Owned SQL value for parameter binding and row readback.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean (bit).
    Bool(bool),
    /// 16-bit signed integer (smallint).
    I16(i16),
    /// 32-bit signed integer (int).
    I32(i32),
    /// 64-bit signed integer (bigint).
    I64(i64),
    /// 64-bit floating point (float).
    F64(f64),
    /// Exact numeric (decimal/numeric).
    Decimal(Decimal),
    /// Text data (nvarchar).
    Text(String),
    /// Binary data (varbinary).
    Bytes(Vec<u8>),
    /// UUID/GUID (uniqueidentifier).
    Uuid(Uuid),
    /// Date and time without offset (datetime2).
    DateTime(NaiveDateTime),
}

impl Value {
    /// The kind of this value, or `None` for NULL.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::I16(_) => Some(ValueKind::I16),
            Value::I32(_) => Some(ValueKind::I32),
            Value::I64(_) => Some(ValueKind::I64),
            Value::F64(_) => Some(ValueKind::F64),
            Value::Decimal(_) => Some(ValueKind::Decimal),
            Value::Text(_) => Some(ValueKind::Text),
            Value::Bytes(_) => Some(ValueKind::Bytes),
            Value::Uuid(_) => Some(ValueKind::Uuid),
            Value::DateTime(_) => Some(ValueKind::DateTime),
        }
    }

    /// Whether this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Widen any numeric value to i64. Covers the `numeric(38,0)` shape
    /// identity-capture scalars come back as.
    pub fn as_i64(&self) -> Option<i64> {
        use rust_decimal::prelude::ToPrimitive;
        match self {
            Value::I16(v) => Some(i64::from(*v)),
            Value::I32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            Value::F64(v) => Some(*v as i64),
            Value::Decimal(v) => v.to_i64(),
            _ => None,
        }
    }

    /// Borrow text content.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Convert to a SQL Server literal string for use in rendered DDL
    /// (default values, seed annotations).
    ///
    /// Single quotes are doubled; text gets the `N` Unicode prefix. Values
    /// flowing through query statements are always bound as parameters
    /// instead, so this is only reached for schema defaults.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            Value::I16(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Text(v) => format!("N'{}'", v.replace('\'', "''")),
            Value::Bytes(v) => {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("0x");
                for b in v {
                    out.push_str(&format!("{:02X}", b));
                }
                out
            }
            Value::Uuid(v) => format!("'{}'", v),
            Value::DateTime(v) => format!("'{}'", v.format("%Y-%m-%dT%H:%M:%S%.3f")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Ordered set of named statement parameters.
///
/// Order is the declaration order, which the executor relies on when
/// rewriting named placeholders into positional binds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    entries: Vec<(String, Value)>,
}

impl Parameters {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named parameter. The name must not already be present;
    /// generators guarantee uniqueness via [`Parameters::unique_name`].
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let name = name.into();
        debug_assert!(
            !self.contains(&name),
            "duplicate parameter name: {}",
            name
        );
        self.entries.push((name, value.into()));
        self
    }

    /// Derive a parameter name not yet present in the set: `base`, then
    /// `base_1`, `base_2`, ...
    pub fn unique_name(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !self.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Look up a parameter value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Whether a parameter with the given name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Iterate over (name, value) pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Parameter names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut params = Parameters::new();
        for (n, v) in iter {
            params.add(n, v);
        }
        params
    }
}

/// One result row handed back from the executor: column names plus values,
/// mapped into entity instances through metadata setters.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from parallel column/value lists.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Look up a value by column name (case-insensitive, matching the
    /// provider's identifier comparison rules).
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .map(|i| &self.values[i])
    }

    /// Value at a column ordinal.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Column names in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}
