//! Runtime value model and the implicit coercion rules.
//!
//! Three coercion families apply at operator boundaries: numeric promotion
//! (`int op float` widens to float), string building (`str + primitive`
//! stringifies the non-string side when the other side is already a
//! string), and truthiness. A fourth family normalizes raw string replies
//! from the reasoning collaborator into booleans and numbers.

use core::fmt;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::{FieldDef, StructDef};

lazy_static! {
    static ref INT_PATTERN: Regex = Regex::new(r"^[+-]?\d+$").unwrap();
    static ref FLOAT_PATTERN: Regex =
        Regex::new(r"^[+-]?(\d+\.\d*|\.\d+|\d+)([eE][+-]?\d+)?$").unwrap();
}

/// Reasoning replies meaning `true` / `false`, matched case-insensitively.
const AFFIRMATIVE_RESPONSES: &[&str] = &["yes", "true", "1", "correct", "valid", "ok"];
const NEGATIVE_RESPONSES: &[&str] = &["no", "false", "0", "incorrect", "invalid"];

#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("no coercion between {left} and {right} for '{op}'")]
    Coercion {
        op: String,
        left: String,
        right: String,
    },
    #[error("unknown field '{field}' on struct {struct_name}")]
    StructField { struct_name: String, field: String },
    #[error("missing field '{field}' constructing struct {struct_name}")]
    MissingField { struct_name: String, field: String },
    #[error("field '{field}' given twice constructing struct {struct_name}")]
    DuplicateField { struct_name: String, field: String },
    #[error("unknown struct type: {0}")]
    UnknownStructType(String),
    #[error("struct type '{0}' is already registered")]
    DuplicateStructType(String),
    #[error("invalid value: {0}")]
    Invalid(String),
}

pub type ValueResult<T> = Result<T, ValueError>;

impl ValueError {
    pub fn coercion(op: impl Into<String>, left: &Value, right: &Value) -> Self {
        Self::Coercion {
            op: op.into(),
            left: format!("{} ({})", left, left.type_name()),
            right: format!("{} ({})", right, right.type_name()),
        }
    }
}

/// A registered struct type: ordered field set, declared type names, and
/// optional per-field descriptions. Immutable once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl StructType {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

impl From<StructDef> for StructType {
    fn from(def: StructDef) -> Self {
        Self {
            name: def.name,
            fields: def.fields,
        }
    }
}

/// A struct instance with reference semantics: cloning a `Value::Struct`
/// aliases the same field storage, so mutation through any alias is visible
/// through all others. The field set is fixed at construction.
#[derive(Clone)]
pub struct StructInstance {
    ty: Arc<StructType>,
    fields: Arc<RwLock<HashMap<String, Value>>>,
}

impl StructInstance {
    /// Construct an instance from a complete field map. Every declared
    /// field must be supplied and no extra fields are accepted.
    pub fn construct(ty: Arc<StructType>, mut values: HashMap<String, Value>) -> ValueResult<Self> {
        for field in &ty.fields {
            if !values.contains_key(&field.name) {
                return Err(ValueError::MissingField {
                    struct_name: ty.name.clone(),
                    field: field.name.clone(),
                });
            }
        }
        if let Some(extra) = values.keys().find(|k| ty.field(k).is_none()) {
            return Err(ValueError::StructField {
                struct_name: ty.name.clone(),
                field: extra.clone(),
            });
        }
        let fields = ty
            .fields
            .iter()
            .filter_map(|f| values.remove(&f.name).map(|v| (f.name.clone(), v)))
            .collect();
        Ok(Self {
            ty,
            fields: Arc::new(RwLock::new(fields)),
        })
    }

    pub fn struct_type(&self) -> &Arc<StructType> {
        &self.ty
    }

    pub fn type_name(&self) -> &str {
        &self.ty.name
    }

    pub fn get_field(&self, name: &str) -> ValueResult<Value> {
        let guard = self.fields.read().unwrap_or_else(|e| e.into_inner());
        guard
            .get(name)
            .cloned()
            .ok_or_else(|| ValueError::StructField {
                struct_name: self.ty.name.clone(),
                field: name.to_string(),
            })
    }

    /// Reassign an existing field. The field set cannot grow.
    pub fn set_field(&self, name: &str, value: Value) -> ValueResult<()> {
        if self.ty.field(name).is_none() {
            return Err(ValueError::StructField {
                struct_name: self.ty.name.clone(),
                field: name.to_string(),
            });
        }
        let mut guard = self.fields.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(name.to_string(), value);
        Ok(())
    }

    /// Field snapshot in declared order.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let guard = self.fields.read().unwrap_or_else(|e| e.into_inner());
        self.ty
            .fields
            .iter()
            .filter_map(|f| guard.get(&f.name).map(|v| (f.name.clone(), v.clone())))
            .collect()
    }

    pub fn aliases(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fields, &other.fields)
    }
}

impl fmt::Debug for StructInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(&self.ty.name);
        for (name, value) in self.snapshot() {
            s.field(&name, &value);
        }
        s.finish()
    }
}

impl PartialEq for StructInstance {
    fn eq(&self, other: &Self) -> bool {
        if self.aliases(other) {
            return true;
        }
        self.ty.name == other.ty.name && self.snapshot() == other.snapshot()
    }
}

/// Registry of struct types for one execution context.
#[derive(Debug, Default)]
pub struct StructRegistry {
    types: DashMap<String, Arc<StructType>>,
}

impl StructRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, def: StructDef) -> ValueResult<Arc<StructType>> {
        let ty = Arc::new(StructType::from(def));
        if self.types.contains_key(&ty.name) {
            return Err(ValueError::DuplicateStructType(ty.name.clone()));
        }
        self.types.insert(ty.name.clone(), ty.clone());
        Ok(ty)
    }

    pub fn get(&self, name: &str) -> ValueResult<Arc<StructType>> {
        self.types
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ValueError::UnknownStructType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }
}

/// Runtime value model.
///
/// Primitives copy by value; struct instances are shared references.
#[derive(Clone, Debug, Default)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Tuple(Vec<Value>),
    /// Insertion-ordered unique members.
    Set(Vec<Value>),
    Duration(Duration),
    Struct(StructInstance),
    /// Handle to a registered function family.
    Function(String),
    /// Return value for statements.
    Unit,
    #[default]
    Null,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => l == r,
            (Value::Float(l), Value::Float(r)) => l == r,
            (Value::String(l), Value::String(r)) => l == r,
            (Value::Boolean(l), Value::Boolean(r)) => l == r,
            (Value::List(l), Value::List(r)) => l == r,
            (Value::Map(l), Value::Map(r)) => l == r,
            (Value::Tuple(l), Value::Tuple(r)) => l == r,
            (Value::Set(l), Value::Set(r)) => l == r,
            (Value::Duration(l), Value::Duration(r)) => l == r,
            (Value::Struct(l), Value::Struct(r)) => l == r,
            (Value::Function(l), Value::Function(r)) => l == r,
            (Value::Unit, Value::Unit) => true,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Unit => write!(f, "()"),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl Value {
    /// Runtime type name used by dispatch and diagnostics. Struct instances
    /// report their struct type name.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "str",
            Value::Boolean(_) => "bool",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::Duration(_) => "duration",
            Value::Struct(instance) => instance.type_name(),
            Value::Function(_) => "function",
            Value::Unit => "unit",
            Value::Null => "null",
        }
    }

    /// Truthiness: null, zero numbers, and empty strings/containers are
    /// falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::Unit => false,
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) | Value::Set(v) => !v.is_empty(),
            Value::Map(m) => !m.is_empty(),
            _ => true,
        }
    }

    /// Build a set value, dropping duplicate members while preserving
    /// first-insertion order.
    pub fn set_from(items: Vec<Value>) -> Value {
        let mut members: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !members.contains(&item) {
                members.push(item);
            }
        }
        Value::Set(members)
    }

    pub fn add(&self, other: &Value) -> ValueResult<Value> {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l + r)),
            (Value::Float(l), Value::Float(r)) => Ok(Value::Float(l + r)),
            (Value::Integer(l), Value::Float(r)) => Ok(Value::Float(*l as f64 + r)),
            (Value::Float(l), Value::Integer(r)) => Ok(Value::Float(l + *r as f64)),
            (Value::String(l), Value::String(r)) => Ok(Value::String(l.clone() + r)),
            // String building: stringify the primitive side only when the
            // other operand is already a string.
            (Value::String(l), Value::Integer(_))
            | (Value::String(l), Value::Float(_))
            | (Value::String(l), Value::Boolean(_)) => Ok(Value::String(format!("{}{}", l, other))),
            (Value::Integer(_), Value::String(r))
            | (Value::Float(_), Value::String(r))
            | (Value::Boolean(_), Value::String(r)) => Ok(Value::String(format!("{}{}", self, r))),
            (Value::List(l), Value::List(r)) => {
                let mut out = l.clone();
                out.extend(r.iter().cloned());
                Ok(Value::List(out))
            }
            _ => Err(ValueError::coercion("+", self, other)),
        }
    }

    pub fn subtract(&self, other: &Value) -> ValueResult<Value> {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l - r)),
            (Value::Float(l), Value::Float(r)) => Ok(Value::Float(l - r)),
            (Value::Integer(l), Value::Float(r)) => Ok(Value::Float(*l as f64 - r)),
            (Value::Float(l), Value::Integer(r)) => Ok(Value::Float(l - *r as f64)),
            _ => Err(ValueError::coercion("-", self, other)),
        }
    }

    pub fn multiply(&self, other: &Value) -> ValueResult<Value> {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l * r)),
            (Value::Float(l), Value::Float(r)) => Ok(Value::Float(l * r)),
            (Value::Integer(l), Value::Float(r)) => Ok(Value::Float(*l as f64 * r)),
            (Value::Float(l), Value::Integer(r)) => Ok(Value::Float(l * *r as f64)),
            _ => Err(ValueError::coercion("*", self, other)),
        }
    }

    pub fn divide(&self, other: &Value) -> ValueResult<Value> {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => {
                if *r == 0 {
                    return Err(ValueError::Invalid("division by zero".to_string()));
                }
                Ok(Value::Float(*l as f64 / *r as f64))
            }
            (Value::Float(l), Value::Float(r)) => Ok(Value::Float(l / r)),
            (Value::Integer(l), Value::Float(r)) => Ok(Value::Float(*l as f64 / r)),
            (Value::Float(l), Value::Integer(r)) => Ok(Value::Float(l / *r as f64)),
            _ => Err(ValueError::coercion("/", self, other)),
        }
    }

    pub fn negate(&self) -> ValueResult<Value> {
        match self {
            Value::Integer(i) => Ok(Value::Integer(-i)),
            Value::Float(x) => Ok(Value::Float(-x)),
            _ => Err(ValueError::coercion("-", self, self)),
        }
    }

    /// Loose equality used by the `==` operator. Numeric promotion applies
    /// across int/float; a number compared to a string attempts a
    /// numeric-string parse and falls back to "unequal" (never an error)
    /// when the string does not parse.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(l), Value::Float(r)) | (Value::Float(r), Value::Integer(l)) => {
                *l as f64 == *r
            }
            (Value::Integer(l), Value::String(s)) | (Value::String(s), Value::Integer(l)) => {
                INT_PATTERN.is_match(s.trim()) && s.trim().parse::<i64>() == Ok(*l)
            }
            (Value::Float(x), Value::String(s)) | (Value::String(s), Value::Float(x)) => {
                FLOAT_PATTERN.is_match(s.trim()) && s.trim().parse::<f64>() == Ok(*x)
            }
            _ => self == other,
        }
    }

    pub fn compare(&self, other: &Value) -> ValueResult<std::cmp::Ordering> {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => Ok(l.cmp(r)),
            (Value::Float(l), Value::Float(r)) => l
                .partial_cmp(r)
                .ok_or_else(|| ValueError::coercion("<=>", self, other)),
            (Value::Integer(l), Value::Float(r)) => (*l as f64)
                .partial_cmp(r)
                .ok_or_else(|| ValueError::coercion("<=>", self, other)),
            (Value::Float(l), Value::Integer(r)) => l
                .partial_cmp(&(*r as f64))
                .ok_or_else(|| ValueError::coercion("<=>", self, other)),
            (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
            (Value::Boolean(l), Value::Boolean(r)) => Ok(l.cmp(r)),
            _ => Err(ValueError::coercion("<=>", self, other)),
        }
    }

    /// Explicit `int()` conversion. Float truncation is allowed here and
    /// only here; it is never implicit.
    pub fn to_int(&self) -> ValueResult<Value> {
        match self {
            Value::Integer(i) => Ok(Value::Integer(*i)),
            Value::Float(x) => Ok(Value::Integer(*x as i64)),
            Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| ValueError::coercion("int()", self, self)),
            _ => Err(ValueError::coercion("int()", self, self)),
        }
    }

    pub fn to_float(&self) -> ValueResult<Value> {
        match self {
            Value::Integer(i) => Ok(Value::Float(*i as f64)),
            Value::Float(x) => Ok(Value::Float(*x)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| ValueError::coercion("float()", self, self)),
            _ => Err(ValueError::coercion("float()", self, self)),
        }
    }
}

/// Normalize a raw reply from the reasoning collaborator.
///
/// Membership in the affirmative/negative sets wins first, then an integer
/// parse, then a float parse; anything else stays a string.
pub fn coerce_response(raw: &str) -> Value {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();
    if AFFIRMATIVE_RESPONSES.contains(&lowered.as_str()) {
        return Value::Boolean(true);
    }
    if NEGATIVE_RESPONSES.contains(&lowered.as_str()) {
        return Value::Boolean(false);
    }
    if INT_PATTERN.is_match(trimmed) {
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Integer(i);
        }
    }
    if FLOAT_PATTERN.is_match(trimmed) {
        if let Ok(x) = trimmed.parse::<f64>() {
            return Value::Float(x);
        }
    }
    Value::String(raw.to_string())
}

/// Coerce a reply against a declared type hint. A struct hint attempts a
/// JSON object parse against the registered field set; on any mismatch the
/// reply falls back to the plain response rules.
pub fn coerce_response_typed(raw: &str, hint: Option<&str>, structs: &StructRegistry) -> Value {
    if let Some(name) = hint {
        if let Ok(ty) = structs.get(name) {
            if let Ok(serde_json::Value::Object(map)) =
                serde_json::from_str::<serde_json::Value>(raw)
            {
                let fields: HashMap<String, Value> = map
                    .into_iter()
                    .map(|(k, v)| (k, value_from_json(v)))
                    .collect();
                if let Ok(instance) = StructInstance::construct(ty, fields) {
                    return Value::Struct(instance);
                }
            }
        }
    }
    coerce_response(raw)
}

/// Bridge into `serde_json` for prompt construction and logging.
impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> serde_json::Value {
        match value {
            Value::Integer(i) => serde_json::Value::Number((*i).into()),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
            Value::Duration(d) => serde_json::Value::Number((d.as_millis() as u64).into()),
            Value::Struct(instance) => serde_json::Value::Object(
                instance
                    .snapshot()
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
            Value::Function(name) => serde_json::Value::String(format!("<function {}>", name)),
            Value::Unit | Value::Null => serde_json::Value::Null,
        }
    }
}

pub fn value_from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(value_from_json).collect())
        }
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, value_from_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn point_type() -> Arc<StructType> {
        Arc::new(StructType {
            name: "Point".to_string(),
            fields: vec![
                FieldDef::new("x", "int").with_description("horizontal position"),
                FieldDef::new("y", "int"),
            ],
        })
    }

    #[test]
    fn test_numeric_promotion() {
        let result = Value::Integer(5).add(&Value::Float(3.5)).unwrap();
        assert_eq!(result, Value::Float(8.5));

        let result = Value::Float(2.0).multiply(&Value::Integer(3)).unwrap();
        assert_eq!(result, Value::Float(6.0));
    }

    #[test]
    fn test_string_building() {
        let result = Value::String("Count: ".to_string())
            .add(&Value::Integer(5))
            .unwrap();
        assert_eq!(result, Value::String("Count: 5".to_string()));

        let result = Value::Boolean(true)
            .add(&Value::String("!".to_string()))
            .unwrap();
        assert_eq!(result, Value::String("true!".to_string()));
    }

    #[test]
    fn test_uncoercible_addition() {
        let err = Value::Integer(1).add(&Value::Null).unwrap_err();
        assert!(matches!(err, ValueError::Coercion { .. }));
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Integer(5).loose_eq(&Value::String("5".to_string())));
        assert!(Value::Float(5.0).loose_eq(&Value::String("5".to_string())));
        assert!(Value::Integer(5).loose_eq(&Value::Float(5.0)));
        // Unparseable strings are simply unequal, never an error.
        assert!(!Value::String("abc".to_string()).loose_eq(&Value::Integer(5)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Integer(-1).is_truthy());
        assert!(Value::String(" ".to_string()).is_truthy());
    }

    #[test]
    fn test_response_coercion() {
        assert_eq!(coerce_response("YES"), Value::Boolean(true));
        assert_eq!(coerce_response(" ok "), Value::Boolean(true));
        assert_eq!(coerce_response("Invalid"), Value::Boolean(false));
        assert_eq!(coerce_response("42"), Value::Integer(42));
        assert_eq!(coerce_response("3.5"), Value::Float(3.5));
        assert_eq!(
            coerce_response("something else"),
            Value::String("something else".to_string())
        );
    }

    #[test]
    fn test_response_coercion_int_before_float() {
        // "1" is in the affirmative set; "2" must hit the int pattern first.
        assert_eq!(coerce_response("2"), Value::Integer(2));
    }

    #[test]
    fn test_struct_construction_requires_all_fields() {
        let ty = point_type();
        let mut values = HashMap::new();
        values.insert("x".to_string(), Value::Integer(1));
        let err = StructInstance::construct(ty.clone(), values).unwrap_err();
        assert!(matches!(err, ValueError::MissingField { .. }));

        let mut values = HashMap::new();
        values.insert("x".to_string(), Value::Integer(1));
        values.insert("y".to_string(), Value::Integer(2));
        values.insert("z".to_string(), Value::Integer(3));
        let err = StructInstance::construct(ty, values).unwrap_err();
        assert!(matches!(err, ValueError::StructField { .. }));
    }

    #[test]
    fn test_struct_aliasing() {
        let ty = point_type();
        let mut values = HashMap::new();
        values.insert("x".to_string(), Value::Integer(1));
        values.insert("y".to_string(), Value::Integer(2));
        let instance = StructInstance::construct(ty, values).unwrap();

        let alias = Value::Struct(instance.clone());
        instance.set_field("x", Value::Integer(10)).unwrap();
        match alias {
            Value::Struct(ref aliased) => {
                assert_eq!(aliased.get_field("x").unwrap(), Value::Integer(10));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_struct_field_set_fixed() {
        let ty = point_type();
        let mut values = HashMap::new();
        values.insert("x".to_string(), Value::Integer(1));
        values.insert("y".to_string(), Value::Integer(2));
        let instance = StructInstance::construct(ty, values).unwrap();

        let err = instance.set_field("z", Value::Integer(3)).unwrap_err();
        assert!(matches!(err, ValueError::StructField { .. }));
        let err = instance.get_field("w").unwrap_err();
        assert!(matches!(err, ValueError::StructField { .. }));
    }

    #[test]
    fn test_struct_registry_immutable_once_registered() {
        let registry = StructRegistry::new();
        let def = StructDef {
            name: "Point".to_string(),
            fields: vec![FieldDef::new("x", "int")],
        };
        registry.register(def.clone()).unwrap();
        let err = registry.register(def).unwrap_err();
        assert!(matches!(err, ValueError::DuplicateStructType(_)));
    }

    #[test]
    fn test_set_dedup_preserves_order() {
        let set = Value::set_from(vec![
            Value::Integer(3),
            Value::Integer(1),
            Value::Integer(3),
            Value::Integer(2),
        ]);
        assert_eq!(
            set,
            Value::Set(vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)])
        );
    }

    #[test]
    fn test_struct_json_coercion() {
        let registry = StructRegistry::new();
        registry
            .register(StructDef {
                name: "Point".to_string(),
                fields: vec![FieldDef::new("x", "int"), FieldDef::new("y", "int")],
            })
            .unwrap();

        let value = coerce_response_typed(r#"{"x": 1, "y": 2}"#, Some("Point"), &registry);
        match value {
            Value::Struct(instance) => {
                assert_eq!(instance.get_field("x").unwrap(), Value::Integer(1));
            }
            other => panic!("expected struct, got {:?}", other),
        }

        // A malformed reply falls back to the plain response rules.
        let value = coerce_response_typed("not json", Some("Point"), &registry);
        assert_eq!(value, Value::String("not json".to_string()));
    }
}
