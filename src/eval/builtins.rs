//! Built-in functions registered into every fresh context.
//!
//! Builtins are ordinary dispatch entries with native bodies, so scripts
//! can shadow them with their own definitions (a later registration wins
//! on an ambiguous match).

use std::sync::Arc;

use crate::ast::{ParamDef, TypeAnnotation};

use super::dispatch::{FunctionRegistry, FunctionSignature, NativeFn, SignatureBody};
use super::value::{Value, ValueError};

pub fn register(registry: &FunctionRegistry) {
    register_native(registry, "len", &["value"], Arc::new(builtin_len));
    register_native(registry, "sum", &["values"], Arc::new(builtin_sum));
    register_native(registry, "avg", &["values"], Arc::new(builtin_avg));
    register_native(registry, "str", &["value"], Arc::new(builtin_str));
    register_native(registry, "int", &["value"], Arc::new(builtin_int));
    register_native(registry, "float", &["value"], Arc::new(builtin_float));
    register_native(registry, "bool", &["value"], Arc::new(builtin_bool));
    register_native(registry, "type_of", &["value"], Arc::new(builtin_type_of));

    // print is variadic: zero or more values, space-joined.
    registry.register(FunctionSignature {
        name: "print".to_string(),
        params: vec![],
        variadic: Some("values".to_string()),
        return_type: None,
        body: SignatureBody::Native(Arc::new(builtin_print)),
    });
}

fn register_native(registry: &FunctionRegistry, name: &str, params: &[&str], body: NativeFn) {
    registry.register(FunctionSignature {
        name: name.to_string(),
        params: params
            .iter()
            .map(|p| ParamDef::new(*p, TypeAnnotation::Any))
            .collect(),
        variadic: None,
        return_type: None,
        body: SignatureBody::Native(body),
    });
}

fn builtin_len(args: &[Value]) -> Result<Value, ValueError> {
    let len = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Tuple(items) => items.len(),
        Value::Set(items) => items.len(),
        Value::Map(map) => map.len(),
        other => {
            return Err(ValueError::Invalid(format!(
                "len() expects a collection or string, got {}",
                other.type_name()
            )))
        }
    };
    Ok(Value::Integer(len as i64))
}

fn numeric_items(value: &Value, op: &str) -> Result<Vec<f64>, ValueError> {
    let items = match value {
        Value::List(items) | Value::Tuple(items) | Value::Set(items) => items,
        other => {
            return Err(ValueError::Invalid(format!(
                "{}() expects a list of numbers, got {}",
                op,
                other.type_name()
            )))
        }
    };
    items
        .iter()
        .map(|item| match item {
            Value::Integer(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            other => Err(ValueError::Invalid(format!(
                "{}() expects numeric elements, got {}",
                op,
                other.type_name()
            ))),
        })
        .collect()
}

fn builtin_sum(args: &[Value]) -> Result<Value, ValueError> {
    // An all-integer input stays an integer.
    if let Value::List(items) | Value::Tuple(items) | Value::Set(items) = &args[0] {
        if items.iter().all(|v| matches!(v, Value::Integer(_))) {
            let total = items
                .iter()
                .map(|v| match v {
                    Value::Integer(i) => *i,
                    _ => 0,
                })
                .sum();
            return Ok(Value::Integer(total));
        }
    }
    let total: f64 = numeric_items(&args[0], "sum")?.iter().sum();
    Ok(Value::Float(total))
}

fn builtin_avg(args: &[Value]) -> Result<Value, ValueError> {
    let items = numeric_items(&args[0], "avg")?;
    if items.is_empty() {
        return Err(ValueError::Invalid(
            "avg() of an empty collection".to_string(),
        ));
    }
    Ok(Value::Float(items.iter().sum::<f64>() / items.len() as f64))
}

fn builtin_str(args: &[Value]) -> Result<Value, ValueError> {
    Ok(Value::String(args[0].to_string()))
}

fn builtin_int(args: &[Value]) -> Result<Value, ValueError> {
    args[0].to_int()
}

fn builtin_float(args: &[Value]) -> Result<Value, ValueError> {
    args[0].to_float()
}

fn builtin_bool(args: &[Value]) -> Result<Value, ValueError> {
    Ok(Value::Boolean(args[0].is_truthy()))
}

fn builtin_type_of(args: &[Value]) -> Result<Value, ValueError> {
    Ok(Value::String(args[0].type_name().to_string()))
}

fn builtin_print(args: &[Value]) -> Result<Value, ValueError> {
    // The variadic tail arrives as a single list.
    let parts: Vec<String> = match args.first() {
        Some(Value::List(items)) => items.iter().map(|v| v.to_string()).collect(),
        Some(other) => vec![other.to_string()],
        None => vec![],
    };
    tracing::info!(target: "vela::print", "{}", parts.join(" "));
    Ok(Value::Unit)
}
