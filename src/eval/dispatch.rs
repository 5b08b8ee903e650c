//! Polymorphic function dispatch.
//!
//! The registry keeps, per name, the ordered list of registered signatures.
//! Resolution filters by arity (defaults and a variadic tail count), then by
//! exact runtime type at every explicitly-typed position; `any` matches
//! everything. An ambiguous exact match is resolved in favor of the most
//! recently registered signature and logged as a defect.

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use super::pipeline::ComposedPipeline;
use super::value::{StructRegistry, Value, ValueError};
use crate::ast::{Expression, ParamDef, Statement, TypeAnnotation};

pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, ValueError> + Send + Sync>;

/// The executable side of a registered signature.
pub enum SignatureBody {
    /// Imperative statement block.
    Block(Vec<Statement>),
    /// Declarative composition, validated and lowered at definition time.
    Composition(ComposedPipeline),
    /// Built-in implemented in Rust.
    Native(NativeFn),
}

impl fmt::Debug for SignatureBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(stmts) => write!(f, "Block({} statements)", stmts.len()),
            Self::Composition(_) => write!(f, "Composition"),
            Self::Native(_) => write!(f, "Native"),
        }
    }
}

#[derive(Debug)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<ParamDef>,
    pub variadic: Option<String>,
    pub return_type: Option<String>,
    pub body: SignatureBody,
}

impl FunctionSignature {
    /// Human-readable signature line for diagnostics and attempt records.
    pub fn describe(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.type_annotation))
            .collect::<Vec<_>>()
            .join(", ");
        match &self.variadic {
            Some(var) => format!("{}({}, *{})", self.name, params, var),
            None => format!("{}({})", self.name, params),
        }
    }

    /// When the first parameter is a named parameter typed with a
    /// registered struct type, that position is the dispatch receiver.
    /// Variadic-only signatures are never struct methods.
    pub fn receiver_type(&self, structs: &StructRegistry) -> Option<String> {
        let first = self.params.first()?;
        match &first.type_annotation {
            TypeAnnotation::Named(name) if structs.contains(name) => Some(name.clone()),
            _ => None,
        }
    }
}

/// One evaluated call-site argument.
#[derive(Debug, Clone)]
pub struct EvaluatedArg {
    pub name: Option<String>,
    pub value: Value,
}

impl EvaluatedArg {
    pub fn positional(value: Value) -> Self {
        Self { name: None, value }
    }

    pub fn named(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }
}

/// A parameter slot after binding: either a supplied value or a default
/// expression the caller still has to evaluate.
#[derive(Debug, Clone)]
pub enum BoundArg {
    Supplied(Value),
    Default(Expression),
}

/// A resolved call: the selected signature plus per-parameter bindings in
/// declaration order.
#[derive(Debug, Clone)]
pub struct Binding {
    pub signature: Arc<FunctionSignature>,
    pub args: Vec<(String, BoundArg)>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no matching signature for {name}({arg_types})")]
    NoMatchingSignature { name: String, arg_types: String },
}

impl DispatchError {
    fn no_match(name: &str, args: &[EvaluatedArg]) -> Self {
        Self::NoMatchingSignature {
            name: name.to_string(),
            arg_types: args
                .iter()
                .map(|a| a.value.type_name().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Registry of function families: name to ordered signature list.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    families: DashMap<String, Vec<Arc<FunctionSignature>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, signature: FunctionSignature) -> Arc<FunctionSignature> {
        let signature = Arc::new(signature);
        self.families
            .entry(signature.name.clone())
            .or_default()
            .push(signature.clone());
        signature
    }

    pub fn contains(&self, name: &str) -> bool {
        self.families.contains_key(name)
    }

    pub fn family(&self, name: &str) -> Vec<Arc<FunctionSignature>> {
        self.families
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Select exactly one signature for the given argument vector.
    pub fn resolve(&self, name: &str, args: &[EvaluatedArg]) -> Result<Binding, DispatchError> {
        self.resolve_inner(name, args, false)
    }

    /// Method-call resolution: signatures must have a named first parameter
    /// to receive the receiver, so variadic-only signatures are excluded.
    pub fn resolve_method(
        &self,
        name: &str,
        args: &[EvaluatedArg],
    ) -> Result<Binding, DispatchError> {
        self.resolve_inner(name, args, true)
    }

    fn resolve_inner(
        &self,
        name: &str,
        args: &[EvaluatedArg],
        require_receiver: bool,
    ) -> Result<Binding, DispatchError> {
        let family = self.family(name);
        let mut matches: Vec<Binding> = family
            .iter()
            .filter(|sig| !require_receiver || !sig.params.is_empty())
            .filter_map(|sig| {
                bind_arguments(sig, args).map(|bound| Binding {
                    signature: sig.clone(),
                    args: bound,
                })
            })
            .filter(types_match)
            .collect();

        match matches.len() {
            0 => Err(DispatchError::no_match(name, args)),
            1 => Ok(matches.remove(0)),
            n => {
                // Ambiguous exact match: not expected under well-formed
                // registration. Most recent registration wins.
                let survivors = matches
                    .iter()
                    .map(|m| m.signature.describe())
                    .collect::<Vec<_>>()
                    .join("; ");
                warn!(
                    function = name,
                    candidates = n,
                    %survivors,
                    "ambiguous dispatch, selecting most recently registered signature"
                );
                matches.pop().ok_or_else(|| DispatchError::no_match(name, args))
            }
        }
    }
}

/// Try to bind the argument vector onto a signature's parameter list.
/// Returns `None` when the arity cannot be satisfied.
fn bind_arguments(
    sig: &FunctionSignature,
    args: &[EvaluatedArg],
) -> Option<Vec<(String, BoundArg)>> {
    let mut named: HashMap<&str, &Value> = HashMap::new();
    let mut positional: Vec<&Value> = Vec::new();
    for arg in args {
        match &arg.name {
            Some(name) => {
                // A named argument must correspond to a declared parameter.
                if !sig.params.iter().any(|p| p.name == *name) {
                    return None;
                }
                named.insert(name.as_str(), &arg.value);
            }
            None => positional.push(&arg.value),
        }
    }

    let mut positional = positional.into_iter();
    let mut bound = Vec::with_capacity(sig.params.len());
    for param in &sig.params {
        let slot = if let Some(value) = named.remove(param.name.as_str()) {
            BoundArg::Supplied(value.clone())
        } else if let Some(value) = positional.next() {
            BoundArg::Supplied(value.clone())
        } else if let Some(default) = &param.default {
            BoundArg::Default(default.clone())
        } else {
            return None;
        };
        bound.push((param.name.clone(), slot));
    }

    let rest: Vec<Value> = positional.cloned().collect();
    match &sig.variadic {
        Some(var) => bound.push((var.clone(), BoundArg::Supplied(Value::List(rest)))),
        None if !rest.is_empty() => return None,
        None => {}
    }
    Some(bound)
}

/// Exact type filter over explicitly-typed parameter positions. Defaults
/// are not re-checked; `any` matches everything.
fn types_match(binding: &Binding) -> bool {
    for (param, (_, slot)) in binding.signature.params.iter().zip(&binding.args) {
        if let (TypeAnnotation::Named(expected), BoundArg::Supplied(value)) =
            (&param.type_annotation, slot)
        {
            if value.type_name() != expected {
                return false;
            }
        }
    }
    true
}
