//! Expression evaluation.
//!
//! All operand evaluation is strict and left to right. Arithmetic and
//! comparison semantics live on [`Value`]; this module wires them to the
//! AST, resolves names against the context, and hosts the `reason()`
//! bridge to the configured provider.

use std::collections::HashMap;

use std::sync::Arc;

use async_recursion::async_recursion;
use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::{Argument, BinaryOperator, Expression, Literal, Scope, UnaryOperator};
use crate::provider::{ProviderError, ReasonRequest};

use super::context::{ContextError, ExecutionContext};
use super::dispatch::EvaluatedArg;
use super::evaluator::{EvalError, EvalResult, Evaluator};
use super::generator::PromptMeta;
use super::pipeline::{ComposedPipeline, PipelineError};
use super::value::{coerce_response, coerce_response_typed, StructInstance, Value, ValueError};

lazy_static! {
    /// `${name}` or `${scope:name}` inside reasoning prompt text.
    static ref INTERPOLATION_PATTERN: Regex =
        Regex::new(r"\$\{(?:(local|private|public|system):)?([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

impl Evaluator {
    #[async_recursion]
    pub async fn eval_expression(
        &self,
        expr: &Expression,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        match expr {
            Expression::Literal(literal) => Ok(literal_value(literal)),
            Expression::Variable(name) => match context.get(Scope::Local, name).await {
                Ok(value) => Ok(value),
                Err(ContextError::NameNotFound { .. })
                    if context.shared.functions.contains(name) =>
                {
                    Ok(Value::Function(name.clone()))
                }
                Err(err) => Err(err.into()),
            },
            Expression::ScopedRef { scope, name } => Ok(context.get(*scope, name).await?),
            Expression::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expression(item, context.clone()).await?);
                }
                Ok(Value::List(values))
            }
            Expression::BinaryOp {
                op: BinaryOperator::Pipe,
                ..
            } => self.eval_inline_pipeline(expr, context).await,
            Expression::BinaryOp { op, left, right } => {
                self.eval_binary(*op, left, right, context).await
            }
            Expression::UnaryOp { op, operand } => {
                let value = self.eval_expression(operand, context).await?;
                match op {
                    UnaryOperator::Not => Ok(Value::Boolean(!value.is_truthy())),
                    UnaryOperator::Negate => Ok(value.negate()?),
                }
            }
            Expression::FunctionCall {
                function,
                arguments,
            } => {
                if context.shared.structs.contains(function) {
                    self.construct_struct(function, arguments, context).await
                } else {
                    let args = self.eval_arguments(arguments, context.clone()).await?;
                    self.call_function(function, args, context).await
                }
            }
            Expression::MethodCall {
                receiver,
                method,
                arguments,
            } => {
                let receiver = self.eval_expression(receiver, context.clone()).await?;
                let mut args = vec![EvaluatedArg::positional(receiver)];
                args.extend(self.eval_arguments(arguments, context.clone()).await?);
                let binding = context.shared.functions.resolve_method(method, &args)?;
                self.invoke_with_enhancers(binding, context).await
            }
            Expression::FieldAccess { object, field } => {
                let object = self.eval_expression(object, context).await?;
                match object {
                    Value::Struct(instance) => Ok(instance.get_field(field)?),
                    Value::Map(map) => map.get(field).cloned().ok_or_else(|| {
                        EvalError::InvalidOperation(format!("no key '{}' in dict", field))
                    }),
                    other => Err(EvalError::InvalidOperation(format!(
                        "field access '.{}' on {}",
                        field,
                        other.type_name()
                    ))),
                }
            }
            Expression::Index { object, index } => {
                let object = self.eval_expression(object, context.clone()).await?;
                let index = self.eval_expression(index, context).await?;
                eval_index(&object, &index)
            }
            Expression::Reason {
                arguments,
                expected_type,
            } => {
                self.eval_reason(arguments, expected_type.as_deref(), context)
                    .await
            }
            Expression::Placeholder => Err(PipelineError::Placeholder.into()),
            Expression::CaptureAs { name, .. } => Err(PipelineError::Composition(format!(
                "'as {}' outside a composition body",
                name
            ))
            .into()),
        }
    }

    async fn eval_binary(
        &self,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        // and/or short-circuit on truthiness.
        match op {
            BinaryOperator::And => {
                let left = self.eval_expression(left, context.clone()).await?;
                if !left.is_truthy() {
                    return Ok(Value::Boolean(false));
                }
                let right = self.eval_expression(right, context).await?;
                return Ok(Value::Boolean(right.is_truthy()));
            }
            BinaryOperator::Or => {
                let left = self.eval_expression(left, context.clone()).await?;
                if left.is_truthy() {
                    return Ok(Value::Boolean(true));
                }
                let right = self.eval_expression(right, context).await?;
                return Ok(Value::Boolean(right.is_truthy()));
            }
            _ => {}
        }

        let left = self.eval_expression(left, context.clone()).await?;
        let right = self.eval_expression(right, context).await?;
        let value = match op {
            BinaryOperator::Add => left.add(&right)?,
            BinaryOperator::Subtract => left.subtract(&right)?,
            BinaryOperator::Multiply => left.multiply(&right)?,
            BinaryOperator::Divide => left.divide(&right)?,
            BinaryOperator::Equal => Value::Boolean(left.loose_eq(&right)),
            BinaryOperator::NotEqual => Value::Boolean(!left.loose_eq(&right)),
            BinaryOperator::LessThan => Value::Boolean(left.compare(&right)?.is_lt()),
            BinaryOperator::GreaterThan => Value::Boolean(left.compare(&right)?.is_gt()),
            BinaryOperator::LessThanEqual => Value::Boolean(left.compare(&right)?.is_le()),
            BinaryOperator::GreaterThanEqual => Value::Boolean(left.compare(&right)?.is_ge()),
            BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Pipe => {
                return Err(EvalError::InvalidOperation(format!(
                    "operator '{}' handled elsewhere",
                    op
                )))
            }
        };
        Ok(value)
    }

    /// `input | f | g` in expression position: the leftmost operand is the
    /// input value, the rest is an anonymous composition.
    async fn eval_inline_pipeline(
        &self,
        expr: &Expression,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        let mut operands = Vec::new();
        flatten_pipe(expr, &mut operands);

        let mut operands = operands.into_iter();
        let head = operands
            .next()
            .ok_or_else(|| PipelineError::Composition("empty pipeline".to_string()))?;
        let input = self.eval_expression(head, context.clone()).await?;

        let body = operands
            .cloned()
            .reduce(|acc, next| Expression::BinaryOp {
                op: BinaryOperator::Pipe,
                left: Box::new(acc),
                right: Box::new(next),
            })
            .ok_or_else(|| {
                PipelineError::Composition("pipeline needs at least one stage".to_string())
            })?;
        let pipeline = ComposedPipeline::compose(&body, &context)?;
        self.run_pipeline(&pipeline, input, context).await
    }

    pub(crate) async fn eval_arguments(
        &self,
        arguments: &[Argument],
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Vec<EvaluatedArg>> {
        let mut args = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let arg = match argument {
                Argument::Positional(expr) => {
                    EvaluatedArg::positional(self.eval_expression(expr, context.clone()).await?)
                }
                Argument::Named { name, value } => EvaluatedArg::named(
                    name.clone(),
                    self.eval_expression(value, context.clone()).await?,
                ),
            };
            args.push(arg);
        }
        Ok(args)
    }

    /// Struct construction call: positional arguments fill declared fields
    /// in order, named arguments bind by field name.
    async fn construct_struct(
        &self,
        name: &str,
        arguments: &[Argument],
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        let ty = context.shared.structs.get(name)?;
        let mut values: HashMap<String, Value> = HashMap::new();
        let mut next_positional = 0;
        for argument in arguments {
            match argument {
                Argument::Positional(expr) => {
                    let field = ty.fields.get(next_positional).ok_or_else(|| {
                        EvalError::InvalidOperation(format!(
                            "too many positional fields for struct {}",
                            name
                        ))
                    })?;
                    next_positional += 1;
                    let value = self.eval_expression(expr, context.clone()).await?;
                    if values.insert(field.name.clone(), value).is_some() {
                        return Err(ValueError::DuplicateField {
                            struct_name: name.to_string(),
                            field: field.name.clone(),
                        }
                        .into());
                    }
                }
                Argument::Named { name: field, value } => {
                    let value = self.eval_expression(value, context.clone()).await?;
                    if values.insert(field.clone(), value).is_some() {
                        return Err(ValueError::DuplicateField {
                            struct_name: name.to_string(),
                            field: field.clone(),
                        }
                        .into());
                    }
                }
            }
        }
        let instance = StructInstance::construct(ty, values)?;
        Ok(Value::Struct(instance))
    }

    /// The `reason()` call: build the prompt, ask the provider under the
    /// configured timeout, coerce the textual reply.
    #[tracing::instrument(skip(self, arguments, context), level = "debug")]
    async fn eval_reason(
        &self,
        arguments: &[Argument],
        expected_type: Option<&str>,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        let mut parts = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let expr = match argument {
                Argument::Positional(expr) => expr,
                Argument::Named { value, .. } => value,
            };
            let value = self.eval_expression(expr, context.clone()).await?;
            parts.push(value.to_string());
        }
        let content = self.interpolate(&parts.join(" "), &context).await?;

        let struct_hint = expected_type.and_then(|name| context.shared.structs.get(name).ok());
        let meta = PromptMeta {
            script_name: context.shared.run_info.script_name.clone(),
            expected_type: if struct_hint.is_none() {
                expected_type.map(str::to_string)
            } else {
                None
            },
        };
        let prompt = context
            .shared
            .prompt_generator
            .generate_prompt(content, struct_hint.as_deref(), meta)
            .await?;

        let request = ReasonRequest {
            prompt: format!("{}\n{}", prompt.system, prompt.user),
            expected_type: expected_type.map(str::to_string),
            trace_id: context.generate_trace_id(),
        };
        let response = tokio::time::timeout(
            context.reason_timeout,
            context.shared.provider.reason(&request),
        )
        .await
        .map_err(|_| ProviderError::Timeout(context.reason_timeout))??;

        Ok(match expected_type {
            Some(hint) => {
                coerce_response_typed(&response.output, Some(hint), &context.shared.structs)
            }
            None => coerce_response(&response.output),
        })
    }

    /// Substitute `${var}` references in prompt text with context values.
    /// An unqualified reference reads `local`, same as elsewhere.
    async fn interpolate(
        &self,
        template: &str,
        context: &ExecutionContext,
    ) -> EvalResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in INTERPOLATION_PATTERN.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            let scope = caps
                .get(1)
                .and_then(|s| s.as_str().parse::<Scope>().ok())
                .unwrap_or(Scope::Local);
            out.push_str(&template[last..whole.start()]);
            let value = context.get(scope, name.as_str()).await?;
            out.push_str(&value.to_string());
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }
}

fn flatten_pipe<'a>(expr: &'a Expression, out: &mut Vec<&'a Expression>) {
    if let Expression::BinaryOp {
        op: BinaryOperator::Pipe,
        left,
        right,
    } = expr
    {
        flatten_pipe(left, out);
        flatten_pipe(right, out);
        return;
    }
    out.push(expr);
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Integer(i) => Value::Integer(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Duration(d) => Value::Duration(*d),
        Literal::List(items) => Value::List(items.iter().map(literal_value).collect()),
        Literal::Tuple(items) => Value::Tuple(items.iter().map(literal_value).collect()),
        Literal::Set(items) => Value::set_from(items.iter().map(literal_value).collect()),
        Literal::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), literal_value(v)))
                .collect(),
        ),
        Literal::Null => Value::Null,
    }
}

fn eval_index(object: &Value, index: &Value) -> EvalResult<Value> {
    match (object, index) {
        (Value::List(items), Value::Integer(i)) | (Value::Tuple(items), Value::Integer(i)) => {
            let idx = normalize_index(*i, items.len())?;
            Ok(items[idx].clone())
        }
        (Value::String(s), Value::Integer(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(*i, chars.len())?;
            Ok(Value::String(chars[idx].to_string()))
        }
        (Value::Map(map), Value::String(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| EvalError::InvalidOperation(format!("no key '{}' in dict", key))),
        (object, index) => Err(EvalError::InvalidOperation(format!(
            "cannot index {} with {}",
            object.type_name(),
            index.type_name()
        ))),
    }
}

/// Negative indices count from the end.
fn normalize_index(index: i64, len: usize) -> EvalResult<usize> {
    let resolved = if index < 0 {
        index + len as i64
    } else {
        index
    };
    if resolved < 0 || resolved as usize >= len {
        return Err(EvalError::InvalidOperation(format!(
            "index {} out of range for length {}",
            index, len
        )));
    }
    Ok(resolved as usize)
}
