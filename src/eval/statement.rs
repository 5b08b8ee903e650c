//! Statement evaluation and control flow.

use core::fmt;
use std::sync::Arc;

use async_recursion::async_recursion;

use crate::ast::{Expression, FunctionDefBody, Scope, Statement};

use super::context::ExecutionContext;
use super::dispatch::{FunctionSignature, SignatureBody};
use super::evaluator::{EvalError, EvalResult, Evaluator};
use super::pipeline::ComposedPipeline;
use super::value::Value;

/// Non-local exit propagating out of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    Return(Option<Value>),
    Break,
    Continue,
}

impl fmt::Display for ControlFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Return(_) => write!(f, "return"),
            Self::Break => write!(f, "break"),
            Self::Continue => write!(f, "continue"),
        }
    }
}

/// Outcome of one statement: a value, or control flow to propagate.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Value(Value),
    Control(ControlFlow),
}

impl Evaluator {
    /// Evaluate statements in order. Control flow stops the block early;
    /// otherwise the block yields its last statement value.
    #[async_recursion]
    pub async fn eval_block(
        &self,
        statements: &[Statement],
        context: Arc<ExecutionContext>,
    ) -> EvalResult<StatementResult> {
        let mut last = Value::Unit;
        for statement in statements {
            match self.eval_statement(statement, context.clone()).await? {
                StatementResult::Value(value) => last = value,
                control => return Ok(control),
            }
        }
        Ok(StatementResult::Value(last))
    }

    #[async_recursion]
    pub async fn eval_statement(
        &self,
        statement: &Statement,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<StatementResult> {
        match statement {
            Statement::Expression(expr) => Ok(StatementResult::Value(
                self.eval_expression(expr, context).await?,
            )),
            Statement::Assignment { targets, value } => {
                // The right-hand side is fully evaluated before any write,
                // so `a = a + 1` reads the old binding.
                let value = self.eval_expression(value, context.clone()).await?;
                self.assign(targets, value, context).await?;
                Ok(StatementResult::Value(Value::Unit))
            }
            Statement::Return(expr) => {
                let value = match expr {
                    Some(expr) => Some(self.eval_expression(expr, context).await?),
                    None => None,
                };
                Ok(StatementResult::Control(ControlFlow::Return(value)))
            }
            Statement::If {
                condition,
                then_block,
                else_block,
            } => {
                let condition = self.eval_expression(condition, context.clone()).await?;
                if condition.is_truthy() {
                    self.eval_block(then_block, context).await
                } else if let Some(else_block) = else_block {
                    self.eval_block(else_block, context).await
                } else {
                    Ok(StatementResult::Value(Value::Unit))
                }
            }
            Statement::While { condition, body } => {
                loop {
                    let condition = self.eval_expression(condition, context.clone()).await?;
                    if !condition.is_truthy() {
                        break;
                    }
                    match self.eval_block(body, context.clone()).await? {
                        StatementResult::Control(ControlFlow::Break) => break,
                        StatementResult::Control(ControlFlow::Continue) => {}
                        StatementResult::Control(flow) => {
                            return Ok(StatementResult::Control(flow))
                        }
                        StatementResult::Value(_) => {}
                    }
                }
                Ok(StatementResult::Value(Value::Unit))
            }
            Statement::For {
                variable,
                iterable,
                body,
            } => {
                let iterable = self.eval_expression(iterable, context.clone()).await?;
                for item in iterate(&iterable)? {
                    context.set(Scope::Local, variable, item).await?;
                    match self.eval_block(body, context.clone()).await? {
                        StatementResult::Control(ControlFlow::Break) => break,
                        StatementResult::Control(ControlFlow::Continue) => {}
                        StatementResult::Control(flow) => {
                            return Ok(StatementResult::Control(flow))
                        }
                        StatementResult::Value(_) => {}
                    }
                }
                Ok(StatementResult::Value(Value::Unit))
            }
            Statement::Break => Ok(StatementResult::Control(ControlFlow::Break)),
            Statement::Continue => Ok(StatementResult::Control(ControlFlow::Continue)),
            Statement::Try { body, handlers } => {
                match self.eval_block(body, context.clone()).await {
                    Ok(result) => Ok(result),
                    Err(err) => {
                        let condition = err.condition();
                        let handler = handlers.iter().find(|h| match h.condition.as_deref() {
                            None => true,
                            Some(name) => name == condition,
                        });
                        match handler {
                            Some(handler) => {
                                // The handled error is visible to the arm
                                // as `error`.
                                context
                                    .set(
                                        Scope::Local,
                                        "error",
                                        Value::String(err.to_string()),
                                    )
                                    .await?;
                                self.eval_block(&handler.body, context).await
                            }
                            None => Err(err),
                        }
                    }
                }
            }
            Statement::StructDef(def) => {
                context.shared.structs.register(def.clone())?;
                Ok(StatementResult::Value(Value::Unit))
            }
            Statement::FunctionDef(def) => {
                let body = match &def.body {
                    FunctionDefBody::Block(statements) => SignatureBody::Block(statements.clone()),
                    // Composition bodies are validated here, when the
                    // definition is evaluated.
                    FunctionDefBody::Composition(expr) => {
                        SignatureBody::Composition(ComposedPipeline::compose(expr, &context)?)
                    }
                };
                context.shared.functions.register(FunctionSignature {
                    name: def.name.clone(),
                    params: def.params.clone(),
                    variadic: def.variadic.clone(),
                    return_type: def.return_type.clone(),
                    body,
                });
                Ok(StatementResult::Value(Value::Unit))
            }
            Statement::Block(statements) => self.eval_block(statements, context).await,
        }
    }

    /// Write an already-evaluated value to one or more targets. Multiple
    /// targets unpack a tuple or list positionally.
    async fn assign(
        &self,
        targets: &[Expression],
        value: Value,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<()> {
        if targets.len() == 1 {
            return self.assign_target(&targets[0], value, context).await;
        }
        let items = match value {
            Value::Tuple(items) | Value::List(items) => items,
            other => {
                return Err(EvalError::InvalidOperation(format!(
                    "cannot unpack {} into {} targets",
                    other.type_name(),
                    targets.len()
                )))
            }
        };
        if items.len() != targets.len() {
            return Err(EvalError::InvalidOperation(format!(
                "cannot unpack {} values into {} targets",
                items.len(),
                targets.len()
            )));
        }
        for (target, item) in targets.iter().zip(items) {
            self.assign_target(target, item, context.clone()).await?;
        }
        Ok(())
    }

    async fn assign_target(
        &self,
        target: &Expression,
        value: Value,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<()> {
        match target {
            Expression::Variable(name) => {
                context.set(Scope::Local, name, value).await?;
                Ok(())
            }
            Expression::ScopedRef { scope, name } => {
                context.set(*scope, name, value).await?;
                Ok(())
            }
            Expression::FieldAccess { object, field } => {
                let object = self.eval_expression(object, context).await?;
                match object {
                    Value::Struct(instance) => {
                        instance.set_field(field, value)?;
                        Ok(())
                    }
                    other => Err(EvalError::InvalidOperation(format!(
                        "cannot assign field '.{}' on {}",
                        field,
                        other.type_name()
                    ))),
                }
            }
            other => Err(EvalError::InvalidOperation(format!(
                "invalid assignment target: {}",
                other.describe()
            ))),
        }
    }
}

fn iterate(value: &Value) -> EvalResult<Vec<Value>> {
    match value {
        Value::List(items) | Value::Tuple(items) | Value::Set(items) => Ok(items.clone()),
        Value::Map(map) => Ok(map.keys().cloned().map(Value::String).collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(EvalError::InvalidOperation(format!(
            "{} is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        Argument, BinaryOperator, FunctionDef, Literal, OnHandler, ParamDef, TypeAnnotation,
    };
    use crate::eval::context::tests::test_context;
    use pretty_assertions::assert_eq;

    fn int(i: i64) -> Expression {
        Expression::Literal(Literal::Integer(i))
    }

    fn var(name: &str) -> Expression {
        Expression::Variable(name.to_string())
    }

    fn assign(name: &str, value: Expression) -> Statement {
        Statement::Assignment {
            targets: vec![var(name)],
            value,
        }
    }

    #[tokio::test]
    async fn test_self_referential_assignment_reads_old_value() {
        let context = Arc::new(test_context());
        let evaluator = Evaluator::new();
        context
            .set(Scope::Local, "a", Value::Integer(1))
            .await
            .unwrap();

        let stmt = assign(
            "a",
            Expression::BinaryOp {
                op: BinaryOperator::Add,
                left: Box::new(var("a")),
                right: Box::new(int(1)),
            },
        );
        evaluator.eval_statement(&stmt, context.clone()).await.unwrap();
        assert_eq!(
            context.get(Scope::Local, "a").await.unwrap(),
            Value::Integer(2)
        );
    }

    #[tokio::test]
    async fn test_tuple_unpacking() {
        let context = Arc::new(test_context());
        let stmt = Statement::Assignment {
            targets: vec![var("x"), var("y")],
            value: Expression::Literal(Literal::Tuple(vec![
                Literal::Integer(1),
                Literal::Integer(2),
            ])),
        };
        Evaluator::new()
            .eval_statement(&stmt, context.clone())
            .await
            .unwrap();
        assert_eq!(
            context.get(Scope::Local, "x").await.unwrap(),
            Value::Integer(1)
        );
        assert_eq!(
            context.get(Scope::Local, "y").await.unwrap(),
            Value::Integer(2)
        );
    }

    #[tokio::test]
    async fn test_unpack_arity_mismatch_fails() {
        let context = Arc::new(test_context());
        let stmt = Statement::Assignment {
            targets: vec![var("x"), var("y"), var("z")],
            value: Expression::Literal(Literal::Tuple(vec![
                Literal::Integer(1),
                Literal::Integer(2),
            ])),
        };
        assert!(Evaluator::new()
            .eval_statement(&stmt, context)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_while_loop_with_break() {
        let context = Arc::new(test_context());
        let evaluator = Evaluator::new();
        context
            .set(Scope::Local, "n", Value::Integer(0))
            .await
            .unwrap();

        // while true { n = n + 1; if n >= 3 { break } }
        let body = vec![
            assign(
                "n",
                Expression::BinaryOp {
                    op: BinaryOperator::Add,
                    left: Box::new(var("n")),
                    right: Box::new(int(1)),
                },
            ),
            Statement::If {
                condition: Expression::BinaryOp {
                    op: BinaryOperator::GreaterThanEqual,
                    left: Box::new(var("n")),
                    right: Box::new(int(3)),
                },
                then_block: vec![Statement::Break],
                else_block: None,
            },
        ];
        let stmt = Statement::While {
            condition: Expression::Literal(Literal::Boolean(true)),
            body,
        };
        evaluator.eval_statement(&stmt, context.clone()).await.unwrap();
        assert_eq!(
            context.get(Scope::Local, "n").await.unwrap(),
            Value::Integer(3)
        );
    }

    #[tokio::test]
    async fn test_for_loop_accumulates() {
        let context = Arc::new(test_context());
        let evaluator = Evaluator::new();
        context
            .set(Scope::Local, "total", Value::Integer(0))
            .await
            .unwrap();

        let stmt = Statement::For {
            variable: "item".to_string(),
            iterable: Expression::Literal(Literal::List(vec![
                Literal::Integer(1),
                Literal::Integer(2),
                Literal::Integer(3),
            ])),
            body: vec![assign(
                "total",
                Expression::BinaryOp {
                    op: BinaryOperator::Add,
                    left: Box::new(var("total")),
                    right: Box::new(var("item")),
                },
            )],
        };
        evaluator.eval_statement(&stmt, context.clone()).await.unwrap();
        assert_eq!(
            context.get(Scope::Local, "total").await.unwrap(),
            Value::Integer(6)
        );
    }

    #[tokio::test]
    async fn test_try_matches_condition_name() {
        let context = Arc::new(test_context());
        let stmt = Statement::Try {
            body: vec![Statement::Expression(var("missing"))],
            handlers: vec![
                OnHandler {
                    condition: Some("CoercionError".to_string()),
                    body: vec![assign("handled", int(1))],
                },
                OnHandler {
                    condition: Some("NameNotFoundError".to_string()),
                    body: vec![assign("handled", int(2))],
                },
            ],
        };
        Evaluator::new()
            .eval_statement(&stmt, context.clone())
            .await
            .unwrap();
        assert_eq!(
            context.get(Scope::Local, "handled").await.unwrap(),
            Value::Integer(2)
        );
    }

    #[tokio::test]
    async fn test_try_without_matching_handler_propagates() {
        let context = Arc::new(test_context());
        let stmt = Statement::Try {
            body: vec![Statement::Expression(var("missing"))],
            handlers: vec![OnHandler {
                condition: Some("CoercionError".to_string()),
                body: vec![],
            }],
        };
        let err = Evaluator::new()
            .eval_statement(&stmt, context)
            .await
            .unwrap_err();
        assert_eq!(err.condition(), "NameNotFoundError");
    }

    #[tokio::test]
    async fn test_function_definition_and_call() {
        let context = Arc::new(test_context());
        let evaluator = Evaluator::new();

        // def double(x) { return x * 2 }
        let def = Statement::FunctionDef(FunctionDef {
            name: "double".to_string(),
            params: vec![ParamDef::new("x", TypeAnnotation::Any)],
            variadic: None,
            return_type: None,
            body: FunctionDefBody::Block(vec![Statement::Return(Some(Expression::BinaryOp {
                op: BinaryOperator::Multiply,
                left: Box::new(var("x")),
                right: Box::new(int(2)),
            }))]),
        });
        evaluator.eval_statement(&def, context.clone()).await.unwrap();

        let call = Statement::Expression(Expression::FunctionCall {
            function: "double".to_string(),
            arguments: vec![Argument::Positional(int(21))],
        });
        let result = evaluator.eval_statement(&call, context).await.unwrap();
        assert_eq!(result, StatementResult::Value(Value::Integer(42)));
    }

    #[tokio::test]
    async fn test_function_locals_do_not_leak() {
        let context = Arc::new(test_context());
        let evaluator = Evaluator::new();

        let def = Statement::FunctionDef(FunctionDef {
            name: "leaky".to_string(),
            params: vec![],
            variadic: None,
            return_type: None,
            body: FunctionDefBody::Block(vec![assign("inner", int(1))]),
        });
        evaluator.eval_statement(&def, context.clone()).await.unwrap();

        let call = Statement::Expression(Expression::FunctionCall {
            function: "leaky".to_string(),
            arguments: vec![],
        });
        evaluator.eval_statement(&call, context.clone()).await.unwrap();
        assert!(!context.contains(Scope::Local, "inner"));
    }
}
