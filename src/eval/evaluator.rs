//! The evaluator facade and the function invocation path.
//!
//! `Evaluator` is stateless; all mutable state lives in the
//! [`ExecutionContext`]. Expression, statement, and pipeline evaluation are
//! implemented in their own modules as further `impl Evaluator` blocks.
//!
//! Every function call runs through the attempt loop: invoke the resolved
//! body, build an [`AttemptRecord`], and let the registered enhancers
//! accept the result, override it, or request a retry up to the context's
//! attempt limit.

use std::sync::Arc;

use crate::ast::{Scope, Statement};
use crate::enhance::{AttemptRecord, Enhancement};
use crate::provider::ProviderError;

use super::context::{ContextError, ExecutionContext};
use super::dispatch::{Binding, BoundArg, DispatchError, EvaluatedArg, SignatureBody};
use super::pipeline::PipelineError;
use super::statement::{ControlFlow, StatementResult};
use super::value::{Value, ValueError};

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("evaluation failed: {0}")]
    Eval(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

impl EvalError {
    /// The condition name this error matches in a `try`/`on` statement.
    pub fn condition(&self) -> &'static str {
        match self {
            Self::Context(ContextError::NameNotFound { .. }) => "NameNotFoundError",
            Self::Context(ContextError::LockTimeout(_)) => "ContextError",
            Self::Dispatch(DispatchError::NoMatchingSignature { .. }) => {
                "NoMatchingSignatureError"
            }
            Self::Pipeline(PipelineError::UnresolvedStage(_))
            | Self::Pipeline(PipelineError::Composition(_)) => "CompositionError",
            Self::Pipeline(PipelineError::NotAFunctionComposition { .. }) => {
                "NotAFunctionCompositionError"
            }
            Self::Pipeline(PipelineError::Placeholder) => "PlaceholderError",
            Self::Pipeline(PipelineError::CaptureNotFound(_)) => "CaptureNotFoundError",
            Self::Pipeline(PipelineError::CaptureConflict(_)) => "CaptureConflictError",
            Self::Value(ValueError::Coercion { .. }) | Self::Value(ValueError::Invalid(_)) => {
                "CoercionError"
            }
            Self::Value(ValueError::StructField { .. })
            | Self::Value(ValueError::MissingField { .. })
            | Self::Value(ValueError::DuplicateField { .. }) => "StructFieldError",
            Self::Value(ValueError::UnknownStructType(_)) => "NameNotFoundError",
            Self::Provider(_) => "ProviderError",
            _ => "EvalError",
        }
    }
}

/// Stateless evaluation engine over an [`ExecutionContext`].
#[derive(Debug, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    /// Resolve and invoke a named function with already-evaluated
    /// arguments.
    #[tracing::instrument(skip(self, args, context), level = "debug")]
    pub async fn call_function(
        &self,
        name: &str,
        args: Vec<EvaluatedArg>,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        let binding = context.shared.functions.resolve(name, &args)?;
        self.invoke_with_enhancers(binding, context).await
    }

    /// The attempt loop around a resolved binding. Enhancers observe every
    /// attempt in registration order; the first non-Accept decision wins.
    pub(crate) async fn invoke_with_enhancers(
        &self,
        binding: Binding,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        let max_attempts = context.max_call_attempts.max(1);
        let mut prior_failure: Option<String> = None;

        for attempt in 1..=max_attempts {
            let outcome = self.invoke(&binding, context.clone()).await;
            let record = AttemptRecord {
                attempt,
                prior_failure: prior_failure.clone(),
                signature: binding.signature.describe(),
                result: outcome.as_ref().ok().cloned(),
                error: outcome.as_ref().err().map(|e| e.to_string()),
            };

            let mut decision = Enhancement::Accept;
            for enhancer in context.shared.enhancers.iter() {
                match enhancer.after_attempt(&record).await {
                    Enhancement::Accept => {}
                    other => {
                        decision = other;
                        break;
                    }
                }
            }

            match decision {
                Enhancement::Accept => return outcome,
                Enhancement::Override(value) => {
                    tracing::debug!(
                        signature = %record.signature,
                        attempt,
                        "enhancer overrode call result"
                    );
                    return Ok(value);
                }
                Enhancement::Retry { reason } => {
                    if attempt == max_attempts {
                        tracing::warn!(
                            signature = %record.signature,
                            attempt,
                            %reason,
                            "retry requested at attempt limit, keeping last outcome"
                        );
                        return outcome;
                    }
                    tracing::debug!(
                        signature = %record.signature,
                        attempt,
                        %reason,
                        "enhancer requested retry"
                    );
                    prior_failure = Some(reason);
                }
            }
        }

        Err(EvalError::Eval(format!(
            "attempt limit exhausted for {}",
            binding.signature.describe()
        )))
    }

    async fn invoke(
        &self,
        binding: &Binding,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        match &binding.signature.body {
            SignatureBody::Native(native) => {
                let values = self.materialize_args(&binding.args, &context).await?;
                native(&values).map_err(Into::into)
            }
            SignatureBody::Block(statements) => {
                let frame = self.call_frame(binding, &context).await?;
                self.run_body(statements, frame).await
            }
            SignatureBody::Composition(pipeline) => {
                // The first parameter's value is the pipeline input; the
                // frame makes all parameters visible to stage arguments.
                let frame = self.call_frame(binding, &context).await?;
                let input = match binding.args.first() {
                    Some((name, _)) => frame.get(Scope::Local, name).await?,
                    None => Value::Null,
                };
                self.run_pipeline(pipeline, input, frame).await
            }
        }
    }

    /// New call frame with every parameter bound into `local`. Defaults
    /// evaluate in the caller's context, not the fresh frame.
    async fn call_frame(
        &self,
        binding: &Binding,
        context: &Arc<ExecutionContext>,
    ) -> EvalResult<Arc<ExecutionContext>> {
        let frame = Arc::new(context.fork_for_call());
        for (name, slot) in &binding.args {
            let value = match slot {
                BoundArg::Supplied(value) => value.clone(),
                BoundArg::Default(expr) => self.eval_expression(expr, context.clone()).await?,
            };
            frame.set(Scope::Local, name, value).await?;
        }
        Ok(frame)
    }

    async fn materialize_args(
        &self,
        args: &[(String, BoundArg)],
        context: &Arc<ExecutionContext>,
    ) -> EvalResult<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for (_, slot) in args {
            let value = match slot {
                BoundArg::Supplied(value) => value.clone(),
                BoundArg::Default(expr) => self.eval_expression(expr, context.clone()).await?,
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Run an imperative body to completion. `return` unwinds to here; a
    /// body falling off the end yields its last statement value.
    pub(crate) async fn run_body(
        &self,
        statements: &[Statement],
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        match self.eval_block(statements, context).await? {
            StatementResult::Value(value) => Ok(value),
            StatementResult::Control(ControlFlow::Return(value)) => {
                Ok(value.unwrap_or(Value::Unit))
            }
            StatementResult::Control(flow) => Err(EvalError::InvalidOperation(format!(
                "'{}' outside a loop",
                flow
            ))),
        }
    }
}
