//! The execution core: context, values, dispatch, pipelines, and the
//! evaluator that ties them together.
//!
//! Evaluation is driven by [`Evaluator`](evaluator::Evaluator) over an
//! [`ExecutionContext`](context::ExecutionContext). The context owns the
//! four variable scopes, the struct and function registries, and the
//! reasoning provider; the evaluator itself is stateless and cheap to
//! share.

pub mod builtins;
pub mod context;
pub mod dispatch;
pub mod evaluator;
pub mod expression;
pub mod generator;
pub mod pipeline;
pub mod statement;
pub mod value;

pub use context::{ContextError, ExecutionContext, RunInfo, SharedContext};
pub use dispatch::{DispatchError, EvaluatedArg, FunctionRegistry, FunctionSignature};
pub use evaluator::{EvalError, EvalResult, Evaluator};
pub use generator::{Prompt, PromptGenerator, PromptMeta, StandardPromptGenerator};
pub use pipeline::{ComposedPipeline, PipelineError};
pub use statement::{ControlFlow, StatementResult};
pub use value::{StructInstance, StructRegistry, StructType, Value, ValueError};
