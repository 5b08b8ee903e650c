//! Script runtime: wires a configuration, a provider, and enhancers into
//! fresh execution contexts and runs programs against them.

use std::sync::Arc;

use crate::ast::Program;
use crate::config::RuntimeConfig;
use crate::enhance::Enhancer;
use crate::error::Result;
use crate::eval::{Evaluator, ExecutionContext, RunInfo, Value};
use crate::provider::ReasonProvider;

pub struct Runtime {
    config: RuntimeConfig,
    provider: Arc<dyn ReasonProvider>,
    enhancers: Vec<Arc<dyn Enhancer>>,
    evaluator: Evaluator,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, provider: Arc<dyn ReasonProvider>) -> Self {
        Self {
            config,
            provider,
            enhancers: Vec::new(),
            evaluator: Evaluator::new(),
        }
    }

    /// Enhancers observe every function call attempt, in registration
    /// order.
    pub fn with_enhancer(mut self, enhancer: Arc<dyn Enhancer>) -> Self {
        self.enhancers.push(enhancer);
        self
    }

    /// Fresh context for one run. Exposed so callers can interleave their
    /// own reads and writes with [`Runtime::run_in`].
    pub fn create_context(&self, script_name: &str) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new(
            &self.config.context,
            self.provider.clone(),
            self.enhancers.clone(),
            RunInfo::new(script_name),
        ))
    }

    /// Run a program in a fresh context and return its final value.
    #[tracing::instrument(skip(self, program), level = "info")]
    pub async fn run(&self, script_name: &str, program: &Program) -> Result<Value> {
        let context = self.create_context(script_name);
        self.run_in(program, context).await
    }

    pub async fn run_in(
        &self,
        program: &Program,
        context: Arc<ExecutionContext>,
    ) -> Result<Value> {
        let run_id = context.shared.run_info.run_id.clone();
        tracing::info!(
            run_id = %run_id,
            script = %context.shared.run_info.script_name,
            statements = program.statements.len(),
            "starting run"
        );
        let result = self
            .evaluator
            .run_body(&program.statements, context)
            .await?;
        tracing::info!(run_id = %run_id, "run finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expression, Literal, Scope, Statement};
    use crate::provider::StaticProvider;
    use pretty_assertions::assert_eq;

    fn runtime() -> Runtime {
        Runtime::new(
            RuntimeConfig::default(),
            Arc::new(StaticProvider::new("ok")),
        )
    }

    #[tokio::test]
    async fn test_run_returns_last_value() {
        let program = Program::new(vec![
            Statement::Assignment {
                targets: vec![Expression::Variable("x".to_string())],
                value: Expression::Literal(Literal::Integer(2)),
            },
            Statement::Expression(Expression::Variable("x".to_string())),
        ]);
        let result = runtime().run("demo", &program).await.unwrap();
        assert_eq!(result, Value::Integer(2));
    }

    #[tokio::test]
    async fn test_runs_are_isolated() {
        let runtime = runtime();
        let program = Program::new(vec![Statement::Assignment {
            targets: vec![Expression::Variable("x".to_string())],
            value: Expression::Literal(Literal::Integer(1)),
        }]);
        runtime.run("first", &program).await.unwrap();

        let context = runtime.create_context("second");
        assert!(!context.contains(Scope::Local, "x"));
    }
}
