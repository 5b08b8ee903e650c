//! The function-composition engine.
//!
//! A declarative function body (`def p(x) = f | [g, h] | i(1, $$)`) is
//! lowered into a stage tree when the definition is evaluated. All shape
//! validation happens at that point: unresolved stage names, non-callable
//! operands, capture conflicts, and parallel members depending on a
//! sibling's capture are definition-time errors, never call-time surprises.
//!
//! At call time three binding modes apply per stage: implicit (previous
//! result prepended), placeholder (`$$` substituted, no prepending), and
//! named capture (`as name`, bound into a pipeline-local namespace distinct
//! from the context scopes). A stage whose arguments reference a capture
//! consumes the pipeline value explicitly too, so it gets no prepend
//! either.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_recursion::async_recursion;
use futures::future::join_all;

use super::context::ExecutionContext;
use super::dispatch::EvaluatedArg;
use super::evaluator::{EvalError, EvalResult, Evaluator};
use super::value::Value;
use crate::ast::{Argument, BinaryOperator, Expression, Scope};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unresolved stage '{0}': no function registered under that name")]
    UnresolvedStage(String),
    #[error("{operand} is not callable in a composition body ({kind})")]
    NotAFunctionComposition { operand: String, kind: String },
    #[error("placeholder '$$' has no previous stage result")]
    Placeholder,
    #[error("capture '{0}' referenced before it is bound")]
    CaptureNotFound(String),
    #[error("capture '{0}' conflicts with an existing context variable")]
    CaptureConflict(String),
    #[error("invalid composition: {0}")]
    Composition(String),
}

/// One validated stage: a registered function reference plus its explicit
/// arguments and optional capture tag.
#[derive(Debug, Clone)]
pub struct StageNode {
    pub function: String,
    pub args: Vec<StageArg>,
    pub capture: Option<String>,
}

impl StageNode {
    /// A stage consumes the previous result explicitly when its argument
    /// list contains a `$$` marker or references a pipeline capture. Only
    /// then is the implicit prepend suppressed.
    fn binds_explicitly(&self, declared: &HashSet<String>) -> bool {
        self.args.iter().any(|arg| match &arg.value {
            StageValue::Placeholder => true,
            StageValue::Expr(expr) => {
                let mut names = HashSet::new();
                collect_expr_names(expr, &mut names);
                !names.is_disjoint(declared)
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct StageArg {
    pub name: Option<String>,
    pub value: StageValue,
}

#[derive(Debug, Clone)]
pub enum StageValue {
    Placeholder,
    Expr(Expression),
}

#[derive(Debug, Clone)]
pub enum PipelineNode {
    Stage(StageNode),
    Sequence(Vec<PipelineNode>),
    Parallel(Vec<PipelineNode>),
}

/// A fully validated composition body, ready to invoke.
#[derive(Debug, Clone)]
pub struct ComposedPipeline {
    pub root: PipelineNode,
    /// All capture names declared anywhere in the body. A reference to one
    /// of these resolves in the capture namespace only.
    pub capture_names: HashSet<String>,
}

impl ComposedPipeline {
    /// Lower and validate a composition body against the current context.
    pub fn compose(body: &Expression, context: &ExecutionContext) -> Result<Self, PipelineError> {
        let root = lower(body, context)?;
        let mut bound = HashSet::new();
        validate_capture_order(&root, &mut bound)?;
        let capture_names = declared_captures(&root);
        Ok(Self {
            root,
            capture_names,
        })
    }
}

fn lower(expr: &Expression, context: &ExecutionContext) -> Result<PipelineNode, PipelineError> {
    match expr {
        Expression::BinaryOp {
            op: BinaryOperator::Pipe,
            left,
            right,
        } => {
            let mut stages = Vec::new();
            flatten_sequence(left, context, &mut stages)?;
            flatten_sequence(right, context, &mut stages)?;
            Ok(PipelineNode::Sequence(stages))
        }
        Expression::Variable(name) => {
            if !context.shared.functions.contains(name) {
                return Err(PipelineError::UnresolvedStage(name.clone()));
            }
            Ok(PipelineNode::Stage(StageNode {
                function: name.clone(),
                args: vec![],
                capture: None,
            }))
        }
        Expression::FunctionCall {
            function,
            arguments,
        } => {
            if !context.shared.functions.contains(function) {
                return Err(PipelineError::UnresolvedStage(function.clone()));
            }
            let args = arguments
                .iter()
                .map(|arg| {
                    let (name, expr) = match arg {
                        Argument::Positional(expr) => (None, expr),
                        Argument::Named { name, value } => (Some(name.clone()), value),
                    };
                    if let Expression::Placeholder = expr {
                        return Ok(StageArg {
                            name,
                            value: StageValue::Placeholder,
                        });
                    }
                    // `$$` is a whole argument, never a sub-expression.
                    if contains_placeholder(expr) {
                        return Err(PipelineError::Composition(format!(
                            "placeholder '$$' must stand alone as an argument to '{}'",
                            function
                        )));
                    }
                    Ok(StageArg {
                        name,
                        value: StageValue::Expr(expr.clone()),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PipelineNode::Stage(StageNode {
                function: function.clone(),
                args,
                capture: None,
            }))
        }
        Expression::List(members) => {
            let lowered = members
                .iter()
                .map(|m| lower(m, context))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PipelineNode::Parallel(lowered))
        }
        Expression::CaptureAs { stage, name } => {
            if context.contains(Scope::Local, name) {
                return Err(PipelineError::CaptureConflict(name.clone()));
            }
            match lower(stage, context)? {
                PipelineNode::Stage(mut node) => {
                    node.capture = Some(name.clone());
                    Ok(PipelineNode::Stage(node))
                }
                _ => Err(PipelineError::Composition(format!(
                    "'as {}' applies to a single stage, not a group",
                    name
                ))),
            }
        }
        other => Err(PipelineError::NotAFunctionComposition {
            operand: other.describe(),
            kind: operand_kind(other).to_string(),
        }),
    }
}

fn flatten_sequence(
    expr: &Expression,
    context: &ExecutionContext,
    out: &mut Vec<PipelineNode>,
) -> Result<(), PipelineError> {
    if let Expression::BinaryOp {
        op: BinaryOperator::Pipe,
        left,
        right,
    } = expr
    {
        flatten_sequence(left, context, out)?;
        flatten_sequence(right, context, out)?;
        return Ok(());
    }
    out.push(lower(expr, context)?);
    Ok(())
}

fn operand_kind(expr: &Expression) -> &'static str {
    match expr {
        Expression::Literal(_) => "literal",
        Expression::BinaryOp { .. } => "arithmetic or logical expression",
        Expression::UnaryOp { .. } => "unary expression",
        Expression::ScopedRef { .. } => "scoped reference",
        Expression::FieldAccess { .. } => "field access",
        Expression::Index { .. } => "index expression",
        Expression::MethodCall { .. } => "method call",
        Expression::Reason { .. } => "reason expression",
        Expression::Placeholder => "placeholder",
        _ => "expression",
    }
}

/// Capture names declared anywhere under a node.
fn declared_captures(node: &PipelineNode) -> HashSet<String> {
    let mut out = HashSet::new();
    collect_declared(node, &mut out);
    out
}

fn collect_declared(node: &PipelineNode, out: &mut HashSet<String>) {
    match node {
        PipelineNode::Stage(stage) => {
            if let Some(name) = &stage.capture {
                out.insert(name.clone());
            }
        }
        PipelineNode::Sequence(children) | PipelineNode::Parallel(children) => {
            for child in children {
                collect_declared(child, out);
            }
        }
    }
}

/// Variable names referenced by a node's stage arguments.
fn referenced_names(node: &PipelineNode) -> HashSet<String> {
    let mut out = HashSet::new();
    collect_referenced(node, &mut out);
    out
}

fn collect_referenced(node: &PipelineNode, out: &mut HashSet<String>) {
    match node {
        PipelineNode::Stage(stage) => {
            for arg in &stage.args {
                if let StageValue::Expr(expr) = &arg.value {
                    collect_expr_names(expr, out);
                }
            }
        }
        PipelineNode::Sequence(children) | PipelineNode::Parallel(children) => {
            for child in children {
                collect_referenced(child, out);
            }
        }
    }
}

fn contains_placeholder(expr: &Expression) -> bool {
    match expr {
        Expression::Placeholder => true,
        Expression::List(items) => items.iter().any(contains_placeholder),
        Expression::BinaryOp { left, right, .. } => {
            contains_placeholder(left) || contains_placeholder(right)
        }
        Expression::UnaryOp { operand, .. } => contains_placeholder(operand),
        Expression::MethodCall {
            receiver,
            arguments,
            ..
        } => {
            contains_placeholder(receiver)
                || arguments.iter().any(|arg| match arg {
                    Argument::Positional(e) => contains_placeholder(e),
                    Argument::Named { value, .. } => contains_placeholder(value),
                })
        }
        Expression::FunctionCall { arguments, .. } | Expression::Reason { arguments, .. } => {
            arguments.iter().any(|arg| match arg {
                Argument::Positional(e) => contains_placeholder(e),
                Argument::Named { value, .. } => contains_placeholder(value),
            })
        }
        Expression::FieldAccess { object, .. } => contains_placeholder(object),
        Expression::Index { object, index } => {
            contains_placeholder(object) || contains_placeholder(index)
        }
        Expression::CaptureAs { stage, .. } => contains_placeholder(stage),
        _ => false,
    }
}

fn collect_expr_names(expr: &Expression, out: &mut HashSet<String>) {
    match expr {
        Expression::Variable(name) => {
            out.insert(name.clone());
        }
        Expression::List(items) => {
            for item in items {
                collect_expr_names(item, out);
            }
        }
        Expression::BinaryOp { left, right, .. } => {
            collect_expr_names(left, out);
            collect_expr_names(right, out);
        }
        Expression::UnaryOp { operand, .. } => collect_expr_names(operand, out),
        Expression::MethodCall {
            receiver,
            arguments,
            ..
        } => {
            collect_expr_names(receiver, out);
            for arg in arguments {
                match arg {
                    Argument::Positional(e) => collect_expr_names(e, out),
                    Argument::Named { value, .. } => collect_expr_names(value, out),
                }
            }
        }
        Expression::FunctionCall { arguments, .. } | Expression::Reason { arguments, .. } => {
            for arg in arguments {
                match arg {
                    Argument::Positional(e) => collect_expr_names(e, out),
                    Argument::Named { value, .. } => collect_expr_names(value, out),
                }
            }
        }
        Expression::FieldAccess { object, .. } => collect_expr_names(object, out),
        Expression::Index { object, index } => {
            collect_expr_names(object, out);
            collect_expr_names(index, out);
        }
        Expression::CaptureAs { stage, .. } => collect_expr_names(stage, out),
        _ => {}
    }
}

/// Parallel members must be independently callable: a member may not
/// reference a capture declared by one of its siblings.
fn validate_capture_order(
    node: &PipelineNode,
    bound: &mut HashSet<String>,
) -> Result<(), PipelineError> {
    match node {
        PipelineNode::Stage(stage) => {
            if let Some(name) = &stage.capture {
                bound.insert(name.clone());
            }
            Ok(())
        }
        PipelineNode::Sequence(children) => {
            for child in children {
                validate_capture_order(child, bound)?;
            }
            Ok(())
        }
        PipelineNode::Parallel(members) => {
            let declared: Vec<HashSet<String>> = members.iter().map(declared_captures).collect();
            for (i, member) in members.iter().enumerate() {
                let refs = referenced_names(member);
                for (j, sibling_captures) in declared.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    if let Some(name) = refs
                        .intersection(sibling_captures)
                        .find(|name| !bound.contains(*name))
                    {
                        return Err(PipelineError::Composition(format!(
                            "parallel member depends on capture '{}' of a sibling member",
                            name
                        )));
                    }
                }
                validate_capture_order(member, &mut bound.clone())?;
            }
            for captures in declared {
                bound.extend(captures);
            }
            Ok(())
        }
    }
}

/// Input handed to a stage. The pipeline's initial argument is implicit
/// input but not a "previous stage result", so `$$` in the first stage is
/// still an error.
#[derive(Debug, Clone)]
struct StageInput {
    value: Value,
    from_stage: bool,
}

impl Evaluator {
    /// Invoke a composed pipeline with an initial input value.
    pub(crate) async fn run_pipeline(
        &self,
        pipeline: &ComposedPipeline,
        input: Value,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        let mut captures = HashMap::new();
        self.run_node(
            &pipeline.root,
            StageInput {
                value: input,
                from_stage: false,
            },
            &pipeline.capture_names,
            &mut captures,
            context,
        )
        .await
    }

    #[async_recursion]
    async fn run_node(
        &self,
        node: &PipelineNode,
        input: StageInput,
        declared: &HashSet<String>,
        captures: &mut HashMap<String, Value>,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        match node {
            PipelineNode::Sequence(children) => {
                let mut current = input;
                for child in children {
                    let output = self
                        .run_node(child, current, declared, captures, context.clone())
                        .await?;
                    current = StageInput {
                        value: output,
                        from_stage: true,
                    };
                }
                Ok(current.value)
            }
            PipelineNode::Parallel(members) => {
                // Every member sees the same input on a forked context.
                // join_all preserves declared order regardless of
                // completion order.
                let futures = members.iter().map(|member| {
                    let member_input = input.clone();
                    let member_captures = captures.clone();
                    let member_context = Arc::new(context.fork());
                    async move {
                        let mut member_captures = member_captures;
                        let value = self
                            .run_node(
                                member,
                                member_input,
                                declared,
                                &mut member_captures,
                                member_context,
                            )
                            .await?;
                        Ok::<_, EvalError>((value, member_captures))
                    }
                });
                let mut values = Vec::with_capacity(members.len());
                for result in join_all(futures).await {
                    let (value, member_captures) = result?;
                    values.push(value);
                    captures.extend(member_captures);
                }
                Ok(Value::List(values))
            }
            PipelineNode::Stage(stage) => {
                let result = self
                    .run_stage(stage, &input, declared, captures, context)
                    .await?;
                if let Some(name) = &stage.capture {
                    captures.insert(name.clone(), result.clone());
                }
                Ok(result)
            }
        }
    }

    async fn run_stage(
        &self,
        stage: &StageNode,
        input: &StageInput,
        declared: &HashSet<String>,
        captures: &HashMap<String, Value>,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        let mut args = Vec::with_capacity(stage.args.len() + 1);
        if !stage.binds_explicitly(declared) {
            // Implicit mode: the previous result (or the pipeline input)
            // becomes the first positional argument.
            args.push(EvaluatedArg::positional(input.value.clone()));
        }
        for arg in &stage.args {
            let value = match &arg.value {
                StageValue::Placeholder => {
                    if !input.from_stage {
                        return Err(PipelineError::Placeholder.into());
                    }
                    input.value.clone()
                }
                StageValue::Expr(expr) => {
                    self.eval_stage_arg(expr, declared, captures, context.clone())
                        .await?
                }
            };
            args.push(EvaluatedArg {
                name: arg.name.clone(),
                value,
            });
        }
        self.call_function(&stage.function, args, context).await
    }

    /// Stage arguments resolve capture names before context variables, at
    /// any depth of the argument expression; a declared-but-unbound capture
    /// is an error rather than a fallback.
    async fn eval_stage_arg(
        &self,
        expr: &Expression,
        declared: &HashSet<String>,
        captures: &HashMap<String, Value>,
        context: Arc<ExecutionContext>,
    ) -> EvalResult<Value> {
        let mut names = HashSet::new();
        collect_expr_names(expr, &mut names);
        if names.is_disjoint(declared) {
            return self.eval_expression(expr, context).await;
        }
        if let Some(name) = names
            .intersection(declared)
            .find(|name| !captures.contains_key(*name))
        {
            return Err(PipelineError::CaptureNotFound(name.clone()).into());
        }
        // Captures shadow context variables inside the argument expression.
        let bindings: Vec<(String, Value)> = names
            .intersection(declared)
            .filter_map(|name| captures.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        let frame = Arc::new(context.fork_with_bindings(bindings));
        self.eval_expression(expr, frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Literal, ParamDef, TypeAnnotation};
    use crate::eval::context::tests::test_context;
    use crate::eval::dispatch::{FunctionSignature, SignatureBody};

    fn register_unary(context: &ExecutionContext, name: &str) {
        context.shared.functions.register(FunctionSignature {
            name: name.to_string(),
            params: vec![ParamDef::new("x", TypeAnnotation::Any)],
            variadic: None,
            return_type: None,
            body: SignatureBody::Native(Arc::new(|args| Ok(args[0].clone()))),
        });
    }

    #[tokio::test]
    async fn test_compose_rejects_unresolved_stage() {
        let context = test_context();
        register_unary(&context, "f");

        let body = Expression::BinaryOp {
            op: BinaryOperator::Pipe,
            left: Box::new(Expression::Variable("f".to_string())),
            right: Box::new(Expression::Variable("missing".to_string())),
        };
        let err = ComposedPipeline::compose(&body, &context).unwrap_err();
        assert!(matches!(err, PipelineError::UnresolvedStage(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_compose_rejects_non_callable_operand() {
        let context = test_context();

        // def p(x) = x + 1
        let body = Expression::BinaryOp {
            op: BinaryOperator::Add,
            left: Box::new(Expression::Variable("x".to_string())),
            right: Box::new(Expression::Literal(Literal::Integer(1))),
        };
        let err = ComposedPipeline::compose(&body, &context).unwrap_err();
        match err {
            PipelineError::NotAFunctionComposition { kind, .. } => {
                assert_eq!(kind, "arithmetic or logical expression");
            }
            other => panic!("expected NotAFunctionComposition, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_compose_rejects_literal_operand() {
        let context = test_context();
        register_unary(&context, "f");

        let body = Expression::BinaryOp {
            op: BinaryOperator::Pipe,
            left: Box::new(Expression::Variable("f".to_string())),
            right: Box::new(Expression::Literal(Literal::Integer(42))),
        };
        let err = ComposedPipeline::compose(&body, &context).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NotAFunctionComposition { .. }
        ));
    }

    #[tokio::test]
    async fn test_capture_conflict_with_context_variable() {
        let context = test_context();
        register_unary(&context, "f");
        context
            .set(Scope::Local, "t", Value::Integer(1))
            .await
            .unwrap();

        let body = Expression::CaptureAs {
            stage: Box::new(Expression::Variable("f".to_string())),
            name: "t".to_string(),
        };
        let err = ComposedPipeline::compose(&body, &context).unwrap_err();
        assert!(matches!(err, PipelineError::CaptureConflict(name) if name == "t"));
    }

    #[tokio::test]
    async fn test_capture_rebinding_is_allowed() {
        let context = test_context();
        register_unary(&context, "f");
        register_unary(&context, "g");

        // def p(x) = f as t | g as t
        let body = Expression::BinaryOp {
            op: BinaryOperator::Pipe,
            left: Box::new(Expression::CaptureAs {
                stage: Box::new(Expression::Variable("f".to_string())),
                name: "t".to_string(),
            }),
            right: Box::new(Expression::CaptureAs {
                stage: Box::new(Expression::Variable("g".to_string())),
                name: "t".to_string(),
            }),
        };
        let pipeline = ComposedPipeline::compose(&body, &context).unwrap();
        assert!(pipeline.capture_names.contains("t"));
    }

    #[tokio::test]
    async fn test_parallel_member_cannot_use_sibling_capture() {
        let context = test_context();
        register_unary(&context, "f");
        register_unary(&context, "g");

        // def p(x) = [f as t, g(t)]
        let body = Expression::List(vec![
            Expression::CaptureAs {
                stage: Box::new(Expression::Variable("f".to_string())),
                name: "t".to_string(),
            },
            Expression::FunctionCall {
                function: "g".to_string(),
                arguments: vec![Argument::Positional(Expression::Variable("t".to_string()))],
            },
        ]);
        let err = ComposedPipeline::compose(&body, &context).unwrap_err();
        assert!(matches!(err, PipelineError::Composition(_)));
    }

    #[tokio::test]
    async fn test_capture_on_group_is_rejected() {
        let context = test_context();
        register_unary(&context, "f");
        register_unary(&context, "g");

        let body = Expression::CaptureAs {
            stage: Box::new(Expression::List(vec![
                Expression::Variable("f".to_string()),
                Expression::Variable("g".to_string()),
            ])),
            name: "t".to_string(),
        };
        let err = ComposedPipeline::compose(&body, &context).unwrap_err();
        assert!(matches!(err, PipelineError::Composition(_)));
    }
}
