#![allow(dead_code)]

use std::sync::Arc;

use ctor::ctor;

use vela::ast::{
    Argument, BinaryOperator, Expression, FunctionDef, FunctionDefBody, Literal, ParamDef,
    Statement, TypeAnnotation,
};
use vela::config::RuntimeConfig;
use vela::provider::StaticProvider;
use vela::runtime::Runtime;

#[ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn runtime_with_reply(reply: &str) -> Runtime {
    Runtime::new(
        RuntimeConfig::default(),
        Arc::new(StaticProvider::new(reply)),
    )
}

pub fn runtime() -> Runtime {
    runtime_with_reply("ok")
}

pub fn int(i: i64) -> Expression {
    Expression::Literal(Literal::Integer(i))
}

pub fn string(s: &str) -> Expression {
    Expression::Literal(Literal::String(s.to_string()))
}

pub fn var(name: &str) -> Expression {
    Expression::Variable(name.to_string())
}

pub fn binop(op: BinaryOperator, left: Expression, right: Expression) -> Expression {
    Expression::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn add(left: Expression, right: Expression) -> Expression {
    binop(BinaryOperator::Add, left, right)
}

pub fn pipe(left: Expression, right: Expression) -> Expression {
    binop(BinaryOperator::Pipe, left, right)
}

pub fn call(function: &str, args: Vec<Expression>) -> Expression {
    Expression::FunctionCall {
        function: function.to_string(),
        arguments: args.into_iter().map(Argument::Positional).collect(),
    }
}

pub fn capture(stage: Expression, name: &str) -> Expression {
    Expression::CaptureAs {
        stage: Box::new(stage),
        name: name.to_string(),
    }
}

pub fn assign(name: &str, value: Expression) -> Statement {
    Statement::Assignment {
        targets: vec![var(name)],
        value,
    }
}

pub fn ret(expr: Expression) -> Statement {
    Statement::Return(Some(expr))
}

fn params(names: &[&str]) -> Vec<ParamDef> {
    names
        .iter()
        .map(|name| ParamDef::new(*name, TypeAnnotation::Any))
        .collect()
}

/// `def name(params...) { body }`
pub fn def_block(name: &str, param_names: &[&str], body: Vec<Statement>) -> Statement {
    Statement::FunctionDef(FunctionDef {
        name: name.to_string(),
        params: params(param_names),
        variadic: None,
        return_type: None,
        body: FunctionDefBody::Block(body),
    })
}

/// `def name(params...) = body`
pub fn def_composition(name: &str, param_names: &[&str], body: Expression) -> Statement {
    Statement::FunctionDef(FunctionDef {
        name: name.to_string(),
        params: params(param_names),
        variadic: None,
        return_type: None,
        body: FunctionDefBody::Composition(body),
    })
}

/// `def name(x: type) { return result }` for dispatch tests.
pub fn def_typed(name: &str, param_type: &str, result: Expression) -> Statement {
    Statement::FunctionDef(FunctionDef {
        name: name.to_string(),
        params: vec![ParamDef::new("x", TypeAnnotation::named(param_type))],
        variadic: None,
        return_type: None,
        body: FunctionDefBody::Block(vec![ret(result)]),
    })
}
