//! # Vela
//!
//! Vela is the execution core of a dynamically typed, agent-oriented
//! scripting language. It evaluates an already-parsed program against an
//! execution context with four variable scopes (`local`, `private`,
//! `public`, `system`), dispatches calls over polymorphic function
//! families, runs declarative function-composition pipelines with
//! sequential and parallel stages, and bridges `reason()` expressions to a
//! pluggable reasoning provider.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vela::ast::{Expression, Literal, Program, Statement};
//! use vela::config::RuntimeConfig;
//! use vela::provider::StaticProvider;
//! use vela::runtime::Runtime;
//!
//! # async fn run() -> vela::Result<()> {
//! let runtime = Runtime::new(
//!     RuntimeConfig::default(),
//!     Arc::new(StaticProvider::new("42")),
//! );
//! let program = Program::new(vec![Statement::Expression(Expression::Literal(
//!     Literal::Integer(42),
//! ))]);
//! let value = runtime.run("quickstart", &program).await?;
//! assert_eq!(value, vela::eval::Value::Integer(42));
//! # Ok(())
//! # }
//! ```
//!
//! Parsing, editor tooling, and concrete LLM backends live outside this
//! crate; programs arrive as [`ast::Program`] values and providers
//! implement [`provider::ReasonProvider`].

pub mod ast;
pub mod config;
pub mod enhance;
pub mod error;
pub mod eval;
pub mod provider;
pub mod runtime;

pub use error::{Error, Result};

/// Initialize tracing for binaries and examples. Tests install their own
/// subscriber.
pub fn init_telemetry() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
