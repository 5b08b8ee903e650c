//! Hooks for an external enhancement layer (retry / enforce / learn).
//!
//! A wrapper outside this crate can observe every dispatched call through
//! an [`Enhancer`]: it reads an [`AttemptRecord`] per attempt, may request
//! a replay with the same arguments, and may override the produced value
//! before it reaches the caller. The core runs unchanged with zero
//! enhancers installed.

use async_trait::async_trait;
use mockall::automock;

use crate::eval::value::Value;

/// Structured record of one call attempt, handed to every enhancer.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Failure reason of the *previous* attempt, if any.
    pub prior_failure: Option<String>,
    /// The resolved signature, e.g. `describe(x: int)`.
    pub signature: String,
    /// Raw result of this attempt; `None` when the attempt errored.
    pub result: Option<Value>,
    /// Error message of this attempt; `None` when it produced a value.
    pub error: Option<String>,
}

/// Decision returned by an enhancer after inspecting an attempt.
#[derive(Debug, Clone)]
pub enum Enhancement {
    /// Keep the attempt's outcome as-is.
    Accept,
    /// Replace the produced value before it reaches the caller.
    Override(Value),
    /// Replay the call with the same arguments.
    Retry { reason: String },
}

#[automock]
#[async_trait]
pub trait Enhancer: Send + Sync {
    async fn after_attempt(&self, record: &AttemptRecord) -> Enhancement;

    fn name(&self) -> &str;
}
