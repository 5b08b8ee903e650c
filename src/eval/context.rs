//! The mutable runtime state for one script run: four named scopes, the
//! struct type registry, and the function registry. Created once per run
//! and passed as `Arc<ExecutionContext>` through evaluation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::builtins;
use super::dispatch::FunctionRegistry;
use super::generator::{PromptGenerator, StandardPromptGenerator};
use super::value::{StructRegistry, Value};
use crate::ast::Scope;
use crate::config::ContextConfig;
use crate::enhance::Enhancer;
use crate::provider::ReasonProvider;

/// RwLock wrapper that turns lock starvation into an error instead of an
/// unbounded wait.
pub struct SafeRwLock<T> {
    inner: RwLock<T>,
}

impl<T> SafeRwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    pub async fn read_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<RwLockReadGuard<'_, T>, LockError> {
        tokio::time::timeout(timeout, self.inner.read())
            .await
            .map_err(|_| LockError::Timeout)
    }

    pub async fn write_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<RwLockWriteGuard<'_, T>, LockError> {
        tokio::time::timeout(timeout, self.inner.write())
            .await
            .map_err(|_| LockError::Timeout)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock timeout")]
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("name '{name}' not found in scope '{scope}'")]
    NameNotFound { scope: Scope, name: String },
    #[error("lock timeout while accessing '{0}'")]
    LockTimeout(String),
}

pub type ScopeMap = DashMap<String, Arc<SafeRwLock<Value>>>;

/// Metadata for one script run, fixed at context creation.
#[derive(Clone, Debug)]
pub struct RunInfo {
    pub run_id: String,
    pub script_name: String,
    pub started_at: DateTime<Utc>,
}

impl RunInfo {
    pub fn new(script_name: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            script_name: script_name.into(),
            started_at: Utc::now(),
        }
    }
}

impl Default for RunInfo {
    fn default() -> Self {
        Self::new("<anonymous>")
    }
}

/// Context state shared across call frames and parallel forks.
#[derive(Clone)]
pub struct SharedContext {
    private: Arc<ScopeMap>,
    public: Arc<ScopeMap>,
    system: Arc<ScopeMap>,
    pub structs: Arc<StructRegistry>,
    pub functions: Arc<FunctionRegistry>,
    pub provider: Arc<dyn ReasonProvider>,
    pub prompt_generator: Arc<dyn PromptGenerator>,
    pub enhancers: Arc<Vec<Arc<dyn Enhancer>>>,
    pub run_info: RunInfo,
}

/// The execution context: four scope partitions plus the registries.
///
/// `local` belongs to the current call frame; `private`, `public`, and
/// `system` are shared across frames. Scope slots are individually locked,
/// so concurrent parallel-stage writes serialize per slot.
#[derive(Clone)]
pub struct ExecutionContext {
    pub shared: SharedContext,
    locals: Arc<ScopeMap>,
    pub timeout: Duration,
    pub reason_timeout: Duration,
    pub max_call_attempts: u32,
}

impl ExecutionContext {
    pub fn new(
        config: &ContextConfig,
        provider: Arc<dyn ReasonProvider>,
        enhancers: Vec<Arc<dyn Enhancer>>,
        run_info: RunInfo,
    ) -> Self {
        let functions = Arc::new(FunctionRegistry::new());
        builtins::register(&functions);
        Self {
            shared: SharedContext {
                private: Arc::new(DashMap::new()),
                public: Arc::new(DashMap::new()),
                system: Arc::new(DashMap::new()),
                structs: Arc::new(StructRegistry::new()),
                functions,
                provider,
                prompt_generator: Arc::new(StandardPromptGenerator),
                enhancers: Arc::new(enhancers),
                run_info,
            },
            locals: Arc::new(DashMap::new()),
            timeout: config.access_timeout,
            reason_timeout: config.reason_timeout,
            max_call_attempts: config.max_call_attempts,
        }
    }

    fn scope_map(&self, scope: Scope) -> &ScopeMap {
        match scope {
            Scope::Local => &self.locals,
            Scope::Private => &self.shared.private,
            Scope::Public => &self.shared.public,
            Scope::System => &self.shared.system,
        }
    }

    /// Read `scope:name`. A miss is always an error; a qualified read never
    /// falls back to another scope.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn get(&self, scope: Scope, name: &str) -> Result<Value, ContextError> {
        let slot = self
            .scope_map(scope)
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ContextError::NameNotFound {
                scope,
                name: name.to_string(),
            })?;
        let guard = slot
            .read_with_timeout(self.timeout)
            .await
            .map_err(|_| ContextError::LockTimeout(name.to_string()))?;
        Ok(guard.clone())
    }

    /// Create-or-overwrite `scope:name`. The caller evaluates the value
    /// fully before this runs, so a self-referential assignment reads the
    /// pre-assignment value.
    #[tracing::instrument(skip(self, value), level = "debug")]
    pub async fn set(&self, scope: Scope, name: &str, value: Value) -> Result<(), ContextError> {
        self.scope_map(scope)
            .insert(name.to_string(), Arc::new(SafeRwLock::new(value)));
        Ok(())
    }

    pub fn contains(&self, scope: Scope, name: &str) -> bool {
        self.scope_map(scope).contains_key(name)
    }

    /// New frame for a function call: fresh `local` scope, everything else
    /// shared.
    pub fn fork_for_call(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            locals: Arc::new(DashMap::new()),
            timeout: self.timeout,
            reason_timeout: self.reason_timeout,
            max_call_attempts: self.max_call_attempts,
        }
    }

    /// Fork for a parallel stage: shares every scope including `local`.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Frame that sees the current locals plus extra bindings that shadow
    /// them. Writes in the overlay frame stay in the overlay.
    pub fn fork_with_bindings<I>(&self, bindings: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let locals: ScopeMap = DashMap::new();
        for entry in self.locals.iter() {
            locals.insert(entry.key().clone(), entry.value().clone());
        }
        for (name, value) in bindings {
            locals.insert(name, Arc::new(SafeRwLock::new(value)));
        }
        Self {
            shared: self.shared.clone(),
            locals: Arc::new(locals),
            timeout: self.timeout,
            reason_timeout: self.reason_timeout,
            max_call_attempts: self.max_call_attempts,
        }
    }

    pub fn generate_trace_id(&self) -> String {
        format!(
            "trace-{}-{}",
            self.shared.run_info.script_name, self.shared.run_info.run_id
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::provider::StaticProvider;

    pub(crate) fn test_context() -> ExecutionContext {
        ExecutionContext::new(
            &ContextConfig::default(),
            Arc::new(StaticProvider::new("ok")),
            vec![],
            RunInfo::default(),
        )
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let context = test_context();
        for scope in [Scope::Local, Scope::Private, Scope::Public, Scope::System] {
            context.set(scope, "x", Value::Integer(42)).await.unwrap();
            assert_eq!(context.get(scope, "x").await.unwrap(), Value::Integer(42));
        }
    }

    #[tokio::test]
    async fn test_qualified_read_never_falls_back() {
        let context = test_context();
        context
            .set(Scope::Local, "x", Value::Integer(1))
            .await
            .unwrap();

        let err = context.get(Scope::Private, "x").await.unwrap_err();
        assert!(matches!(
            err,
            ContextError::NameNotFound {
                scope: Scope::Private,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let context = test_context();
        context
            .set(Scope::Public, "n", Value::Integer(1))
            .await
            .unwrap();
        context
            .set(Scope::Public, "n", Value::Integer(2))
            .await
            .unwrap();
        assert_eq!(
            context.get(Scope::Public, "n").await.unwrap(),
            Value::Integer(2)
        );
    }

    #[tokio::test]
    async fn test_fork_for_call_isolates_locals() {
        let context = test_context();
        context
            .set(Scope::Local, "x", Value::Integer(1))
            .await
            .unwrap();
        context
            .set(Scope::Public, "shared", Value::Integer(2))
            .await
            .unwrap();

        let frame = context.fork_for_call();
        assert!(frame.get(Scope::Local, "x").await.is_err());
        assert_eq!(
            frame.get(Scope::Public, "shared").await.unwrap(),
            Value::Integer(2)
        );

        frame
            .set(Scope::Local, "y", Value::Integer(3))
            .await
            .unwrap();
        assert!(context.get(Scope::Local, "y").await.is_err());
    }

    #[tokio::test]
    async fn test_fork_with_bindings_shadows_without_leaking() {
        let context = test_context();
        context
            .set(Scope::Local, "x", Value::Integer(1))
            .await
            .unwrap();
        context
            .set(Scope::Local, "y", Value::Integer(2))
            .await
            .unwrap();

        let overlay =
            context.fork_with_bindings(vec![("x".to_string(), Value::Integer(10))]);
        assert_eq!(
            overlay.get(Scope::Local, "x").await.unwrap(),
            Value::Integer(10)
        );
        assert_eq!(
            overlay.get(Scope::Local, "y").await.unwrap(),
            Value::Integer(2)
        );

        // The shadowing binding stays in the overlay frame.
        assert_eq!(
            context.get(Scope::Local, "x").await.unwrap(),
            Value::Integer(1)
        );
    }

    #[tokio::test]
    async fn test_concurrent_scope_access() {
        let context = Arc::new(test_context());
        let mut handles = vec![];
        for i in 0..10 {
            let context = context.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("key_{}", i);
                context
                    .set(Scope::Public, &name, Value::Integer(i))
                    .await
                    .unwrap();
                let value = context.get(Scope::Public, &name).await.unwrap();
                assert_eq!(value, Value::Integer(i));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_struct_alias_across_scopes() {
        use crate::ast::{FieldDef, StructDef};
        use crate::eval::value::StructInstance;
        use std::collections::HashMap;

        let context = test_context();
        let ty = context
            .shared
            .structs
            .register(StructDef {
                name: "Counter".to_string(),
                fields: vec![FieldDef::new("count", "int")],
            })
            .unwrap();

        let mut values = HashMap::new();
        values.insert("count".to_string(), Value::Integer(0));
        let instance = StructInstance::construct(ty, values).unwrap();

        context
            .set(Scope::Local, "a", Value::Struct(instance.clone()))
            .await
            .unwrap();
        context
            .set(Scope::Public, "b", Value::Struct(instance))
            .await
            .unwrap();

        // Mutate through one alias, observe through the other.
        if let Value::Struct(a) = context.get(Scope::Local, "a").await.unwrap() {
            a.set_field("count", Value::Integer(7)).unwrap();
        }
        match context.get(Scope::Public, "b").await.unwrap() {
            Value::Struct(b) => assert_eq!(b.get_field("count").unwrap(), Value::Integer(7)),
            other => panic!("expected struct, got {:?}", other),
        }
    }
}
