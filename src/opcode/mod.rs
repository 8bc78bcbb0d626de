//! The opcode registry: the extension surface opcodes plug into.
//!
//! Rust has no runtime parameter-name reflection, so registrants supply
//! an explicit [`Signature`] at registration time instead of relying on
//! introspecting a function's parameter list.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{LexFlowError, LexFlowResult};
use crate::value::Value;

/// One parameter in a registered opcode's signature.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Value>,
}

impl Param {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            default: Some(default),
        }
    }
}

/// An opcode's declared parameter list, with an optional trailing
/// variadic tail.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub params: Vec<Param>,
    pub variadic: bool,
}

impl Signature {
    pub fn new(params: Vec<Param>) -> Self {
        Self { params, variadic: false }
    }

    pub fn variadic(params: Vec<Param>) -> Self {
        Self { params, variadic: true }
    }

    /// Binds positional `args` against this signature: if the signature
    /// is variadic, `args` passes through unchanged;
    /// otherwise each positional arg fills the next declared parameter,
    /// unfilled parameters with defaults receive their default, and an
    /// unfilled required parameter is an arity error.
    fn bind(&self, name: &str, args: Vec<Value>) -> LexFlowResult<Vec<Value>> {
        if self.variadic {
            return Ok(args);
        }
        let mut bound = Vec::with_capacity(self.params.len());
        let required = self.params.iter().filter(|p| p.default.is_none()).count();
        for (i, param) in self.params.iter().enumerate() {
            match args.get(i) {
                Some(v) => bound.push(v.clone()),
                None => match &param.default {
                    Some(default) => bound.push(default.clone()),
                    None => {
                        return Err(LexFlowError::Arity {
                            name: name.to_string(),
                            expected: required,
                            got: args.len(),
                        })
                    }
                },
            }
        }
        Ok(bound)
    }
}

/// An opcode implementation: an async function over bound arguments.
#[async_trait]
pub trait OpcodeFn: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> LexFlowResult<Value>;
}

#[async_trait]
impl<F, Fut> OpcodeFn for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = LexFlowResult<Value>> + Send,
{
    async fn call(&self, args: Vec<Value>) -> LexFlowResult<Value> {
        (self)(args).await
    }
}

/// Pure metadata external documentation tooling uses to group/display
/// opcodes; the core only stores and returns it.
#[derive(Debug)]
pub struct Category {
    pub id: String,
    pub label: String,
    pub name_prefix: String,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub display_order: i32,
    pub install_extra: Option<String>,
}

struct Registered {
    func: Arc<dyn OpcodeFn>,
    signature: Signature,
    category: Option<String>,
    privileged: bool,
}

/// Raised by a placeholder privileged opcode until the host injects a
/// real implementation.
fn privileged_placeholder(name: String) -> Arc<dyn OpcodeFn> {
    Arc::new(move |_args: Vec<Value>| {
        let name = name.clone();
        async move { Err(LexFlowError::PrivilegedNotInjected(name)) }
    })
}

/// Holds the name→function mapping plus reflected signatures, category
/// metadata, and privileged-opcode placeholders.
pub struct OpcodeRegistry {
    entries: DashMap<String, Registered>,
    categories: DashMap<String, Category>,
    overrides: DashMap<String, Arc<dyn OpcodeFn>>,
}

impl OpcodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            categories: DashMap::new(),
            overrides: DashMap::new(),
        }
    }

    /// Register an opcode function. `name` defaults to nothing here
    /// (Rust has no function-name introspection) — callers must always
    /// supply it explicitly, unlike the dynamic-language source.
    pub fn register(
        &self,
        name: impl Into<String>,
        signature: Signature,
        category: Option<String>,
        func: impl OpcodeFn + 'static,
    ) {
        let name = name.into();
        self.entries.insert(
            name,
            Registered {
                func: Arc::new(func),
                signature,
                category,
                privileged: false,
            },
        );
    }

    /// Register a placeholder that raises [`LexFlowError::PrivilegedNotInjected`]
    /// until `inject` supplies a real implementation.
    pub fn register_privileged(&self, name: impl Into<String>, signature: Signature) {
        let name = name.into();
        self.entries.insert(
            name.clone(),
            Registered {
                func: privileged_placeholder(name),
                signature,
                category: None,
                privileged: true,
            },
        );
    }

    /// Supply the real implementation for a privileged opcode, for the
    /// duration of this registry's engine run.
    pub fn inject(&self, name: impl Into<String>, func: impl OpcodeFn + 'static) {
        self.overrides.insert(name.into(), Arc::new(func));
    }

    pub fn register_category(&self, category: Category) {
        self.categories.insert(category.id.clone(), category);
    }

    pub fn category(&self, id: &str) -> Option<Category> {
        self.categories.get(id).map(|c| c.clone())
    }

    pub fn is_privileged(&self, name: &str) -> bool {
        self.entries.get(name).map(|e| e.privileged).unwrap_or(false)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Invoke `name` with positional `args`, preferring an injected
    /// override if one exists.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> LexFlowResult<Value> {
        if let Some(over) = self.overrides.get(name) {
            let over = over.clone();
            return over.call(args).await;
        }
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| LexFlowError::UnknownOpcode(name.to_string()))?;
        let bound = entry.signature.bind(name, args)?;
        let func = entry.func.clone();
        drop(entry);
        func.call(bound).await
    }
}

impl Default for OpcodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Category {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            label: self.label.clone(),
            name_prefix: self.name_prefix.clone(),
            color: self.color.clone(),
            icon: self.icon.clone(),
            display_order: self.display_order,
            install_extra: self.install_extra.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // test assertions
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_defaults_for_unfilled_params() {
        let registry = OpcodeRegistry::new();
        registry.register(
            "greet",
            Signature::new(vec![Param::with_default("who", Value::String("world".into()))]),
            None,
            |args: Vec<Value>| async move {
                Ok(Value::String(format!("hello {}", args[0].as_str().unwrap_or(""))))
            },
        );
        let v = registry.call("greet", vec![]).await.unwrap();
        assert_eq!(v.as_str(), Some("hello world"));
    }

    #[tokio::test]
    async fn missing_required_param_is_an_arity_error() {
        let registry = OpcodeRegistry::new();
        registry.register(
            "need_two",
            Signature::new(vec![Param::required("a"), Param::required("b")]),
            None,
            |_args: Vec<Value>| async move { Ok(Value::Null) },
        );
        let err = registry.call("need_two", vec![Value::Int(1)]).await.unwrap_err();
        assert!(matches!(err, LexFlowError::Arity { expected: 2, got: 1, .. }));
    }

    #[tokio::test]
    async fn variadic_signature_passes_all_args() {
        let registry = OpcodeRegistry::new();
        registry.register(
            "sum_all",
            Signature::variadic(vec![]),
            None,
            |args: Vec<Value>| async move {
                Ok(Value::Int(args.iter().filter_map(|v| v.as_int()).sum()))
            },
        );
        let v = registry
            .call("sum_all", vec![Value::Int(1), Value::Int(2), Value::Int(3)])
            .await
            .unwrap();
        assert_eq!(v.as_int(), Some(6));
    }

    #[tokio::test]
    async fn privileged_opcode_raises_until_injected() {
        let registry = OpcodeRegistry::new();
        registry.register_privileged("introspect_context", Signature::default());
        assert!(registry.call("introspect_context", vec![]).await.is_err());
        registry.inject("introspect_context", |_: Vec<Value>| async move {
            Ok(Value::String("ok".into()))
        });
        let v = registry.call("introspect_context", vec![]).await.unwrap();
        assert_eq!(v.as_str(), Some("ok"));
    }

    #[tokio::test]
    async fn unknown_opcode_is_an_error() {
        let registry = OpcodeRegistry::new();
        assert!(registry.call("nope", vec![]).await.is_err());
    }
}
