//! The data stack, call-frame stack, and lexically scoped variable
//! environment.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{LexFlowError, LexFlowResult};
use crate::value::Value;

/// A lexical scope: a name→value mapping with a parent pointer.
///
/// Scopes are heap-allocated and reference-shared (`Arc<Mutex<_>>`)
/// rather than stack-embedded, because `Spawn` bodies must observe the
/// creator's scope by reference and run as independently scheduled
/// `tokio` tasks.
pub type ScopeRef = Arc<Mutex<ScopeInner>>;

#[derive(Debug, Default)]
pub struct ScopeInner {
    bindings: IndexMap<String, Value>,
    parent: Option<ScopeRef>,
}

/// Convenience constructors/operations over a [`ScopeRef`].
pub struct Scope;

impl Scope {
    pub fn root() -> ScopeRef {
        Arc::new(Mutex::new(ScopeInner {
            bindings: IndexMap::new(),
            parent: None,
        }))
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Arc::new(Mutex::new(ScopeInner {
            bindings: IndexMap::new(),
            parent: Some(parent.clone()),
        }))
    }

    /// `lookup(name)`: the value bound in the nearest scope that binds it.
    pub fn lookup(scope: &ScopeRef, name: &str) -> LexFlowResult<Value> {
        let inner = scope.lock();
        if let Some(v) = inner.bindings.get(name) {
            return Ok(v.clone());
        }
        match &inner.parent {
            Some(parent) => {
                let parent = parent.clone();
                drop(inner);
                Scope::lookup(&parent, name)
            }
            None => Err(LexFlowError::ScopeLookup(name.to_string())),
        }
    }

    /// `set(name, value)`: update the nearest scope that already binds
    /// `name`; error if none does.
    pub fn set(scope: &ScopeRef, name: &str, value: Value) -> LexFlowResult<()> {
        {
            let mut inner = scope.lock();
            if inner.bindings.contains_key(name) {
                inner.bindings.insert(name.to_string(), value);
                return Ok(());
            }
        }
        let parent = scope.lock().parent.clone();
        match parent {
            Some(parent) => Scope::set(&parent, name, value),
            None => Err(LexFlowError::ScopeLookup(name.to_string())),
        }
    }

    /// `bind(name, value)`: create or overwrite `name` in the current
    /// scope (no parent search).
    pub fn bind(scope: &ScopeRef, name: &str, value: Value) {
        scope.lock().bindings.insert(name.to_string(), value);
    }

    /// Seed a fresh child scope with a map of defaults, used when
    /// opening a workflow call's frame.
    pub fn child_with(parent: &ScopeRef, defaults: &IndexMap<String, Value>) -> ScopeRef {
        let child = Scope::child(parent);
        {
            let mut inner = child.lock();
            for (k, v) in defaults {
                inner.bindings.insert(k.clone(), v.clone());
            }
        }
        child
    }
}

/// A record pushed on workflow call: the caller's scope and the
/// function name (used for error context / metrics, not truly for
/// control transfer since the executor is structurally recursive).
#[derive(Clone)]
pub struct Frame {
    pub function_name: String,
    pub caller_scope: ScopeRef,
}

/// Owns the data stack (LIFO return-value plumbing), the call-frame
/// stack, and a vestigial program counter.
pub struct Runtime {
    data_stack: Mutex<Vec<Value>>,
    call_stack: Mutex<Vec<Frame>>,
    pc: Mutex<usize>,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            data_stack: Mutex::new(Vec::new()),
            call_stack: Mutex::new(Vec::new()),
            pc: Mutex::new(0),
        }
    }

    pub fn push_value(&self, v: Value) {
        self.data_stack.lock().push(v);
    }

    pub fn pop_value(&self) -> LexFlowResult<Value> {
        self.data_stack.lock().pop().ok_or_else(|| LexFlowError::StackUnderflow {
            pc: *self.pc.lock(),
            depth: self.call_depth(),
        })
    }

    /// Pop the top `k` values, in push order (oldest first).
    pub fn pop_n(&self, k: usize) -> LexFlowResult<Vec<Value>> {
        let mut stack = self.data_stack.lock();
        if stack.len() < k {
            return Err(LexFlowError::StackUnderflow {
                pc: *self.pc.lock(),
                depth: self.call_depth(),
            });
        }
        let at = stack.len() - k;
        Ok(stack.split_off(at))
    }

    pub fn push_frame(&self, frame: Frame) {
        self.call_stack.lock().push(frame);
    }

    pub fn pop_frame(&self) -> LexFlowResult<Frame> {
        self.call_stack
            .lock()
            .pop()
            .ok_or(LexFlowError::CallStackUnderflow { depth: 0 })
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.lock().len()
    }

    pub fn advance_pc(&self) -> usize {
        let mut pc = self.pc.lock();
        *pc += 1;
        *pc
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_searches_parent_chain() {
        let root = Scope::root();
        Scope::bind(&root, "x", Value::Int(1));
        let child = Scope::child(&root);
        assert_eq!(Scope::lookup(&child, "x").unwrap(), Value::Int(1));
    }

    #[test]
    fn bind_shadows_in_current_scope_only() {
        let root = Scope::root();
        Scope::bind(&root, "x", Value::Int(1));
        let child = Scope::child(&root);
        Scope::bind(&child, "x", Value::Int(2));
        assert_eq!(Scope::lookup(&child, "x").unwrap(), Value::Int(2));
        assert_eq!(Scope::lookup(&root, "x").unwrap(), Value::Int(1));
    }

    #[test]
    fn set_updates_nearest_existing_binding() {
        let root = Scope::root();
        Scope::bind(&root, "x", Value::Int(1));
        let child = Scope::child(&root);
        Scope::set(&child, "x", Value::Int(9)).unwrap();
        assert_eq!(Scope::lookup(&root, "x").unwrap(), Value::Int(9));
    }

    #[test]
    fn set_on_undeclared_name_errors() {
        let root = Scope::root();
        assert!(Scope::set(&root, "missing", Value::Null).is_err());
    }

    #[test]
    fn stack_underflow_is_reported() {
        let rt = Runtime::new();
        assert!(rt.pop_value().is_err());
    }
}
