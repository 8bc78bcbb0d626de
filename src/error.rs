//! Error types for the LexFlow execution core

use thiserror::Error;

/// Result type for LexFlow operations
pub type LexFlowResult<T> = Result<T, LexFlowError>;

/// Comprehensive error type for the execution core.
///
/// Variant names double as the "kind" strings that `Try` handlers match
/// against (see [`LexFlowError::kind_name`]).
#[derive(Error, Debug, Clone)]
pub enum LexFlowError {
    /// Malformed argument value at an operation boundary
    #[error("ValueError: {0}")]
    ValueError(String),

    /// Wrong value kind at an operation boundary
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Missing mapping key
    #[error("KeyError: {0}")]
    KeyError(String),

    /// Out-of-range sequence access
    #[error("IndexError: {0}")]
    IndexError(String),

    /// Generic runtime failure; also raised by `Throw`
    #[error("RuntimeError: {0}")]
    RuntimeError(String),

    /// Raised by assert-style opcodes
    #[error("AssertionError: {0}")]
    AssertionError(String),

    /// Division or modulo by zero
    #[error("ZeroDivisionError: {0}")]
    ZeroDivisionError(String),

    /// Access to a missing attribute/field on a handle
    #[error("AttributeError: {0}")]
    AttributeError(String),

    /// A `Timeout` statement's deadline fired with no fallback
    #[error("Timeout")]
    Timeout,

    /// Cooperative cancellation raised at a suspension point
    #[error("Cancelled")]
    Cancelled,

    /// Parser could not lower a node-graph document
    #[error("parse error at node {node_id:?} field {field:?}: {message}")]
    ParseError {
        node_id: Option<String>,
        field: Option<String>,
        message: String,
    },

    /// Attempted pop/peek on an empty data stack
    #[error("data stack underflow at pc={pc}, depth={depth}")]
    StackUnderflow { pc: usize, depth: usize },

    /// Attempted pop past the bottom of the call-frame stack
    #[error("call stack underflow at depth={depth}")]
    CallStackUnderflow { depth: usize },

    /// `workflow_call`/`Call` referenced a name not in `externals` or `main`
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// An `Opcode` expression or `OpStmt` referenced an unregistered name
    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),

    /// Scope chain lookup/set failed to find a binding
    #[error("undefined variable: {0}")]
    ScopeLookup(String),

    /// Opcode argument arity mismatch
    #[error("{name} requires {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    /// `run()` was called with an input key not in `main.params`
    #[error("unknown input {key:?}; accepted inputs: {accepted:?}")]
    UnknownInput { key: String, accepted: Vec<String> },

    /// A privileged opcode was invoked before the host injected an implementation
    #[error("privileged opcode {0} has no injected implementation")]
    PrivilegedNotInjected(String),
}

impl LexFlowError {
    /// The user-observable kind name used by `Try` handler matching.
    pub fn kind_name(&self) -> &'static str {
        match self {
            LexFlowError::ValueError(_) => "ValueError",
            LexFlowError::TypeError(_) => "TypeError",
            LexFlowError::KeyError(_) => "KeyError",
            LexFlowError::IndexError(_) => "IndexError",
            LexFlowError::RuntimeError(_) => "RuntimeError",
            LexFlowError::AssertionError(_) => "AssertionError",
            LexFlowError::ZeroDivisionError(_) => "ZeroDivisionError",
            LexFlowError::AttributeError(_) => "AttributeError",
            LexFlowError::Timeout => "Timeout",
            LexFlowError::Cancelled => "Cancelled",
            LexFlowError::ParseError { .. } => "ParseError",
            LexFlowError::StackUnderflow { .. } => "StackUnderflow",
            LexFlowError::CallStackUnderflow { .. } => "CallStackUnderflow",
            LexFlowError::UnknownWorkflow(_) => "RuntimeError",
            LexFlowError::UnknownOpcode(_) => "RuntimeError",
            LexFlowError::ScopeLookup(_) => "RuntimeError",
            LexFlowError::Arity { .. } => "ValueError",
            LexFlowError::UnknownInput { .. } => "ValueError",
            LexFlowError::PrivilegedNotInjected(_) => "RuntimeError",
        }
    }

    /// The message a `Try` handler binds to its catch variable.
    pub fn message(&self) -> String {
        self.to_string()
    }
}
