//! The abstract syntax tree: programs, workflows, statements, expressions.
//!
//! This is the output of the parser and the input to the executor. It
//! is a plain algebraic data type with no behavior of its own beyond
//! `serde` round-tripping (needed for the AST round-trip testable
//! property).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A complete program: globals, the `main` workflow, and its externals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub globals: IndexMap<String, Value>,
    pub main: Workflow,
    pub externals: IndexMap<String, Workflow>,
}

impl Program {
    /// Resolve a workflow-call target: `main` or a name in `externals`.
    pub fn resolve(&self, name: &str) -> Option<&Workflow> {
        if name == "main" {
            Some(&self.main)
        } else {
            self.externals.get(name)
        }
    }
}

/// A single named workflow: a parameter list and a block body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub params: Vec<String>,
    pub body: Statement,
    pub locals: IndexMap<String, Value>,
    #[serde(default)]
    pub description: Option<String>,
    /// Metadata for external wiring (HTTP routes, schedules, ...);
    /// ignored by the core.
    #[serde(default)]
    pub trigger: Option<serde_json::Value>,
}

/// Expressions evaluate to a [`Value`]; see [`crate::evaluator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expression {
    Literal(Value),
    Variable(String),
    Opcode { name: String, args: Vec<Expression> },
    Call { name: String, args: Vec<Expression> },
}

/// A catch handler within a `Try` statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchHandler {
    pub exception_kind: Option<String>,
    pub bind_var: Option<String>,
    pub body: Box<Statement>,
}

/// Statements drive control flow; see [`crate::executor`].
///
/// Every variant carries an optional source node id, used only for
/// metrics and error context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Statement {
    Assign {
        name: String,
        value: Expression,
        node_id: Option<String>,
    },
    Block {
        statements: Vec<Statement>,
        node_id: Option<String>,
    },
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
        node_id: Option<String>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
        node_id: Option<String>,
    },
    For {
        var: String,
        start: Expression,
        end: Expression,
        step: Option<Expression>,
        body: Box<Statement>,
        node_id: Option<String>,
    },
    ForEach {
        var: String,
        iterable: Expression,
        body: Box<Statement>,
        node_id: Option<String>,
    },
    AsyncForEach {
        var: String,
        iterable: Expression,
        body: Box<Statement>,
        node_id: Option<String>,
    },
    Fork {
        branches: Vec<Statement>,
        node_id: Option<String>,
    },
    Spawn {
        body: Box<Statement>,
        var: Option<String>,
        node_id: Option<String>,
    },
    Timeout {
        seconds: Expression,
        body: Box<Statement>,
        on_timeout: Option<Box<Statement>>,
        node_id: Option<String>,
    },
    With {
        resource: Expression,
        var: String,
        body: Box<Statement>,
        node_id: Option<String>,
    },
    Try {
        body: Box<Statement>,
        handlers: Vec<CatchHandler>,
        finally: Option<Box<Statement>>,
        node_id: Option<String>,
    },
    Throw {
        value: Expression,
        node_id: Option<String>,
    },
    Return {
        values: Vec<Expression>,
        node_id: Option<String>,
    },
    ExprStmt {
        expr: Expression,
        node_id: Option<String>,
    },
    OpStmt {
        name: String,
        args: Vec<Expression>,
        node_id: Option<String>,
    },
}

impl Statement {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Statement::Assign { node_id, .. }
            | Statement::Block { node_id, .. }
            | Statement::If { node_id, .. }
            | Statement::While { node_id, .. }
            | Statement::For { node_id, .. }
            | Statement::ForEach { node_id, .. }
            | Statement::AsyncForEach { node_id, .. }
            | Statement::Fork { node_id, .. }
            | Statement::Spawn { node_id, .. }
            | Statement::Timeout { node_id, .. }
            | Statement::With { node_id, .. }
            | Statement::Try { node_id, .. }
            | Statement::Throw { node_id, .. }
            | Statement::Return { node_id, .. }
            | Statement::ExprStmt { node_id, .. }
            | Statement::OpStmt { node_id, .. } => node_id.as_deref(),
        }
    }

    /// Name used as the metrics/tracing discriminant, e.g. `"If"`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Statement::Assign { .. } => "Assign",
            Statement::Block { .. } => "Block",
            Statement::If { .. } => "If",
            Statement::While { .. } => "While",
            Statement::For { .. } => "For",
            Statement::ForEach { .. } => "ForEach",
            Statement::AsyncForEach { .. } => "AsyncForEach",
            Statement::Fork { .. } => "Fork",
            Statement::Spawn { .. } => "Spawn",
            Statement::Timeout { .. } => "Timeout",
            Statement::With { .. } => "With",
            Statement::Try { .. } => "Try",
            Statement::Throw { .. } => "Throw",
            Statement::Return { .. } => "Return",
            Statement::ExprStmt { .. } => "ExprStmt",
            Statement::OpStmt { .. } => "OpStmt",
        }
    }
}

impl Expression {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expression::Literal(_) => "Literal",
            Expression::Variable(_) => "Variable",
            Expression::Opcode { .. } => "Opcode",
            Expression::Call { .. } => "Call",
        }
    }
}
