//! Serde-decodable shapes for the node-graph workflow document format.
//!
//! A document is `{workflows: [...]}`, each workflow has an
//! `interface.inputs` list,
//! `variables` defaults, and a `nodes` map keyed by id. This module has
//! no behavior — it exists purely so `serde_json`/`serde_yaml` can
//! decode a document into something the lowering pass (`lower.rs`) can
//! walk.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Top-level decoded document: `{workflows: [WorkflowDoc, ...]}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Document {
    pub workflows: Vec<WorkflowDoc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowDoc {
    pub name: String,
    #[serde(default)]
    pub interface: Interface,
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
    pub nodes: IndexMap<String, NodeDoc>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Interface {
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Advisory only; the core does not validate outputs.
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeDoc {
    pub opcode: String,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub inputs: IndexMap<String, InputDoc>,
    #[serde(default, rename = "isReporter")]
    pub is_reporter: bool,
}

/// One of the five input forms a node's `inputs` map can take.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputDoc {
    Literal(Value),
    Variable(String),
    Node(String),
    Branch(String),
    WorkflowCall(String),
}

impl InputDoc {
    /// Extracts a literal string, the form required for `VAR`/`VARIABLE`
    /// name inputs — those must be a literal name, not a wired value.
    pub fn as_literal_str(&self) -> Option<&str> {
        match self {
            InputDoc::Literal(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}
