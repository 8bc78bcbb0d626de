//! Lowers node-graph workflow documents into the AST.
//!
//! A document is `{workflows: [...]}`; each workflow is walked from its
//! `start` node, following `next` links and resolving reporter/branch
//! references, into a [`crate::ast::Workflow`]. Parser errors are
//! structured and fatal — there is no fallback lowering path.

mod doc;
mod lower;

pub use doc::{Document, InputDoc, Interface, NodeDoc, WorkflowDoc};

use crate::ast::Program;
use crate::error::{LexFlowError, LexFlowResult};

/// Parses node-graph workflow documents into a [`Program`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkflowParser;

impl WorkflowParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a single JSON document.
    pub fn parse_json(&self, source: &str) -> LexFlowResult<Program> {
        let document: Document = serde_json::from_str(source)
            .map_err(|e| LexFlowError::ParseError {
                node_id: None,
                field: None,
                message: format!("invalid JSON document: {e}"),
            })?;
        self.parse_documents(vec![document])
    }

    /// Parse a single YAML document.
    pub fn parse_yaml(&self, source: &str) -> LexFlowResult<Program> {
        let document: Document = serde_yaml::from_str(source)
            .map_err(|e| LexFlowError::ParseError {
                node_id: None,
                field: None,
                message: format!("invalid YAML document: {e}"),
            })?;
        self.parse_documents(vec![document])
    }

    /// Parse and merge multiple documents: exactly one must contribute
    /// `main`; the rest become externals; duplicate workflow names are
    /// fatal.
    pub fn parse_documents(&self, documents: Vec<Document>) -> LexFlowResult<Program> {
        lower::lower_documents(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arithmetic_doc() -> &'static str {
        r#"{
          "workflows": [{
            "name": "main",
            "interface": {"inputs": []},
            "variables": {},
            "nodes": {
              "start": {"opcode": "workflow_start", "next": "ret"},
              "ret": {
                "opcode": "return",
                "inputs": {"VALUE": {"literal": 30}}
              }
            }
          }]
        }"#
    }

    #[test]
    fn parses_minimal_program() {
        let parser = WorkflowParser::new();
        let program = parser.parse_json(arithmetic_doc()).unwrap();
        assert_eq!(program.main.name, "main");
    }

    #[test]
    fn missing_start_node_is_a_parse_error() {
        let parser = WorkflowParser::new();
        let err = parser
            .parse_json(r#"{"workflows":[{"name":"main","nodes":{}}]}"#)
            .unwrap_err();
        assert!(matches!(err, LexFlowError::ParseError { .. }));
    }

    #[test]
    fn missing_main_is_a_parse_error() {
        let parser = WorkflowParser::new();
        let doc = r#"{"workflows":[{"name":"helper","nodes":{
            "start":{"opcode":"workflow_start","next":"ret"},
            "ret":{"opcode":"return","inputs":{"VALUE":{"literal":1}}}
        }}]}"#;
        let err = parser.parse_json(doc).unwrap_err();
        assert!(matches!(err, LexFlowError::ParseError { .. }));
    }

    #[test]
    fn duplicate_workflow_names_are_a_parse_error() {
        let parser = WorkflowParser::new();
        let helper = r#"{"name":"helper","nodes":{
            "start":{"opcode":"workflow_start","next":"ret"},
            "ret":{"opcode":"return","inputs":{"VALUE":{"literal":1}}}
        }}"#;
        let doc = format!(
            r#"{{"workflows":[{main}, {helper}, {helper}]}}"#,
            main = r#"{"name":"main","nodes":{
                "start":{"opcode":"workflow_start","next":"ret"},
                "ret":{"opcode":"return","inputs":{"VALUE":{"literal":1}}}
            }}"#,
            helper = helper
        );
        let err = parser.parse_json(&doc).unwrap_err();
        assert!(matches!(err, LexFlowError::ParseError { .. }));
    }
}
