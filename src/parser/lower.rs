//! Lowers node-graph documents into the AST: chain-following,
//! branch/reporter resolution, and cycle detection.

use indexmap::IndexMap;
use std::collections::HashSet;

use crate::ast::{CatchHandler, Expression, Program, Statement, Workflow};
use crate::error::{LexFlowError, LexFlowResult};
use crate::parser::doc::{Document, InputDoc, NodeDoc, WorkflowDoc};

const START_ID: &str = "start";
const START_OPCODE: &str = "workflow_start";

/// Lowers one or more decoded documents into a `Program`.
///
/// Exactly one document's workflow must be named `main`; every other
/// workflow across every document becomes an external. Duplicate
/// workflow names (including a second `main`) are a fatal error.
pub fn lower_documents(documents: Vec<Document>) -> LexFlowResult<Program> {
    let mut main: Option<Workflow> = None;
    let mut externals = IndexMap::new();

    for document in documents {
        for doc in document.workflows {
            let name = doc.name.clone();
            let workflow = lower_workflow(&doc)?;
            if name == "main" {
                if main.is_some() {
                    return Err(LexFlowError::ParseError {
                        node_id: None,
                        field: Some("name".into()),
                        message: "duplicate `main` workflow across documents".into(),
                    });
                }
                main = Some(workflow);
            } else {
                if externals.contains_key(&name) {
                    return Err(LexFlowError::ParseError {
                        node_id: None,
                        field: Some("name".into()),
                        message: format!("duplicate workflow name: {name}"),
                    });
                }
                externals.insert(name, workflow);
            }
        }
    }

    let main = main.ok_or_else(|| LexFlowError::ParseError {
        node_id: None,
        field: Some("name".into()),
        message: "no workflow named `main` was supplied".into(),
    })?;

    Ok(Program {
        globals: IndexMap::new(),
        main,
        externals,
    })
}

fn lower_workflow(doc: &WorkflowDoc) -> LexFlowResult<Workflow> {
    let start = doc.nodes.get(START_ID).ok_or_else(|| LexFlowError::ParseError {
        node_id: Some(START_ID.to_string()),
        field: None,
        message: format!("workflow {:?} has no `start` node", doc.name),
    })?;
    if start.opcode != START_OPCODE {
        return Err(LexFlowError::ParseError {
            node_id: Some(START_ID.to_string()),
            field: Some("opcode".into()),
            message: format!("`start` node must have opcode `{START_OPCODE}`"),
        });
    }

    let statements = lower_chain(doc, start.next.as_deref())?;
    Ok(Workflow {
        name: doc.name.clone(),
        params: doc.interface.inputs.clone(),
        body: Statement::Block {
            statements,
            node_id: None,
        },
        locals: doc.variables.clone(),
        description: doc.description.clone(),
        trigger: doc.trigger.clone(),
    })
}

fn get_node<'a>(doc: &'a WorkflowDoc, id: &str) -> LexFlowResult<&'a NodeDoc> {
    doc.nodes.get(id).ok_or_else(|| LexFlowError::ParseError {
        node_id: Some(id.to_string()),
        field: None,
        message: format!("node {id:?} referenced but not defined"),
    })
}

/// Follows `next` links from `start` (inclusive), lowering each node to
/// a statement, until a null `next`.
fn lower_chain(doc: &WorkflowDoc, start: Option<&str>) -> LexFlowResult<Vec<Statement>> {
    let mut statements = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = start;
    while let Some(id) = cursor {
        if !seen.insert(id.to_string()) {
            return Err(LexFlowError::ParseError {
                node_id: Some(id.to_string()),
                field: Some("next".into()),
                message: "cyclic `next` chain".into(),
            });
        }
        let node = get_node(doc, id)?;
        statements.push(lower_statement(doc, id, node)?);
        cursor = node.next.as_deref();
    }
    Ok(statements)
}

fn lower_branch(doc: &WorkflowDoc, node: &NodeDoc, key: &str, id: &str) -> LexFlowResult<Statement> {
    let target = branch_target(doc, node, key, id)?;
    let statements = lower_chain(doc, Some(target))?;
    Ok(Statement::Block {
        statements,
        node_id: None,
    })
}

fn branch_target<'a>(doc: &'a WorkflowDoc, node: &'a NodeDoc, key: &str, id: &str) -> LexFlowResult<&'a str> {
    match node.inputs.get(key) {
        Some(InputDoc::Branch(target)) => {
            // confirm it resolves to a chain ending in a null `next`.
            let mut cursor = target.as_str();
            let mut seen = HashSet::new();
            loop {
                if !seen.insert(cursor.to_string()) {
                    return Err(LexFlowError::ParseError {
                        node_id: Some(cursor.to_string()),
                        field: Some(key.to_string()),
                        message: "cyclic branch chain".into(),
                    });
                }
                let n = get_node(doc, cursor)?;
                match &n.next {
                    Some(next) => cursor = next.as_str(),
                    None => break,
                }
            }
            Ok(target.as_str())
        }
        Some(_) => Err(LexFlowError::ParseError {
            node_id: Some(id.to_string()),
            field: Some(key.to_string()),
            message: format!("input {key:?} must be a branch reference"),
        }),
        None => Err(LexFlowError::ParseError {
            node_id: Some(id.to_string()),
            field: Some(key.to_string()),
            message: format!("missing required input {key:?}"),
        }),
    }
}

fn opt_branch(doc: &WorkflowDoc, node: &NodeDoc, key: &str, id: &str) -> LexFlowResult<Option<Statement>> {
    if node.inputs.contains_key(key) {
        Ok(Some(lower_branch(doc, node, key, id)?))
    } else {
        Ok(None)
    }
}

fn literal_var_name(node: &NodeDoc, key: &str, id: &str) -> LexFlowResult<String> {
    node.inputs
        .get(key)
        .and_then(InputDoc::as_literal_str)
        .map(|s| s.to_string())
        .ok_or_else(|| LexFlowError::ParseError {
            node_id: Some(id.to_string()),
            field: Some(key.to_string()),
            message: format!("input {key:?} must be a literal variable name"),
        })
}

fn required_expr(doc: &WorkflowDoc, node: &NodeDoc, key: &str, id: &str) -> LexFlowResult<Expression> {
    let input = node.inputs.get(key).ok_or_else(|| LexFlowError::ParseError {
        node_id: Some(id.to_string()),
        field: Some(key.to_string()),
        message: format!("missing required input {key:?}"),
    })?;
    lower_expr(doc, input, &mut HashSet::new())
}

fn opt_expr(doc: &WorkflowDoc, node: &NodeDoc, key: &str) -> LexFlowResult<Option<Expression>> {
    match node.inputs.get(key) {
        Some(input) => Ok(Some(lower_expr(doc, input, &mut HashSet::new())?)),
        None => Ok(None),
    }
}

/// Collects `PREFIX1`, `PREFIX2`, ... inputs in numeric order.
fn numbered<'a>(node: &'a NodeDoc, prefix: &str) -> Vec<(u32, &'a InputDoc)> {
    let mut items: Vec<(u32, &InputDoc)> = node
        .inputs
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(prefix)
                .and_then(|suffix| suffix.parse::<u32>().ok())
                .map(|n| (n, v))
        })
        .collect();
    items.sort_by_key(|(n, _)| *n);
    items
}

fn lower_expr(doc: &WorkflowDoc, input: &InputDoc, visiting: &mut HashSet<String>) -> LexFlowResult<Expression> {
    match input {
        InputDoc::Literal(v) => Ok(Expression::Literal(v.clone())),
        InputDoc::Variable(name) => Ok(Expression::Variable(name.clone())),
        InputDoc::WorkflowCall(name) => Ok(Expression::Call {
            name: name.clone(),
            args: Vec::new(),
        }),
        InputDoc::Branch(_) => Err(LexFlowError::ParseError {
            node_id: None,
            field: None,
            message: "a branch reference is not valid in expression position".into(),
        }),
        InputDoc::Node(id) => lower_reporter(doc, id, visiting),
    }
}

/// Resolves a `{node: ID}` reporter reference, detecting cycles among
/// reporters reachable from the same expression tree.
fn lower_reporter(doc: &WorkflowDoc, id: &str, visiting: &mut HashSet<String>) -> LexFlowResult<Expression> {
    if !visiting.insert(id.to_string()) {
        return Err(LexFlowError::ParseError {
            node_id: Some(id.to_string()),
            field: None,
            message: "cyclic reporter reference".into(),
        });
    }
    let node = get_node(doc, id)?;

    if matches!(node.opcode.as_str(), "workflow_return" | "return") {
        return Err(LexFlowError::ParseError {
            node_id: Some(id.to_string()),
            field: Some("opcode".into()),
            message: "`workflow_return` is not supported in reporter position".into(),
        });
    }

    let expr = match node.opcode.as_str() {
        "data_get_variable" => {
            let name = node
                .inputs
                .get("VARIABLE")
                .and_then(InputDoc::as_literal_str)
                .ok_or_else(|| LexFlowError::ParseError {
                    node_id: Some(id.to_string()),
                    field: Some("VARIABLE".into()),
                    message: "`data_get_variable` requires a literal VARIABLE name".into(),
                })?;
            Expression::Variable(name.to_string())
        }
        "workflow_call" | "call" => {
            let name = node
                .inputs
                .get("WORKFLOW")
                .and_then(InputDoc::as_literal_str)
                .ok_or_else(|| LexFlowError::ParseError {
                    node_id: Some(id.to_string()),
                    field: Some("WORKFLOW".into()),
                    message: "`workflow_call` requires a literal WORKFLOW name".into(),
                })?
                .to_string();
            let mut args = Vec::new();
            for (_, input) in numbered(node, "ARG") {
                args.push(lower_expr(doc, input, visiting)?);
            }
            Expression::Call { name, args }
        }
        _ => {
            let mut args = Vec::new();
            for (_, input) in node.inputs.iter() {
                args.push(lower_expr(doc, input, visiting)?);
            }
            Expression::Opcode {
                name: node.opcode.clone(),
                args,
            }
        }
    };

    visiting.remove(id);
    Ok(expr)
}

fn lower_statement(doc: &WorkflowDoc, id: &str, node: &NodeDoc) -> LexFlowResult<Statement> {
    let node_id = Some(id.to_string());
    match node.opcode.as_str() {
        "data_set_variable_to" | "assign" => {
            let name = literal_var_name(node, "VARIABLE", id)?;
            let value = required_expr(doc, node, "VALUE", id)?;
            Ok(Statement::Assign { name, value, node_id })
        }
        "workflow_return" | "return" => {
            let mut values = Vec::new();
            let numbered_values = numbered(node, "VALUE");
            if numbered_values.is_empty() {
                if let Some(v) = opt_expr(doc, node, "VALUE")? {
                    values.push(v);
                }
            } else {
                for (_, input) in numbered_values {
                    values.push(lower_expr(doc, input, &mut HashSet::new())?);
                }
            }
            Ok(Statement::Return { values, node_id })
        }
        "workflow_call" | "call" => {
            let name = node
                .inputs
                .get("WORKFLOW")
                .and_then(InputDoc::as_literal_str)
                .ok_or_else(|| LexFlowError::ParseError {
                    node_id: node_id.clone(),
                    field: Some("WORKFLOW".into()),
                    message: "`workflow_call` requires a literal WORKFLOW name".into(),
                })?
                .to_string();
            let mut args = Vec::new();
            for (_, input) in numbered(node, "ARG") {
                args.push(lower_expr(doc, input, &mut HashSet::new())?);
            }
            Ok(Statement::ExprStmt {
                expr: Expression::Call { name, args },
                node_id,
            })
        }
        "control_if" | "control_if_else" => {
            let condition = required_expr(doc, node, "CONDITION", id)?;
            let then_branch = Box::new(lower_branch(doc, node, "THEN", id)?);
            let else_branch = opt_branch(doc, node, "ELSE", id)?.map(Box::new);
            Ok(Statement::If {
                condition,
                then_branch,
                else_branch,
                node_id,
            })
        }
        "control_while" => {
            let condition = required_expr(doc, node, "CONDITION", id)?;
            let body = Box::new(lower_branch(doc, node, "BODY", id)?);
            Ok(Statement::While { condition, body, node_id })
        }
        "control_for" => {
            let var = literal_var_name(node, "VAR", id)?;
            let start = required_expr(doc, node, "START", id)?;
            let end = required_expr(doc, node, "END", id)?;
            let step = opt_expr(doc, node, "STEP")?;
            let body = Box::new(lower_branch(doc, node, "BODY", id)?);
            Ok(Statement::For {
                var,
                start,
                end,
                step,
                body,
                node_id,
            })
        }
        "control_foreach" => {
            let var = literal_var_name(node, "VAR", id)?;
            let iterable = required_expr(doc, node, "ITERABLE", id)?;
            let body = Box::new(lower_branch(doc, node, "BODY", id)?);
            Ok(Statement::ForEach {
                var,
                iterable,
                body,
                node_id,
            })
        }
        "control_async_foreach" => {
            let var = literal_var_name(node, "VAR", id)?;
            let iterable = required_expr(doc, node, "ITERABLE", id)?;
            let body = Box::new(lower_branch(doc, node, "BODY", id)?);
            Ok(Statement::AsyncForEach {
                var,
                iterable,
                body,
                node_id,
            })
        }
        "control_fork" => {
            let mut branches = Vec::new();
            for (n, _) in numbered(node, "BRANCH") {
                let key = format!("BRANCH{n}");
                branches.push(lower_branch(doc, node, &key, id)?);
            }
            Ok(Statement::Fork { branches, node_id })
        }
        "control_try" => {
            let body = Box::new(lower_branch(doc, node, "TRY", id)?);
            let mut handlers = Vec::new();
            for (n, _) in numbered(node, "CATCH") {
                let key = format!("CATCH{n}");
                let handler_body = Box::new(lower_branch(doc, node, &key, id)?);
                let exception_kind = node
                    .inputs
                    .get(&format!("CATCH{n}_TYPE"))
                    .and_then(InputDoc::as_literal_str)
                    .map(|s| s.to_string());
                let bind_var = node
                    .inputs
                    .get(&format!("CATCH{n}_VAR"))
                    .and_then(InputDoc::as_literal_str)
                    .map(|s| s.to_string());
                handlers.push(CatchHandler {
                    exception_kind,
                    bind_var,
                    body: handler_body,
                });
            }
            let finally = opt_branch(doc, node, "FINALLY", id)?.map(Box::new);
            Ok(Statement::Try {
                body,
                handlers,
                finally,
                node_id,
            })
        }
        "control_throw" => {
            let value = required_expr(doc, node, "VALUE", id)?;
            Ok(Statement::Throw { value, node_id })
        }
        "control_spawn" => {
            let body = Box::new(lower_branch(doc, node, "BODY", id)?);
            let var = match node.inputs.get("VAR") {
                Some(input) => Some(
                    input
                        .as_literal_str()
                        .ok_or_else(|| LexFlowError::ParseError {
                            node_id: node_id.clone(),
                            field: Some("VAR".into()),
                            message: "`VAR` must be a literal name".into(),
                        })?
                        .to_string(),
                ),
                None => None,
            };
            Ok(Statement::Spawn { body, var, node_id })
        }
        "async_timeout" => {
            let seconds = required_expr(doc, node, "TIMEOUT", id)
                .or_else(|_| required_expr(doc, node, "SECONDS", id))?;
            let body = Box::new(lower_branch(doc, node, "BODY", id)?);
            let on_timeout = opt_branch(doc, node, "ON_TIMEOUT", id)?.map(Box::new);
            Ok(Statement::Timeout {
                seconds,
                body,
                on_timeout,
                node_id,
            })
        }
        "control_with" => {
            let resource = required_expr(doc, node, "RESOURCE", id)?;
            let var = literal_var_name(node, "VAR", id)?;
            let body = Box::new(lower_branch(doc, node, "BODY", id)?);
            Ok(Statement::With {
                resource,
                var,
                body,
                node_id,
            })
        }
        other => {
            let mut args = Vec::new();
            for (_, input) in node.inputs.iter() {
                args.push(lower_expr(doc, input, &mut HashSet::new())?);
            }
            Ok(Statement::OpStmt {
                name: other.to_string(),
                args,
                node_id,
            })
        }
    }
}
