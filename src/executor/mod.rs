//! Statement execution and control flow.
//!
//! Like the evaluator, `exec_statement` is directly recursive through
//! `async` code and so returns a boxed future rather than being an
//! `async fn` itself.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::Instrument;

use crate::ast::{CatchHandler, Statement};
use crate::concurrency::CancelToken;
use crate::engine::SharedCtx;
use crate::error::{LexFlowError, LexFlowResult};
use crate::evaluator::eval_expr;
use crate::metrics::{Kind, Measure};
use crate::runtime::{Frame, Scope, ScopeRef};
use crate::value::Value;

/// What a statement hands back to its enclosing block.
#[derive(Debug, Clone)]
pub enum Signal {
    Next,
    Break,
    Continue,
    Return(Vec<Value>),
}

fn check_cancelled(cancel: &CancelToken) -> LexFlowResult<()> {
    if cancel.is_cancelled() {
        Err(LexFlowError::Cancelled)
    } else {
        Ok(())
    }
}

/// Converts a raised [`LexFlowError`] into the value a catch handler's
/// bind variable receives: its kind and message, mirroring how `Throw`
/// accepts either a bare value or a `{kind, message}` map.
fn error_to_value(e: &LexFlowError) -> Value {
    let mut m = indexmap::IndexMap::new();
    m.insert("kind".to_string(), Value::String(e.kind_name().to_string()));
    m.insert("message".to_string(), Value::String(e.message()));
    Value::Map(m)
}

/// The inverse of [`error_to_value`], used by `Throw`: a `{kind,
/// message}` map raises that exact kind; anything else raises a
/// `RuntimeError` carrying its display form.
fn value_to_error(v: Value) -> LexFlowError {
    if let Value::Map(m) = &v {
        if let (Some(Value::String(kind)), Some(Value::String(message))) = (m.get("kind"), m.get("message")) {
            return match kind.as_str() {
                "ValueError" => LexFlowError::ValueError(message.clone()),
                "TypeError" => LexFlowError::TypeError(message.clone()),
                "KeyError" => LexFlowError::KeyError(message.clone()),
                "IndexError" => LexFlowError::IndexError(message.clone()),
                "AssertionError" => LexFlowError::AssertionError(message.clone()),
                "ZeroDivisionError" => LexFlowError::ZeroDivisionError(message.clone()),
                "AttributeError" => LexFlowError::AttributeError(message.clone()),
                _ => LexFlowError::RuntimeError(message.clone()),
            };
        }
    }
    LexFlowError::RuntimeError(v.to_string())
}

fn handler_matches(handler: &CatchHandler, e: &LexFlowError) -> bool {
    match &handler.exception_kind {
        None => true,
        Some(kind) => kind == e.kind_name(),
    }
}

fn step_value(v: &Value) -> f64 {
    v.as_int().map(|i| i as f64).unwrap_or(1.0)
}

/// Executes `stmt` against `scope`, returning the [`Signal`] it hands
/// to its caller (or the first error raised).
pub fn exec_statement<'a>(
    ctx: &'a SharedCtx,
    scope: ScopeRef,
    cancel: &'a CancelToken,
    stmt: &'a Statement,
) -> BoxFuture<'a, LexFlowResult<Signal>> {
    let span = tracing::debug_span!("statement", kind = stmt.kind_name(), node_id = stmt.node_id());
    Box::pin(
        async move {
            check_cancelled(cancel)?;
            if ctx.config.trace_statements {
                tracing::debug!(kind = stmt.kind_name(), node_id = stmt.node_id(), "executing");
            }
            let _g = stmt
                .node_id()
                .map(|id| Measure::new(ctx.metrics.as_ref(), Kind::Node, id.to_string()));
            let _g2 = Measure::new(ctx.metrics.as_ref(), Kind::Statement, stmt.kind_name());

            match stmt {
                Statement::Assign { name, value, .. } => {
                    let v = eval_expr(ctx, &scope, cancel, value).await?;
                    Scope::bind(&scope, name, v);
                    Ok(Signal::Next)
                }

                Statement::Block { statements, .. } => {
                    for s in statements {
                        match exec_statement(ctx, scope.clone(), cancel, s).await? {
                            Signal::Next => {}
                            other => return Ok(other),
                        }
                    }
                    Ok(Signal::Next)
                }

                Statement::If {
                    condition,
                    then_branch,
                    else_branch,
                    ..
                } => {
                    let cond = eval_expr(ctx, &scope, cancel, condition).await?;
                    if cond.truthy() {
                        exec_statement(ctx, scope, cancel, then_branch).await
                    } else if let Some(else_branch) = else_branch {
                        exec_statement(ctx, scope, cancel, else_branch).await
                    } else {
                        Ok(Signal::Next)
                    }
                }

                Statement::While { condition, body, .. } => {
                    loop {
                        check_cancelled(cancel)?;
                        let cond = eval_expr(ctx, &scope, cancel, condition).await?;
                        if !cond.truthy() {
                            return Ok(Signal::Next);
                        }
                        match exec_statement(ctx, scope.clone(), cancel, body).await? {
                            Signal::Next | Signal::Continue => {}
                            Signal::Break => return Ok(Signal::Next),
                            ret @ Signal::Return(_) => return Ok(ret),
                        }
                    }
                }

                Statement::For {
                    var,
                    start,
                    end,
                    step,
                    body,
                    ..
                } => {
                    let start_v = eval_expr(ctx, &scope, cancel, start).await?.as_int().ok_or_else(|| {
                        LexFlowError::TypeError("`control_for` START must be numeric".into())
                    })?;
                    let end_v = eval_expr(ctx, &scope, cancel, end).await?.as_int().ok_or_else(|| {
                        LexFlowError::TypeError("`control_for` END must be numeric".into())
                    })?;
                    let step_v = match step {
                        Some(e) => step_value(&eval_expr(ctx, &scope, cancel, e).await?) as i64,
                        None => 1,
                    };
                    if step_v == 0 {
                        return Err(LexFlowError::ValueError("`control_for` STEP must not be zero".into()));
                    }
                    let mut i = start_v;
                    loop {
                        check_cancelled(cancel)?;
                        if (step_v > 0 && i > end_v) || (step_v < 0 && i < end_v) {
                            return Ok(Signal::Next);
                        }
                        Scope::bind(&scope, var, Value::Int(i));
                        match exec_statement(ctx, scope.clone(), cancel, body).await? {
                            Signal::Next | Signal::Continue => {}
                            Signal::Break => return Ok(Signal::Next),
                            ret @ Signal::Return(_) => return Ok(ret),
                        }
                        i += step_v;
                    }
                }

                Statement::ForEach { var, iterable, body, .. } => {
                    let items = eval_expr(ctx, &scope, cancel, iterable).await?;
                    for item in items.iter_items() {
                        check_cancelled(cancel)?;
                        Scope::bind(&scope, var, item);
                        match exec_statement(ctx, scope.clone(), cancel, body).await? {
                            Signal::Next | Signal::Continue => {}
                            Signal::Break => return Ok(Signal::Next),
                            ret @ Signal::Return(_) => return Ok(ret),
                        }
                    }
                    Ok(Signal::Next)
                }

                Statement::AsyncForEach { var, iterable, body, .. } => {
                    let items: Vec<Value> = eval_expr(ctx, &scope, cancel, iterable).await?.iter_items().collect();
                    let mut handles = Vec::with_capacity(items.len());
                    for item in items {
                        let iter_scope = Scope::child(&scope);
                        Scope::bind(&iter_scope, var, item);
                        let ctx = ctx.clone();
                        let cancel = cancel.child_token();
                        let body = body.clone();
                        let cancel_for_task = cancel.clone();
                        let ctx_for_task = ctx.clone();
                        handles.push(ctx.tasks.spawn(&cancel, async move {
                            match exec_statement(&ctx_for_task, iter_scope, &cancel_for_task, &body).await? {
                                Signal::Return(mut values) => Ok(values.pop().unwrap_or(Value::Null)),
                                _ => Ok(Value::Null),
                            }
                        }));
                    }
                    for handle in handles {
                        handle.wait(None).await?;
                    }
                    Ok(Signal::Next)
                }

                Statement::Fork { branches, .. } => {
                    let mut children = Vec::with_capacity(branches.len());
                    let mut returns = Vec::with_capacity(branches.len());
                    for branch in branches {
                        let ctx = ctx.clone();
                        let branch_cancel = cancel.child_token();
                        let branch = branch.clone();
                        let scope = scope.clone();
                        let slot: Arc<Mutex<Option<Vec<Value>>>> = Arc::new(Mutex::new(None));
                        let slot_in_task = slot.clone();
                        let branch_cancel_for_task = branch_cancel.clone();
                        let ctx_for_task = ctx.clone();
                        children.push(ctx.tasks.spawn(&branch_cancel, async move {
                            if let Signal::Return(values) = exec_statement(&ctx_for_task, scope, &branch_cancel_for_task, &branch).await? {
                                *slot_in_task.lock() = Some(values);
                            }
                            Ok(Value::Null)
                        }));
                        returns.push(slot);
                    }
                    let mut first_error = None;
                    for child in &children {
                        if let Err(e) = child.wait(None).await {
                            if first_error.is_none() {
                                first_error = Some(e);
                                for other in &children {
                                    other.cancel();
                                }
                            }
                        }
                    }
                    match first_error {
                        Some(e) => Err(e),
                        // A branch's Return takes precedence over Next, propagated
                        // in branch declaration order to match the first one found.
                        None => match returns.into_iter().find_map(|slot| slot.lock().take()) {
                            Some(values) => Ok(Signal::Return(values)),
                            None => Ok(Signal::Next),
                        },
                    }
                }

                Statement::Spawn { body, var, .. } => {
                    let child_cancel = cancel.child_token();
                    let ctx_clone = ctx.clone();
                    let spawn_scope = scope.clone();
                    let body_clone = body.clone();
                    let child_cancel_inner = child_cancel.clone();
                    let handle = ctx.tasks.spawn(&child_cancel, async move {
                        match exec_statement(&ctx_clone, spawn_scope, &child_cancel_inner, &body_clone).await? {
                            Signal::Return(mut values) => Ok(values.pop().unwrap_or(Value::Null)),
                            _ => Ok(Value::Null),
                        }
                    });
                    if let Some(var) = var {
                        Scope::bind(&scope, var, Value::Handle(crate::value::Handle::Task(handle)));
                    }
                    Ok(Signal::Next)
                }

                Statement::Timeout {
                    seconds,
                    body,
                    on_timeout,
                    ..
                } => {
                    let secs = eval_expr(ctx, &scope, cancel, seconds)
                        .await?
                        .as_f64()
                        .ok_or_else(|| LexFlowError::TypeError("`async_timeout` requires a numeric deadline".into()))?;
                    let fut = exec_statement(ctx, scope.clone(), cancel, body);
                    match tokio::time::timeout(std::time::Duration::from_secs_f64(secs.max(0.0)), fut).await {
                        Ok(result) => result,
                        Err(_) => match on_timeout {
                            Some(fallback) => exec_statement(ctx, scope, cancel, fallback).await,
                            None => Err(LexFlowError::Timeout),
                        },
                    }
                }

                Statement::With {
                    resource,
                    var,
                    body,
                    ..
                } => {
                    let res = eval_expr(ctx, &scope, cancel, resource).await?;
                    let with_scope = Scope::child(&scope);
                    Scope::bind(&with_scope, var, res.clone());
                    let result = exec_statement(ctx, with_scope, cancel, body).await;
                    // Best-effort release: a registered `resource_release`
                    // opcode is called if present; its absence is not an error.
                    let _ = ctx.opcodes.call("resource_release", vec![res]).await;
                    result
                }

                Statement::Try {
                    body,
                    handlers,
                    finally,
                    ..
                } => {
                    let body_result = exec_statement(ctx, scope.clone(), cancel, body).await;
                    let outcome = match body_result {
                        Ok(signal) => Ok(signal),
                        Err(e) => {
                            let mut handled = None;
                            for handler in handlers {
                                if handler_matches(handler, &e) {
                                    let handler_scope = Scope::child(&scope);
                                    if let Some(bind_var) = &handler.bind_var {
                                        Scope::bind(&handler_scope, bind_var, error_to_value(&e));
                                    }
                                    handled = Some(exec_statement(ctx, handler_scope, cancel, &handler.body).await);
                                    break;
                                }
                            }
                            handled.unwrap_or(Err(e))
                        }
                    };
                    match finally {
                        // A finally signal other than Next overrides whatever
                        // the body/handler produced, including a pending Return.
                        Some(finally_body) => match exec_statement(ctx, scope, cancel, finally_body).await {
                            Ok(Signal::Next) => outcome,
                            Ok(other) => Ok(other),
                            Err(finally_err) => Err(finally_err),
                        },
                        None => outcome,
                    }
                }

                Statement::Throw { value, .. } => {
                    let v = eval_expr(ctx, &scope, cancel, value).await?;
                    Err(value_to_error(v))
                }

                Statement::Return { values, .. } => {
                    let mut out = Vec::with_capacity(values.len());
                    for v in values {
                        out.push(eval_expr(ctx, &scope, cancel, v).await?);
                    }
                    Ok(Signal::Return(out))
                }

                Statement::ExprStmt { expr, .. } => {
                    eval_expr(ctx, &scope, cancel, expr).await?;
                    Ok(Signal::Next)
                }

                Statement::OpStmt { name, args, .. } => {
                    let mut values = Vec::with_capacity(args.len());
                    for a in args {
                        values.push(eval_expr(ctx, &scope, cancel, a).await?);
                    }
                    let _g = Measure::new(ctx.metrics.as_ref(), Kind::Opcode, name.clone());
                    // OpStmt's result is discarded; an opcode that wants to
                    // produce output (e.g. `io_print`) must emit it itself.
                    ctx.opcodes.call(name, values).await?;
                    Ok(Signal::Next)
                }
            }
        }
        .instrument(span),
    )
}

/// Pushes and guarantees the pop of a workflow-call frame around `f`.
pub fn push_frame(ctx: &SharedCtx, frame: Frame) {
    ctx.runtime.push_frame(frame);
}

pub fn pop_frame(ctx: &SharedCtx) -> LexFlowResult<Frame> {
    ctx.runtime.pop_frame()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // test assertions
mod tests {
    use super::*;
    use crate::ast::{Expression, Program, Workflow};
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use indexmap::IndexMap;

    fn program_with_body(body: Statement) -> Program {
        Program {
            globals: IndexMap::new(),
            main: Workflow {
                name: "main".into(),
                params: Vec::new(),
                body,
                locals: IndexMap::new(),
                description: None,
                trigger: None,
            },
            externals: IndexMap::new(),
        }
    }

    #[tokio::test]
    async fn if_executes_the_taken_branch() {
        let body = Statement::If {
            condition: Expression::Literal(Value::Bool(true)),
            then_branch: Box::new(Statement::Return {
                values: vec![Expression::Literal(Value::Int(1))],
                node_id: None,
            }),
            else_branch: Some(Box::new(Statement::Return {
                values: vec![Expression::Literal(Value::Int(2))],
                node_id: None,
            })),
            node_id: None,
        };
        let engine = Engine::with_config(program_with_body(body), EngineConfig::default());
        let v = engine.run(None).await.unwrap();
        assert_eq!(v, Value::Int(1));
    }

    #[tokio::test]
    async fn while_loop_breaks_on_condition() {
        let body = Statement::Block {
            statements: vec![
                Statement::Assign {
                    name: "n".into(),
                    value: Expression::Literal(Value::Int(0)),
                    node_id: None,
                },
                Statement::While {
                    condition: Expression::Opcode {
                        name: "compare_lt".into(),
                        args: vec![Expression::Variable("n".into()), Expression::Literal(Value::Int(3))],
                    },
                    body: Box::new(Statement::Assign {
                        name: "n".into(),
                        value: Expression::Opcode {
                            name: "op_add".into(),
                            args: vec![Expression::Variable("n".into()), Expression::Literal(Value::Int(1))],
                        },
                        node_id: None,
                    }),
                    node_id: None,
                },
                Statement::Return {
                    values: vec![Expression::Variable("n".into())],
                    node_id: None,
                },
            ],
            node_id: None,
        };
        let engine = Engine::with_config(program_with_body(body), EngineConfig::default());
        engine
            .opcodes()
            .register("op_add", crate::opcode::Signature::new(vec![
                crate::opcode::Param::required("a"),
                crate::opcode::Param::required("b"),
            ]), None, |args: Vec<Value>| async move {
                Ok(Value::Int(args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0)))
            });
        engine
            .opcodes()
            .register("compare_lt", crate::opcode::Signature::new(vec![
                crate::opcode::Param::required("a"),
                crate::opcode::Param::required("b"),
            ]), None, |args: Vec<Value>| async move {
                Ok(Value::Bool(args[0].as_int().unwrap_or(0) < args[1].as_int().unwrap_or(0)))
            });
        let v = engine.run(None).await.unwrap();
        assert_eq!(v, Value::Int(3));
    }

    #[tokio::test]
    async fn try_runs_finally_even_when_body_throws() {
        let body = Statement::Block {
            statements: vec![
                Statement::Assign {
                    name: "ran_finally".into(),
                    value: Expression::Literal(Value::Bool(false)),
                    node_id: None,
                },
                Statement::Try {
                    body: Box::new(Statement::Throw {
                        value: Expression::Literal(Value::String("boom".into())),
                        node_id: None,
                    }),
                    handlers: vec![CatchHandler {
                        exception_kind: None,
                        bind_var: Some("e".into()),
                        body: Box::new(Statement::Block { statements: vec![], node_id: None }),
                    }],
                    finally: Some(Box::new(Statement::Assign {
                        name: "ran_finally".into(),
                        value: Expression::Literal(Value::Bool(true)),
                        node_id: None,
                    })),
                    node_id: None,
                },
                Statement::Return {
                    values: vec![Expression::Variable("ran_finally".into())],
                    node_id: None,
                },
            ],
            node_id: None,
        };
        let engine = Engine::with_config(program_with_body(body), EngineConfig::default());
        let v = engine.run(None).await.unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[tokio::test]
    async fn finally_return_overrides_a_pending_return_from_the_body() {
        let body = Statement::Try {
            body: Box::new(Statement::Return {
                values: vec![Expression::Literal(Value::Int(1))],
                node_id: None,
            }),
            handlers: vec![],
            finally: Some(Box::new(Statement::Return {
                values: vec![Expression::Literal(Value::Int(2))],
                node_id: None,
            })),
            node_id: None,
        };
        let engine = Engine::with_config(program_with_body(body), EngineConfig::default());
        let v = engine.run(None).await.unwrap();
        assert_eq!(v, Value::Int(2));
    }

    #[tokio::test]
    async fn fork_propagates_a_branch_return() {
        let body = Statement::Fork {
            branches: vec![
                Statement::ExprStmt {
                    expr: Expression::Literal(Value::Null),
                    node_id: None,
                },
                Statement::Return {
                    values: vec![Expression::Literal(Value::Int(7))],
                    node_id: None,
                },
            ],
            node_id: None,
        };
        let engine = Engine::with_config(program_with_body(body), EngineConfig::default());
        let v = engine.run(None).await.unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[tokio::test]
    async fn for_loop_accumulates_into_the_enclosing_scope() {
        let body = Statement::Block {
            statements: vec![
                Statement::Assign {
                    name: "total".into(),
                    value: Expression::Literal(Value::Int(0)),
                    node_id: None,
                },
                Statement::For {
                    var: "i".into(),
                    start: Expression::Literal(Value::Int(1)),
                    end: Expression::Literal(Value::Int(3)),
                    step: None,
                    body: Box::new(Statement::Assign {
                        name: "total".into(),
                        value: Expression::Opcode {
                            name: "op_add".into(),
                            args: vec![Expression::Variable("total".into()), Expression::Variable("i".into())],
                        },
                        node_id: None,
                    }),
                    node_id: None,
                },
                Statement::Return {
                    values: vec![Expression::Variable("total".into())],
                    node_id: None,
                },
            ],
            node_id: None,
        };
        let engine = Engine::with_config(program_with_body(body), EngineConfig::default());
        engine.opcodes().register(
            "op_add",
            crate::opcode::Signature::new(vec![crate::opcode::Param::required("a"), crate::opcode::Param::required("b")]),
            None,
            |args: Vec<Value>| async move { Ok(Value::Int(args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0))) },
        );
        let v = engine.run(None).await.unwrap();
        assert_eq!(v, Value::Int(6));
    }

    #[tokio::test]
    async fn spawn_binds_a_task_handle() {
        let body = Statement::Block {
            statements: vec![
                Statement::Spawn {
                    body: Box::new(Statement::Return {
                        values: vec![Expression::Literal(Value::Int(9))],
                        node_id: None,
                    }),
                    var: Some("h".into()),
                    node_id: None,
                },
                Statement::Return {
                    values: vec![Expression::Variable("h".into())],
                    node_id: None,
                },
            ],
            node_id: None,
        };
        let engine = Engine::with_config(program_with_body(body), EngineConfig::default());
        let v = engine.run(None).await.unwrap();
        let task = v.as_task().expect("spawn binds a task handle");
        let result = task.wait(None).await.unwrap();
        assert_eq!(result, Value::Int(9));
    }
}
