//! Workflow-call machinery: resolves a name, binds a fresh call frame,
//! runs the callee's body, and captures its `Return`.

use indexmap::IndexMap;

use crate::concurrency::CancelToken;
use crate::engine::SharedCtx;
use crate::error::{LexFlowError, LexFlowResult};
use crate::executor::{exec_statement, Signal};
use crate::metrics::{Kind, Measure};
use crate::runtime::{Frame, Scope, ScopeRef};
use crate::value::Value;

/// Calls workflow `name` with positional `args`, returning every value
/// its `Return` statement carried (empty if it fell off the end
/// without returning). The new call frame's scope is parented on
/// `caller_scope`, so the callee can resolve names visible anywhere in
/// the caller's scope chain (not just `main`'s globals).
pub async fn call(
    ctx: &SharedCtx,
    caller_scope: &ScopeRef,
    cancel: &CancelToken,
    name: &str,
    args: Vec<Value>,
) -> LexFlowResult<Vec<Value>> {
    let workflow = ctx
        .program
        .resolve(name)
        .ok_or_else(|| LexFlowError::UnknownWorkflow(name.to_string()))?;

    let mut bindings: IndexMap<String, Value> = workflow.locals.clone();
    for (i, param) in workflow.params.iter().enumerate() {
        let value = args.get(i).cloned().unwrap_or(Value::Null);
        bindings.insert(param.clone(), value);
    }

    let call_scope = Scope::child_with(caller_scope, &bindings);
    ctx.runtime.push_frame(Frame {
        function_name: name.to_string(),
        caller_scope: caller_scope.clone(),
    });

    let _g = Measure::new(ctx.metrics.as_ref(), Kind::WorkflowCall, name.to_string());
    let body = workflow.body.clone();
    let result = exec_statement(ctx, call_scope, cancel, &body).await;
    ctx.runtime.pop_frame()?;

    Ok(signal_return_values(result?))
}

fn signal_return_values(signal: Signal) -> Vec<Value> {
    match signal {
        Signal::Return(values) => values,
        _ => Vec::new(),
    }
}

/// Collapses a top-level `Signal` (from `main`, say) to a single
/// result value: the first `Return` value, or `Null`.
pub fn signal_return_value(signal: Signal) -> Value {
    signal_return_values(signal).into_iter().next().unwrap_or(Value::Null)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // test assertions
mod tests {
    use super::*;
    use crate::ast::{Expression, Program, Statement, Workflow};
    use crate::config::EngineConfig;
    use crate::engine::Engine;

    fn program_calling_helper() -> Program {
        let helper = Workflow {
            name: "helper".into(),
            params: vec!["a".into(), "b".into()],
            body: Statement::Return {
                values: vec![Expression::Opcode {
                    name: "op_add".into(),
                    args: vec![Expression::Variable("a".into()), Expression::Variable("b".into())],
                }],
                node_id: None,
            },
            locals: IndexMap::new(),
            description: None,
            trigger: None,
        };
        let mut externals = IndexMap::new();
        externals.insert("helper".to_string(), helper);

        let main = Workflow {
            name: "main".into(),
            params: Vec::new(),
            body: Statement::Return {
                values: vec![Expression::Call {
                    name: "helper".into(),
                    args: vec![Expression::Literal(Value::Int(2)), Expression::Literal(Value::Int(3))],
                }],
                node_id: None,
            },
            locals: IndexMap::new(),
            description: None,
            trigger: None,
        };

        Program {
            globals: IndexMap::new(),
            main,
            externals,
        }
    }

    #[tokio::test]
    async fn call_resolves_externals_and_binds_params() {
        let engine = Engine::with_config(program_calling_helper(), EngineConfig::default());
        engine
            .opcodes()
            .register(
                "op_add",
                crate::opcode::Signature::new(vec![
                    crate::opcode::Param::required("a"),
                    crate::opcode::Param::required("b"),
                ]),
                None,
                |args: Vec<Value>| async move { Ok(Value::Int(args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0))) },
            );
        let v = engine.run(None).await.unwrap();
        assert_eq!(v, Value::Int(5));
    }

    #[tokio::test]
    async fn callee_resolves_names_from_the_callers_scope_chain() {
        let helper = Workflow {
            name: "helper".into(),
            params: Vec::new(),
            body: Statement::Return {
                values: vec![Expression::Variable("outer".into())],
                node_id: None,
            },
            locals: IndexMap::new(),
            description: None,
            trigger: None,
        };
        let mut externals = IndexMap::new();
        externals.insert("helper".to_string(), helper);
        let main = Workflow {
            name: "main".into(),
            params: Vec::new(),
            body: Statement::Block { statements: Vec::new(), node_id: None },
            locals: IndexMap::new(),
            description: None,
            trigger: None,
        };
        let program = Program { globals: IndexMap::new(), main, externals };

        let engine = Engine::with_config(program, EngineConfig::default());
        let cancel = CancelToken::new();
        let caller_scope = Scope::child(&engine.test_ctx().globals);
        Scope::bind(&caller_scope, "outer", Value::Int(99));

        let results = call(engine.test_ctx(), &caller_scope, &cancel, "helper", vec![])
            .await
            .unwrap();
        assert_eq!(results, vec![Value::Int(99)]);
    }

    #[tokio::test]
    async fn unknown_workflow_name_errors() {
        let engine = Engine::with_config(program_calling_helper(), EngineConfig::default());
        let cancel = CancelToken::new();
        let scope = Scope::root();
        let err = call(engine.test_ctx(), &scope, &cancel, "missing", vec![]).await.unwrap_err();
        assert!(matches!(err, LexFlowError::UnknownWorkflow(_)));
    }

    #[tokio::test]
    async fn frame_is_popped_even_on_error() {
        // `op_add` is left unregistered so the callee's body raises
        // mid-execution, after the call frame has already been pushed.
        let engine = Engine::with_config(program_calling_helper(), EngineConfig::default());
        let cancel = CancelToken::new();
        let before = engine.test_ctx().runtime.call_depth();
        let scope = Scope::root();
        let err = call(engine.test_ctx(), &scope, &cancel, "helper", vec![Value::Int(1), Value::Int(2)])
            .await
            .unwrap_err();
        assert!(matches!(err, LexFlowError::UnknownOpcode(_)));
        assert_eq!(engine.test_ctx().runtime.call_depth(), before);
    }
}
