//! Expression evaluation.
//!
//! Recursive and `async` (opcodes and workflow calls may suspend), so
//! `eval_expr` returns a boxed future rather than being declared
//! `async fn` directly — Rust cannot size a directly-recursive async
//! function's state machine.

use futures::future::BoxFuture;

use crate::ast::Expression;
use crate::concurrency::CancelToken;
use crate::engine::SharedCtx;
use crate::error::{LexFlowError, LexFlowResult};
use crate::metrics::{Kind, Measure};
use crate::runtime::{Scope, ScopeRef};
use crate::value::Value;
use crate::workflow_manager;

fn check_cancelled(cancel: &CancelToken) -> LexFlowResult<()> {
    if cancel.is_cancelled() {
        Err(LexFlowError::Cancelled)
    } else {
        Ok(())
    }
}

/// Evaluates `expr` against `scope`, dispatching opcode calls through
/// the registry and workflow calls through the call machinery.
pub fn eval_expr<'a>(
    ctx: &'a SharedCtx,
    scope: &'a ScopeRef,
    cancel: &'a CancelToken,
    expr: &'a Expression,
) -> BoxFuture<'a, LexFlowResult<Value>> {
    Box::pin(async move {
        check_cancelled(cancel)?;
        match expr {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::Variable(name) => Scope::lookup(scope, name),
            Expression::Opcode { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval_expr(ctx, scope, cancel, arg).await?);
                }
                let _g = Measure::new(ctx.metrics.as_ref(), Kind::Opcode, name.clone());
                ctx.opcodes.call(name, values).await
            }
            Expression::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval_expr(ctx, scope, cancel, arg).await?);
                }
                let results = workflow_manager::call(ctx, scope, cancel, name, values).await?;
                Ok(results.into_iter().next().unwrap_or(Value::Null))
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // test assertions
mod tests {
    use super::*;
    use crate::ast::{Program, Workflow, Statement};
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use indexmap::IndexMap;

    fn empty_program() -> Program {
        Program {
            globals: IndexMap::new(),
            main: Workflow {
                name: "main".into(),
                params: Vec::new(),
                body: Statement::Block { statements: Vec::new(), node_id: None },
                locals: IndexMap::new(),
                description: None,
                trigger: None,
            },
            externals: IndexMap::new(),
        }
    }

    #[tokio::test]
    async fn literal_evaluates_to_itself() {
        let engine = Engine::with_config(empty_program(), EngineConfig::default());
        let ctx = engine_ctx_for_test(&engine);
        let scope = Scope::root();
        let cancel = CancelToken::new();
        let v = eval_expr(ctx, &scope, &cancel, &Expression::Literal(Value::Int(7))).await.unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[tokio::test]
    async fn variable_lookup_reads_bound_scope() {
        let engine = Engine::with_config(empty_program(), EngineConfig::default());
        let ctx = engine_ctx_for_test(&engine);
        let scope = Scope::root();
        Scope::bind(&scope, "x", Value::Int(5));
        let cancel = CancelToken::new();
        let v = eval_expr(ctx, &scope, &cancel, &Expression::Variable("x".into())).await.unwrap();
        assert_eq!(v, Value::Int(5));
    }

    #[tokio::test]
    async fn unbound_variable_is_an_error() {
        let engine = Engine::with_config(empty_program(), EngineConfig::default());
        let ctx = engine_ctx_for_test(&engine);
        let scope = Scope::root();
        let cancel = CancelToken::new();
        let err = eval_expr(ctx, &scope, &cancel, &Expression::Variable("missing".into())).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_evaluation() {
        let engine = Engine::with_config(empty_program(), EngineConfig::default());
        let ctx = engine_ctx_for_test(&engine);
        let scope = Scope::root();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = eval_expr(ctx, &scope, &cancel, &Expression::Literal(Value::Null)).await;
        assert!(matches!(err, Err(LexFlowError::Cancelled)));
    }

    // Test-only accessor: Engine keeps its Ctx private, but evaluator
    // tests need one to exercise `eval_expr` directly.
    fn engine_ctx_for_test(engine: &Engine) -> &crate::engine::SharedCtx {
        engine.test_ctx()
    }
}
