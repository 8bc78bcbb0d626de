//! Wires every component together and exposes `run()`.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::ast::Program;
use crate::concurrency::CancelToken;
use crate::config::{EngineConfig, MetricsMode};
use crate::error::{LexFlowError, LexFlowResult};
use crate::metrics::{Metrics, NoopMetrics, RecordingMetrics};
use crate::opcode::OpcodeRegistry;
use crate::runtime::{Runtime, Scope, ScopeRef};
use crate::task::TaskManager;
use crate::value::Value;
use crate::{executor, workflow_manager};

/// Everything the evaluator/executor/workflow-call machinery shares,
/// handed around as `&Arc<Ctx>` so `Fork`/`Spawn` can move an owned
/// clone into a `tokio::spawn`ed task.
pub struct Ctx {
    pub program: Program,
    pub runtime: Runtime,
    pub opcodes: OpcodeRegistry,
    pub tasks: TaskManager,
    pub metrics: Arc<dyn Metrics>,
    pub config: EngineConfig,
    pub globals: ScopeRef,
    pub output: Option<Arc<dyn Fn(Value) + Send + Sync>>,
}

pub type SharedCtx = Arc<Ctx>;

/// Builds and runs a [`Program`].
pub struct Engine {
    ctx: SharedCtx,
}

impl Engine {
    pub fn new(program: Program) -> Self {
        Self::with_config(program, EngineConfig::default())
    }

    pub fn with_config(program: Program, config: EngineConfig) -> Self {
        let metrics: Arc<dyn Metrics> = match config.metrics {
            MetricsMode::Noop => Arc::new(NoopMetrics),
            MetricsMode::Recording => Arc::new(RecordingMetrics::new()),
        };
        Self::with_parts(program, config, metrics, OpcodeRegistry::new(), None)
    }

    /// Full constructor: a pre-built opcode registry (so callers can
    /// register/inject opcodes before running) and an optional output
    /// sink opcodes/statements stream values to.
    pub fn with_parts(
        program: Program,
        config: EngineConfig,
        metrics: Arc<dyn Metrics>,
        opcodes: OpcodeRegistry,
        output: Option<Arc<dyn Fn(Value) + Send + Sync>>,
    ) -> Self {
        let globals = Scope::root();
        for (k, v) in &program.globals {
            Scope::bind(&globals, k, v.clone());
        }
        let ctx = Arc::new(Ctx {
            program,
            runtime: Runtime::new(),
            opcodes,
            tasks: TaskManager::new(),
            metrics,
            config,
            globals,
            output,
        });
        Self { ctx }
    }

    pub fn opcodes(&self) -> &OpcodeRegistry {
        &self.ctx.opcodes
    }

    #[cfg(test)]
    pub fn test_ctx(&self) -> &SharedCtx {
        &self.ctx
    }

    pub fn metrics(&self) -> &dyn Metrics {
        self.ctx.metrics.as_ref()
    }

    /// Runs `main` with `inputs` bound onto its declared parameters.
    /// Every key in `inputs` must name a `main` parameter.
    pub async fn run(&self, inputs: Option<IndexMap<String, Value>>) -> LexFlowResult<Value> {
        let inputs = inputs.unwrap_or_default();
        for key in inputs.keys() {
            if !self.ctx.program.main.params.contains(key) {
                return Err(LexFlowError::UnknownInput {
                    key: key.clone(),
                    accepted: self.ctx.program.main.params.clone(),
                });
            }
        }

        let mut bindings = self.ctx.program.main.locals.clone();
        for (k, v) in inputs {
            bindings.insert(k, v);
        }
        let scope = Scope::child_with(&self.ctx.globals, &bindings);
        let cancel = CancelToken::new();

        self.ctx.metrics.start_execution();
        let result = executor::exec_statement(&self.ctx, scope, &cancel, &self.ctx.program.main.body).await;
        self.ctx.metrics.end_execution();

        let signal = result?;
        Ok(workflow_manager::signal_return_value(signal))
    }

    /// Calls an external workflow directly (used by hosts embedding the
    /// engine without going through `run`'s `main`-only entrypoint).
    pub async fn call(&self, name: &str, args: Vec<Value>) -> LexFlowResult<Vec<Value>> {
        let cancel = CancelToken::new();
        workflow_manager::call(&self.ctx, &self.ctx.globals, &cancel, name, args).await
    }

    /// Cancels every outstanding spawned task and awaits their settlement.
    pub async fn shutdown(&self) {
        self.ctx.tasks.cleanup().await;
    }
}
