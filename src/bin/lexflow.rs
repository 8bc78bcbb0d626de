//! `lexflow`: load a node-graph workflow document and run it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use indexmap::IndexMap;
use tracing_subscriber::EnvFilter;

use lexflow::config::{EngineConfig, MetricsMode};
use lexflow::engine::Engine;
use lexflow::opcode::OpcodeRegistry;
use lexflow::parser::WorkflowParser;
use lexflow::Value;

#[derive(Parser, Debug)]
#[command(name = "lexflow", about = "Run a LexFlow workflow document")]
struct Args {
    /// Path to a JSON or YAML workflow document.
    document: PathBuf,

    /// Inputs bound onto `main`'s parameters, as `name=jsonvalue` pairs.
    #[arg(long = "input", value_name = "NAME=VALUE")]
    inputs: Vec<String>,

    /// Print an aggregate timing report after the run.
    #[arg(long)]
    metrics: bool,

    /// Emit a `tracing::debug` event per executed statement.
    #[arg(long)]
    trace: bool,
}

fn parse_input(raw: &str) -> anyhow::Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("--input must be NAME=VALUE, got {raw:?}"))?;
    let json: serde_json::Value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((name.to_string(), Value::from(json)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let source = std::fs::read_to_string(&args.document)?;
    let parser = WorkflowParser::new();
    let program = match args.document.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => parser.parse_yaml(&source)?,
        _ => parser.parse_json(&source)?,
    };

    let mut inputs = IndexMap::new();
    for raw in &args.inputs {
        let (name, value) = parse_input(raw)?;
        inputs.insert(name, value);
    }

    let sink: Arc<dyn Fn(Value) + Send + Sync> = Arc::new(|v: Value| println!("{v}"));

    let registry = OpcodeRegistry::new();
    lexflow::stdlib::register_builtins(&registry, Some(sink.clone()));

    let config = EngineConfig::default()
        .with_trace_statements(args.trace)
        .with_metrics(if args.metrics { MetricsMode::Recording } else { MetricsMode::Noop });

    let recording = if args.metrics {
        Some(Arc::new(lexflow::metrics::RecordingMetrics::new()))
    } else {
        None
    };
    let metrics: Arc<dyn lexflow::metrics::Metrics> = match &recording {
        Some(r) => r.clone(),
        None => Arc::new(lexflow::metrics::NoopMetrics),
    };

    let engine = Engine::with_parts(program, config, metrics, registry, Some(sink));

    let result = engine.run(Some(inputs)).await;
    engine.shutdown().await;

    match result {
        Ok(v) => {
            println!("=> {v}");
            if let Some(recording) = &recording {
                println!("{}", recording.text_report());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
