//! Engine configuration.

/// Which [`crate::metrics::Metrics`] implementation an `Engine` wires up
/// when the caller does not supply their own collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsMode {
    Noop,
    Recording,
}

impl Default for MetricsMode {
    fn default() -> Self {
        MetricsMode::Noop
    }
}

/// Tunables that don't belong on any single component.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity new `Channel` handles get when an opcode doesn't specify one.
    pub default_channel_capacity: usize,
    pub metrics: MetricsMode,
    /// Emit a `tracing::debug` event per executed statement.
    pub trace_statements: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_channel_capacity: 16,
            metrics: MetricsMode::Noop,
            trace_statements: false,
        }
    }
}

impl EngineConfig {
    pub fn with_default_channel_capacity(mut self, capacity: usize) -> Self {
        self.default_channel_capacity = capacity;
        self
    }

    pub fn with_metrics(mut self, mode: MetricsMode) -> Self {
        self.metrics = mode;
        self
    }

    pub fn with_trace_statements(mut self, trace: bool) -> Self {
        self.trace_statements = trace;
        self
    }
}
