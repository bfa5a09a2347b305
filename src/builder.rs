//! Fluent builder for event loop construction.

use std::io;

use crate::backend::{default_backend, Backend};
use crate::error::LoopError;
use crate::runtime::{EventLoop, Handle};

/// Builder for [`EventLoop`] instances.
///
/// Defaults: signals enabled, unlimited schedule depth, metrics exporter off.
pub struct LoopBuilder {
    enable_signals: bool,
    max_schedule_depth: usize,
    metrics: bool,
}

impl LoopBuilder {
    pub fn new() -> Self {
        Self {
            enable_signals: true,
            max_schedule_depth: 0,
            metrics: false,
        }
    }

    /// Enables or disables OS signal handling for this loop. With signals
    /// disabled, [`Handle::add_signal`] fails.
    pub fn signals(mut self, enabled: bool) -> Self {
        self.enable_signals = enabled;
        self
    }

    /// Per-tick scheduled-callback drain limit; `0` means unlimited.
    pub fn max_schedule_depth(mut self, depth: usize) -> Self {
        self.max_schedule_depth = depth;
        self
    }

    /// If `true`, installs a Prometheus metrics exporter on port 9000.
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    /// Builds on the first feasible backend for this environment.
    pub fn build(self) -> Result<EventLoop, LoopError> {
        let backend = default_backend()?;
        self.build_with(backend)
    }

    /// Builds on an explicitly chosen backend.
    pub fn build_with(self, backend: Box<dyn Backend>) -> Result<EventLoop, LoopError> {
        if self.metrics {
            let port = 9000;
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], port))
                .install()
                .map_err(io::Error::other)?;
            println!("[eddy] Metrics enabled at http://localhost:{port}/metrics");
        }

        let handle = Handle::new(backend.factory(), self.enable_signals, self.max_schedule_depth);
        Ok(EventLoop::from_parts(handle, backend))
    }
}

impl Default for LoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
