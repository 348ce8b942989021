//! Leveled logging capability injected into the acquisition pipeline.

use tracing::{debug, error, info, warn};

/// The set of log levels the pipeline emits through.
///
/// Components receive an `Arc<dyn Logger>`; there is no global logger.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn debug(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    fn success(&self, message: &str);
}

/// Forwards to `tracing` under the `maya` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger {
    verbose: bool,
}

impl TracingLogger {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        info!(target: "maya", "{message}");
    }

    fn debug(&self, message: &str) {
        if self.verbose {
            debug!(target: "maya", "{message}");
        }
    }

    fn warn(&self, message: &str) {
        warn!(target: "maya", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "maya", "{message}");
    }

    fn success(&self, message: &str) {
        info!(target: "maya", outcome = "success", "{message}");
    }
}
