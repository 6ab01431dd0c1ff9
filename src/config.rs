//! Bridge configuration.

/// Configuration for the managed worker pool.
///
/// Addon constructors run on the runtime's blocking pool; the runtime itself
/// drives no async tasks, so it is a current-thread runtime that is never
/// entered.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Upper bound on threads running addon constructors
    pub max_blocking_threads: usize,

    /// Name prefix for worker threads
    pub thread_name: String,
}

impl BridgeConfig {
    /// Create a configuration with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the constructor thread limit.
    pub fn with_max_blocking_threads(mut self, max: usize) -> Self {
        self.max_blocking_threads = max.max(1);
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Build the runtime described by this configuration.
    pub(crate) fn build_runtime(&self) -> std::io::Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_current_thread()
            .max_blocking_threads(self.max_blocking_threads)
            .thread_name(self.thread_name.clone())
            .build()
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_blocking_threads: 64,
            thread_name: "addon-bridge-worker".to_string(),
        }
    }
}
