//! Engine configuration
//!
//! Built once at process start (from env in the binary) and passed by
//! reference into the components that need it. No module-level state.

/// Configuration for the resolution engine and its collaborators.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shared secret for alternate (non-interactive) callers such as
    /// the automation bridge. `None` disables that entry path.
    pub service_token: Option<String>,
    /// Base URL of the spreadsheet bridge. `None` disables mirroring.
    pub mirror_base_url: Option<String>,
    /// How many conversation turns are replayed as short-term memory.
    pub memory_window: usize,
    /// Mirror queue depth before events are dropped.
    pub mirror_queue_depth: usize,
    /// Delivery attempts per mirror event (first try + retries).
    pub mirror_max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_token: None,
            mirror_base_url: None,
            memory_window: 10,
            mirror_queue_depth: 256,
            mirror_max_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// Read configuration from the environment. Missing values fall
    /// back to defaults; nothing here is required for tests.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            service_token: std::env::var("SERVICE_TOKEN").ok().filter(|v| !v.is_empty()),
            mirror_base_url: std::env::var("MIRROR_BASE_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .map(|v| v.trim_end_matches('/').to_string()),
            memory_window: std::env::var("MEMORY_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.memory_window),
            mirror_queue_depth: defaults.mirror_queue_depth,
            mirror_max_attempts: defaults.mirror_max_attempts,
        }
    }
}
