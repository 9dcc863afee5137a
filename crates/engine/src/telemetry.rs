// Tracing initialisation
//
// The harness logs through `tracing`; binaries and tests call `init_telemetry`
// once to install a console subscriber filtered by RUST_LOG / LOG_LEVEL.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Configuration for log output
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Log filter (e.g., "info", "debug", "loadswarm_engine=debug")
    pub log_filter: Option<String>,
    /// Include the emitting thread name in each line
    pub with_thread_names: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "loadswarm".to_string(),
            enable_console: true,
            log_filter: None,
            with_thread_names: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `LOADSWARM_SERVICE_NAME`: Service name (default: "loadswarm")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("LOADSWARM_SERVICE_NAME")
                .unwrap_or_else(|_| "loadswarm".to_string()),
            enable_console: true,
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            with_thread_names: false,
        }
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    pub fn with_thread_names(mut self, enabled: bool) -> Self {
        self.with_thread_names = enabled;
        self
    }
}

/// Install the global tracing subscriber
///
/// Returns `false` when a subscriber was already installed (for example by a
/// previous test), in which case the existing one is kept.
pub fn init_telemetry(config: TelemetryConfig) -> bool {
    let filter = config
        .log_filter
        .as_ref()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let console_layer = if config.enable_console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_names(config.with_thread_names)
                .with_filter(filter),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = %config.service_name, "Telemetry initialised");
    }
    installed
}
