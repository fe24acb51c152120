//! Logging infrastructure - structured tracing for lowering and simulation
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels per module
//! - Zero-cost when disabled
//! - Span-based performance tracking
//! - Console output, optionally JSON, plus a daily rotated log file

use crate::alloc::{AllocationKind, FallbackCall};
use crate::snippet::{DeoptAction, DeoptReason, Snippet};
use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
    /// Enable performance tracking
    pub track_performance: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: cfg!(debug_assertions),
        }
    }
}

fn parse_level(value: &str) -> Level {
    match value.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // TLABGEN_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level) = std::env::var("TLABGEN_LOG_LEVEL") {
            config.level = parse_level(&level);
        }

        if let Ok(path) = std::env::var("TLABGEN_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("TLABGEN_LOG_JSON").is_ok();
        config.show_spans = std::env::var("TLABGEN_LOG_SPANS").is_ok();

        if let Ok(val) = std::env::var("TLABGEN_LOG_PERF") {
            config.track_performance = val == "1" || val.to_lowercase() == "true";
        }

        config
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: false,
        }
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("tlabgen.log".to_string()),
            json_format: false,
            show_spans: true,
            track_performance: true,
        }
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber. If the process already has a
/// global subscriber, that one is kept.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("tlabgen={}", config.level.as_str().to_lowercase())));

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let json_layer = config.json_format.then(|| {
            fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
                .with_target(true)
        });
        let console_layer = (!config.json_format).then(|| {
            fmt::layer()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions))
        });
        let file_layer = config
            .log_path
            .as_deref()
            .filter(|_| config.file_output)
            .map(|path| {
                let path = Path::new(path);
                let directory = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
                let prefix = path.file_name().map_or_else(|| "tlabgen.log".into(), |name| name.to_os_string());
                fmt::layer()
                    .with_writer(tracing_appender::rolling::daily(directory, prefix))
                    .with_ansi(false)
                    .with_span_events(span_events)
            });

        // another subscriber may already be installed, e.g. by a test harness
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .with(console_layer)
            .with(file_layer)
            .try_init();
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Lowering and simulation events
// ============================================================================

/// Log a finished lowering
pub fn log_lowering(kind: AllocationKind, snippet: &Snippet) {
    use tracing::debug;
    debug!(
        event = "lowering",
        kind = %kind,
        snippet = snippet.name(),
        instructions = snippet.len(),
        fallbacks = ?snippet.calls(),
        "allocation lowered"
    );
}

/// Log a call into the out-of-line allocator
#[inline]
pub fn log_fallback_call(call: &FallbackCall, result: Option<u64>) {
    use tracing::trace;
    match result {
        Some(object) => trace!(
            event = "fallback_call",
            call = %call,
            object = format_args!("{:#x}", object),
            "fallback allocation"
        ),
        None => trace!(event = "fallback_call", call = %call, "fallback allocation failed"),
    }
}

#[inline]
pub fn log_deoptimization(action: DeoptAction, reason: DeoptReason) {
    use tracing::trace;
    trace!(
        event = "deoptimize",
        action = ?action,
        reason = ?reason,
        "snippet deoptimized"
    );
}

/// Log a loaded configuration file
pub fn log_config_loaded(path: &Path) {
    use tracing::info;
    info!(event = "config_loaded", path = %path.display(), "configuration loaded");
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}
