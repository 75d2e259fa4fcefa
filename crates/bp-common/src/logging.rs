//! Structured Logging Configuration
//!
//! Every Backplane component logs through `tracing` macros with structured
//! fields. Components do not own logger objects; long-running tasks enter a
//! span carrying a `component` field so that every nested event is tagged.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bp_common::logging::init_logging;
//!
//! fn main() {
//!     init_logging("bp-server");
//!     tracing::info!(staged = 12, "Ingestion cycle complete");
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: Set to "json" for JSON output, anything else for text (default: text)
//! - `RUST_LOG`: Standard log level filter (default: info)
//!   Examples: `RUST_LOG=debug`, `RUST_LOG=bp_ingest=trace,sqlx=warn`

use tracing::{info, info_span, Span};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize logging for the given service.
///
/// Reads LOG_FORMAT to pick JSON or text output and RUST_LOG for filtering.
/// Returns false when a global subscriber was already installed (tests
/// installing their own, or a second call).
pub fn init_logging(service_name: &str) -> bool {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if log_format.eq_ignore_ascii_case("json") {
        init_json_logging(env_filter)
    } else {
        init_text_logging(env_filter)
    };

    if installed {
        info!(service = %service_name, format = %log_format, "Logging initialized");
    }
    installed
}

fn init_json_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE)
        )
        .try_init()
        .is_ok()
}

fn init_text_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(true)
        )
        .try_init()
        .is_ok()
}

/// Span that tags every event emitted by a component's task.
pub fn component_span(component: &'static str) -> Span {
    info_span!("component", component = component)
}
