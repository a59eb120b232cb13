//! Logging integration for strata.
//!
//! Configures a [`tracing`] subscriber from [`Settings`](crate::settings::Settings)
//! and provides the span used around database work.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level` (any `EnvFilter` directive,
/// e.g. `"info"` or `"strata_db=debug"`). In debug mode a pretty format is
/// used; otherwise a structured JSON format is used. Calling this more than
/// once is harmless: later calls leave the first subscriber in place.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for one terminal queryset operation.
///
/// ```
/// use strata_core::logging::query_span;
///
/// let span = query_span("tracks", "count");
/// let _guard = span.enter();
/// tracing::debug!("compiling");
/// ```
pub fn query_span(table: &str, operation: &'static str) -> tracing::Span {
    tracing::debug_span!("query", table = table, op = operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_is_idempotent() {
        let settings = Settings {
            log_level: "not a [valid directive".to_string(),
            ..Settings::default()
        };
        setup_logging(&settings);
        setup_logging(&settings);
    }

    #[test]
    fn test_query_span_enters() {
        let span = query_span("albums", "all");
        let _guard = span.enter();
        tracing::debug!("inside span");
    }
}
