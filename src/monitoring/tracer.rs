/*!
 * Structured Tracing
 * Subscriber setup and timing spans around native memory calls
 *
 * Features:
 * - Env-filtered output (RUST_LOG)
 * - Optional JSON output for log shipping
 * - Slow native call warnings with structured fields
 */

use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Native calls slower than this are reported at warn level
pub const SLOW_NATIVE_CALL: Duration = Duration::from_millis(5);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - DEVMEM_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("DEVMEM_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Times one native memory call and reports it on drop
pub struct NativeCallSpan {
    span: tracing::Span,
    start: Instant,
    call: &'static str,
}

impl NativeCallSpan {
    pub fn new(call: &'static str, memory_type_index: u32, size: u64) -> Self {
        let span = span!(
            Level::DEBUG,
            "native_call",
            call,
            memory_type_index,
            size,
            duration_us = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            call,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for NativeCallSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_us", duration.as_micros() as u64);
        let _entered = self.span.enter();

        if duration > SLOW_NATIVE_CALL {
            warn!(
                call = self.call,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow native memory call"
            );
        } else {
            debug!(
                call = self.call,
                duration_us = duration.as_micros() as u64,
                "native memory call completed"
            );
        }
    }
}
