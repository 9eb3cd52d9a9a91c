/*!
 * Monitoring Module
 * Structured logging for the allocator
 */

pub mod tracer;

pub use tracer::{init_tracing, NativeCallSpan, SLOW_NATIVE_CALL};
