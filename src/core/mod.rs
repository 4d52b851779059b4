//! Core engine modules - log store, log capture, privileged work queue
//!
//! These modules know nothing about HTTP.

pub mod log_buffer;
pub mod log_capture;
pub mod work_queue;

// Re-exports for convenience
pub use log_buffer::{LogFilter, LogRecord, LogRingBuffer, Severity};
pub use log_capture::LogCapture;
pub use work_queue::{PendingAction, Responder, ResponseSlot, WorkQueue, response_slot};
