pub mod channel;
pub mod connector;
pub mod sdp;
pub mod signaling;
pub mod worker;

pub use channel::{BufferFormat, Geometry};
pub use connector::{ConnectionState, Endpoint, Role, TransferOptions};
pub use signaling::run_signalling;
pub use worker::WorkerQueue;

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
