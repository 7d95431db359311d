pub mod bridge;
pub mod dispatch;
pub mod socket;

pub use bridge::{Bridge, Submission, TimeoutPolicy};
pub use dispatch::{DispatchMode, Dispatcher, StreamRegistry, StreamSink};
pub use socket::DatagramSocket;

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
