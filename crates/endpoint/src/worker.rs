//! Single-consumer task queue that serializes signalling work.
//!
//! WebRTC and WebSocket callbacks arrive on library-owned threads; doing
//! signalling I/O inline from those contexts risks re-entrant deadlocks.
//! Posting closures here guarantees every outbound signalling write
//! happens on one predictable thread, in submission order.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::trace;

use crate::lock;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct State {
    tasks: VecDeque<Task>,
    running: bool,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

pub struct WorkerQueue {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerQueue {
    /// Spawn the consumer thread. `name` shows up in thread listings.
    pub fn new(name: &str) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                tasks: VecDeque::new(),
                running: true,
            }),
            available: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(&worker))
            .expect("failed to spawn worker thread");
        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Enqueue a task. Safe from any thread, including library callback
    /// contexts. Tasks submitted after `stop` are discarded.
    pub fn add_task(&self, task: impl FnOnce() + Send + 'static) {
        {
            let mut state = lock(&self.shared.state);
            if !state.running {
                trace!("Dropping task submitted after stop");
                return;
            }
            state.tasks.push_back(Box::new(task));
        }
        self.shared.available.notify_one();
    }

    /// Number of tasks waiting to run (not counting one in flight).
    pub fn task_count(&self) -> usize {
        lock(&self.shared.state).tasks.len()
    }

    /// Stop accepting tasks, let the worker drain what is queued, and join
    /// it. Idempotent.
    pub fn stop(&self) {
        lock(&self.shared.state).running = false;
        self.shared.available.notify_all();
        if let Some(thread) = lock(&self.thread).take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WorkerQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared) {
    let mut state = lock(&shared.state);
    loop {
        while state.running && state.tasks.is_empty() {
            state = shared
                .available
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        match state.tasks.pop_front() {
            Some(task) => {
                drop(state);
                task();
                state = lock(&shared.state);
            }
            // stopped and fully drained
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn tasks_run_in_submission_order() {
        let queue = WorkerQueue::new("test-order");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = Arc::clone(&seen);
            queue.add_task(move || seen.lock().unwrap().push(i));
        }
        queue.stop();
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn task_count_reflects_backlog() {
        let queue = WorkerQueue::new("test-count");
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        queue.add_task(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
        });
        started_rx.recv().unwrap();

        queue.add_task(|| {});
        queue.add_task(|| {});
        queue.add_task(|| {});
        assert_eq!(queue.task_count(), 3);

        gate_tx.send(()).unwrap();
        queue.stop();
        assert_eq!(queue.task_count(), 0);
    }

    #[test]
    fn stop_drains_pending_tasks() {
        let queue = WorkerQueue::new("test-drain");
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let ran = Arc::new(Mutex::new(0));
        {
            let gate_rx = gate_rx;
            queue.add_task(move || {
                gate_rx.recv().unwrap();
            });
        }
        for _ in 0..10 {
            let ran = Arc::clone(&ran);
            queue.add_task(move || *ran.lock().unwrap() += 1);
        }
        gate_tx.send(()).unwrap();
        queue.stop();
        assert_eq!(*ran.lock().unwrap(), 10);
    }

    #[test]
    fn tasks_after_stop_are_discarded() {
        let queue = WorkerQueue::new("test-late");
        queue.stop();
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        queue.add_task(move || *flag.lock().unwrap() = true);
        assert_eq!(queue.task_count(), 0);
        assert!(!*ran.lock().unwrap());
    }
}
