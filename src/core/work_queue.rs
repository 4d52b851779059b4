//! Bridge from request threads to the host's privileged thread.
//!
//! ```text
//!  worker thread ──enqueue(PendingAction)──▶ WorkQueue ──pump(host)──▶ privileged thread
//!        ▲                                                                  │
//!        └──────────────────── Responder::respond(response) ◀──────────────┘
//! ```
//!
//! Producers are rouille's per-request threads. The only consumer is the host
//! thread calling [`WorkQueue::pump`] once per tick. Actions run in enqueue
//! order, one at a time, each exactly once. A panicking action is caught and
//! logged; the remaining actions still run.

use crossbeam_channel::{Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::thread::{self, ThreadId};

use crate::host::Host;

type Job = Box<dyn FnOnce(&mut dyn Host) + Send + 'static>;

/// A unit of deferred work. Owned by the queue until the pump runs it.
pub struct PendingAction {
    label: String,
    job: Job,
}

impl PendingAction {
    pub fn new<F>(label: impl Into<String>, job: F) -> Self
    where
        F: FnOnce(&mut dyn Host) + Send + 'static,
    {
        Self {
            label: label.into(),
            job: Box::new(job),
        }
    }

    /// Short description used in logs (usually `METHOD /path`).
    pub fn label(&self) -> &str {
        &self.label
    }

    fn run(self, host: &mut dyn Host) {
        (self.job)(host)
    }
}

impl std::fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAction").field("label", &self.label).finish()
    }
}

/// Write side of a one-shot reply. Consumed by [`Responder::respond`], so a reply is sent at most once.
pub struct Responder<T> {
    tx: Sender<T>,
}

/// Read side of a one-shot reply, held by the request thread.
pub struct ResponseSlot<T> {
    rx: Receiver<T>,
}

/// Create a connected reply pair.
pub fn response_slot<T>() -> (Responder<T>, ResponseSlot<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (Responder { tx }, ResponseSlot { rx })
}

impl<T> Responder<T> {
    pub fn respond(self, value: T) {
        if self.tx.send(value).is_err() {
            log::debug!("Response dropped: requester is gone");
        }
    }
}

impl<T> ResponseSlot<T> {
    /// Block until the reply arrives. `None` if the responder was dropped without replying.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }
}

/// Multi-producer, single-consumer queue of privileged actions.
pub struct WorkQueue {
    tx: Sender<PendingAction>,
    rx: Receiver<PendingAction>,
    /// Thread that pumped first; all later pumps must come from it.
    privileged: OnceLock<ThreadId>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            privileged: OnceLock::new(),
        }
    }

    /// Queue an action. Non-blocking, callable from any thread.
    pub fn enqueue(&self, action: PendingAction) {
        log::trace!("Enqueue {} ({} waiting)", action.label(), self.rx.len());
        // The queue owns its receiver, so the channel cannot be disconnected here.
        let _ = self.tx.send(action);
    }

    pub fn submit<F>(&self, label: impl Into<String>, job: F)
    where
        F: FnOnce(&mut dyn Host) + Send + 'static,
    {
        self.enqueue(PendingAction::new(label, job));
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Run every action queued before this call, in order, on the calling thread.
    ///
    /// Must be called from the host's privileged thread once per tick. Actions
    /// enqueued while draining wait for the next tick. Returns how many ran.
    pub fn pump(&self, host: &mut dyn Host) -> usize {
        let current = thread::current().id();
        let owner = *self.privileged.get_or_init(|| current);
        if owner != current {
            log::error!(
                "pump() called from {:?}, but the privileged thread is {:?}; skipping",
                current,
                owner
            );
            return 0;
        }

        let pending = self.rx.len();
        let mut executed = 0;
        for _ in 0..pending {
            let Ok(action) = self.rx.try_recv() else {
                break;
            };
            let label = action.label.clone();
            log::trace!("Pump: running {}", label);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| action.run(host))) {
                log::error!("Privileged action {} panicked: {}", label, panic_message(&*payload));
            }
            executed += 1;
        }
        executed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{BuildOptions, BuildReport, BuildResult, BuildTarget, ImportMode};
    use std::sync::{Arc, Mutex};

    struct NullHost;

    impl Host for NullHost {
        fn is_compiling(&self) -> bool {
            false
        }
        fn import_asset(&mut self, _path: &str, _mode: ImportMode) -> anyhow::Result<()> {
            Ok(())
        }
        fn refresh_assets(&mut self, _mode: ImportMode) -> anyhow::Result<()> {
            Ok(())
        }
        fn active_build_target(&self) -> BuildTarget {
            BuildTarget::Android
        }
        fn switch_build_target(&mut self, _target: BuildTarget) -> anyhow::Result<()> {
            Ok(())
        }
        fn build_player(&mut self, _options: &BuildOptions) -> anyhow::Result<BuildReport> {
            Ok(BuildReport::new(BuildResult::Succeeded))
        }
    }

    /// Test: Single producer order is preserved across pumps
    /// Validates: FIFO, exactly-once execution
    #[test]
    fn test_fifo_exactly_once() {
        let queue = WorkQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let seen = Arc::clone(&seen);
            queue.submit(format!("job {}", i), move |_| seen.lock().unwrap().push(i));
        }

        let mut host = NullHost;
        let mut total = 0;
        while !queue.is_empty() {
            total += queue.pump(&mut host);
        }
        assert_eq!(total, 20);
        assert_eq!(queue.pump(&mut host), 0);
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    /// Test: Work enqueued during a drain waits for the next pump
    #[test]
    fn test_enqueue_during_pump_runs_next_tick() {
        let queue = Arc::new(WorkQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        {
            let queue_inner = Arc::clone(&queue);
            let seen = Arc::clone(&seen);
            queue.submit("outer", move |_| {
                seen.lock().unwrap().push("outer");
                let seen = Arc::clone(&seen);
                queue_inner.submit("inner", move |_| seen.lock().unwrap().push("inner"));
            });
        }

        let mut host = NullHost;
        assert_eq!(queue.pump(&mut host), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["outer"]);
        assert_eq!(queue.pump(&mut host), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "inner"]);
    }

    /// Test: A panicking action does not stop the pump
    /// Validates: later actions still run, panic is contained
    #[test]
    fn test_panic_is_contained() {
        let queue = WorkQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        queue.submit("first", move |_| s.lock().unwrap().push(1));
        queue.submit("boom", |_| panic!("collaborator exploded"));
        let s = Arc::clone(&seen);
        queue.submit("third", move |_| s.lock().unwrap().push(3));

        let mut host = NullHost;
        assert_eq!(queue.pump(&mut host), 3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
    }

    /// Test: Dropping a responder without replying wakes the waiter with None
    #[test]
    fn test_dropped_responder_disconnects() {
        let queue = WorkQueue::new();
        let (responder, slot) = response_slot::<u32>();
        queue.submit("never replies", move |_| {
            let _keep = &responder;
            panic!("no reply");
        });

        let mut host = NullHost;
        queue.pump(&mut host);
        assert_eq!(slot.wait(), None);
    }

    #[test]
    fn test_responder_delivers_once() {
        let (responder, slot) = response_slot::<&'static str>();
        responder.respond("done");
        assert_eq!(slot.wait(), Some("done"));
    }

    /// Test: Producers on many threads; each producer's own order survives
    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let queue = Arc::new(WorkQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    for i in 0..100 {
                        let seen = Arc::clone(&seen);
                        queue.submit("p", move |_| seen.lock().unwrap().push((p, i)));
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }

        let mut host = NullHost;
        while !queue.is_empty() {
            queue.pump(&mut host);
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 400);
        for p in 0..4 {
            let order: Vec<_> = seen.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
            assert_eq!(order, (0..100).collect::<Vec<_>>());
        }
    }

    /// Test: Only the first pumping thread may execute actions
    #[test]
    fn test_pump_bound_to_first_thread() {
        let queue = Arc::new(WorkQueue::new());
        let mut host = NullHost;
        queue.pump(&mut host);

        queue.submit("x", |_| {});
        let other = Arc::clone(&queue);
        let ran = thread::spawn(move || other.pump(&mut NullHost)).join().unwrap();
        assert_eq!(ran, 0);
        assert_eq!(queue.pump(&mut host), 1);
    }
}
