use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::error::InvokeError;

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

pub type CallOutcome = Result<Value, InvokeError>;

/// Process-wide call id; never reused.
pub fn next_call_id() -> String {
    NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed).to_string()
}

struct PendingCall {
    slot: oneshot::Sender<CallOutcome>,
    tool_name: String,
    started: Instant,
}

/// Outstanding editor calls keyed by call id.
///
/// An id present here has not been resolved yet. Every removal path either
/// delivers exactly one outcome into the caller's slot or is performed by the
/// caller itself after it gave up waiting.
#[derive(Default)]
pub struct PendingCalls {
    calls: HashMap<String, PendingCall>,
}

impl PendingCalls {
    pub fn register(&mut self, tool_name: &str) -> (String, oneshot::Receiver<CallOutcome>) {
        let id = next_call_id();
        let (slot, waiter) = oneshot::channel();
        self.calls.insert(
            id.clone(),
            PendingCall {
                slot,
                tool_name: tool_name.to_owned(),
                started: Instant::now(),
            },
        );
        (id, waiter)
    }

    /// Delivers `outcome` to the waiter of `id`. Returns false for ids that are
    /// unknown or already resolved.
    pub fn resolve(&mut self, id: &str, outcome: CallOutcome) -> bool {
        let Some(call) = self.calls.remove(id) else {
            return false;
        };
        info!(
            "tool {} ({id}) completed in {}ms",
            call.tool_name,
            call.started.elapsed().as_millis()
        );
        if call.slot.send(outcome).is_err() {
            debug!("caller for {id} stopped waiting before resolution");
        }
        true
    }

    /// Drops `id` without delivering anything; used by the caller itself.
    pub fn forget(&mut self, id: &str) -> bool {
        self.calls.remove(id).is_some()
    }

    pub fn drain(&mut self, reason: InvokeError) -> usize {
        let count = self.calls.len();
        for (id, call) in self.calls.drain() {
            if call.slot.send(Err(reason.clone())).is_err() {
                debug!("caller for {id} stopped waiting before drain");
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.calls.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use serde_json::json;

    use super::{next_call_id, PendingCalls};
    use crate::bridge::error::InvokeError;

    #[test]
    fn call_ids_are_unique_across_threads() {
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let handles = (0..8)
            .map(|_| {
                let seen = seen.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let id = next_call_id();
                        assert!(seen.lock().expect("lock").insert(id));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(seen.lock().expect("lock").len(), 4_000);
    }

    #[test]
    fn resolve_delivers_once_and_removes_entry() {
        let mut pending = PendingCalls::default();
        let (id, mut waiter) = pending.register("read_file");
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve(&id, Ok(json!({"b": 2}))));
        assert!(!pending.resolve(&id, Ok(json!({"b": 3}))));
        assert_eq!(pending.len(), 0);
        assert_eq!(waiter.try_recv().expect("outcome"), Ok(json!({"b": 2})));
    }

    #[test]
    fn drain_resolves_every_waiter_with_reason() {
        let mut pending = PendingCalls::default();
        let mut waiters = (0..5)
            .map(|_| pending.register("scene_tree_dump").1)
            .collect::<Vec<_>>();

        assert_eq!(pending.drain(InvokeError::Disconnected), 5);
        assert_eq!(pending.len(), 0);
        for waiter in &mut waiters {
            assert_eq!(waiter.try_recv().expect("outcome"), Err(InvokeError::Disconnected));
        }
    }

    #[test]
    fn forget_leaves_late_results_unresolvable() {
        let mut pending = PendingCalls::default();
        let (id, _waiter) = pending.register("get_errors");
        assert!(pending.forget(&id));
        assert!(!pending.contains(&id));
        assert!(!pending.resolve(&id, Ok(json!(null))));
    }
}
