//! Bounded FIFO buffer for matches that exceeded the inline budget.
//!
//! A single drain worker keeps delivery in submission order. Every job
//! carries the session id it was submitted under; jobs from a superseded
//! session are dropped, never delivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::index::AliasStore;
use crate::matcher::{match_bounded, MatchBudget, MatchOptions};
use crate::types::{MatchContext, MatchResult};

/// Host callback for asynchronously delivered results.
pub type PendingListener = Box<dyn Fn(u64, MatchResult) + Send + Sync>;

pub(crate) struct PendingJob {
    pub session_id: u64,
    pub hypothesis: String,
    pub context: MatchContext,
}

enum PendingMsg {
    Job(PendingJob),
    Shutdown,
}

/// The buffer plus its drain worker.
pub(crate) struct PendingWorker {
    tx: Sender<PendingMsg>,
    worker: Mutex<Option<JoinHandle<()>>>,
    listener: Arc<Mutex<Option<PendingListener>>>,
}

impl PendingWorker {
    pub fn new(
        store: Arc<AliasStore>,
        options: MatchOptions,
        drain_budget: Duration,
        capacity: usize,
        current_session: Arc<AtomicU64>,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let listener: Arc<Mutex<Option<PendingListener>>> = Arc::new(Mutex::new(None));
        let worker_listener = listener.clone();
        let worker = std::thread::Builder::new()
            .name("pending-match".into())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    let job = match msg {
                        PendingMsg::Shutdown => return,
                        PendingMsg::Job(job) => job,
                    };
                    if job.session_id != current_session.load(Ordering::Acquire) {
                        trace!(session = job.session_id, "dropping job from superseded session");
                        continue;
                    }

                    let budget = MatchBudget {
                        deadline: Some(Instant::now() + drain_budget),
                        cancel: None,
                    };
                    let snapshot = store.snapshot();
                    let result = match_bounded(
                        &snapshot,
                        &job.hypothesis,
                        &job.context,
                        &options,
                        &budget,
                    )
                    .unwrap_or_else(|| MatchResult::no_match(&job.hypothesis, "timeout"));

                    if job.session_id != current_session.load(Ordering::Acquire) {
                        trace!(session = job.session_id, "result outlived its session");
                        continue;
                    }
                    if let Some(listener) = worker_listener.lock().as_ref() {
                        listener(job.session_id, result);
                    } else {
                        debug!("pending result dropped; no listener registered");
                    }
                }
            })
            .expect("spawn pending-match worker");

        Self {
            tx,
            worker: Mutex::new(Some(worker)),
            listener,
        }
    }

    /// Non-blocking enqueue; `false` when the buffer is full.
    pub fn try_enqueue(&self, job: PendingJob) -> bool {
        match self.tx.try_send(PendingMsg::Job(job)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn set_listener(&self, listener: PendingListener) {
        *self.listener.lock() = Some(listener);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(PendingMsg::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{AliasStore, StorageLayout};
    use crate::test_utils::{context_of, master_of, species};

    fn store_of() -> (Arc<AliasStore>, crate::types::AliasMaster, tempfile::TempDir) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = StorageLayout::new(tmp.path().join("shared"), tmp.path().join("priv"));
        let master = master_of(vec![species("20", "Aalscholver", None, &[])]);
        let store = Arc::new(AliasStore::new(layout));
        store.install(master.to_index());
        (store, master, tmp)
    }

    #[test]
    fn delivers_results_for_the_current_session() {
        let (store, master, _tmp) = store_of();
        let session = Arc::new(AtomicU64::new(7));
        let worker = PendingWorker::new(
            store,
            MatchOptions::default(),
            Duration::from_millis(250),
            16,
            session.clone(),
        );

        let (tx, rx) = crossbeam_channel::unbounded();
        worker.set_listener(Box::new(move |id, result| {
            let _ = tx.send((id, result));
        }));

        let ctx = context_of(&master, &["20"], &["20"], &[]);
        assert!(worker.try_enqueue(PendingJob {
            session_id: 7,
            hypothesis: "aalscholver".to_owned(),
            context: ctx,
        }));

        let (id, result) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("result delivered");
        assert_eq!(id, 7);
        assert!(matches!(result, MatchResult::AutoAccept { .. }), "{result:?}");

        worker.shutdown();
    }

    #[test]
    fn stale_sessions_are_never_delivered() {
        let (store, master, _tmp) = store_of();
        let session = Arc::new(AtomicU64::new(9));
        let worker = PendingWorker::new(
            store,
            MatchOptions::default(),
            Duration::from_millis(250),
            16,
            session.clone(),
        );

        let (tx, rx) = crossbeam_channel::unbounded();
        worker.set_listener(Box::new(move |id, result| {
            let _ = tx.send((id, result));
        }));

        let ctx = context_of(&master, &["20"], &["20"], &[]);
        // A job submitted under an already-superseded session id.
        assert!(worker.try_enqueue(PendingJob {
            session_id: 8,
            hypothesis: "aalscholver".to_owned(),
            context: ctx.clone(),
        }));
        // A current one behind it.
        assert!(worker.try_enqueue(PendingJob {
            session_id: 9,
            hypothesis: "aalscholver".to_owned(),
            context: ctx,
        }));

        let (id, _) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("current session delivered");
        assert_eq!(id, 9, "stale result must be dropped");
        assert!(rx.try_recv().is_err());

        worker.shutdown();
    }
}
