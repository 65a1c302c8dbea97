//! Record-level two-phase locking.
//!
//! Each record id owns a FIFO queue of lock requests with its own condition
//! variable; a global mutex protects only the queue map. A background
//! thread rebuilds the wait-for graph on a fixed interval and aborts the
//! youngest transaction on any cycle.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::error::{AbortReason, EngineError, EngineResult};
use crate::transaction::{
    IsolationLevel, Transaction, TransactionRegistry, TransactionState,
};
use crate::{Rid, TxnId, CYCLE_DETECTION_INTERVAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Default)]
struct QueueState {
    requests: VecDeque<LockRequest>,
    /// The transaction currently waiting on a shared→exclusive promotion
    /// for this record, if any.
    upgrading: Option<TxnId>,
}

#[derive(Default)]
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

pub struct LockManager {
    lock_table: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    registry: Arc<TransactionRegistry>,
    enable_cycle_detection: Arc<AtomicBool>,
    cycle_detection_interval: Duration,
    detector: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(registry: Arc<TransactionRegistry>) -> Self {
        Self::with_interval(registry, CYCLE_DETECTION_INTERVAL)
    }

    pub fn with_interval(registry: Arc<TransactionRegistry>, interval: Duration) -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
            registry,
            enable_cycle_detection: Arc::new(AtomicBool::new(false)),
            cycle_detection_interval: interval,
            detector: Mutex::new(None),
        }
    }

    /// Starts the background deadlock detector. The thread holds only a
    /// weak handle so dropping the manager shuts it down.
    pub fn run_cycle_detection(self: &Arc<Self>) {
        let mut handle = self.detector.lock().unwrap();
        if handle.is_some() {
            return;
        }
        self.enable_cycle_detection.store(true, Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        let interval = self.cycle_detection_interval;
        *handle = Some(thread::spawn(move || loop {
            thread::sleep(interval);
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if !manager.enable_cycle_detection.load(Ordering::SeqCst) {
                return;
            }
            manager.detect_and_break_cycles();
        }));
        info!("deadlock detection thread launched");
    }

    pub fn stop_cycle_detection(&self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
        let handle = self.detector.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
            info!("deadlock detection thread stopped");
        }
    }

    /// Acquires a shared lock on `rid`, blocking until granted or until the
    /// deadlock detector aborts the transaction.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> EngineResult<()> {
        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                // No read locks exist at this level; asking for one is a
                // protocol violation.
                return Err(self.abort(txn, AbortReason::SharedOnReadUncommitted));
            }
            IsolationLevel::ReadCommitted => {}
            IsolationLevel::RepeatableRead => {
                if txn.state() == TransactionState::Shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }

        if txn.is_shared_locked(&rid) || txn.is_exclusive_locked(&rid) {
            return Ok(());
        }

        let queue = self.queue_for(rid);
        let mut state = queue.state.lock().unwrap();
        state.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        });

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::remove_request(&mut state, txn.id());
                queue.cv.notify_all();
                return Err(EngineError::TransactionAborted {
                    txn_id: txn.id(),
                    reason: AbortReason::Deadlock,
                });
            }
            if !Self::exclusive_granted(&state) {
                break;
            }
            state = queue.cv.wait(state).unwrap();
        }

        Self::grant(&mut state, txn.id());
        drop(state);
        if txn.state() != TransactionState::Aborted {
            txn.set_state(TransactionState::Growing);
        }
        txn.add_shared_lock(rid);
        Ok(())
    }

    /// Acquires an exclusive lock on `rid`.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> EngineResult<()> {
        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Shrinking
        {
            return Err(self.abort(txn, AbortReason::LockOnShrinking));
        }

        if txn.is_exclusive_locked(&rid) {
            return Ok(());
        }

        let queue = self.queue_for(rid);
        let mut state = queue.state.lock().unwrap();
        state.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        });

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::remove_request(&mut state, txn.id());
                queue.cv.notify_all();
                return Err(EngineError::TransactionAborted {
                    txn_id: txn.id(),
                    reason: AbortReason::Deadlock,
                });
            }
            if !Self::any_granted(&state) {
                break;
            }
            state = queue.cv.wait(state).unwrap();
        }

        Self::grant(&mut state, txn.id());
        drop(state);
        if txn.state() != TransactionState::Aborted {
            txn.set_state(TransactionState::Growing);
        }
        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Promotes a held shared lock to exclusive. Waits until the caller
    /// holds the only granted request on the record, then flips its mode
    /// atomically. A second concurrent upgrader is aborted outright;
    /// two symmetric upgraders would deadlock forever.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> EngineResult<()> {
        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Shrinking
        {
            return Err(self.abort(txn, AbortReason::LockOnShrinking));
        }

        let queue = self.queue_for(rid);
        let mut state = queue.state.lock().unwrap();

        if state.upgrading.is_some() {
            drop(state);
            return Err(self.abort(txn, AbortReason::UpgradeConflict));
        }
        if txn.is_exclusive_locked(&rid) {
            return Ok(());
        }

        state.upgrading = Some(txn.id());
        loop {
            if txn.state() == TransactionState::Aborted {
                if state.upgrading == Some(txn.id()) {
                    state.upgrading = None;
                }
                Self::remove_request(&mut state, txn.id());
                queue.cv.notify_all();
                return Err(EngineError::TransactionAborted {
                    txn_id: txn.id(),
                    reason: AbortReason::Deadlock,
                });
            }
            if Self::upgradable(&state, txn.id()) {
                break;
            }
            state = queue.cv.wait(state).unwrap();
        }

        state.upgrading = None;
        for request in state.requests.iter_mut() {
            if request.txn_id == txn.id() {
                request.mode = LockMode::Exclusive;
            }
        }
        drop(state);

        txn.remove_shared_lock(&rid);
        txn.add_exclusive_lock(rid);
        if txn.state() != TransactionState::Aborted {
            txn.set_state(TransactionState::Growing);
        }
        Ok(())
    }

    /// Releases one lock. Under `REPEATABLE_READ` the first release ends
    /// the growing phase; an aborted state is never overwritten.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }
        self.release(txn, rid)
    }

    /// Drops every lock the transaction still holds; used by commit, abort
    /// and the deadlock detector. No phase transition.
    pub fn release_all(&self, txn: &Transaction) {
        for rid in txn.locked_rids() {
            self.release(txn, rid);
        }
    }

    fn release(&self, txn: &Transaction, rid: Rid) -> bool {
        let Some(queue) = self.existing_queue(rid) else {
            return false;
        };
        let removed = {
            let mut state = queue.state.lock().unwrap();
            Self::remove_request(&mut state, txn.id())
        };
        txn.remove_shared_lock(&rid);
        txn.remove_exclusive_lock(&rid);
        queue.cv.notify_all();
        removed
    }

    /// Marks the transaction aborted and hands back the typed failure.
    fn abort(&self, txn: &Transaction, reason: AbortReason) -> EngineError {
        txn.set_state(TransactionState::Aborted);
        EngineError::TransactionAborted {
            txn_id: txn.id(),
            reason,
        }
    }

    fn queue_for(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut table = self.lock_table.lock().unwrap();
        table.entry(rid).or_default().clone()
    }

    fn existing_queue(&self, rid: Rid) -> Option<Arc<LockRequestQueue>> {
        self.lock_table.lock().unwrap().get(&rid).cloned()
    }

    fn exclusive_granted(state: &QueueState) -> bool {
        state
            .requests
            .iter()
            .any(|r| r.granted && r.mode == LockMode::Exclusive)
    }

    fn any_granted(state: &QueueState) -> bool {
        state.requests.iter().any(|r| r.granted)
    }

    /// A promotion may proceed once the requester's shared lock is the only
    /// granted request on the record.
    fn upgradable(state: &QueueState, txn_id: TxnId) -> bool {
        let mut holds_shared = false;
        for request in state.requests.iter().filter(|r| r.granted) {
            if request.mode != LockMode::Shared || request.txn_id != txn_id {
                return false;
            }
            holds_shared = true;
        }
        holds_shared
    }

    fn grant(state: &mut MutexGuard<'_, QueueState>, txn_id: TxnId) {
        for request in state.requests.iter_mut() {
            if request.txn_id == txn_id && !request.granted {
                request.granted = true;
                return;
            }
        }
    }

    fn remove_request(state: &mut MutexGuard<'_, QueueState>, txn_id: TxnId) -> bool {
        let before = state.requests.len();
        state.requests.retain(|r| r.txn_id != txn_id);
        state.requests.len() != before
    }

    fn detect_and_break_cycles(&self) {
        loop {
            let (graph, queues) = self.build_waits_for();
            let Some(cycle) = Self::find_cycle(&graph) else {
                return;
            };
            // The youngest transaction on the cycle dies.
            let victim_id = *cycle.iter().max().expect("cycle is non-empty");
            debug!("deadlock cycle {cycle:?}, aborting txn {victim_id}");

            if let Some(victim) = self.registry.get(victim_id) {
                victim.set_state(TransactionState::Aborted);
                self.release_all(&victim);
            }
            // Wake every waiter so the victim observes its state.
            for queue in &queues {
                let mut state = queue.state.lock().unwrap();
                Self::remove_request(&mut state, victim_id);
                drop(state);
                queue.cv.notify_all();
            }
        }
    }

    /// Snapshot of the wait-for graph: one edge from every waiting
    /// transaction to every granted transaction on the same record.
    /// Aborted transactions produce no edges.
    fn build_waits_for(&self) -> (BTreeMap<TxnId, BTreeSet<TxnId>>, Vec<Arc<LockRequestQueue>>) {
        let queues: Vec<Arc<LockRequestQueue>> = self
            .lock_table
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();

        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        for queue in &queues {
            let state = queue.state.lock().unwrap();
            let granted: Vec<TxnId> = state
                .requests
                .iter()
                .filter(|r| r.granted && !self.is_aborted(r.txn_id))
                .map(|r| r.txn_id)
                .collect();
            for waiter in state
                .requests
                .iter()
                .filter(|r| !r.granted && !self.is_aborted(r.txn_id))
            {
                for &holder in &granted {
                    if holder != waiter.txn_id {
                        graph.entry(waiter.txn_id).or_default().insert(holder);
                    }
                }
            }
            // A blocked upgrader holds a granted shared request, so it is
            // invisible above; it still waits on every other holder.
            if let Some(upgrader) = state.upgrading {
                if !self.is_aborted(upgrader) {
                    for &holder in &granted {
                        if holder != upgrader {
                            graph.entry(upgrader).or_default().insert(holder);
                        }
                    }
                }
            }
        }
        (graph, queues)
    }

    fn is_aborted(&self, txn_id: TxnId) -> bool {
        self.registry
            .get(txn_id)
            .map(|txn| txn.state() == TransactionState::Aborted)
            .unwrap_or(true)
    }

    /// Depth-first search in ascending transaction-id order; returns the
    /// members of the first cycle found.
    fn find_cycle(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<Vec<TxnId>> {
        let mut visited = HashSet::new();
        for &start in graph.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path = HashSet::new();
            if let Some(cycle) =
                Self::dfs(start, graph, &mut visited, &mut path, &mut on_path)
            {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs(
        node: TxnId,
        graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
        visited: &mut HashSet<TxnId>,
        path: &mut Vec<TxnId>,
        on_path: &mut HashSet<TxnId>,
    ) -> Option<Vec<TxnId>> {
        visited.insert(node);
        path.push(node);
        on_path.insert(node);

        if let Some(neighbors) = graph.get(&node) {
            for &next in neighbors {
                if on_path.contains(&next) {
                    let start = path.iter().position(|&n| n == next).unwrap();
                    return Some(path[start..].to_vec());
                }
                if !visited.contains(&next) {
                    if let Some(cycle) = Self::dfs(next, graph, visited, path, on_path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        on_path.remove(&node);
        None
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.stop_cycle_detection();
    }
}
