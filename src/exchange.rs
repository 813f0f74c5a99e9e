use crate::error::ScanError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// All-to-all exchange among the workers running one query. Every worker
/// contributes one payload and receives every worker's payload, indexed by
/// worker id. It is the only point where workers wait on each other; a worker
/// still waiting after `timeout` fails with `SyncFailure`.
pub trait ReplicationExchange: Send + Sync {
    fn worker_count(&self) -> usize;

    fn broadcast_and_collect(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<Vec<u8>>, ScanError>;
}

/// Exchange of a single-worker deployment: the local payload is the global one.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExchange;

impl ReplicationExchange for LocalExchange {
    fn worker_count(&self) -> usize {
        1
    }

    fn broadcast_and_collect(
        &self,
        payload: Vec<u8>,
        _timeout: Duration,
    ) -> Result<Vec<Vec<u8>>, ScanError> {
        Ok(vec![payload])
    }
}

#[derive(Debug)]
struct RoundState {
    /// Round currently collecting payloads. Rounds before it either
    /// completed or were abandoned.
    generation: u64,
    slots: Vec<Option<Vec<u8>>>,
    arrived: usize,
    completed: Option<(u64, Arc<Vec<Vec<u8>>>)>,
    abandoned: u64,
}

impl RoundState {
    fn results_of(&self, generation: u64) -> Option<Vec<Vec<u8>>> {
        match &self.completed {
            Some((done, results)) if *done == generation => Some(results.as_ref().clone()),
            _ => None,
        }
    }

    /// Drops the partial payloads of the current round and opens the next one.
    fn abandon(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.arrived = 0;
        self.generation += 1;
        self.abandoned += 1;
    }
}

#[derive(Debug)]
struct Group {
    workers: usize,
    state: Mutex<RoundState>,
    cv: Condvar,
}

/// In-process exchange for simulated workers sharing one address space.
/// Obtain one endpoint per worker from [`InMemoryExchange::group`].
///
/// The n-th call on every endpoint belongs to round n. A round in which some
/// worker times out is abandoned: its waiters fail, a worker reaching it late
/// fails at once, and the next round starts clean.
#[derive(Debug)]
pub struct InMemoryExchange {
    group: Arc<Group>,
    worker: usize,
    next_round: AtomicU64,
}

impl InMemoryExchange {
    pub fn group(workers: usize) -> Result<Vec<InMemoryExchange>, ScanError> {
        if workers == 0 {
            return Err(ScanError::Validation(
                "exchange group needs at least one worker".into(),
            ));
        }
        let group = Arc::new(Group {
            workers,
            state: Mutex::new(RoundState {
                generation: 0,
                slots: vec![None; workers],
                arrived: 0,
                completed: None,
                abandoned: 0,
            }),
            cv: Condvar::new(),
        });
        Ok((0..workers)
            .map(|worker| InMemoryExchange {
                group: Arc::clone(&group),
                worker,
                next_round: AtomicU64::new(0),
            })
            .collect())
    }

    pub fn worker_id(&self) -> usize {
        self.worker
    }

    /// Rounds of this group given up after a timeout.
    pub fn abandoned_rounds(&self) -> u64 {
        self.group.state.lock().abandoned
    }
}

impl ReplicationExchange for InMemoryExchange {
    fn worker_count(&self) -> usize {
        self.group.workers
    }

    fn broadcast_and_collect(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<Vec<u8>>, ScanError> {
        let group = &*self.group;
        let round = self.next_round.fetch_add(1, Ordering::SeqCst);
        let mut state = group.state.lock();
        if round < state.generation {
            return Err(ScanError::sync_failure(format!(
                "exchange round {round} was abandoned before worker {} arrived",
                self.worker
            )));
        }
        if round > state.generation || state.slots[self.worker].is_some() {
            return Err(ScanError::sync_failure(format!(
                "worker {} entered round {round} while round {} is collecting",
                self.worker, state.generation
            )));
        }
        state.slots[self.worker] = Some(payload);
        state.arrived += 1;

        if state.arrived == group.workers {
            let results: Vec<Vec<u8>> = state
                .slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            let results = Arc::new(results);
            state.completed = Some((round, Arc::clone(&results)));
            state.arrived = 0;
            state.generation += 1;
            group.cv.notify_all();
            debug!(
                worker = self.worker,
                round,
                workers = group.workers,
                "exchange round complete"
            );
            return Ok(results.as_ref().clone());
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(results) = state.results_of(round) {
                return Ok(results);
            }
            if state.generation > round {
                return Err(ScanError::sync_failure(format!(
                    "exchange round {round} abandoned by a peer"
                )));
            }
            if group.cv.wait_until(&mut state, deadline).timed_out() {
                if let Some(results) = state.results_of(round) {
                    return Ok(results);
                }
                if state.generation > round {
                    continue;
                }
                let missing = group.workers - state.arrived;
                state.abandon();
                group.cv.notify_all();
                error!(
                    worker = self.worker,
                    round,
                    missing,
                    workers = group.workers,
                    "exchange timed out, abandoning round"
                );
                return Err(ScanError::sync_failure(format!(
                    "worker {} timed out after {:?} waiting for {missing} of {} peers",
                    self.worker, timeout, group.workers
                )));
            }
        }
    }
}
