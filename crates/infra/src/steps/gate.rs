//! Keyed concurrency gate.
//!
//! Each `(step kind, scope)` pair maps to a semaphore sized by the step's
//! declared limit. Admission is FIFO per key (tokio semaphores are fair);
//! the gate never reorders waiters. Closing the gate wakes every waiter with
//! [`GateError::Closed`] and refuses later admissions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use voucherflow_core::JobId;

use super::types::{ConcurrencyLimit, ConcurrencyScope};

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("concurrency key {0} was closed")]
    Closed(String),
    #[error("concurrency limit {limit} for {key} must be between 1 and {}", Semaphore::MAX_PERMITS)]
    InvalidLimit { key: String, limit: usize },
}

/// Permits held for the duration of one step attempt.
#[derive(Debug)]
pub struct GatePermit {
    _permits: Vec<OwnedSemaphorePermit>,
}

#[derive(Debug, Default)]
pub struct ConcurrencyGate {
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
    closed: AtomicBool,
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the key a limit applies to.
    pub fn key_for(kind: &str, job_id: JobId, scope: &ConcurrencyScope) -> String {
        match scope {
            ConcurrencyScope::Job => format!("{kind}:job:{job_id}"),
            ConcurrencyScope::Portal(portal) => format!("{kind}:portal:{portal}"),
            ConcurrencyScope::Key(key) => format!("{kind}:key:{key}"),
            ConcurrencyScope::Global => format!("{kind}:global"),
        }
    }

    /// Wait until every limit admits one more holder.
    ///
    /// Keys are acquired in sorted order so two steps sharing several keys
    /// cannot deadlock each other.
    pub async fn admit(
        &self,
        kind: &str,
        job_id: JobId,
        limits: &[ConcurrencyLimit],
    ) -> Result<GatePermit, GateError> {
        let mut keyed: Vec<(String, usize)> = limits
            .iter()
            .map(|l| (Self::key_for(kind, job_id, &l.scope), l.limit))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);

        let mut permits = Vec::with_capacity(keyed.len());
        for (key, limit) in keyed {
            let semaphore = self.semaphore(&key, limit)?;
            if semaphore.available_permits() == 0 {
                debug!(key = %key, limit, "waiting for concurrency slot");
            }
            let permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| GateError::Closed(key.clone()))?;
            permits.push(permit);
        }
        Ok(GatePermit { _permits: permits })
    }

    /// Stop admitting. Current holders keep their permits until they drop
    /// them; waiters and later callers get [`GateError::Closed`].
    pub fn close(&self) {
        let semaphores = self.semaphores.lock().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::SeqCst);
        for semaphore in semaphores.values() {
            semaphore.close();
        }
        debug!(keys = semaphores.len(), "concurrency gate closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Forget the per-job keys of a finished job.
    pub fn release_job(&self, job_id: JobId) {
        let marker = format!(":job:{job_id}");
        let mut semaphores = self.semaphores.lock().unwrap_or_else(PoisonError::into_inner);
        semaphores.retain(|key, _| !key.ends_with(&marker));
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.semaphores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn semaphore(&self, key: &str, limit: usize) -> Result<Arc<Semaphore>, GateError> {
        if limit == 0 || limit > Semaphore::MAX_PERMITS {
            return Err(GateError::InvalidLimit {
                key: key.to_string(),
                limit,
            });
        }
        let mut semaphores = self.semaphores.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(GateError::Closed(key.to_string()));
        }
        // The first declaration of a key fixes its size.
        let semaphore = semaphores
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)));
        Ok(Arc::clone(semaphore))
    }
}
