//! Cross-process single-writer lease (§4.I, §5). Worker loops E-H only run
//! while this coordinator reports ownership; the Fan-In, Ring Buffer, and
//! Complex Alert Cache refresh run regardless, since duplicating reads is
//! harmless but duplicating fires is not.

use crate::domain::errors::EngineError;
use crate::domain::repositories::LeaseRepository;
use chrono::Duration as ChronoDuration;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const LEASE_TTL_SECS: i64 = 15;
pub const LEASE_RETRY_SECS: u64 = 2;
pub const LEASE_WAIT_MAX_SECS: u64 = 5;
const DEFAULT_LEASE_NAME: &str = "alert-engine-primary";

/// Shared stop signal for the lease-gated workers (§4.I, §5). A gated loop
/// calls `begin_cycle` before starting a new pass and `end_cycle` when it
/// finishes; once `signal` is called no new cycle is admitted, and
/// `wait_drain` blocks until every admitted cycle has called `end_cycle`.
#[derive(Default)]
pub struct ShutdownGate {
    shutting_down: AtomicBool,
    in_flight: AtomicUsize,
}

impl ShutdownGate {
    /// Returns `false` once shutdown has been signalled; the caller must
    /// not start the cycle in that case. Otherwise registers the cycle as
    /// in-flight and returns `true`.
    pub fn begin_cycle(&self) -> bool {
        if self.shutting_down.load(Ordering::SeqCst) {
            return false;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn end_cycle(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn signal(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    async fn wait_drain(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(scope = "alertEngine", "shutdown.drain_timed_out");
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

pub struct LeaseCoordinator {
    repo: Arc<dyn LeaseRepository>,
    name: String,
    owner_id: String,
    ttl: ChronoDuration,
    heartbeat: Duration,
    retry: Duration,
    owned: Arc<AtomicBool>,
    /// Set once if the lease table itself is unreachable at bootstrap; in
    /// this mode we run as sole owner forever and never touch the repo
    /// again (§4.I "fallback to owner=true, no lease").
    degraded: Arc<AtomicBool>,
    shutdown_gate: Arc<ShutdownGate>,
}

impl LeaseCoordinator {
    pub fn new(
        repo: Arc<dyn LeaseRepository>,
        owner_id: String,
        ttl_secs: i64,
    ) -> Self {
        let heartbeat = Duration::from_secs((ttl_secs.max(3) / 3) as u64);
        Self {
            repo,
            name: DEFAULT_LEASE_NAME.to_string(),
            owner_id,
            ttl: ChronoDuration::seconds(ttl_secs),
            heartbeat,
            retry: Duration::from_secs(LEASE_RETRY_SECS),
            owned: Arc::new(AtomicBool::new(false)),
            degraded: Arc::new(AtomicBool::new(false)),
            shutdown_gate: Arc::new(ShutdownGate::default()),
        }
    }

    pub fn is_owner(&self) -> bool {
        self.owned.load(Ordering::SeqCst)
    }

    pub fn owned_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.owned)
    }

    /// Shared with every lease-gated worker loop so shutdown can wait for
    /// their in-flight cycles to finish (§4.I, §5).
    pub fn shutdown_gate(&self) -> Arc<ShutdownGate> {
        Arc::clone(&self.shutdown_gate)
    }

    /// Long-running loop; spawn via `tokio::spawn(Arc::clone(&coordinator).run())`.
    pub async fn run(self: Arc<Self>) {
        if let Err(err) = self.repo.ensure_table().await {
            error!(
                scope = "alertEngine",
                "lease.bootstrap_failed: {err}, running as sole owner with no lease"
            );
            self.degraded.store(true, Ordering::SeqCst);
            self.owned.store(true, Ordering::SeqCst);
            return;
        }

        loop {
            let acquired = if self.is_owner() {
                self.try_renew().await
            } else {
                self.try_claim().await
            };

            match acquired {
                Ok(true) => {
                    if !self.owned.swap(true, Ordering::SeqCst) {
                        info!(scope = "alertEngine", owner_id = %self.owner_id, "lease.acquired");
                    }
                    tokio::time::sleep(self.heartbeat).await;
                }
                Ok(false) => {
                    let err = EngineError::LeaseConflict;
                    if self.owned.swap(false, Ordering::SeqCst) {
                        warn!(scope = "alertEngine", owner_id = %self.owner_id, "lease.lost: {err}");
                    }
                    tokio::time::sleep(self.retry).await;
                }
                Err(err) => {
                    warn!(scope = "alertEngine", "lease.repo_error: {err}");
                    tokio::time::sleep(self.retry).await;
                }
            }
        }
    }

    async fn try_claim(&self) -> anyhow::Result<bool> {
        if self.degraded.load(Ordering::SeqCst) {
            return Ok(true);
        }
        self.repo.try_claim(&self.name, &self.owner_id, self.ttl).await
    }

    async fn try_renew(&self) -> anyhow::Result<bool> {
        if self.degraded.load(Ordering::SeqCst) {
            return Ok(true);
        }
        self.repo.try_renew(&self.name, &self.owner_id, self.ttl).await
    }

    /// Graceful shutdown (§5): flip the shutdown gate so gated workers stop
    /// admitting new cycles, wait up to `LEASE_WAIT_MAX_SECS` for in-flight
    /// ones to finish, then release the lease (§4.I) so a peer need not
    /// wait out the full TTL.
    pub async fn shutdown(&self) {
        self.shutdown_gate.signal();
        self.shutdown_gate
            .wait_drain(Duration::from_secs(LEASE_WAIT_MAX_SECS))
            .await;

        if self.degraded.load(Ordering::SeqCst) || !self.is_owner() {
            return;
        }
        let release = self.repo.release(&self.name, &self.owner_id);
        match tokio::time::timeout(Duration::from_secs(LEASE_WAIT_MAX_SECS), release).await {
            Ok(Ok(())) => info!(scope = "alertEngine", "lease.released"),
            Ok(Err(err)) => warn!(scope = "alertEngine", "lease.release_failed: {err}"),
            Err(_) => warn!(scope = "alertEngine", "lease.release_timed_out"),
        }
        self.owned.store(false, Ordering::SeqCst);
    }
}
