//! Repository Pattern Abstractions
//!
//! Following the same split `rustrade::domain::repositories` uses —
//! `AlertRepository` persists the user-facing alert record (CRUD-owned
//! externally, §3), `LeaseRepository` is the sole cross-process critical
//! section (§5) backing the Lease Coordinator (§4.I).

use crate::domain::types::Alert;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Repository for the persistent alert record.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// All alerts with `is_active = true` (used by the Fast Price Loop and
    /// the Complex Alert Cache refresh).
    async fn find_active(&self) -> Result<Vec<Alert>>;

    /// All active, non-triggered price alerts (Fast Price Loop, Klines Sweep).
    async fn find_active_price_alerts(&self) -> Result<Vec<Alert>>;

    /// All active complex alerts (Complex Alert Cache refresh).
    async fn find_active_complex_alerts(&self) -> Result<Vec<Alert>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Alert>>;

    /// Delete a price alert on fire. Implementations guard this with a
    /// unique-key predicate so a duplicate concurrent fire harmlessly no-ops
    /// (§4.J) — returns `true` iff this call actually removed the row.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Mark a complex alert triggered without deactivating it (§3 invariant).
    async fn mark_triggered(&self, id: &str, triggered_at: DateTime<Utc>) -> Result<()>;

    async fn upsert(&self, alert: &Alert) -> Result<()>;
}

/// A lease row: `{name, owner_id, acquired_at, renewed_at, expires_at, meta}`
/// (§3). `name` is the primary key — one row per logical single-worker lock.
#[derive(Debug, Clone)]
pub struct LeaseRow {
    pub name: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub meta: Option<String>,
}

/// The sole cross-process critical section (§5). Every mutation is a
/// conditional update predicated on `owner_id`/`expires_at` — there is no
/// separate locking primitive, the SQL `WHERE` clause *is* the lock.
#[async_trait]
pub trait LeaseRepository: Send + Sync {
    async fn ensure_table(&self) -> Result<()>;

    /// Attempt to claim the lease: succeeds iff the row is absent, expired,
    /// or already owned by `owner_id` (§4.I).
    async fn try_claim(
        &self,
        name: &str,
        owner_id: &str,
        ttl: chrono::Duration,
    ) -> Result<bool>;

    /// Renew the lease: succeeds iff still owned by `owner_id` and not yet
    /// expired (§4.I).
    async fn try_renew(&self, name: &str, owner_id: &str, ttl: chrono::Duration) -> Result<bool>;

    /// Release the lease iff still owned by `owner_id` (used on shutdown).
    async fn release(&self, name: &str, owner_id: &str) -> Result<()>;

    async fn get(&self, name: &str) -> Result<Option<LeaseRow>>;
}

/// Read-only view onto the user store (§6 `User(..., telegramChatId?)`).
/// The core never writes users; account/linking flows are an external
/// collaborator (§1).
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn telegram_chat_id(&self, user_id: &str) -> Result<Option<String>>;
}
