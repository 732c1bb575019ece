//! Daily per-IP request quota.
//!
//! Each client IP gets a counter per UTC day, keyed `"{ip}_{YYYY-MM-DD}"`. The
//! counter lives in a shared store (Postgres) or an in-process cache. Store
//! failures never block a citizen: the limiter fails open.

use axum::http::HeaderMap;
use chrono::{NaiveDate, Utc};
use failsafe::futures::CircuitBreaker;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::circuit_breaker::{create_store_circuit_breaker, StoreBreaker};
use crate::db::Database;
use crate::errors::{AppError, ResultExt};

pub const DEFAULT_DAILY_LIMIT: u32 = 3;

/// Remaining count reported when no store is configured.
pub const BYPASS_REMAINING: u32 = 999;

/// Remaining count reported when the store failed.
pub const FAIL_OPEN_REMAINING: u32 = 1;

const FALLBACK_IP: &str = "127.0.0.1";

/// Distinct `ip_day` keys the in-process store holds. Past this moka may evict
/// live counters, which resets those clients' quotas; use the Postgres store
/// for more traffic than that.
pub const MEMORY_STORE_CAPACITY: u64 = 1_000_000;

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
}

impl RateLimitDecision {
    fn allowed(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
        }
    }

    fn denied() -> Self {
        Self {
            allowed: false,
            remaining: 0,
        }
    }
}

/// Backing store for the daily counters.
#[derive(Clone)]
pub enum CounterStore {
    Postgres(Database),
    Memory(Cache<String, u32>),
    Disabled,
}

impl CounterStore {
    /// In-process counters; entries outlive a day so a key never resets early.
    pub fn memory() -> Self {
        CounterStore::Memory(
            Cache::builder()
                .time_to_live(Duration::from_secs(36 * 3600))
                .max_capacity(MEMORY_STORE_CAPACITY)
                .build(),
        )
    }

    /// Increments the counter unless it already reached `limit`.
    ///
    /// Returns the new count, or `None` when the quota is exhausted.
    pub async fn increment_below(&self, key: &str, limit: u32) -> Result<Option<u32>, AppError> {
        match self {
            CounterStore::Postgres(db) => {
                let pool = db.ready().await?;
                let limit = i32::try_from(limit).map_err(|_| {
                    AppError::InternalError(format!("daily limit {} does not fit a counter", limit))
                })?;
                let row: Option<(i32,)> = sqlx::query_as(
                    "INSERT INTO rate_limits (doc_id, count, created_at)
                     VALUES ($1, 1, NOW())
                     ON CONFLICT (doc_id) DO UPDATE
                        SET count = rate_limits.count + 1, updated_at = NOW()
                        WHERE rate_limits.count < $2
                     RETURNING count",
                )
                .bind(key)
                .bind(limit)
                .fetch_optional(pool)
                .await
                .context("rate limit counter upsert")?;

                Ok(row.map(|(count,)| count.max(0) as u32))
            }
            CounterStore::Memory(cache) => {
                let outcome = cache
                    .entry(key.to_string())
                    .and_compute_with(|entry| {
                        let current = entry.map(|e| e.into_value()).unwrap_or(0);
                        let op = if current >= limit {
                            Op::Nop
                        } else {
                            Op::Put(current + 1)
                        };
                        std::future::ready(op)
                    })
                    .await;

                match outcome {
                    CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => {
                        Ok(Some(entry.into_value()))
                    }
                    _ => Ok(None),
                }
            }
            CounterStore::Disabled => Ok(Some(0)),
        }
    }
}

/// Daily quota enforcement on top of a [`CounterStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: CounterStore,
    daily_limit: u32,
    breaker: StoreBreaker,
}

impl RateLimiter {
    pub fn new(store: CounterStore, daily_limit: u32) -> Self {
        Self {
            store,
            daily_limit,
            breaker: create_store_circuit_breaker(),
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    pub async fn check(&self, ip: &str) -> RateLimitDecision {
        self.check_on(ip, Utc::now().date_naive()).await
    }

    /// Checks and consumes one request of `ip`'s quota for `day`.
    pub async fn check_on(&self, ip: &str, day: NaiveDate) -> RateLimitDecision {
        if matches!(self.store, CounterStore::Disabled) {
            return RateLimitDecision::allowed(BYPASS_REMAINING);
        }
        if self.daily_limit == 0 {
            return RateLimitDecision::denied();
        }

        let key = counter_key(ip, day);
        match self
            .breaker
            .call(self.store.increment_below(&key, self.daily_limit))
            .await
        {
            Ok(Some(count)) => {
                RateLimitDecision::allowed(self.daily_limit.saturating_sub(count))
            }
            Ok(None) => {
                tracing::info!("Daily quota exhausted for {}", key);
                RateLimitDecision::denied()
            }
            Err(failsafe::Error::Inner(e)) => {
                tracing::error!("Rate limit error: {}", e);
                RateLimitDecision::allowed(FAIL_OPEN_REMAINING)
            }
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Rate limit store circuit open, allowing request");
                RateLimitDecision::allowed(FAIL_OPEN_REMAINING)
            }
        }
    }
}

/// Counter document id for an IP on a given day.
pub fn counter_key(ip: &str, day: NaiveDate) -> String {
    format!("{}_{}", ip, day.format("%Y-%m-%d"))
}

/// Resolves the client IP behind proxies.
///
/// Order: first `X-Forwarded-For` entry, `X-Real-IP`, socket peer, loopback.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| FALLBACK_IP.to_string())
}
