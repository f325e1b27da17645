//! Concurrency limiter implementation
//!
//! Semaphore-based limiter bounding how many exports run against the
//! PowerBI backend at the same time.

use super::config::ConcurrencyConfig;
use anyhow::{Context, Result};
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Permit count used when limiting is off (Tokio's maximum is 2^61-1)
const UNLIMITED_PERMITS: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    config: ConcurrencyConfig,
    permits: usize,
    requests_acquired: Arc<AtomicU64>,
    requests_waited: Arc<AtomicU64>,
}

impl ConcurrencyLimiter {
    pub fn new(config: ConcurrencyConfig) -> Self {
        let permits = if config.enabled {
            config.max_concurrent_requests.clamp(1, UNLIMITED_PERMITS)
        } else {
            UNLIMITED_PERMITS
        };

        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
            permits,
            requests_acquired: Arc::new(AtomicU64::new(0)),
            requests_waited: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wait for a permit; it is released when dropped
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        if self.config.enabled && self.semaphore.available_permits() == 0 {
            self.requests_waited.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Concurrency limiter: waiting for permit ({} in use)",
                self.permits
            );
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Concurrency limiter was closed")?;
        self.requests_acquired.fetch_add(1, Ordering::Relaxed);

        if self.config.enabled {
            debug!(
                "Concurrency limiter: acquired permit ({}/{} in use)",
                self.permits - self.available_permits(),
                self.permits
            );
        }
        Ok(permit)
    }

    pub fn available_permits(&self) -> usize {
        if !self.config.enabled {
            return usize::MAX;
        }
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            max_concurrent_requests: self.permits,
            requests_acquired: self.requests_acquired.load(Ordering::Relaxed),
            requests_waited: self.requests_waited.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyStats {
    pub max_concurrent_requests: usize,
    /// Total permits handed out
    pub requests_acquired: u64,
    /// How often a caller had to wait for a permit
    pub requests_waited: u64,
}
