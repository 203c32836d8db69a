//! Bounded-concurrency delivery of cached payloads.

use crate::cache::UploadCache;
use crate::client::UploadClient;
use crate::error::Result;
use crate::options::{RedundancyOptions, UploadOptions};
use crate::types::{CacheEntry, DispatchReport, PayloadType, UploadEntryId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Result of sending one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The backend acknowledged the entry; it was removed from the cache.
    Delivered,
    /// Every attempt failed; the entry stays cached.
    Failed,
    /// The entry exceeded its attempt budget and was deleted.
    Abandoned,
    /// Another pass is already sending the entry.
    Skipped,
}

struct UploaderInner {
    options: UploadOptions,
    cache: UploadCache,
    client: UploadClient,
    in_flight: DashMap<UploadEntryId, ()>,
    semaphore: Arc<Semaphore>,
}

/// Stages payloads in the cache and delivers them.
///
/// Payloads are written to disk before any network attempt. A dispatch pass
/// sends every cached entry that is not already in flight, at most
/// `max_concurrent_uploads` at a time. An entry is never sent by two
/// passes concurrently.
#[derive(Clone)]
pub struct Uploader {
    inner: Arc<UploaderInner>,
}

impl Uploader {
    /// Validate `options`, open the cache and build the HTTP client.
    pub fn new(options: UploadOptions) -> Result<Self> {
        options.validate()?;
        let cache = UploadCache::open(&options.cache)?;
        let client = UploadClient::new(&options.metadata, options.request_timeout)?;
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent_uploads));

        Ok(Self {
            inner: Arc::new(UploaderInner {
                options,
                cache,
                client,
                in_flight: DashMap::new(),
                semaphore,
            }),
        })
    }

    /// The options in use.
    pub fn options(&self) -> &UploadOptions {
        &self.inner.options
    }

    /// The underlying cache.
    pub fn cache(&self) -> &UploadCache {
        &self.inner.cache
    }

    /// Stage raw bytes without sending them.
    pub fn enqueue(&self, payload_type: PayloadType, data: Vec<u8>) -> Result<CacheEntry> {
        let entry = self.inner.cache.insert(payload_type, data)?;
        tracing::debug!(
            entry_id = %entry.id,
            payload_type = %payload_type,
            bytes = entry.data.len(),
            "Payload staged for upload"
        );
        Ok(entry)
    }

    /// Serialize `payload` as JSON and stage it.
    pub fn enqueue_json<T: Serialize>(
        &self,
        payload_type: PayloadType,
        payload: &T,
    ) -> Result<CacheEntry> {
        let data = serde_json::to_vec(payload)?;
        self.enqueue(payload_type, data)
    }

    /// Stage a payload and send it right away.
    pub async fn upload(&self, payload_type: PayloadType, data: Vec<u8>) -> Result<DeliveryOutcome> {
        let entry = self.enqueue(payload_type, data)?;
        let Some(_guard) = InFlightGuard::claim(&self.inner, entry.id) else {
            return Ok(DeliveryOutcome::Skipped);
        };
        let Ok(_permit) = self.inner.semaphore.acquire().await else {
            return Ok(DeliveryOutcome::Failed);
        };
        Ok(self.inner.send_entry(entry).await)
    }

    /// Send every cached entry not already in flight.
    pub async fn dispatch(&self) -> DispatchReport {
        let mut report = DispatchReport::default();

        let entries = match self.inner.cache.fetch_all() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list upload cache");
                return report;
            }
        };

        let mut tasks: JoinSet<DeliveryOutcome> = JoinSet::new();
        for entry in entries {
            let Some(guard) = InFlightGuard::claim(&self.inner, entry.id) else {
                report.skipped += 1;
                continue;
            };

            let inner = Arc::clone(&self.inner);
            let semaphore = Arc::clone(&self.inner.semaphore);
            tasks.spawn(async move {
                let _guard = guard;
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return DeliveryOutcome::Failed;
                };
                inner.send_entry(entry).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(DeliveryOutcome::Delivered) => report.delivered += 1,
                Ok(DeliveryOutcome::Failed) => report.failed += 1,
                Ok(DeliveryOutcome::Abandoned) => report.abandoned += 1,
                Ok(DeliveryOutcome::Skipped) => report.skipped += 1,
                Err(join_error) => {
                    tracing::error!(error = %join_error, "Upload task did not complete");
                    report.failed += 1;
                }
            }
        }

        if report.attempted() > 0 || report.skipped > 0 {
            tracing::info!(%report, "Upload dispatch finished");
        }
        report
    }

    /// Number of entries currently being sent.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }
}

impl UploaderInner {
    fn url_for(&self, payload_type: PayloadType) -> &Url {
        match payload_type {
            PayloadType::Session => &self.options.endpoints.sessions_url,
            PayloadType::Blob => &self.options.endpoints.blobs_url,
        }
    }

    async fn send_entry(&self, entry: CacheEntry) -> DeliveryOutcome {
        let url = self.url_for(entry.payload_type);
        let redundancy = self.options.redundancy;
        let attempts = redundancy.automatic_retry_count.saturating_add(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(&redundancy, attempt)).await;
            }

            match self.client.post(url, entry.data.clone()).await {
                Ok(()) => {
                    if let Err(e) = self.cache.delete(entry.id) {
                        tracing::warn!(
                            entry_id = %entry.id,
                            error = %e,
                            "Delivered entry could not be removed from cache"
                        );
                    }
                    tracing::debug!(entry_id = %entry.id, attempt, "Payload delivered");
                    return DeliveryOutcome::Delivered;
                }
                Err(e) => {
                    tracing::debug!(
                        entry_id = %entry.id,
                        attempt,
                        retriable = e.is_retriable(),
                        error = %e,
                        "Upload attempt failed"
                    );
                }
            }
        }

        match self.cache.record_failed_attempt(entry.id) {
            Ok(Some(count)) if count > redundancy.max_attempts => {
                tracing::warn!(
                    entry_id = %entry.id,
                    payload_type = %entry.payload_type,
                    attempts = count,
                    "Abandoning payload after exceeding retry limit"
                );
                if let Err(e) = self.cache.delete(entry.id) {
                    tracing::warn!(entry_id = %entry.id, error = %e, "Failed to delete abandoned entry");
                }
                DeliveryOutcome::Abandoned
            }
            Ok(Some(count)) => {
                tracing::info!(
                    entry_id = %entry.id,
                    attempts = count,
                    "Payload kept in cache for a later pass"
                );
                DeliveryOutcome::Failed
            }
            Ok(None) => DeliveryOutcome::Failed,
            Err(e) => {
                tracing::warn!(entry_id = %entry.id, error = %e, "Failed to record upload attempt");
                DeliveryOutcome::Failed
            }
        }
    }
}

/// Jittered exponential backoff before retry number `attempt` (1-based).
fn backoff_delay(redundancy: &RedundancyOptions, attempt: u32) -> Duration {
    if redundancy.retry_base_delay.is_zero() {
        return Duration::ZERO;
    }
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = redundancy
        .retry_base_delay
        .saturating_mul(1u32 << exponent)
        .min(MAX_BACKOFF);
    let jitter: f64 = rand::thread_rng().gen_range(0.5..=1.0);
    delay.mul_f64(jitter)
}

/// Marks an entry as in flight until dropped.
struct InFlightGuard {
    inner: Arc<UploaderInner>,
    id: UploadEntryId,
}

impl InFlightGuard {
    fn claim(inner: &Arc<UploaderInner>, id: UploadEntryId) -> Option<Self> {
        match inner.in_flight.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(Self {
                    inner: Arc::clone(inner),
                    id,
                })
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.id);
    }
}
