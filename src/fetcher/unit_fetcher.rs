use crate::api::error::ApiError;
use crate::api::{ApiPage, MeasurementApi};
use crate::fetcher::error::FetchError;
use crate::fetcher::rate_limiter::RequestLimiter;
use crate::fetcher::retry::{RetryDecision, RetryPolicy};
use crate::types::fetch_unit::{FetchUnit, TimeWindow};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Every page of one unit, in page order.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedUnit {
    pub unit: FetchUnit,
    pub pages: Vec<serde_json::Value>,
    pub records: u64,
    pub requests: u64,
    pub retries: u64,
}

/// Walks the pages of a [`FetchUnit`] through a shared [`RequestLimiter`].
pub struct UnitFetcher<'a, A> {
    api: &'a A,
    limiter: Arc<RequestLimiter>,
    policy: RetryPolicy,
    page_limit: usize,
    request_timeout: Duration,
    unit_timeout: Duration,
    rate_limit_floor: u32,
    requests: AtomicU64,
    retries: AtomicU64,
}

impl<'a, A: MeasurementApi> UnitFetcher<'a, A> {
    pub fn new(
        api: &'a A,
        limiter: Arc<RequestLimiter>,
        policy: RetryPolicy,
        page_limit: u32,
        request_timeout: Duration,
        unit_timeout: Duration,
        rate_limit_floor: u32,
    ) -> Self {
        Self {
            api,
            limiter,
            policy,
            page_limit: page_limit.max(1) as usize,
            request_timeout,
            unit_timeout,
            rate_limit_floor,
            requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// Requests and retries issued by this fetcher so far, across all units
    /// including failed ones.
    pub fn totals(&self) -> (u64, u64) {
        (
            self.requests.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed),
        )
    }

    /// Fetches all pages of `unit`. The result is either the complete unit or
    /// an error; a partially fetched unit is never returned.
    pub async fn fetch_unit(&self, unit: FetchUnit) -> Result<FetchedUnit, FetchError> {
        match tokio::time::timeout(self.unit_timeout, self.fetch_all_pages(unit)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Abandoning {} after {:?}", unit, self.unit_timeout);
                Err(FetchError::UnitTimeout {
                    unit,
                    limit: self.unit_timeout,
                })
            }
        }
    }

    async fn fetch_all_pages(&self, unit: FetchUnit) -> Result<FetchedUnit, FetchError> {
        let window = unit.window();
        let mut fetched = FetchedUnit {
            unit,
            pages: Vec::new(),
            records: 0,
            requests: 0,
            retries: 0,
        };
        let mut page_num = 1u32;
        loop {
            let page = self
                .fetch_page_with_retry(unit, &window, page_num, &mut fetched)
                .await?;
            debug!("{} page {} returned {} results", unit, page_num, page.result_count);
            // An empty page means the previous one was the last.
            if page.result_count == 0 {
                break;
            }
            let full = page.result_count >= self.page_limit;
            fetched.records += page.result_count as u64;
            fetched.pages.push(page.body);
            if !full {
                break;
            }
            page_num += 1;
        }
        info!(
            "Fetched {}: {} pages, {} records, {} retries",
            unit,
            fetched.pages.len(),
            fetched.records,
            fetched.retries
        );
        Ok(fetched)
    }

    async fn fetch_page_with_retry(
        &self,
        unit: FetchUnit,
        window: &TimeWindow,
        page_num: u32,
        stats: &mut FetchedUnit,
    ) -> Result<ApiPage, FetchError> {
        let mut attempt = 0u32;
        loop {
            let permit = self.limiter.acquire().await?;
            stats.requests += 1;
            self.requests.fetch_add(1, Ordering::Relaxed);
            let outcome = tokio::time::timeout(
                self.request_timeout,
                self.api.measurements_page(unit.sensor_id, window, page_num),
            )
            .await;
            drop(permit);

            let error = match outcome {
                Ok(Ok(page)) => {
                    if let Some(hint) = page.rate_limit {
                        if hint.remaining < self.rate_limit_floor {
                            self.limiter.pause_for(hint.reset).await;
                        }
                    }
                    return Ok(page);
                }
                Ok(Err(e)) => e,
                Err(_) => ApiError::Timeout(format!("{} page {}", unit, page_num)),
            };

            match self.policy.decide(&error, attempt, rand::random::<f64>()) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        "{} page {} failed ({}), retry {} in {:?}",
                        unit,
                        page_num,
                        error,
                        attempt + 1,
                        delay
                    );
                    stats.retries += 1;
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(if error.class() == crate::api::error::ErrorClass::Permanent {
                        FetchError::Permanent {
                            unit,
                            source: error,
                        }
                    } else {
                        FetchError::RetriesExhausted {
                            unit,
                            attempts: attempt + 1,
                            source: error,
                        }
                    });
                }
            }
        }
    }
}
