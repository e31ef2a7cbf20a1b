//! Cycle market resolution
//!
//! Maps a strategy's slug template plus a period-start timestamp to the
//! concrete market spawned for that cycle: its outcome token ids, title and
//! (once known) on-chain condition id. Resolution goes through the venue's
//! metadata API and is memoized per cycle.

mod gamma;

pub use gamma::{GammaClient, GammaConfig};

use crate::cycle;
use crate::strategy::Strategy;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// The concrete market spawned for one cycle.
#[derive(Debug, Clone)]
pub struct CycleMarket {
    /// Outcome token ids, outcome index order.
    pub token_ids: Vec<String>,
    /// Human-readable market title.
    pub title: Option<String>,
    /// On-chain condition id, when the metadata API exposes it.
    pub condition_id: Option<String>,
}

/// Read-only lookup of cycle-market metadata by slug.
#[async_trait]
pub trait MarketResolver: Send + Sync {
    /// Resolve a market by its deterministic slug. `Ok(None)` means the
    /// market does not exist (yet); errors are transient lookup failures.
    async fn resolve(&self, slug: &str) -> anyhow::Result<Option<CycleMarket>>;
}

/// Per-cycle memoizing wrapper around a [`MarketResolver`].
///
/// Entries live until their cycle ends and are evicted lazily on the next
/// resolve call, so the map stays bounded by the number of live cycles.
pub struct CachedResolver {
    inner: Arc<dyn MarketResolver>,
    cache: DashMap<String, (i64, CycleMarket)>,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn MarketResolver>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Resolve the market for a strategy's cycle, serving repeat lookups for
    /// the same cycle from memory.
    pub async fn resolve_cycle(
        &self,
        strategy: &Strategy,
        period_start: i64,
        now: i64,
    ) -> anyhow::Result<Option<CycleMarket>> {
        self.cache.retain(|_, (expires_at, _)| *expires_at > now);

        let slug = cycle::market_slug(&strategy.slug_template, period_start);
        if let Some(entry) = self.cache.get(&slug) {
            return Ok(Some(entry.1.clone()));
        }

        let Some(market) = self.inner.resolve(&slug).await? else {
            return Ok(None);
        };
        let expires_at = cycle::period_end(period_start, strategy.interval_seconds);
        self.cache.insert(slug, (expires_at, market.clone()));
        Ok(Some(market))
    }
}

#[async_trait]
impl MarketResolver for CachedResolver {
    async fn resolve(&self, slug: &str) -> anyhow::Result<Option<CycleMarket>> {
        self.inner.resolve(slug).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_strategy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketResolver for CountingResolver {
        async fn resolve(&self, _slug: &str) -> anyhow::Result<Option<CycleMarket>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(CycleMarket {
                token_ids: vec!["up".to_string(), "down".to_string()],
                title: Some("BTC up or down".to_string()),
                condition_id: Some("0xc0".to_string()),
            }))
        }
    }

    #[tokio::test]
    async fn test_cached_resolver_memoizes_per_cycle() {
        let inner = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let resolver = CachedResolver::new(inner.clone());
        let strategy = test_strategy(1);

        let a = resolver
            .resolve_cycle(&strategy, 1_000_200, 1_000_210)
            .await
            .unwrap();
        let b = resolver
            .resolve_cycle(&strategy, 1_000_200, 1_000_290)
            .await
            .unwrap();
        assert!(a.is_some() && b.is_some());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_resolver_evicts_after_cycle_end() {
        let inner = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let resolver = CachedResolver::new(inner.clone());
        let strategy = test_strategy(1);

        resolver
            .resolve_cycle(&strategy, 1_000_200, 1_000_210)
            .await
            .unwrap();
        // next cycle: old entry expired, new slug resolved fresh
        resolver
            .resolve_cycle(&strategy, 1_000_500, 1_000_510)
            .await
            .unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
