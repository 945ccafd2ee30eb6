//! Catalog loading and the 5-minute TTL cache.
//!
//! The engine never talks to catalog storage directly; it reads through
//! `CatalogCache`, which loads via a `CatalogSource` (Postgres in
//! production, a fixture in tests) and rebuilds the selector index on
//! every reload.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use chomp_core::{ChompError, ProductId};

use crate::classification::ClassificationConfig;
use crate::score::ScoreConfig;
use crate::selector::SelectorIndex;
use crate::types::{AchievementDef, ProductMeta, StreakConfig};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("catalog load timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid catalog: {0}")]
    Invalid(String),
}

impl From<CatalogError> for ChompError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Unavailable(msg) => {
                ChompError::DependencyUnavailable(format!("catalog_unavailable: {}", msg))
            }
            CatalogError::Timeout(after) => {
                ChompError::Transient(format!("catalog load timed out after {:?}", after))
            }
            CatalogError::Invalid(msg) => ChompError::Internal(msg),
        }
    }
}

/// Raw catalog contents as loaded from storage.
#[derive(Debug, Clone, Default)]
pub struct CatalogData {
    pub achievements: Vec<AchievementDef>,
    pub products: Vec<ProductMeta>,
    pub classification: ClassificationConfig,
    pub score: ScoreConfig,
    pub streak: StreakConfig,
}

/// Indexed, validated catalog snapshot shared by all engine components.
#[derive(Debug)]
pub struct Catalog {
    achievements: Vec<AchievementDef>,
    by_code: HashMap<String, usize>,
    products: HashMap<ProductId, ProductMeta>,
    pub classification: ClassificationConfig,
    pub score: ScoreConfig,
    pub streak: StreakConfig,
    pub selector: SelectorIndex,
}

impl Catalog {
    pub fn new(data: CatalogData) -> Result<Self, CatalogError> {
        for def in &data.achievements {
            def.validate()
                .map_err(|e| CatalogError::Invalid(format!("{}: {}", def.code, e)))?;
        }

        let selector = SelectorIndex::build(&data.achievements);
        let by_code = data
            .achievements
            .iter()
            .enumerate()
            .map(|(i, def)| (def.code.clone(), i))
            .collect();
        let products = data
            .products
            .into_iter()
            .map(|p| (p.product_id.clone(), p))
            .collect();

        Ok(Self {
            achievements: data.achievements,
            by_code,
            products,
            classification: data.classification,
            score: data.score,
            streak: data.streak,
            selector,
        })
    }

    pub fn achievements(&self) -> &[AchievementDef] {
        &self.achievements
    }

    pub fn achievement(&self, code: &str) -> Option<&AchievementDef> {
        self.by_code.get(code).map(|&i| &self.achievements[i])
    }

    pub fn product(&self, product_id: &str) -> Option<&ProductMeta> {
        self.products.get(product_id)
    }

    pub fn products(&self) -> impl Iterator<Item = &ProductMeta> {
        self.products.values()
    }

    /// Rankable products matching a dynamic collection's filter.
    pub fn matching_products(
        &self,
        animal_type: Option<&str>,
        flavor: Option<&str>,
    ) -> Vec<&ProductMeta> {
        self.products
            .values()
            .filter(|p| p.rankable && p.matches(animal_type, flavor))
            .collect()
    }
}

/// Async source of catalog data — Postgres in production, fixtures in tests.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn load(&self) -> Result<CatalogData, CatalogError>;
}

/// TTL cache over a `CatalogSource` with explicit invalidation. A reload
/// that exceeds `load_timeout` fails transient instead of holding the
/// write lock open.
pub struct CatalogCache {
    source: Arc<dyn CatalogSource>,
    ttl: Duration,
    load_timeout: Duration,
    slot: RwLock<Option<(Instant, Arc<Catalog>)>>,
}

impl CatalogCache {
    pub fn new(source: Arc<dyn CatalogSource>, ttl: Duration, load_timeout: Duration) -> Self {
        Self {
            source,
            ttl,
            load_timeout,
            slot: RwLock::new(None),
        }
    }

    /// Current catalog, reloading if the cached copy is stale or absent.
    pub async fn get(&self) -> Result<Arc<Catalog>, CatalogError> {
        {
            let slot = self.slot.read().await;
            if let Some((loaded_at, catalog)) = slot.as_ref() {
                if loaded_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(catalog));
                }
            }
        }

        let mut slot = self.slot.write().await;
        // Another task may have reloaded while we waited for the lock.
        if let Some((loaded_at, catalog)) = slot.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(catalog));
            }
        }

        let data = match tokio::time::timeout(self.load_timeout, self.source.load()).await {
            Ok(loaded) => loaded?,
            Err(_) => return Err(CatalogError::Timeout(self.load_timeout)),
        };
        let catalog = Arc::new(Catalog::new(data)?);
        info!(
            achievements = catalog.achievements.len(),
            products = catalog.products.len(),
            "Catalog loaded"
        );
        *slot = Some((Instant::now(), Arc::clone(&catalog)));
        Ok(catalog)
    }

    /// Drop the cached snapshot; the next `get` reloads.
    pub async fn invalidate(&self) {
        debug!("Catalog cache invalidated");
        *self.slot.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl CatalogSource for CountingSource {
        async fn load(&self) -> Result<CatalogData, CatalogError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(CatalogData::default())
        }
    }

    #[tokio::test]
    async fn cache_serves_until_invalidated() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let cache = CatalogCache::new(
            source.clone(),
            Duration::from_secs(300),
            Duration::from_millis(500),
        );

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        cache.invalidate().await;
        cache.get().await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_ttl_reloads() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let cache = CatalogCache::new(
            source.clone(),
            Duration::from_millis(0),
            Duration::from_millis(500),
        );
        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    struct StalledSource;

    #[async_trait]
    impl CatalogSource for StalledSource {
        async fn load(&self) -> Result<CatalogData, CatalogError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CatalogData::default())
        }
    }

    #[tokio::test]
    async fn stalled_source_fails_transient_at_the_load_timeout() {
        let cache = CatalogCache::new(
            Arc::new(StalledSource),
            Duration::from_secs(300),
            Duration::from_millis(10),
        );

        let error = cache.get().await.unwrap_err();
        assert!(matches!(error, CatalogError::Timeout(_)));
        let chomp: ChompError = error.into();
        assert!(chomp.is_retryable());
    }
}
