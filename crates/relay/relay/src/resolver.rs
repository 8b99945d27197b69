//! Tenant resolution across an ordered chain of stores.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::RelayResult;
use crate::tenant::{TenantRecord, TenantRoute};

/// Trait for tenant configuration stores.
#[async_trait]
pub trait TenantSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Looks up the record for a platform object id.
    async fn find(&self, object_id: &str) -> RelayResult<Option<TenantRecord>>;
}

/// In-memory tenant store, used as the primary source.
///
/// Populated by whatever owns tenant registration.
pub struct InMemoryTenantStore {
    tenants: RwLock<HashMap<String, TenantRecord>>,
}

impl InMemoryTenantStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a shared empty store.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Inserts or replaces a tenant record.
    pub async fn upsert(&self, record: TenantRecord) {
        let mut tenants = self.tenants.write().await;
        tenants.insert(record.object_id.clone(), record);
    }

    /// Removes a tenant record.
    pub async fn remove(&self, object_id: &str) -> Option<TenantRecord> {
        let mut tenants = self.tenants.write().await;
        tenants.remove(object_id)
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.tenants.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.tenants.read().await.is_empty()
    }
}

impl Default for InMemoryTenantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantSource for InMemoryTenantStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find(&self, object_id: &str) -> RelayResult<Option<TenantRecord>> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(object_id).cloned())
    }
}

/// Immutable tenant table loaded once at startup, used as the fallback.
pub struct StaticTenantSource {
    tenants: HashMap<String, TenantRecord>,
}

impl StaticTenantSource {
    /// Builds the table from records. Later duplicates replace earlier ones.
    pub fn new(records: impl IntoIterator<Item = TenantRecord>) -> Self {
        let tenants = records
            .into_iter()
            .map(|r| (r.object_id.clone(), r))
            .collect();
        Self { tenants }
    }

    /// An empty table.
    pub fn empty() -> Self {
        Self {
            tenants: HashMap::new(),
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[async_trait]
impl TenantSource for StaticTenantSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn find(&self, object_id: &str) -> RelayResult<Option<TenantRecord>> {
        Ok(self.tenants.get(object_id).cloned())
    }
}

/// Resolves a platform object id to a delivery route.
///
/// Sources are polled in order; the first usable route wins. Source errors
/// and unusable records are logged and the next source is tried.
#[derive(Clone, Default)]
pub struct TenantResolver {
    sources: Vec<Arc<dyn TenantSource>>,
}

impl TenantResolver {
    /// Creates a resolver with no sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source to the chain.
    pub fn with_source(mut self, source: Arc<dyn TenantSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Number of sources in the chain.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Returns the route for `object_id`, or `None` if no source has a
    /// usable record.
    pub async fn resolve(&self, object_id: &str) -> Option<TenantRoute> {
        for source in &self.sources {
            let record = match source.find(object_id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(source = source.name(), object_id, error = %e, "Tenant source lookup failed");
                    continue;
                }
            };

            match record.to_route() {
                Some(route) => {
                    debug!(source = source.name(), object_id, "Tenant route resolved");
                    return Some(route);
                }
                None => {
                    warn!(
                        source = source.name(),
                        object_id, "Tenant config missing callback URL or secret"
                    );
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;

    struct FailingSource;

    #[async_trait]
    impl TenantSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn find(&self, _object_id: &str) -> RelayResult<Option<TenantRecord>> {
            Err(RelayError::Storage("connection refused".to_string()))
        }
    }

    fn record(id: &str, url: &str) -> TenantRecord {
        TenantRecord::new(id, url, "secret")
    }

    #[tokio::test]
    async fn test_primary_source_wins() {
        let primary = InMemoryTenantStore::shared();
        primary.upsert(record("1", "https://primary.example.com")).await;
        let fallback = Arc::new(StaticTenantSource::new([record("1", "https://static.example.com")]));

        let resolver = TenantResolver::new()
            .with_source(primary)
            .with_source(fallback);

        let route = resolver.resolve("1").await.unwrap();
        assert_eq!(route.callback_url, "https://primary.example.com");
    }

    #[tokio::test]
    async fn test_falls_back_to_static_source() {
        let primary = InMemoryTenantStore::shared();
        let fallback = Arc::new(StaticTenantSource::new([record("2", "https://static.example.com")]));

        let resolver = TenantResolver::new()
            .with_source(primary)
            .with_source(fallback);

        let route = resolver.resolve("2").await.unwrap();
        assert_eq!(route.callback_url, "https://static.example.com");
        assert!(resolver.resolve("3").await.is_none());
    }

    #[tokio::test]
    async fn test_unusable_record_is_skipped() {
        let primary = InMemoryTenantStore::shared();
        primary
            .upsert(TenantRecord {
                object_id: "4".to_string(),
                callback_url: None,
                app_secret: Some("secret".to_string()),
                verify_token: None,
            })
            .await;

        let resolver = TenantResolver::new().with_source(primary.clone());
        assert!(resolver.resolve("4").await.is_none());

        let resolver = resolver.with_source(Arc::new(StaticTenantSource::new([record(
            "4",
            "https://static.example.com",
        )])));
        assert!(resolver.resolve("4").await.is_some());
    }

    #[tokio::test]
    async fn test_source_error_does_not_stop_chain() {
        let fallback = Arc::new(StaticTenantSource::new([record("5", "https://static.example.com")]));
        let resolver = TenantResolver::new()
            .with_source(Arc::new(FailingSource))
            .with_source(fallback);

        assert!(resolver.resolve("5").await.is_some());
    }

    #[tokio::test]
    async fn test_in_memory_store_remove() {
        let store = InMemoryTenantStore::new();
        store.upsert(record("6", "https://t.example.com")).await;
        assert_eq!(store.len().await, 1);

        assert!(store.remove("6").await.is_some());
        assert!(store.is_empty().await);
    }
}
