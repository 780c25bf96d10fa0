//! Asset deletion across every store that holds a copy of the asset
//!
//! S3 objects, search documents and external provider data are removed
//! concurrently. The asset record is deleted last and only when every other
//! stage succeeded, so a partial failure can be retried with the same request.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{Error, Result};
use crate::models::{validate_inventory_id, AssetRecord, DeletionReport, DeletionStatus, StageOutcome};
use crate::providers::ProviderRegistry;
use crate::search::SearchIndex;
use crate::storage::ObjectStore;

/// Asset records
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn get_asset(&self, inventory_id: &str) -> Result<Option<AssetRecord>>;

    async fn delete_asset(&self, inventory_id: &str) -> Result<()>;
}

pub struct AssetDeletionService {
    assets: Arc<dyn AssetStore>,
    objects: Arc<dyn ObjectStore>,
    search: Arc<dyn SearchIndex>,
    providers: ProviderRegistry,
}

/// Object keys of an asset grouped by bucket, without duplicates
fn keys_by_bucket(asset: &AssetRecord) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for location in asset.storage_locations() {
        if location.bucket.is_empty() || location.object_key.full_path.is_empty() {
            continue;
        }
        grouped
            .entry(location.bucket.clone())
            .or_default()
            .insert(location.object_key.full_path.clone());
    }
    grouped
        .into_iter()
        .map(|(bucket, keys)| (bucket, keys.into_iter().collect()))
        .collect()
}

impl AssetDeletionService {
    pub fn new(
        assets: Arc<dyn AssetStore>,
        objects: Arc<dyn ObjectStore>,
        search: Arc<dyn SearchIndex>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            assets,
            objects,
            search,
            providers,
        }
    }

    /// Delete an asset everywhere
    ///
    /// Fails only for an invalid ID, an unknown asset or when the asset
    /// cannot be loaded; store failures are reported in the returned report.
    pub async fn delete_asset(&self, inventory_id: &str) -> Result<DeletionReport> {
        validate_inventory_id(inventory_id)?;

        let asset = self
            .assets
            .get_asset(inventory_id)
            .await?
            .ok_or_else(|| Error::AssetNotFound(inventory_id.to_string()))?;

        let (storage, search_index, providers) = tokio::join!(
            self.delete_objects(&asset),
            self.delete_documents(inventory_id),
            self.providers.delete_all(&asset),
        );

        let failed_stages: Vec<&str> = [("storage", &storage), ("search_index", &search_index)]
            .into_iter()
            .chain(providers.iter().map(|(name, outcome)| (name.as_str(), outcome)))
            .filter(|(_, outcome)| outcome.is_failure())
            .map(|(name, _)| name)
            .collect();

        let record = if failed_stages.is_empty() {
            match self.assets.delete_asset(inventory_id).await {
                Ok(()) => StageOutcome::Succeeded { deleted: 1 },
                Err(e) => StageOutcome::Failed { error: e.to_string() },
            }
        } else {
            warn!(
                inventory_id = %inventory_id,
                failed = ?failed_stages,
                "Keeping asset record after partial deletion"
            );
            StageOutcome::Skipped {
                reason: format!("kept for retry, failed: {}", failed_stages.join(", ")),
            }
        };

        let status = match record {
            StageOutcome::Succeeded { .. } => DeletionStatus::Deleted,
            _ => DeletionStatus::Partial,
        };
        info!(inventory_id = %inventory_id, status = ?status, "Asset deletion finished");

        Ok(DeletionReport {
            inventory_id: inventory_id.to_string(),
            status,
            storage,
            search_index,
            providers,
            record,
        })
    }

    async fn delete_objects(&self, asset: &AssetRecord) -> StageOutcome {
        let grouped = keys_by_bucket(asset);
        if grouped.is_empty() {
            return StageOutcome::Skipped {
                reason: "asset has no stored objects".to_string(),
            };
        }

        let mut deleted = 0u64;
        let mut errors = Vec::new();
        for (bucket, keys) in &grouped {
            match self.objects.delete_objects(bucket, keys).await {
                Ok(failures) => {
                    deleted += keys.len().saturating_sub(failures.len()) as u64;
                    errors.extend(failures.into_iter().map(|f| format!("s3://{}/{}: {}", bucket, f.key, f.error)));
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        if errors.is_empty() {
            StageOutcome::Succeeded { deleted }
        } else {
            StageOutcome::Failed {
                error: errors.join("; "),
            }
        }
    }

    async fn delete_documents(&self, inventory_id: &str) -> StageOutcome {
        match self.search.delete_by_inventory_id(inventory_id).await {
            Ok(deleted) => StageOutcome::Succeeded { deleted },
            Err(e) => StageOutcome::Failed { error: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::init_test_logging;
    use crate::models::IndexAction;
    use crate::providers::tests::StubProvider;
    use crate::search::ItemOutcome;
    use crate::storage::ObjectDeleteError;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryAssets {
        records: Mutex<HashMap<String, AssetRecord>>,
    }

    impl MemoryAssets {
        fn with(asset: AssetRecord) -> Self {
            let store = Self::default();
            store.records.lock().unwrap().insert(asset.inventory_id.clone(), asset);
            store
        }

        fn contains(&self, inventory_id: &str) -> bool {
            self.records.lock().unwrap().contains_key(inventory_id)
        }
    }

    #[async_trait]
    impl AssetStore for MemoryAssets {
        async fn get_asset(&self, inventory_id: &str) -> Result<Option<AssetRecord>> {
            Ok(self.records.lock().unwrap().get(inventory_id).cloned())
        }

        async fn delete_asset(&self, inventory_id: &str) -> Result<()> {
            self.records.lock().unwrap().remove(inventory_id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingObjects {
        deleted: Mutex<Vec<(String, Vec<String>)>>,
        refuse: Vec<String>,
    }

    #[async_trait]
    impl ObjectStore for RecordingObjects {
        async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<ObjectDeleteError>> {
            self.deleted.lock().unwrap().push((bucket.to_string(), keys.to_vec()));
            Ok(keys
                .iter()
                .filter(|k| self.refuse.contains(*k))
                .map(|k| ObjectDeleteError {
                    key: k.clone(),
                    error: "AccessDenied: denied".into(),
                })
                .collect())
        }
    }

    struct Index {
        fail: bool,
    }

    #[async_trait]
    impl SearchIndex for Index {
        async fn bulk(&self, actions: &[IndexAction]) -> Result<Vec<ItemOutcome>> {
            Ok(vec![ItemOutcome::Succeeded; actions.len()])
        }

        async fn delete_by_inventory_id(&self, _inventory_id: &str) -> Result<u64> {
            if self.fail {
                return Err(Error::Search("cluster unavailable".into()));
            }
            Ok(3)
        }
    }

    fn asset() -> AssetRecord {
        serde_json::from_value(json!({
            "InventoryID": "asset:img:1",
            "DigitalSourceAsset": {
                "Type": "Image",
                "MainRepresentation": {"StorageInfo": {"PrimaryLocation": {
                    "Bucket": "ingest", "ObjectKey": {"FullPath": "photos/a.jpg"}
                }}}
            },
            "DerivedRepresentations": [
                {"Purpose": "thumbnail", "StorageInfo": {"PrimaryLocation": {
                    "Bucket": "derived", "ObjectKey": {"FullPath": "thumbs/a.jpg"}
                }}},
                {"Purpose": "proxy", "StorageInfo": {"PrimaryLocation": {
                    "Bucket": "derived", "ObjectKey": {"FullPath": "proxies/a.jpg"}
                }}}
            ]
        }))
        .unwrap()
    }

    fn service(
        assets: Arc<MemoryAssets>,
        objects: Arc<RecordingObjects>,
        search_fails: bool,
        providers: ProviderRegistry,
    ) -> AssetDeletionService {
        init_test_logging();
        AssetDeletionService::new(assets, objects, Arc::new(Index { fail: search_fails }), providers)
    }

    #[test]
    fn test_keys_grouped_by_bucket() {
        let grouped = keys_by_bucket(&asset());
        assert_eq!(grouped["ingest"], vec!["photos/a.jpg".to_string()]);
        assert_eq!(
            grouped["derived"],
            vec!["proxies/a.jpg".to_string(), "thumbs/a.jpg".to_string()]
        );
    }

    #[tokio::test]
    async fn test_full_deletion() {
        let assets = Arc::new(MemoryAssets::with(asset()));
        let objects = Arc::new(RecordingObjects::default());
        let registry = ProviderRegistry::new(vec![Arc::new(StubProvider::new("s3vectors", true, false))]);
        let svc = service(assets.clone(), objects.clone(), false, registry);

        let report = svc.delete_asset("asset:img:1").await.unwrap();

        assert_eq!(report.status, DeletionStatus::Deleted);
        assert_eq!(report.storage, StageOutcome::Succeeded { deleted: 3 });
        assert_eq!(report.search_index, StageOutcome::Succeeded { deleted: 3 });
        assert_eq!(report.providers["s3vectors"], StageOutcome::Succeeded { deleted: 2 });
        assert_eq!(report.record, StageOutcome::Succeeded { deleted: 1 });
        assert!(!assets.contains("asset:img:1"));
        assert_eq!(objects.deleted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_failure_keeps_record() {
        let assets = Arc::new(MemoryAssets::with(asset()));
        let svc = service(assets.clone(), Arc::default(), true, ProviderRegistry::default());

        let report = svc.delete_asset("asset:img:1").await.unwrap();

        assert_eq!(report.status, DeletionStatus::Partial);
        assert!(report.search_index.is_failure());
        assert!(matches!(report.record, StageOutcome::Skipped { ref reason } if reason.contains("search_index")));
        assert!(assets.contains("asset:img:1"));
    }

    #[tokio::test]
    async fn test_object_failure_reported_per_key() {
        let assets = Arc::new(MemoryAssets::with(asset()));
        let objects = Arc::new(RecordingObjects {
            refuse: vec!["thumbs/a.jpg".to_string()],
            ..Default::default()
        });
        let svc = service(assets.clone(), objects, false, ProviderRegistry::default());

        let report = svc.delete_asset("asset:img:1").await.unwrap();

        assert_eq!(report.status, DeletionStatus::Partial);
        assert_eq!(
            report.storage,
            StageOutcome::Failed {
                error: "s3://derived/thumbs/a.jpg: AccessDenied: denied".into()
            }
        );
        assert!(assets.contains("asset:img:1"));
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_record() {
        let assets = Arc::new(MemoryAssets::with(asset()));
        let registry = ProviderRegistry::new(vec![
            Arc::new(StubProvider::new("twelvelabs", true, true)),
            Arc::new(StubProvider::new("coactive", false, false)),
        ]);
        let svc = service(assets.clone(), Arc::default(), false, registry);

        let report = svc.delete_asset("asset:img:1").await.unwrap();

        assert_eq!(report.status, DeletionStatus::Partial);
        assert!(report.providers["twelvelabs"].is_failure());
        assert!(matches!(report.providers["coactive"], StageOutcome::Skipped { .. }));
        assert!(assets.contains("asset:img:1"));
    }

    #[tokio::test]
    async fn test_unknown_asset() {
        let svc = service(Arc::default(), Arc::default(), false, ProviderRegistry::default());
        let err = svc.delete_asset("asset:img:missing").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_invalid_id_rejected_before_lookup() {
        let svc = service(Arc::default(), Arc::default(), false, ProviderRegistry::default());
        let err = svc.delete_asset("a/b").await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
