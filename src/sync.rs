use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Organization, OrganizationChanges, OrganizationDraft, OrganizationId};
use crate::search::SearchIndex;

/// Primary-store operations the coordinator sequences against the mirror.
#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn create(&self, draft: OrganizationDraft) -> Result<Organization>;
    async fn update(
        &self,
        id: OrganizationId,
        changes: OrganizationChanges,
    ) -> Result<Organization>;
    async fn delete(&self, id: OrganizationId) -> Result<()>;
    async fn fetch(&self, id: OrganizationId) -> Result<Option<Organization>>;
    async fn fetch_many(&self, ids: &[OrganizationId]) -> Result<Vec<Organization>>;
    async fn list(&self) -> Result<Vec<Organization>>;
}

/// Keeps the external name-search mirror in step with organization records.
///
/// The two stores share no transaction: the primary store commits first and
/// is authoritative; a failed mirror write surfaces as `SyncFailure` while
/// the primary state stands. The mirror may lag, never lead.
pub struct DirectorySync {
    store: Arc<dyn OrganizationStore>,
    index: Arc<dyn SearchIndex>,
}

impl DirectorySync {
    pub fn new(store: Arc<dyn OrganizationStore>, index: Arc<dyn SearchIndex>) -> Self {
        Self { store, index }
    }

    pub fn store(&self) -> Arc<dyn OrganizationStore> {
        Arc::clone(&self.store)
    }

    pub async fn create_organization(&self, draft: OrganizationDraft) -> Result<Organization> {
        let organization = self.store.create(draft).await?;

        if let Err(err) = self.index.index(organization.id, &organization.name).await {
            tracing::warn!(id = %organization.id, error = %err.source,
                "organization committed but mirror index failed");
            return Err(err.into_sync_failure(
                "Organization was saved, but the search index could not be updated",
            ));
        }

        Ok(organization)
    }

    pub async fn update_organization(
        &self,
        id: OrganizationId,
        changes: OrganizationChanges,
    ) -> Result<Organization> {
        let previous_name = self.store.fetch(id).await?.map(|org| org.name);
        let organization = self.store.update(id, changes).await?;

        // The mirror only holds the name; untouched names need no write.
        if previous_name.as_deref() != Some(organization.name.as_str()) {
            if let Err(err) = self.index.update(organization.id, &organization.name).await {
                tracing::warn!(id = %organization.id, error = %err.source,
                    "organization committed but mirror update failed");
                return Err(err.into_sync_failure(
                    "Organization was updated, but the search index could not be updated",
                ));
            }
        }

        Ok(organization)
    }

    pub async fn delete_organization(&self, id: OrganizationId) -> Result<()> {
        self.store.delete(id).await?;

        if let Err(err) = self.index.remove(id).await {
            tracing::warn!(%id, error = %err.source,
                "organization deleted but mirror removal failed");
            return Err(err.into_sync_failure(
                "Organization was deleted, but the search index could not be updated",
            ));
        }

        Ok(())
    }

    /// Queries the mirror for ids and re-hydrates records from the primary
    /// store, preserving the mirror's relevance order. Ids the primary store
    /// no longer has (stale-delete window) are dropped, not surfaced.
    pub async fn search_organizations(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<Organization>> {
        let ids = self.index.search_by_name(text, limit).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.store.fetch_many(&ids).await?;
        let mut by_id: HashMap<OrganizationId, Organization> =
            records.into_iter().map(|org| (org.id, org)).collect();

        Ok(ids.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }

    /// Pushes every organization into the mirror. Doubles as the out-of-band
    /// repair pass for accumulated sync drift.
    pub async fn reindex_all(&self) -> Result<usize> {
        let organizations = self.store.list().await?;
        let count = organizations.len();

        for organization in organizations {
            self.index
                .index(organization.id, &organization.name)
                .await
                .map_err(|err| {
                    err.into_sync_failure("Bulk reindex stopped on a search index failure")
                })?;
        }

        Ok(count)
    }
}

#[cfg(feature = "sqlx")]
pub use pg::PgOrganizationStore;

#[cfg(feature = "sqlx")]
mod pg {
    use std::sync::Arc;

    use async_trait::async_trait;
    use sqlx::PgPool;

    use crate::db;
    use crate::error::Result;
    use crate::models::{Organization, OrganizationChanges, OrganizationDraft, OrganizationId};

    use super::OrganizationStore;

    #[derive(Clone)]
    pub struct PgOrganizationStore {
        pool: Arc<PgPool>,
    }

    impl PgOrganizationStore {
        pub fn new(pool: Arc<PgPool>) -> Self {
            Self { pool }
        }

        pub fn from_pool(pool: &PgPool) -> Self {
            Self {
                pool: Arc::new(pool.clone()),
            }
        }
    }

    #[async_trait]
    impl OrganizationStore for PgOrganizationStore {
        async fn create(&self, draft: OrganizationDraft) -> Result<Organization> {
            db::create_organization(&self.pool, draft).await
        }

        async fn update(
            &self,
            id: OrganizationId,
            changes: OrganizationChanges,
        ) -> Result<Organization> {
            db::update_organization(&self.pool, id, changes).await
        }

        async fn delete(&self, id: OrganizationId) -> Result<()> {
            db::delete_organization(&self.pool, id).await
        }

        async fn fetch(&self, id: OrganizationId) -> Result<Option<Organization>> {
            db::find_organization(&self.pool, id).await
        }

        async fn fetch_many(&self, ids: &[OrganizationId]) -> Result<Vec<Organization>> {
            db::get_organizations_by_ids(&self.pool, ids).await
        }

        async fn list(&self) -> Result<Vec<Organization>> {
            db::list_organizations(&self.pool).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    use crate::error::{ErrorKind, LibError, Result};
    use crate::models::{Organization, OrganizationChanges, OrganizationDraft, OrganizationId};
    use crate::search::SearchIndex;

    use super::{DirectorySync, OrganizationStore};

    fn timestamp() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 1)
            .expect("valid date")
            .and_hms_opt(0, 0, 0)
            .expect("valid datetime")
    }

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<BTreeMap<i32, Organization>>,
        next_id: Mutex<i32>,
    }

    #[async_trait]
    impl OrganizationStore for MemoryStore {
        async fn create(&self, draft: OrganizationDraft) -> Result<Organization> {
            let mut next_id = self.next_id.lock().expect("lock should not be poisoned");
            *next_id += 1;
            let organization = Organization {
                id: OrganizationId(*next_id),
                name: draft.name,
                phones: draft.phones,
                building_id: draft.building_id,
                created_at: timestamp(),
                updated_at: timestamp(),
            };
            self.records
                .lock()
                .expect("lock should not be poisoned")
                .insert(organization.id.0, organization.clone());
            Ok(organization)
        }

        async fn update(
            &self,
            id: OrganizationId,
            changes: OrganizationChanges,
        ) -> Result<Organization> {
            let mut records = self.records.lock().expect("lock should not be poisoned");
            let organization = records.get_mut(&id.0).ok_or_else(|| {
                LibError::not_found("Organization not found", anyhow!("missing {}", id))
            })?;
            if let Some(name) = changes.name {
                organization.name = name;
            }
            if let Some(phones) = changes.phones {
                organization.phones = phones;
            }
            if let Some(building_id) = changes.building_id {
                organization.building_id = Some(building_id);
            }
            Ok(organization.clone())
        }

        async fn delete(&self, id: OrganizationId) -> Result<()> {
            let mut records = self.records.lock().expect("lock should not be poisoned");
            records.remove(&id.0).ok_or_else(|| {
                LibError::not_found("Organization not found", anyhow!("missing {}", id))
            })?;
            Ok(())
        }

        async fn fetch(&self, id: OrganizationId) -> Result<Option<Organization>> {
            let records = self.records.lock().expect("lock should not be poisoned");
            Ok(records.get(&id.0).cloned())
        }

        async fn fetch_many(&self, ids: &[OrganizationId]) -> Result<Vec<Organization>> {
            let records = self.records.lock().expect("lock should not be poisoned");
            Ok(ids
                .iter()
                .filter_map(|id| records.get(&id.0).cloned())
                .collect())
        }

        async fn list(&self) -> Result<Vec<Organization>> {
            let records = self.records.lock().expect("lock should not be poisoned");
            Ok(records.values().cloned().collect())
        }
    }

    #[derive(Default)]
    struct MemoryIndex {
        documents: Mutex<BTreeMap<i32, String>>,
        events: Mutex<Vec<String>>,
        fail_next: AtomicBool,
    }

    impl MemoryIndex {
        fn fail_next_write(&self) {
            self.fail_next.store(true, Ordering::SeqCst);
        }

        fn take_failure(&self) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(LibError::sync(
                    "Search index is unreachable",
                    anyhow!("injected index failure"),
                ));
            }
            Ok(())
        }

        fn events(&self) -> Vec<String> {
            self.events
                .lock()
                .expect("lock should not be poisoned")
                .clone()
        }

        fn document(&self, id: i32) -> Option<String> {
            self.documents
                .lock()
                .expect("lock should not be poisoned")
                .get(&id)
                .cloned()
        }
    }

    #[async_trait]
    impl SearchIndex for MemoryIndex {
        async fn index(&self, id: OrganizationId, name: &str) -> Result<()> {
            self.take_failure()?;
            self.documents
                .lock()
                .expect("lock should not be poisoned")
                .insert(id.0, name.to_string());
            self.events
                .lock()
                .expect("lock should not be poisoned")
                .push(format!("index {} {}", id, name));
            Ok(())
        }

        async fn update(&self, id: OrganizationId, name: &str) -> Result<()> {
            self.take_failure()?;
            self.documents
                .lock()
                .expect("lock should not be poisoned")
                .insert(id.0, name.to_string());
            self.events
                .lock()
                .expect("lock should not be poisoned")
                .push(format!("update {} {}", id, name));
            Ok(())
        }

        async fn remove(&self, id: OrganizationId) -> Result<()> {
            self.take_failure()?;
            self.documents
                .lock()
                .expect("lock should not be poisoned")
                .remove(&id.0);
            self.events
                .lock()
                .expect("lock should not be poisoned")
                .push(format!("remove {}", id));
            Ok(())
        }

        async fn search_by_name(&self, text: &str, limit: usize) -> Result<Vec<OrganizationId>> {
            let documents = self.documents.lock().expect("lock should not be poisoned");
            Ok(documents
                .iter()
                .filter(|(_, name)| name.to_lowercase().contains(&text.to_lowercase()))
                .map(|(id, _)| OrganizationId(*id))
                .take(limit)
                .collect())
        }
    }

    fn coordinator() -> (DirectorySync, Arc<MemoryStore>, Arc<MemoryIndex>) {
        let store = Arc::new(MemoryStore::default());
        let index = Arc::new(MemoryIndex::default());
        let sync = DirectorySync::new(
            Arc::clone(&store) as Arc<dyn OrganizationStore>,
            Arc::clone(&index) as Arc<dyn SearchIndex>,
        );
        (sync, store, index)
    }

    fn draft(name: &str) -> OrganizationDraft {
        OrganizationDraft {
            name: name.to_string(),
            phones: vec![],
            building_id: None,
        }
    }

    fn rename(name: &str) -> OrganizationChanges {
        OrganizationChanges {
            name: Some(name.to_string()),
            ..OrganizationChanges::default()
        }
    }

    #[tokio::test]
    async fn create_rename_delete_propagate_to_mirror() {
        let (sync, _store, index) = coordinator();

        let acme = sync
            .create_organization(draft("Acme"))
            .await
            .expect("create should succeed");
        assert_eq!(index.document(acme.id.0).as_deref(), Some("Acme"));

        sync.update_organization(acme.id, rename("Acme Corp"))
            .await
            .expect("rename should succeed");
        assert_eq!(index.document(acme.id.0).as_deref(), Some("Acme Corp"));

        sync.delete_organization(acme.id)
            .await
            .expect("delete should succeed");
        assert!(index.document(acme.id.0).is_none());

        assert_eq!(
            index.events(),
            vec![
                format!("index {} Acme", acme.id),
                format!("update {} Acme Corp", acme.id),
                format!("remove {}", acme.id),
            ]
        );
    }

    #[tokio::test]
    async fn unchanged_name_skips_mirror_write() {
        let (sync, _store, index) = coordinator();

        let acme = sync
            .create_organization(draft("Acme"))
            .await
            .expect("create should succeed");

        let changes = OrganizationChanges {
            phones: Some(vec!["1234567".to_string()]),
            ..OrganizationChanges::default()
        };
        sync.update_organization(acme.id, changes)
            .await
            .expect("phone update should succeed");

        assert_eq!(index.events(), vec![format!("index {} Acme", acme.id)]);
    }

    #[tokio::test]
    async fn mirror_failure_keeps_primary_record() {
        let (sync, store, index) = coordinator();
        index.fail_next_write();

        let err = sync
            .create_organization(draft("Acme"))
            .await
            .expect_err("mirror failure should surface");
        assert_eq!(err.kind, ErrorKind::SyncFailure);

        // Primary record committed despite the reported failure.
        let records = store.list().await.expect("list should succeed");
        assert_eq!(records.len(), 1);
        let id = records[0].id;
        assert!(index.document(id.0).is_none());

        // A later successful write on the same id repairs the mirror.
        sync.update_organization(id, rename("Acme Corp"))
            .await
            .expect("repairing update should succeed");
        assert_eq!(index.document(id.0).as_deref(), Some("Acme Corp"));
    }

    #[tokio::test]
    async fn mirror_failure_on_delete_reports_but_record_stays_gone() {
        let (sync, store, index) = coordinator();

        let acme = sync
            .create_organization(draft("Acme"))
            .await
            .expect("create should succeed");

        index.fail_next_write();
        let err = sync
            .delete_organization(acme.id)
            .await
            .expect_err("mirror failure should surface");
        assert_eq!(err.kind, ErrorKind::SyncFailure);

        assert!(store
            .fetch(acme.id)
            .await
            .expect("fetch should succeed")
            .is_none());
        // Mirror is stale: it still knows the deleted organization.
        assert_eq!(index.document(acme.id.0).as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn search_drops_stale_ids_and_preserves_order() {
        let (sync, store, _index) = coordinator();

        let first = sync
            .create_organization(draft("Acme West"))
            .await
            .expect("create should succeed");
        let second = sync
            .create_organization(draft("Acme East"))
            .await
            .expect("create should succeed");

        // Delete one record behind the mirror's back.
        store
            .delete(first.id)
            .await
            .expect("raw delete should succeed");

        let results = sync
            .search_organizations("acme", 10)
            .await
            .expect("search should succeed");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, second.id);
    }

    #[tokio::test]
    async fn reindex_all_repopulates_mirror() {
        let (sync, _store, index) = coordinator();

        let first = sync
            .create_organization(draft("Acme"))
            .await
            .expect("create should succeed");
        let second = sync
            .create_organization(draft("Globex"))
            .await
            .expect("create should succeed");

        // Simulate drift by clearing the mirror.
        index
            .documents
            .lock()
            .expect("lock should not be poisoned")
            .clear();

        let count = sync.reindex_all().await.expect("reindex should succeed");
        assert_eq!(count, 2);
        assert_eq!(index.document(first.id.0).as_deref(), Some("Acme"));
        assert_eq!(index.document(second.id.0).as_deref(), Some("Globex"));
    }
}
