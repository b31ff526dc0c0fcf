//! The search-index worker: applies index requests against the backend.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::search::{IndexProvider, IndexRequest};
use crate::store::DataStore;

use super::WorkerError;

pub struct SearchIndexWorker {
    store: Arc<dyn DataStore>,
    provider: Arc<dyn IndexProvider>,
    cease_operation: bool,
}

impl SearchIndexWorker {
    pub fn new(
        store: Arc<dyn DataStore>,
        provider: Arc<dyn IndexProvider>,
        cease_operation: bool,
    ) -> Self {
        Self {
            store,
            provider,
            cease_operation,
        }
    }

    /// Handle one delivery from the search-indexing topic.
    ///
    /// Requests are idempotent, so backend failures are logged rather than
    /// surfaced; replaying the same request later converges on the same
    /// index state either way.
    pub async fn handle(&self, raw: &[u8]) -> Result<(), WorkerError> {
        if self.cease_operation {
            warn!("operations ceased, dropping message");
            return Ok(());
        }

        let request: IndexRequest = serde_json::from_slice(raw)?;
        let index = self.provider.index_for(request.index_type);

        if request.delete {
            if let Err(e) = index.delete(&request.row_id).await {
                error!(
                    error = %e,
                    index = %request.index_type,
                    row_id = %request.row_id,
                    "deleting search document"
                );
                return Ok(());
            }

            info!(index = %request.index_type, row_id = %request.row_id, "search document removed");
            return Ok(());
        }

        let subset = match self
            .store
            .load_search_subset(request.index_type, &request.row_id)
            .await
        {
            Ok(Some(subset)) => subset,
            Ok(None) => {
                // row was deleted between fan-out and now
                warn!(
                    index = %request.index_type,
                    row_id = %request.row_id,
                    "row no longer exists, skipping index update"
                );
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, row_id = %request.row_id, "loading row for indexing");
                return Ok(());
            }
        };

        if let Err(e) = index.upsert(&request.row_id, &subset).await {
            error!(
                error = %e,
                index = %request.index_type,
                row_id = %request.row_id,
                "upserting search document"
            );
            return Ok(());
        }

        if let Err(e) = self
            .store
            .mark_as_indexed(request.index_type, &request.row_id)
            .await
        {
            warn!(error = %e, row_id = %request.row_id, "recording index timestamp");
        }

        info!(index = %request.index_type, row_id = %request.row_id, "search document updated");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{IndexType, SearchIndex};
    use crate::store::SearchSubset;
    use crate::testutil::{MemoryStore, RecordingIndex};

    struct SingleIndexProvider(Arc<RecordingIndex>);

    impl IndexProvider for SingleIndexProvider {
        fn index_for(&self, _index: IndexType) -> Arc<dyn SearchIndex> {
            self.0.clone()
        }
    }

    fn worker(store: MemoryStore, index: Arc<RecordingIndex>) -> SearchIndexWorker {
        SearchIndexWorker::new(Arc::new(store), Arc::new(SingleIndexProvider(index)), false)
    }

    #[tokio::test]
    async fn upsert_request_projects_and_stamps_the_row() {
        let subset = SearchSubset::Named {
            id: "r1".into(),
            name: "Soup".into(),
            description: "hot".into(),
        };
        let store = MemoryStore::default().with_subset(IndexType::Recipes, subset.clone());
        let store = Arc::new(store);
        let index = Arc::new(RecordingIndex::default());
        let worker = SearchIndexWorker::new(
            store.clone(),
            Arc::new(SingleIndexProvider(index.clone())),
            false,
        );

        let raw = serde_json::to_vec(&IndexRequest::new("r1", IndexType::Recipes, false)).unwrap();
        worker.handle(&raw).await.unwrap();

        let upserts = index.upserts.lock().unwrap();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].0, "r1");
        assert_eq!(upserts[0].1, subset);

        assert_eq!(store.indexed(), vec![(IndexType::Recipes, "r1".to_string())]);
    }

    #[tokio::test]
    async fn delete_request_skips_the_database() {
        let index = Arc::new(RecordingIndex::default());
        let worker = worker(MemoryStore::default(), index.clone());

        let raw = serde_json::to_vec(&IndexRequest::new("u1", IndexType::Users, true)).unwrap();
        worker.handle(&raw).await.unwrap();

        assert_eq!(index.deletes.lock().unwrap().as_slice(), &["u1".to_string()]);
        assert!(index.upserts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_row_is_skipped_quietly() {
        let index = Arc::new(RecordingIndex::default());
        let worker = worker(MemoryStore::default(), index.clone());

        let raw = serde_json::to_vec(&IndexRequest::new("gone", IndexType::Meals, false)).unwrap();
        worker.handle(&raw).await.unwrap();

        assert!(index.upserts.lock().unwrap().is_empty());
        assert!(index.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_request_is_a_handler_error() {
        let index = Arc::new(RecordingIndex::default());
        let worker = worker(MemoryStore::default(), index);

        let err = worker.handle(br#"{"type": "warehouses"}"#).await.unwrap_err();
        assert!(matches!(err, WorkerError::Malformed(_)));
    }
}
