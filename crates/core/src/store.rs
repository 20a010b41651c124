use crate::error::PipelineError;
use crate::models::{
    AppliedConfig, ArtifactDraft, ArtifactId, Document, DocumentId, NewDocument, ParsedPage,
    StageArtifact, StageKind,
};
use crate::status::StatusEvent;
use crate::traits::RecordStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Records {
    last_document_id: DocumentId,
    last_artifact_id: ArtifactId,
    documents: BTreeMap<DocumentId, Document>,
    artifacts: HashMap<ArtifactId, StageArtifact>,
}

impl Records {
    fn document_mut(&mut self, id: DocumentId) -> Result<&mut Document, PipelineError> {
        self.documents
            .get_mut(&id)
            .ok_or_else(|| PipelineError::not_found("document", id))
    }

    fn linked_artifact(
        &self,
        document: &Document,
        kind: StageKind,
    ) -> Result<Option<&StageArtifact>, PipelineError> {
        match document.artifact_id(kind) {
            None => Ok(None),
            Some(id) => self
                .artifacts
                .get(&id)
                .map(Some)
                .ok_or_else(|| PipelineError::not_found("artifact", id)),
        }
    }

    fn create_artifact(
        &mut self,
        document_id: DocumentId,
        draft: ArtifactDraft,
        at: DateTime<Utc>,
        executed_at: Option<DateTime<Utc>>,
    ) -> Result<StageArtifact, PipelineError> {
        let id = self.last_artifact_id + 1;
        let artifact = StageArtifact {
            id,
            document_id,
            kind: draft.kind,
            config: draft.config,
            metadata: draft.metadata,
            result: draft.result,
            created_at: at,
            updated_at: at,
            executed_at,
        };

        self.document_mut(document_id)?.link_artifact(draft.kind, id);
        self.last_artifact_id = id;
        self.artifacts.insert(id, artifact.clone());
        Ok(artifact)
    }
}

/// Record store kept in process memory behind a single lock.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<Records>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn artifact_count(&self) -> usize {
        self.records.read().await.artifacts.len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_document(&self, new: NewDocument) -> Result<Document, PipelineError> {
        let mut records = self.records.write().await;
        let id = records.last_document_id + 1;
        let document = Document::from_new(id, new, Utc::now());
        records.last_document_id = id;
        records.documents.insert(id, document.clone());
        Ok(document)
    }

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, PipelineError> {
        Ok(self.records.read().await.documents.get(&id).cloned())
    }

    async fn documents(&self) -> Result<Vec<Document>, PipelineError> {
        Ok(self.records.read().await.documents.values().cloned().collect())
    }

    async fn delete_document(&self, id: DocumentId) -> Result<bool, PipelineError> {
        let mut records = self.records.write().await;
        let Some(document) = records.documents.remove(&id) else {
            return Ok(false);
        };
        for kind in StageKind::ALL {
            if let Some(artifact_id) = document.artifact_id(kind) {
                records.artifacts.remove(&artifact_id);
            }
        }
        Ok(true)
    }

    async fn artifact(
        &self,
        document_id: DocumentId,
        kind: StageKind,
    ) -> Result<Option<StageArtifact>, PipelineError> {
        let records = self.records.read().await;
        let document = records
            .documents
            .get(&document_id)
            .ok_or_else(|| PipelineError::not_found("document", document_id))?;
        Ok(records.linked_artifact(document, kind)?.cloned())
    }

    async fn get_or_create_artifact(
        &self,
        document_id: DocumentId,
        draft: ArtifactDraft,
    ) -> Result<(StageArtifact, bool), PipelineError> {
        let mut records = self.records.write().await;
        let document = records
            .documents
            .get(&document_id)
            .ok_or_else(|| PipelineError::not_found("document", document_id))?;
        if let Some(existing) = records.linked_artifact(document, draft.kind)? {
            return Ok((existing.clone(), false));
        }

        let created = records.create_artifact(document_id, draft, Utc::now(), None)?;
        Ok((created, true))
    }

    async fn commit_stage(
        &self,
        document_id: DocumentId,
        draft: ArtifactDraft,
    ) -> Result<(StageArtifact, Document), PipelineError> {
        let mut records = self.records.write().await;
        let now = Utc::now();
        let kind = draft.kind;
        let event = StatusEvent::StageCompleted(kind);

        let document = records.document_mut(document_id)?;
        document.status.apply(event)?;
        let existing_id = document.artifact_id(kind);

        let artifact = match existing_id {
            Some(id) => {
                let artifact = records
                    .artifacts
                    .get_mut(&id)
                    .ok_or_else(|| PipelineError::not_found("artifact", id))?;
                artifact.config = draft.config;
                artifact.metadata = draft.metadata;
                artifact.result = draft.result;
                artifact.updated_at = now;
                artifact.executed_at = Some(now);
                artifact.clone()
            }
            None => records.create_artifact(document_id, draft, now, Some(now))?,
        };

        let document = records.document_mut(document_id)?;
        document.apply_event(event, now)?;
        document.error_message = None;
        Ok((artifact, document.clone()))
    }

    async fn record_load(
        &self,
        document_id: DocumentId,
        pages: Vec<ParsedPage>,
        config: AppliedConfig,
    ) -> Result<Document, PipelineError> {
        let mut records = self.records.write().await;
        let document = records.document_mut(document_id)?;
        document.apply_event(StatusEvent::Parsed, Utc::now())?;
        document.content = pages;
        document.load_config = Some(config);
        document.error_message = None;
        Ok(document.clone())
    }

    async fn record_failure(
        &self,
        document_id: DocumentId,
        reason: String,
    ) -> Result<Document, PipelineError> {
        let mut records = self.records.write().await;
        let document = records.document_mut(document_id)?;
        document.apply_event(StatusEvent::StageFailed, Utc::now())?;
        document.error_message = Some(reason);
        Ok(document.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StageResult;
    use crate::status::DocumentStatus;
    use serde_json::json;

    fn new_document() -> NewDocument {
        NewDocument {
            filename: "manual.txt".to_string(),
            file_path: "/tmp/manual.txt".to_string(),
            file_type: "txt".to_string(),
            file_size: 12,
            checksum: None,
        }
    }

    fn draft(kind: StageKind) -> ArtifactDraft {
        ArtifactDraft {
            kind,
            config: AppliedConfig::new(Default::default()),
            metadata: json!({}),
            result: StageResult::empty(kind),
        }
    }

    #[tokio::test]
    async fn ids_start_at_one() {
        let store = MemoryRecordStore::new();
        let first = store.insert_document(new_document()).await.expect("insert");
        let second = store.insert_document(new_document()).await.expect("insert");
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(first.status, DocumentStatus::Pending);
    }

    #[tokio::test]
    async fn get_or_create_links_once() {
        let store = MemoryRecordStore::new();
        let document = store.insert_document(new_document()).await.expect("insert");

        let (first, created) = store
            .get_or_create_artifact(document.id, draft(StageKind::Chunk))
            .await
            .expect("create");
        assert!(created);
        let (second, created) = store
            .get_or_create_artifact(document.id, draft(StageKind::Chunk))
            .await
            .expect("load");
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert!(second.executed_at.is_none());

        let linked = store.document(document.id).await.expect("read").expect("exists");
        assert_eq!(linked.chunk_artifact_id, Some(first.id));
        assert_eq!(store.artifact_count().await, 1);
    }

    #[tokio::test]
    async fn illegal_commit_leaves_records_untouched() {
        let store = MemoryRecordStore::new();
        let document = store.insert_document(new_document()).await.expect("insert");

        let error = store
            .commit_stage(document.id, draft(StageKind::Embedding))
            .await
            .expect_err("document was never loaded or chunked");
        assert_eq!(error.status_code(), 400);
        assert_eq!(store.artifact_count().await, 0);

        let unchanged = store.document(document.id).await.expect("read").expect("exists");
        assert_eq!(unchanged.status, DocumentStatus::Pending);
        assert!(unchanged.embedding_artifact_id.is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_artifacts() {
        let store = MemoryRecordStore::new();
        let document = store.insert_document(new_document()).await.expect("insert");
        store
            .get_or_create_artifact(document.id, draft(StageKind::Chunk))
            .await
            .expect("create");
        store
            .get_or_create_artifact(document.id, draft(StageKind::Store))
            .await
            .expect("create");

        assert!(store.delete_document(document.id).await.expect("delete"));
        assert_eq!(store.artifact_count().await, 0);
        assert!(!store.delete_document(document.id).await.expect("second delete"));
        assert!(store.artifact(document.id, StageKind::Chunk).await.is_err());
    }

    #[tokio::test]
    async fn failure_records_reason_and_success_clears_it() {
        let store = MemoryRecordStore::new();
        let document = store.insert_document(new_document()).await.expect("insert");

        let failed = store
            .record_failure(document.id, "parser crashed".to_string())
            .await
            .expect("failure");
        assert_eq!(failed.status, DocumentStatus::Error);
        assert_eq!(failed.error_message.as_deref(), Some("parser crashed"));

        let loaded = store
            .record_load(document.id, Vec::new(), AppliedConfig::new(Default::default()))
            .await
            .expect("load");
        assert_eq!(loaded.status, DocumentStatus::Loaded);
        assert!(loaded.error_message.is_none());
        assert_eq!(loaded.status_history.len(), 2);
    }
}
