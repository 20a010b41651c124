use crate::error::{IndexError, PipelineError};
use crate::models::{
    AppliedConfig, ArtifactDraft, ChunkRecord, Document, DocumentId, IndexRecord, NewDocument,
    ParsedPage, SearchMatch, StageArtifact, StageKind,
};
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, path: &Path, config: &AppliedConfig)
        -> Result<Vec<ParsedPage>, PipelineError>;
}

#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk(
        &self,
        pages: &[ParsedPage],
        config: &AppliedConfig,
    ) -> Result<Vec<ChunkRecord>, PipelineError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(
        &self,
        texts: &[String],
        config: &AppliedConfig,
    ) -> Result<Vec<Vec<f32>>, PipelineError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Removing a collection that does not exist is not an error.
    async fn drop_collection(&self, name: &str) -> Result<(), IndexError>;

    async fn create_collection(&self, name: &str, dimension: usize) -> Result<(), IndexError>;

    async fn insert(&self, name: &str, records: Vec<IndexRecord>) -> Result<Vec<String>, IndexError>;

    async fn search(
        &self,
        name: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchMatch>, IndexError>;
}

/// Transactional persistence for documents and their stage artifacts.
///
/// Every method is one atomic unit: readers never observe an artifact without
/// its document back-reference, or a status change without its history entry.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_document(&self, new: NewDocument) -> Result<Document, PipelineError>;

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, PipelineError>;

    async fn documents(&self) -> Result<Vec<Document>, PipelineError>;

    /// Deletes the document and every artifact it owns. Returns false if it was absent.
    async fn delete_document(&self, id: DocumentId) -> Result<bool, PipelineError>;

    async fn artifact(
        &self,
        document_id: DocumentId,
        kind: StageKind,
    ) -> Result<Option<StageArtifact>, PipelineError>;

    /// Returns the existing artifact, or inserts `draft` and links it to the
    /// document. The flag is true when this call created it.
    async fn get_or_create_artifact(
        &self,
        document_id: DocumentId,
        draft: ArtifactDraft,
    ) -> Result<(StageArtifact, bool), PipelineError>;

    /// Upserts the artifact with a successful result and fires the stage's
    /// completion event. Nothing is written if the transition is illegal.
    async fn commit_stage(
        &self,
        document_id: DocumentId,
        draft: ArtifactDraft,
    ) -> Result<(StageArtifact, Document), PipelineError>;

    async fn record_load(
        &self,
        document_id: DocumentId,
        pages: Vec<ParsedPage>,
        config: AppliedConfig,
    ) -> Result<Document, PipelineError>;

    /// Moves the document to `error`. Artifacts are left untouched.
    async fn record_failure(
        &self,
        document_id: DocumentId,
        reason: String,
    ) -> Result<Document, PipelineError>;
}
