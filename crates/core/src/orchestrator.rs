use crate::catalog::{load, store, ConfigurationTable};
use crate::error::{ErrorCode, PipelineError, Result};
use crate::hasher::hashes_match;
use crate::models::{
    AppliedConfig, ArtifactDraft, ArtifactId, ConfigMap, Document, DocumentId, EmbeddingRecord,
    IndexRecord, NewDocument, SearchOutcome, StageArtifact, StageKind, StageResult, StoreRecord,
};
use crate::registry::ProcessorRegistry;
use crate::schema::{FieldReading, StageConfiguration};
use crate::settings::{collection_name, PipelineSettings};
use crate::status::StatusEvent;
use crate::traits::RecordStore;
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A stage's applied configuration as stored on its artifact.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub artifact_id: ArtifactId,
    pub config: AppliedConfig,
    pub fields: Vec<FieldReading>,
    pub schema: Arc<StageConfiguration>,
}

/// The load configuration for a document's file type.
#[derive(Debug, Clone)]
pub struct LoadSnapshot {
    pub config: AppliedConfig,
    pub loaded: bool,
    pub fields: Vec<FieldReading>,
    pub schema: Arc<StageConfiguration>,
}

/// Drives documents through load, chunk, embedding and store.
///
/// Processor calls run without any record-store lock held; every write goes
/// through one atomic [`RecordStore`] call.
pub struct PipelineCoordinator<S>
where
    S: RecordStore,
{
    store: S,
    configurations: Arc<ConfigurationTable>,
    processors: ProcessorRegistry,
    settings: PipelineSettings,
}

impl<S> PipelineCoordinator<S>
where
    S: RecordStore,
{
    pub fn new(
        store: S,
        configurations: Arc<ConfigurationTable>,
        processors: ProcessorRegistry,
    ) -> Self {
        Self {
            store,
            configurations,
            processors,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn configurations(&self) -> &ConfigurationTable {
        &self.configurations
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    pub async fn register_document(&self, new: NewDocument) -> Result<Document> {
        new.validate(self.settings.max_file_size)?;
        self.configurations.loader_for(&new.file_type)?;

        let document = self.store.insert_document(new).await?;
        info!(
            document_id = document.id,
            filename = %document.filename,
            file_type = %document.file_type,
            "registered document"
        );
        Ok(document)
    }

    pub async fn document(&self, document_id: DocumentId) -> Result<Document> {
        self.store
            .document(document_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("document", document_id))
    }

    pub async fn documents(&self) -> Result<Vec<Document>> {
        self.store.documents().await
    }

    /// Removes the document, its artifacts and its vector collection.
    pub async fn delete_document(&self, document_id: DocumentId) -> Result<()> {
        self.document(document_id).await?;

        let collection = collection_name(document_id);
        for index in self.processors.indexes() {
            index
                .drop_collection(&collection)
                .await
                .map_err(|error| error.into_pipeline("delete"))?;
        }

        if !self.store.delete_document(document_id).await? {
            return Err(PipelineError::not_found("document", document_id));
        }
        info!(document_id, "deleted document");
        Ok(())
    }

    pub async fn load_config(&self, document_id: DocumentId) -> Result<LoadSnapshot> {
        let document = self.document(document_id).await?;
        let schema = Arc::clone(self.configurations.loader_for(&document.file_type)?);
        let loaded = document.load_config.is_some();
        let config = document
            .load_config
            .unwrap_or_else(|| schema.default_applied());

        Ok(LoadSnapshot {
            fields: schema.filtered_read(config.values()),
            config,
            loaded,
            schema,
        })
    }

    pub async fn load(&self, document_id: DocumentId, requested: &ConfigMap) -> Result<Document> {
        self.load_with_timeout(document_id, requested, self.settings.processor_timeout)
            .await
    }

    /// Parses the document's file into pages and fires `pending -> loaded`.
    pub async fn load_with_timeout(
        &self,
        document_id: DocumentId,
        requested: &ConfigMap,
        timeout: Duration,
    ) -> Result<Document> {
        let document = self.document(document_id).await?;
        let schema = self.configurations.loader_for(&document.file_type)?;
        let applied = schema.resolve(requested)?;
        let tool = selector(&applied, load::LOADER_TOOL)?.to_string();
        let loader = self.processors.loader(&tool)?;
        let path = PathBuf::from(&document.file_path);

        let pages = self
            .run_processor("load", document_id, timeout, loader.load(&path, &applied))
            .await?;
        if pages.is_empty() {
            return self
                .fail(
                    document_id,
                    PipelineError::upstream("load", "loader produced no readable pages"),
                )
                .await;
        }

        let page_count = pages.len();
        let document = self.store.record_load(document_id, pages, applied).await?;
        info!(document_id, pages = page_count, loader = %tool, "loaded document");
        Ok(document)
    }

    /// Returns the stage's applied config, creating the artifact with defaults on first access.
    pub async fn get_or_create_config(
        &self,
        document_id: DocumentId,
        kind: StageKind,
    ) -> Result<ConfigSnapshot> {
        let document = self.document(document_id).await?;
        let schema = Arc::clone(self.configurations.stage(kind));
        let draft = ArtifactDraft {
            kind,
            config: schema.default_applied(),
            metadata: document.anchor(),
            result: StageResult::empty(kind),
        };

        let (artifact, created) = self.store.get_or_create_artifact(document_id, draft).await?;
        if created {
            info!(document_id, stage = %kind, artifact_id = artifact.id, "created stage artifact");
        } else {
            debug!(document_id, stage = %kind, artifact_id = artifact.id, "loaded stage artifact");
        }

        Ok(ConfigSnapshot {
            artifact_id: artifact.id,
            fields: schema.filtered_read(artifact.config.values()),
            config: artifact.config,
            schema,
        })
    }

    pub async fn artifact(&self, document_id: DocumentId, kind: StageKind) -> Result<StageArtifact> {
        self.document(document_id).await?;
        self.store
            .artifact(document_id, kind)
            .await?
            .ok_or_else(|| {
                PipelineError::not_found("artifact", format!("{kind} for document {document_id}"))
            })
    }

    /// True when the stage has run and its stored hash matches `requested` merged over defaults.
    pub async fn is_current(
        &self,
        document_id: DocumentId,
        kind: StageKind,
        requested: &ConfigMap,
    ) -> Result<bool> {
        self.document(document_id).await?;
        let applied = self.configurations.stage(kind).resolve(requested)?;
        let current = match self.store.artifact(document_id, kind).await? {
            Some(artifact) if artifact.has_executed() => {
                hashes_match(applied.values(), artifact.config.hash())
            }
            _ => false,
        };
        Ok(current)
    }

    pub async fn execute(
        &self,
        document_id: DocumentId,
        kind: StageKind,
        requested: &ConfigMap,
    ) -> Result<StageArtifact> {
        self.execute_with_timeout(document_id, kind, requested, self.settings.processor_timeout)
            .await
    }

    /// Returns the stored artifact when it is current, otherwise executes. The
    /// flag is true when the processor ran.
    pub async fn execute_unless_current(
        &self,
        document_id: DocumentId,
        kind: StageKind,
        requested: &ConfigMap,
    ) -> Result<(StageArtifact, bool)> {
        if self.is_current(document_id, kind, requested).await? {
            debug!(document_id, stage = %kind, "stage is current, skipping");
            return Ok((self.artifact(document_id, kind).await?, false));
        }
        Ok((self.execute(document_id, kind, requested).await?, true))
    }

    pub async fn execute_with_timeout(
        &self,
        document_id: DocumentId,
        kind: StageKind,
        requested: &ConfigMap,
        timeout: Duration,
    ) -> Result<StageArtifact> {
        let document = self.document(document_id).await?;
        let applied = self.configurations.stage(kind).resolve(requested)?;
        let tool = selector(&applied, kind.selector_field())?;
        document.status.apply(StatusEvent::StageCompleted(kind))?;

        let result = match kind {
            StageKind::Chunk => self.run_chunk(&document, &applied, tool, timeout).await?,
            StageKind::Embedding => self.run_embedding(&document, &applied, tool, timeout).await?,
            StageKind::Store => self.run_store(&document, &applied, tool, timeout).await?,
        };

        let records = result.len();
        let metadata = stage_metadata(&document, tool, records);
        let draft = ArtifactDraft {
            kind,
            config: applied,
            metadata,
            result,
        };
        let (artifact, document) = self.store.commit_stage(document_id, draft).await?;
        info!(
            document_id,
            stage = %kind,
            artifact_id = artifact.id,
            records,
            status = %document.status,
            "stage completed"
        );
        Ok(artifact)
    }

    async fn run_chunk(
        &self,
        document: &Document,
        applied: &AppliedConfig,
        tool: &str,
        timeout: Duration,
    ) -> Result<StageResult> {
        if document.content.is_empty() {
            return Err(PipelineError::PreconditionFailed {
                stage: StageKind::Chunk.as_str(),
                missing: StageKind::Chunk.antecedent_label(),
            });
        }
        let chunker = self.processors.chunker(tool)?;

        let chunks = self
            .run_processor(
                StageKind::Chunk.as_str(),
                document.id,
                timeout,
                chunker.chunk(&document.content, applied),
            )
            .await?;
        if chunks.is_empty() {
            return self
                .fail(
                    document.id,
                    PipelineError::upstream("chunk", format!("{tool} produced no chunks")),
                )
                .await;
        }
        Ok(StageResult::Chunk(chunks))
    }

    async fn run_embedding(
        &self,
        document: &Document,
        applied: &AppliedConfig,
        tool: &str,
        timeout: Duration,
    ) -> Result<StageResult> {
        let chunk_artifact = self
            .antecedent(document, StageKind::Chunk, StageKind::Embedding.as_str())
            .await?;
        let chunks = chunk_artifact.result.as_chunks().unwrap_or_default();
        let embedder = self.processors.embedder(tool)?;
        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();

        let vectors = self
            .run_processor(
                StageKind::Embedding.as_str(),
                document.id,
                timeout,
                embedder.embed(&texts, applied),
            )
            .await?;
        if vectors.len() != chunks.len() {
            return self
                .fail(
                    document.id,
                    PipelineError::upstream(
                        "embedding",
                        format!(
                            "{tool} returned {} vectors for {} chunks",
                            vectors.len(),
                            chunks.len()
                        ),
                    ),
                )
                .await;
        }

        let records = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord {
                chunk_index: chunk.index,
                page: chunk.page,
                vector,
                source: tool.to_string(),
            })
            .collect();
        Ok(StageResult::Embedding(records))
    }

    async fn run_store(
        &self,
        document: &Document,
        applied: &AppliedConfig,
        tool: &str,
        timeout: Duration,
    ) -> Result<StageResult> {
        let stage = StageKind::Store.as_str();
        let chunk_artifact = self.antecedent(document, StageKind::Chunk, stage).await?;
        let embedding_artifact = self.antecedent(document, StageKind::Embedding, stage).await?;
        let chunks = chunk_artifact.result.as_chunks().unwrap_or_default();
        let embeddings = embedding_artifact.result.as_embeddings().unwrap_or_default();

        let records = IndexRecord::pair(chunks, embeddings, |chunk| {
            json!({
                "document": { "id": document.id, "filename": document.filename },
                "chunk_index": chunk.index,
                "page": chunk.page,
                "indexed_with": applied.hash(),
            })
        })
        .map_err(|error| error.into_pipeline(stage))?;

        let dimension = records.first().map_or(0, |record| record.vector.len());
        if dimension == 0 || records.iter().any(|record| record.vector.len() != dimension) {
            return Err(PipelineError::validation(
                "embedding vectors must share one non-zero dimension",
            ));
        }
        let index = self.processors.index(tool)?;
        let collection = collection_name(document.id);

        let ids = self
            .run_processor(stage, document.id, timeout, async {
                index
                    .drop_collection(&collection)
                    .await
                    .map_err(|error| error.into_pipeline(stage))?;
                index
                    .create_collection(&collection, dimension)
                    .await
                    .map_err(|error| error.into_pipeline(stage))?;
                index
                    .insert(&collection, records)
                    .await
                    .map_err(|error| error.into_pipeline(stage))
            })
            .await?;
        if ids.len() != chunks.len() {
            return self
                .fail(
                    document.id,
                    PipelineError::upstream(
                        stage,
                        format!("{tool} stored {} of {} records", ids.len(), chunks.len()),
                    ),
                )
                .await;
        }

        let stored = ids
            .into_iter()
            .zip(chunks)
            .map(|(id, chunk)| StoreRecord {
                id,
                collection: collection.clone(),
                chunk_index: chunk.index,
                page: chunk.page,
            })
            .collect();
        Ok(StageResult::Store(stored))
    }

    pub async fn search(&self, document_id: DocumentId, query: &str) -> Result<SearchOutcome> {
        self.search_with_timeout(document_id, query, self.settings.processor_timeout)
            .await
    }

    /// Nearest chunks to `query` in the document's collection. Failures here
    /// never change the document's status.
    pub async fn search_with_timeout(
        &self,
        document_id: DocumentId,
        query: &str,
        timeout: Duration,
    ) -> Result<SearchOutcome> {
        if query.trim().is_empty() {
            return Err(PipelineError::validation("query is empty"));
        }
        let document = self.document(document_id).await?;
        let store_artifact = self.antecedent(&document, StageKind::Store, "search").await?;
        let embedding_artifact = self
            .antecedent(&document, StageKind::Embedding, "search")
            .await?;

        let store_config = &store_artifact.config;
        let top_k = store_config.u64_or(store::TOP_K, 1)?.max(1) as usize;
        let threshold = store_config.f64_or(store::SCORE_THRESHOLD, 0.0)? as f32;
        let index = self
            .processors
            .index(selector(store_config, store::STORE_METHOD)?)?;
        let embedding_config = &embedding_artifact.config;
        let embedder = self
            .processors
            .embedder(selector(embedding_config, StageKind::Embedding.selector_field())?)?;

        let texts = [query.to_string()];
        let query_vector = bounded("search", timeout, embedder.embed(&texts, embedding_config))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::upstream("search", "embedder returned no vector"))?;

        let collection = collection_name(document_id);
        let matches = bounded("search", timeout, async {
            index
                .search(&collection, &query_vector, top_k)
                .await
                .map_err(|error| error.into_pipeline("search"))
        })
        .await?;

        let kept = matches
            .into_iter()
            .filter(|candidate| candidate.score > threshold)
            .collect::<Vec<_>>();
        debug!(document_id, matches = kept.len(), "search finished");
        Ok(SearchOutcome::from_matches(kept))
    }

    /// The executed artifact of `kind` that `stage` consumes.
    async fn antecedent(
        &self,
        document: &Document,
        kind: StageKind,
        stage: &'static str,
    ) -> Result<StageArtifact> {
        let missing = PipelineError::PreconditionFailed {
            stage,
            missing: kind.as_str(),
        };
        if document.artifact_id(kind).is_none() {
            return Err(missing);
        }
        match self.store.artifact(document.id, kind).await? {
            Some(artifact) if artifact.has_executed() && !artifact.result.is_empty() => Ok(artifact),
            _ => Err(missing),
        }
    }

    /// Runs a processor under `timeout`. Processor faults are recorded on the document.
    async fn run_processor<T, F>(
        &self,
        stage: &'static str,
        document_id: DocumentId,
        timeout: Duration,
        work: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match bounded(stage, timeout, work).await {
            Err(error) if error.is_upstream() => self.fail(document_id, error).await,
            other => other,
        }
    }

    async fn fail<T>(&self, document_id: DocumentId, error: PipelineError) -> Result<T> {
        warn!(document_id, error = %error, "stage failed");
        if let Err(recording) = self
            .store
            .record_failure(document_id, error.to_string())
            .await
        {
            warn!(document_id, error = %recording, "could not record stage failure");
        }
        Err(error)
    }
}

/// Applies `timeout` and folds processor faults into `UpstreamFailure`. Caller
/// errors pass through unchanged.
async fn bounded<T, F>(stage: &'static str, timeout: Duration, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(match error.code() {
            ErrorCode::NotFound
            | ErrorCode::ValidationError
            | ErrorCode::PreconditionFailed
            | ErrorCode::UpstreamFailure => error,
            ErrorCode::ConfigurationError | ErrorCode::Internal => {
                PipelineError::upstream(stage, error.to_string())
            }
        }),
        Err(_) => Err(PipelineError::upstream(
            stage,
            format!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}

fn selector<'a>(applied: &'a AppliedConfig, field: &str) -> Result<&'a str> {
    applied
        .get_str(field)
        .ok_or_else(|| PipelineError::validation(format!("'{field}' must name a processor")))
}

fn stage_metadata(document: &Document, processor: &str, records: usize) -> Value {
    let mut metadata = document.anchor();
    if let Value::Object(map) = &mut metadata {
        map.insert("processor".to_string(), json!(processor));
        map.insert("records".to_string(), json!(records));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::describe_file;
    use crate::models::{ParsedPage, SearchMatch};
    use crate::status::DocumentStatus;
    use crate::store::MemoryRecordStore;
    use crate::traits::{Chunker, Embedder};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    const VOCABULARY: [&str; 4] = ["pump", "valve", "pressure", "flow"];

    /// One dimension per vocabulary word.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[String], _config: &AppliedConfig) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let lowered = text.to_lowercase();
                    VOCABULARY
                        .iter()
                        .map(|word| {
                            lowered
                                .split_whitespace()
                                .filter(|token| *token == *word)
                                .count() as f32
                        })
                        .collect()
                })
                .collect())
        }
    }

    struct FailingChunker;

    #[async_trait]
    impl Chunker for FailingChunker {
        async fn chunk(
            &self,
            _pages: &[ParsedPage],
            _config: &AppliedConfig,
        ) -> Result<Vec<crate::models::ChunkRecord>> {
            Err(PipelineError::Io(std::io::Error::other("tokenizer crashed")))
        }
    }

    struct SlowChunker;

    #[async_trait]
    impl Chunker for SlowChunker {
        async fn chunk(
            &self,
            _pages: &[ParsedPage],
            _config: &AppliedConfig,
        ) -> Result<Vec<crate::models::ChunkRecord>> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Vec::new())
        }
    }

    fn registry() -> ProcessorRegistry {
        ProcessorRegistry::with_defaults().register_embedder("char_ngram", Arc::new(KeywordEmbedder))
    }

    fn coordinator_with(processors: ProcessorRegistry) -> PipelineCoordinator<MemoryRecordStore> {
        let table = Arc::new(ConfigurationTable::builtin().expect("builtin configurations"));
        PipelineCoordinator::new(MemoryRecordStore::new(), table, processors)
    }

    fn config(value: Value) -> ConfigMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn no_overrides() -> ConfigMap {
        ConfigMap::new()
    }

    fn long_text(tokens: usize) -> String {
        (0..tokens)
            .map(|index| VOCABULARY[index % VOCABULARY.len()])
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn register(
        coordinator: &PipelineCoordinator<MemoryRecordStore>,
        dir: &Path,
        name: &str,
        content: &str,
    ) -> Document {
        let path = dir.join(name);
        std::fs::write(&path, content).expect("write fixture");
        let new = describe_file(&path).expect("describe fixture");
        coordinator.register_document(new).await.expect("register")
    }

    async fn loaded(
        coordinator: &PipelineCoordinator<MemoryRecordStore>,
        dir: &Path,
        content: &str,
    ) -> DocumentId {
        let document = register(coordinator, dir, "manual.txt", content).await;
        coordinator
            .load(document.id, &no_overrides())
            .await
            .expect("load");
        document.id
    }

    async fn indexed(
        coordinator: &PipelineCoordinator<MemoryRecordStore>,
        dir: &Path,
    ) -> DocumentId {
        let id = loaded(
            coordinator,
            dir,
            "pump pump pump\u{000c}valve valve\u{000c}pressure flow",
        )
        .await;
        coordinator
            .execute(id, StageKind::Chunk, &config(json!({"chunk_method": "by_page"})))
            .await
            .expect("chunk");
        coordinator
            .execute(id, StageKind::Embedding, &no_overrides())
            .await
            .expect("embedding");
        coordinator
            .execute(id, StageKind::Store, &no_overrides())
            .await
            .expect("store");
        id
    }

    #[tokio::test]
    async fn config_is_created_once_with_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator = coordinator_with(registry());
        let document = register(&coordinator, dir.path(), "manual.txt", "pump valve").await;

        let first = coordinator
            .get_or_create_config(document.id, StageKind::Chunk)
            .await
            .expect("create");
        let second = coordinator
            .get_or_create_config(document.id, StageKind::Chunk)
            .await
            .expect("read");

        assert_eq!(first.artifact_id, second.artifact_id);
        assert_eq!(first.config, second.config);
        assert_eq!(
            Value::Object(first.config.values().clone()),
            json!({"chunk_method": "fixed_token", "token_size": 500, "overlap": 0.1})
        );
        assert_eq!(first.fields.len(), 3);

        let artifact = coordinator
            .artifact(document.id, StageKind::Chunk)
            .await
            .expect("artifact");
        assert_eq!(artifact.metadata["document"]["id"], json!(document.id));
        assert_eq!(artifact.metadata["document"]["filename"], json!("manual.txt"));
        assert!(artifact.result.is_empty());
        assert!(artifact.executed_at.is_none());
        assert_eq!(coordinator.store().artifact_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let coordinator = coordinator_with(registry());
        let error = coordinator
            .get_or_create_config(99, StageKind::Chunk)
            .await
            .expect_err("missing document");
        assert_eq!(error.status_code(), 404);

        let error = coordinator
            .execute(99, StageKind::Store, &no_overrides())
            .await
            .expect_err("missing document");
        assert_eq!(error.code(), ErrorCode::NotFound);
        assert_eq!(coordinator.store().artifact_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_config_requests_create_one_artifact() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator = Arc::new(coordinator_with(registry()));
        let document = register(&coordinator, dir.path(), "manual.txt", "pump valve").await;
        let document_id = document.id;

        let handles = (0..16)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    coordinator
                        .get_or_create_config(document_id, StageKind::Embedding)
                        .await
                        .map(|snapshot| snapshot.artifact_id)
                })
            })
            .collect::<Vec<_>>();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.expect("task").expect("config"));
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(coordinator.store().artifact_count().await, 1);

        let linked = coordinator.document(document.id).await.expect("document");
        assert_eq!(linked.embedding_artifact_id, Some(ids[0]));
    }

    #[tokio::test]
    async fn happy_path_advances_status_in_order() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator = coordinator_with(registry());
        let id = indexed(&coordinator, dir.path()).await;

        let document = coordinator.document(id).await.expect("document");
        assert_eq!(document.status, DocumentStatus::Indexed);
        let visited = document
            .status_history
            .iter()
            .map(|change| change.to)
            .collect::<Vec<_>>();
        assert_eq!(
            visited,
            [
                DocumentStatus::Loaded,
                DocumentStatus::Chunked,
                DocumentStatus::Embedded,
                DocumentStatus::Indexed
            ]
        );

        for kind in StageKind::ALL {
            let artifact = coordinator.artifact(id, kind).await.expect("artifact");
            assert_eq!(artifact.result.len(), 3);
            assert_eq!(artifact.metadata["document"]["id"], json!(id));
            assert!(artifact.has_executed());
        }

        let store = coordinator.artifact(id, StageKind::Store).await.expect("store");
        let records = store.result.as_store_records().expect("store records");
        assert!(records.iter().all(|record| record.collection == format!("doc_{id}")));
    }

    #[tokio::test]
    async fn reexecution_overwrites_in_place() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator = coordinator_with(registry());
        let id = loaded(&coordinator, dir.path(), &long_text(800)).await;

        let first = coordinator
            .execute(id, StageKind::Chunk, &no_overrides())
            .await
            .expect("default chunk");
        assert_eq!(first.result.len(), 2);

        let second = coordinator
            .execute(id, StageKind::Chunk, &config(json!({"token_size": 800})))
            .await
            .expect("re-chunk");
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.config.get_u64("token_size"), Some(800));
        assert_ne!(second.config.hash(), first.config.hash());
        assert_eq!(second.result.len(), 1);
        assert_eq!(coordinator.store().artifact_count().await, 1);
    }

    #[tokio::test]
    async fn stages_require_their_antecedents() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator = coordinator_with(registry());
        let document = register(&coordinator, dir.path(), "manual.txt", "pump valve").await;

        let error = coordinator
            .execute(document.id, StageKind::Chunk, &no_overrides())
            .await
            .expect_err("not loaded");
        assert_eq!(error.to_string(), "chunk requires a load result first");

        coordinator
            .load(document.id, &no_overrides())
            .await
            .expect("load");
        let error = coordinator
            .execute(document.id, StageKind::Embedding, &no_overrides())
            .await
            .expect_err("not chunked");
        assert_eq!(error.code(), ErrorCode::PreconditionFailed);
        assert_eq!(error.to_string(), "embedding requires a chunk result first");

        let unchanged = coordinator.document(document.id).await.expect("document");
        assert_eq!(unchanged.status, DocumentStatus::Loaded);
        assert!(unchanged.embedding_artifact_id.is_none());
    }

    #[tokio::test]
    async fn length_mismatch_leaves_store_artifact_unchanged() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator = coordinator_with(registry());
        let id = loaded(&coordinator, dir.path(), &long_text(800)).await;

        coordinator
            .execute(id, StageKind::Chunk, &config(json!({"token_size": 100, "overlap": 0.0})))
            .await
            .expect("8 chunks");
        coordinator
            .execute(id, StageKind::Embedding, &no_overrides())
            .await
            .expect("8 embeddings");
        let stored = coordinator
            .execute(id, StageKind::Store, &no_overrides())
            .await
            .expect("store");
        assert_eq!(stored.result.len(), 8);

        let rechunked = coordinator
            .execute(id, StageKind::Chunk, &config(json!({"token_size": 100})))
            .await
            .expect("9 chunks");
        assert_eq!(rechunked.result.len(), 9);

        let error = coordinator
            .execute(id, StageKind::Store, &no_overrides())
            .await
            .expect_err("9 chunks vs 8 embeddings");
        assert_eq!(error.code(), ErrorCode::ValidationError);
        assert!(error.to_string().contains("chunk count 9"));

        let after = coordinator.artifact(id, StageKind::Store).await.expect("store");
        assert_eq!(after, stored);
        let document = coordinator.document(id).await.expect("document");
        assert_eq!(document.status, DocumentStatus::Indexed);
        assert!(document.error_message.is_none());
    }

    #[tokio::test]
    async fn processor_failure_moves_to_error_and_retry_recovers() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator =
            coordinator_with(registry().register_chunker("by_page", Arc::new(FailingChunker)));
        let id = loaded(&coordinator, dir.path(), "pump valve pressure").await;

        let error = coordinator
            .execute(id, StageKind::Chunk, &config(json!({"chunk_method": "by_page"})))
            .await
            .expect_err("chunker fails");
        assert_eq!(error.code(), ErrorCode::UpstreamFailure);
        assert_eq!(error.status_code(), 500);

        let failed = coordinator.document(id).await.expect("document");
        assert_eq!(failed.status, DocumentStatus::Error);
        assert!(failed
            .error_message
            .as_deref()
            .is_some_and(|message| message.contains("tokenizer crashed")));
        assert!(failed.chunk_artifact_id.is_none());

        coordinator
            .execute(id, StageKind::Chunk, &no_overrides())
            .await
            .expect("retry with fixed_token");
        let recovered = coordinator.document(id).await.expect("document");
        assert_eq!(recovered.status, DocumentStatus::Chunked);
        assert!(recovered.error_message.is_none());
    }

    #[tokio::test]
    async fn slow_processor_times_out() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator =
            coordinator_with(registry().register_chunker("by_page", Arc::new(SlowChunker)));
        let id = loaded(&coordinator, dir.path(), "pump valve").await;

        let error = coordinator
            .execute_with_timeout(
                id,
                StageKind::Chunk,
                &config(json!({"chunk_method": "by_page"})),
                Duration::from_millis(20),
            )
            .await
            .expect_err("deadline exceeded");
        assert!(error.is_upstream());
        assert!(error.to_string().contains("timed out"));

        let document = coordinator.document(id).await.expect("document");
        assert_eq!(document.status, DocumentStatus::Error);
    }

    #[tokio::test]
    async fn deletion_during_a_stage_keeps_the_processor_fault() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator =
            coordinator_with(registry().register_chunker("by_page", Arc::new(SlowChunker)));
        let id = loaded(&coordinator, dir.path(), "pump valve").await;
        let requested = config(json!({"chunk_method": "by_page"}));

        let (executed, deleted) = tokio::join!(
            coordinator.execute_with_timeout(
                id,
                StageKind::Chunk,
                &requested,
                Duration::from_millis(200),
            ),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                coordinator.delete_document(id).await
            }
        );
        deleted.expect("delete");
        let error = executed.expect_err("deadline exceeded");
        assert_eq!(error.code(), ErrorCode::UpstreamFailure);
        assert!(error.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn invalid_requests_do_not_touch_state() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator = coordinator_with(registry());
        let id = loaded(&coordinator, dir.path(), "pump valve").await;

        for requested in [
            json!({"chunk_method": "semantic"}),
            json!({"bogus": 1}),
            json!({"token_size": 50}),
            json!({"token_size": 799.5}),
            json!({"token_size": null}),
        ] {
            let error = coordinator
                .execute(id, StageKind::Chunk, &config(requested))
                .await
                .expect_err("invalid config");
            assert_eq!(error.status_code(), 400);
        }

        let bare = coordinator_with(
            ProcessorRegistry::new()
                .register_loader("plain_text", Arc::new(crate::extractor::PlainTextLoader))
                .register_chunker("fixed_token", Arc::new(crate::chunking::FixedTokenChunker)),
        );
        let other = loaded(&bare, dir.path(), "pump valve").await;
        let error = bare
            .execute(other, StageKind::Chunk, &config(json!({"chunk_method": "by_page"})))
            .await
            .expect_err("no by_page processor");
        assert_eq!(error.code(), ErrorCode::ValidationError);

        let document = coordinator.document(id).await.expect("document");
        assert_eq!(document.status, DocumentStatus::Loaded);
        assert!(document.chunk_artifact_id.is_none());
    }

    #[tokio::test]
    async fn search_before_and_after_store() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator = coordinator_with(registry());
        let pending = register(&coordinator, dir.path(), "empty.txt", "pump").await;

        let error = coordinator
            .search(pending.id, "valve")
            .await
            .expect_err("nothing stored");
        assert_eq!(error.code(), ErrorCode::PreconditionFailed);
        assert_eq!(error.to_string(), "search requires a store result first");

        let id = indexed(&coordinator, dir.path()).await;
        let outcome = coordinator.search(id, "valve").await.expect("search");
        let best: &SearchMatch = outcome.best().expect("a match");
        assert_eq!(best.content, "valve valve");
        assert!((best.score - 1.0).abs() < 1e-6);
        assert_eq!(best.metadata["page"], json!(2));
        let stored = coordinator
            .artifact(id, StageKind::Store)
            .await
            .expect("store artifact");
        assert_eq!(best.metadata["indexed_with"], json!(stored.config.hash()));

        let outcome = coordinator.search(id, "turbine").await.expect("search");
        assert!(outcome.is_not_found());

        let error = coordinator.search(id, "   ").await.expect_err("empty query");
        assert_eq!(error.status_code(), 400);
    }

    #[tokio::test]
    async fn is_current_tracks_the_applied_hash() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator = coordinator_with(registry());
        let id = loaded(&coordinator, dir.path(), &long_text(300)).await;

        coordinator
            .get_or_create_config(id, StageKind::Chunk)
            .await
            .expect("config");
        assert!(!coordinator
            .is_current(id, StageKind::Chunk, &no_overrides())
            .await
            .expect("check"));

        let (_, ran) = coordinator
            .execute_unless_current(id, StageKind::Chunk, &no_overrides())
            .await
            .expect("execute");
        assert!(ran);
        assert!(coordinator
            .is_current(id, StageKind::Chunk, &config(json!({"token_size": 500.0})))
            .await
            .expect("check"));
        assert!(!coordinator
            .is_current(id, StageKind::Chunk, &config(json!({"token_size": 800})))
            .await
            .expect("check"));

        let (artifact, ran) = coordinator
            .execute_unless_current(id, StageKind::Chunk, &no_overrides())
            .await
            .expect("skip");
        assert!(!ran);
        assert_eq!(artifact.result.len(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_artifacts_and_collection() {
        let dir = TempDir::new().expect("temp dir");
        let coordinator = coordinator_with(registry());
        let id = indexed(&coordinator, dir.path()).await;

        coordinator.delete_document(id).await.expect("delete");
        assert_eq!(coordinator.store().artifact_count().await, 0);
        let error = coordinator.document(id).await.expect_err("gone");
        assert_eq!(error.status_code(), 404);
        let error = coordinator.search(id, "valve").await.expect_err("gone");
        assert_eq!(error.status_code(), 404);
    }

    #[tokio::test]
    async fn registration_validates_uploads() {
        let coordinator = coordinator_with(registry()).with_settings(PipelineSettings {
            max_file_size: 10,
            ..PipelineSettings::default()
        });
        let upload = |file_type: &str, file_size: u64| NewDocument {
            filename: format!("upload.{file_type}"),
            file_path: format!("/tmp/upload.{file_type}"),
            file_type: file_type.to_string(),
            file_size,
            checksum: None,
        };

        let error = coordinator
            .register_document(upload("docx", 5))
            .await
            .expect_err("unsupported type");
        assert_eq!(error.status_code(), 400);
        let error = coordinator
            .register_document(upload("pdf", 11))
            .await
            .expect_err("too large");
        assert_eq!(error.status_code(), 400);

        let document = coordinator
            .register_document(upload("pdf", 10))
            .await
            .expect("valid upload");
        assert_eq!(document.status, DocumentStatus::Pending);

        let snapshot = coordinator.load_config(document.id).await.expect("load config");
        assert!(!snapshot.loaded);
        assert_eq!(snapshot.config.get_str("loader_tool"), Some("lopdf"));
        assert_eq!(snapshot.config.get_str("page_range"), Some("all"));
    }

    #[tokio::test]
    async fn loader_failure_marks_document() {
        let coordinator = coordinator_with(registry());
        let document = coordinator
            .register_document(NewDocument {
                filename: "missing.txt".to_string(),
                file_path: "/nonexistent/ragtune/missing.txt".to_string(),
                file_type: "txt".to_string(),
                file_size: 4,
                checksum: None,
            })
            .await
            .expect("register");

        let error = coordinator
            .load(document.id, &no_overrides())
            .await
            .expect_err("file is missing");
        assert!(error.is_upstream());
        let document = coordinator.document(document.id).await.expect("document");
        assert_eq!(document.status, DocumentStatus::Error);
        assert!(document.error_message.is_some());
    }
}
