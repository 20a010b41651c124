use crate::catalog;
use crate::error::{IndexError, PipelineError};
use crate::hasher::config_hash;
use crate::status::DocumentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

pub type DocumentId = u64;
pub type ArtifactId = u64;
pub type ConfigMap = serde_json::Map<String, Value>;

/// Key under which the config hash is persisted next to the applied values.
pub const HASH_KEY: &str = "_hash";

pub const MAX_FILENAME_CHARS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Chunk,
    Embedding,
    Store,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Chunk, StageKind::Embedding, StageKind::Store];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Chunk => "chunk",
            StageKind::Embedding => "embedding",
            StageKind::Store => "store",
        }
    }

    /// Field whose value names the processor that runs this stage.
    pub fn selector_field(self) -> &'static str {
        match self {
            StageKind::Chunk => catalog::chunk::CHUNK_METHOD,
            StageKind::Embedding => catalog::embedding::EMBEDDING_TOOL,
            StageKind::Store => catalog::store::STORE_METHOD,
        }
    }

    /// Name of the step whose output this stage consumes.
    pub fn antecedent_label(self) -> &'static str {
        match self {
            StageKind::Chunk => "load",
            StageKind::Embedding => "chunk",
            StageKind::Store => "embedding",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "chunk" => Ok(StageKind::Chunk),
            "embedding" | "embed" => Ok(StageKind::Embedding),
            "store" | "index" => Ok(StageKind::Store),
            other => Err(PipelineError::validation(format!("unknown stage '{other}'"))),
        }
    }
}

/// The concrete values in effect for a stage, persisted as `{..., "_hash": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedConfig {
    #[serde(flatten)]
    values: ConfigMap,
    #[serde(rename = "_hash")]
    hash: String,
}

impl AppliedConfig {
    pub fn new(values: ConfigMap) -> Self {
        let hash = config_hash(&values);
        Self { values, hash }
    }

    pub fn values(&self) -> &ConfigMap {
        &self.values
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str, fallback: Value) -> Value {
        self.values.get(key).cloned().unwrap_or(fallback)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        let value = self.values.get(key)?;
        value.as_u64().or_else(|| {
            value
                .as_f64()
                .filter(|float| *float >= 0.0 && float.fract() == 0.0)
                .map(|float| float as u64)
        })
    }

    pub fn str_or<'a>(
        &'a self,
        key: &str,
        fallback: &'a str,
    ) -> Result<&'a str, PipelineError> {
        match self.values.get(key) {
            None => Ok(fallback),
            Some(value) => value.as_str().ok_or_else(|| {
                PipelineError::validation(format!("{key}: expected a string, got {value}"))
            }),
        }
    }

    pub fn u64_or(&self, key: &str, fallback: u64) -> Result<u64, PipelineError> {
        self.read(key, fallback, Self::get_u64, "a whole number")
    }

    pub fn f64_or(&self, key: &str, fallback: f64) -> Result<f64, PipelineError> {
        self.read(key, fallback, Self::get_f64, "a number")
    }

    pub fn bool_or(&self, key: &str, fallback: bool) -> Result<bool, PipelineError> {
        self.read(key, fallback, Self::get_bool, "a boolean")
    }

    /// Absent keys take `fallback`; a present value of the wrong shape is a validation error.
    fn read<T>(
        &self,
        key: &str,
        fallback: T,
        get: impl Fn(&Self, &str) -> Option<T>,
        expected: &str,
    ) -> Result<T, PipelineError> {
        match self.values.get(key) {
            None => Ok(fallback),
            Some(value) => get(self, key).ok_or_else(|| {
                PipelineError::validation(format!("{key}: expected {expected}, got {value}"))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPage {
    pub number: u32,
    pub text: String,
}

/// A text span; `start..end` are byte offsets into the page text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub index: usize,
    pub text: String,
    pub page: Option<u32>,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk_index: usize,
    pub page: Option<u32>,
    pub vector: Vec<f32>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: String,
    pub collection: String,
    pub chunk_index: usize,
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "records", rename_all = "snake_case")]
pub enum StageResult {
    Chunk(Vec<ChunkRecord>),
    Embedding(Vec<EmbeddingRecord>),
    Store(Vec<StoreRecord>),
}

impl StageResult {
    pub fn empty(kind: StageKind) -> Self {
        match kind {
            StageKind::Chunk => StageResult::Chunk(Vec::new()),
            StageKind::Embedding => StageResult::Embedding(Vec::new()),
            StageKind::Store => StageResult::Store(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StageResult::Chunk(records) => records.len(),
            StageResult::Embedding(records) => records.len(),
            StageResult::Store(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_chunks(&self) -> Option<&[ChunkRecord]> {
        match self {
            StageResult::Chunk(records) => Some(records),
            _ => None,
        }
    }

    pub fn as_embeddings(&self) -> Option<&[EmbeddingRecord]> {
        match self {
            StageResult::Embedding(records) => Some(records),
            _ => None,
        }
    }

    pub fn as_store_records(&self) -> Option<&[StoreRecord]> {
        match self {
            StageResult::Store(records) => Some(records),
            _ => None,
        }
    }
}

/// Content of an artifact before the record store assigns identity and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDraft {
    pub kind: StageKind,
    pub config: AppliedConfig,
    pub metadata: Value,
    pub result: StageResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageArtifact {
    pub id: ArtifactId,
    pub document_id: DocumentId,
    pub kind: StageKind,
    pub config: AppliedConfig,
    pub metadata: Value,
    pub result: StageResult,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl StageArtifact {
    pub fn has_executed(&self) -> bool {
        self.executed_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub filename: String,
    pub file_path: String,
    pub file_type: String,
    pub file_size: u64,
    pub checksum: Option<String>,
}

impl NewDocument {
    pub fn validate(&self, max_file_size: u64) -> Result<(), PipelineError> {
        let filename = self.filename.trim();
        if filename.is_empty() {
            return Err(PipelineError::validation("filename is empty"));
        }
        if filename.chars().count() > MAX_FILENAME_CHARS {
            return Err(PipelineError::validation(format!(
                "filename exceeds {MAX_FILENAME_CHARS} characters"
            )));
        }
        if normalize_file_type(&self.file_type).is_empty() {
            return Err(PipelineError::validation("file type is empty"));
        }
        if self.file_size == 0 {
            return Err(PipelineError::validation("file is empty"));
        }
        if self.file_size > max_file_size {
            return Err(PipelineError::validation(format!(
                "file size {} exceeds limit {}",
                self.file_size, max_file_size
            )));
        }
        Ok(())
    }
}

pub fn normalize_file_type(file_type: &str) -> String {
    file_type.trim().trim_start_matches('.').to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    pub file_path: String,
    pub file_type: String,
    pub file_size: u64,
    pub checksum: Option<String>,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub content: Vec<ParsedPage>,
    pub load_config: Option<AppliedConfig>,
    pub chunk_artifact_id: Option<ArtifactId>,
    pub embedding_artifact_id: Option<ArtifactId>,
    pub store_artifact_id: Option<ArtifactId>,
    pub status_history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn from_new(id: DocumentId, new: NewDocument, at: DateTime<Utc>) -> Self {
        Self {
            id,
            filename: new.filename.trim().to_string(),
            file_path: new.file_path,
            file_type: normalize_file_type(&new.file_type),
            file_size: new.file_size,
            checksum: new.checksum,
            status: DocumentStatus::Pending,
            error_message: None,
            content: Vec::new(),
            load_config: None,
            chunk_artifact_id: None,
            embedding_artifact_id: None,
            store_artifact_id: None,
            status_history: Vec::new(),
            created_at: at,
            updated_at: at,
        }
    }

    pub fn artifact_id(&self, kind: StageKind) -> Option<ArtifactId> {
        match kind {
            StageKind::Chunk => self.chunk_artifact_id,
            StageKind::Embedding => self.embedding_artifact_id,
            StageKind::Store => self.store_artifact_id,
        }
    }

    /// Sets the back-reference for `kind`. Record stores call this in the same
    /// atomic unit that inserts the artifact.
    pub fn link_artifact(&mut self, kind: StageKind, artifact_id: ArtifactId) {
        let slot = match kind {
            StageKind::Chunk => &mut self.chunk_artifact_id,
            StageKind::Embedding => &mut self.embedding_artifact_id,
            StageKind::Store => &mut self.store_artifact_id,
        };
        *slot = Some(artifact_id);
    }

    pub fn anchor(&self) -> Value {
        json!({ "document": { "id": self.id, "filename": self.filename } })
    }
}

/// One row handed to a vector index: a chunk's text and metadata plus its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub content: String,
    pub metadata: Value,
    pub vector: Vec<f32>,
}

impl IndexRecord {
    /// Pairs chunks with embeddings positionally; both sequences must be equally long.
    pub fn pair<F>(
        chunks: &[ChunkRecord],
        embeddings: &[EmbeddingRecord],
        metadata: F,
    ) -> Result<Vec<IndexRecord>, IndexError>
    where
        F: Fn(&ChunkRecord) -> Value,
    {
        if chunks.len() != embeddings.len() {
            return Err(IndexError::LengthMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }

        Ok(chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| IndexRecord {
                content: chunk.text.clone(),
                metadata: metadata(chunk),
                vector: embedding.vector.clone(),
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub id: String,
    pub content: String,
    pub metadata: Value,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "matches", rename_all = "snake_case")]
pub enum SearchOutcome {
    Found(Vec<SearchMatch>),
    NotFound,
}

impl SearchOutcome {
    pub fn from_matches(matches: Vec<SearchMatch>) -> Self {
        if matches.is_empty() {
            SearchOutcome::NotFound
        } else {
            SearchOutcome::Found(matches)
        }
    }

    pub fn best(&self) -> Option<&SearchMatch> {
        match self {
            SearchOutcome::Found(matches) => matches.first(),
            SearchOutcome::NotFound => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SearchOutcome::NotFound)
    }
}
