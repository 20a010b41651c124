pub mod catalog;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod hasher;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod schema;
pub mod settings;
pub mod status;
pub mod store;
pub mod stores;
pub mod traits;

pub use catalog::ConfigurationTable;
pub use chunking::{normalize_whitespace, ByPageChunker, FixedTokenChunker};
pub use embeddings::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ErrorCode, IndexError, PipelineError, SchemaError};
pub use extractor::{parse_page_range, LopdfLoader, PlainTextLoader};
pub use hasher::{canonical_json, config_hash, hashes_match};
pub use ingest::{describe_file, digest_file, discover_documents};
pub use models::{
    AppliedConfig, ArtifactDraft, ArtifactId, ChunkRecord, ConfigMap, Document, DocumentId,
    EmbeddingRecord, IndexRecord, NewDocument, ParsedPage, SearchMatch, SearchOutcome,
    StageArtifact, StageKind, StageResult, StatusChange, StoreRecord,
};
pub use orchestrator::{ConfigSnapshot, LoadSnapshot, PipelineCoordinator};
pub use registry::ProcessorRegistry;
pub use schema::{FieldDependency, FieldKind, FieldOption, FieldReading, FieldSchema, StageConfiguration};
pub use settings::{collection_name, PipelineSettings};
pub use status::{DocumentStatus, StatusEvent, TransitionError};
pub use store::MemoryRecordStore;
pub use stores::InMemoryVectorIndex;
pub use traits::{Chunker, DocumentLoader, Embedder, RecordStore, VectorIndex};
