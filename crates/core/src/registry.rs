use crate::catalog::{chunk, embedding, load, store};
use crate::chunking::{ByPageChunker, FixedTokenChunker};
use crate::embeddings::CharacterNgramEmbedder;
use crate::error::PipelineError;
use crate::extractor::{LopdfLoader, PlainTextLoader};
use crate::stores::InMemoryVectorIndex;
use crate::traits::{Chunker, DocumentLoader, Embedder, VectorIndex};
use std::collections::HashMap;
use std::sync::Arc;

/// Processors keyed by the value a stage's selector field takes.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    loaders: HashMap<String, Arc<dyn DocumentLoader>>,
    chunkers: HashMap<String, Arc<dyn Chunker>>,
    embedders: HashMap<String, Arc<dyn Embedder>>,
    indexes: HashMap<String, Arc<dyn VectorIndex>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every reference processor under its catalog name.
    pub fn with_defaults() -> Self {
        Self::new()
            .register_loader(load::PLAIN_TEXT, Arc::new(PlainTextLoader))
            .register_loader(load::LOPDF, Arc::new(LopdfLoader))
            .register_chunker(chunk::FIXED_TOKEN, Arc::new(FixedTokenChunker))
            .register_chunker(chunk::BY_PAGE, Arc::new(ByPageChunker))
            .register_embedder(embedding::CHAR_NGRAM, Arc::new(CharacterNgramEmbedder::default()))
            .register_index(store::IN_MEMORY, Arc::new(InMemoryVectorIndex::new()))
    }

    pub fn register_loader(mut self, name: &str, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loaders.insert(name.to_string(), loader);
        self
    }

    pub fn register_chunker(mut self, name: &str, chunker: Arc<dyn Chunker>) -> Self {
        self.chunkers.insert(name.to_string(), chunker);
        self
    }

    pub fn register_embedder(mut self, name: &str, embedder: Arc<dyn Embedder>) -> Self {
        self.embedders.insert(name.to_string(), embedder);
        self
    }

    pub fn register_index(mut self, name: &str, index: Arc<dyn VectorIndex>) -> Self {
        self.indexes.insert(name.to_string(), index);
        self
    }

    pub fn loader(&self, name: &str) -> Result<Arc<dyn DocumentLoader>, PipelineError> {
        lookup(&self.loaders, "loader", name)
    }

    pub fn chunker(&self, name: &str) -> Result<Arc<dyn Chunker>, PipelineError> {
        lookup(&self.chunkers, "chunker", name)
    }

    pub fn embedder(&self, name: &str) -> Result<Arc<dyn Embedder>, PipelineError> {
        lookup(&self.embedders, "embedder", name)
    }

    pub fn index(&self, name: &str) -> Result<Arc<dyn VectorIndex>, PipelineError> {
        lookup(&self.indexes, "vector index", name)
    }

    /// Distinct vector index instances, for cleanup that must reach every backend.
    pub fn indexes(&self) -> impl Iterator<Item = &Arc<dyn VectorIndex>> {
        self.indexes.values()
    }
}

fn lookup<T: ?Sized>(
    processors: &HashMap<String, Arc<T>>,
    role: &str,
    name: &str,
) -> Result<Arc<T>, PipelineError> {
    processors.get(name).cloned().ok_or_else(|| {
        let mut known = processors.keys().map(String::as_str).collect::<Vec<_>>();
        known.sort_unstable();
        PipelineError::validation(format!(
            "no {role} registered as '{name}', expected one of [{}]",
            known.join(", ")
        ))
    })
}
