//! Built-in stage configurations and the per-file-type load configurations.

use crate::error::{PipelineError, SchemaError};
use crate::models::{normalize_file_type, StageKind};
use crate::schema::{FieldOption, FieldSchema, StageConfiguration};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod chunk {
    pub const CHUNK_METHOD: &str = "chunk_method";
    pub const TOKEN_SIZE: &str = "token_size";
    pub const OVERLAP: &str = "overlap";

    pub const FIXED_TOKEN: &str = "fixed_token";
    pub const BY_PAGE: &str = "by_page";
}

pub mod embedding {
    pub const EMBEDDING_TOOL: &str = "embedding_tool";
    pub const DIMENSIONS: &str = "dimensions";
    pub const NGRAM_SIZE: &str = "ngram_size";
    pub const LOWERCASE: &str = "lowercase";

    pub const CHAR_NGRAM: &str = "char_ngram";
}

pub mod store {
    pub const STORE_METHOD: &str = "store_method";
    pub const TOP_K: &str = "top_k";
    pub const SCORE_THRESHOLD: &str = "score_threshold";

    pub const IN_MEMORY: &str = "in_memory";
}

pub mod load {
    pub const LOADER_TOOL: &str = "loader_tool";
    pub const PAGE_RANGE: &str = "page_range";
    pub const SKIP_EMPTY_PAGES: &str = "skip_empty_pages";
    pub const PAGE_SEPARATOR: &str = "page_separator";
    pub const TRIM_WHITESPACE: &str = "trim_whitespace";

    pub const LOPDF: &str = "lopdf";
    pub const PLAIN_TEXT: &str = "plain_text";
    pub const FORM_FEED: &str = "form_feed";
    pub const NO_SEPARATOR: &str = "none";
}

fn chunk_configuration() -> Result<StageConfiguration, SchemaError> {
    StageConfiguration::new(
        "chunk",
        "Split parsed pages into text spans",
        vec![
            FieldSchema::select(
                chunk::CHUNK_METHOD,
                "Chunk method",
                vec![
                    FieldOption::new(chunk::FIXED_TOKEN, "Fixed token windows"),
                    FieldOption::new(chunk::BY_PAGE, "One chunk per page"),
                ],
                chunk::FIXED_TOKEN,
            )
            .required(),
            FieldSchema::number(chunk::TOKEN_SIZE, "Token size", 500)
                .bounded(100.0, 5000.0, 100.0)
                .with_description("Whitespace tokens per chunk")
                .depends_on(chunk::CHUNK_METHOD, [chunk::FIXED_TOKEN]),
            FieldSchema::range(chunk::OVERLAP, "Overlap", 0.0, 1.0, 0.1)
                .bounded(0.0, 1.0, 0.01)
                .with_description("Fraction of each window repeated in the next")
                .depends_on(chunk::CHUNK_METHOD, [chunk::FIXED_TOKEN]),
        ],
    )
}

fn embedding_configuration() -> Result<StageConfiguration, SchemaError> {
    StageConfiguration::new(
        "embedding",
        "Turn chunks into vectors",
        vec![
            FieldSchema::select(
                embedding::EMBEDDING_TOOL,
                "Embedding tool",
                vec![FieldOption::new(
                    embedding::CHAR_NGRAM,
                    "Hashed character n-grams",
                )],
                embedding::CHAR_NGRAM,
            )
            .required(),
            FieldSchema::number(embedding::DIMENSIONS, "Dimensions", 128).bounded(8.0, 4096.0, 8.0),
            FieldSchema::number(embedding::NGRAM_SIZE, "N-gram size", 3)
                .bounded(1.0, 8.0, 1.0)
                .in_group("advanced")
                .depends_on(embedding::EMBEDDING_TOOL, [embedding::CHAR_NGRAM]),
            FieldSchema::toggle(embedding::LOWERCASE, "Lowercase input", true).in_group("advanced"),
        ],
    )?
    .with_group_order(&["basic", "advanced"])
}

fn store_configuration() -> Result<StageConfiguration, SchemaError> {
    StageConfiguration::new(
        "store",
        "Index vectors for nearest-neighbour search",
        vec![
            FieldSchema::select(
                store::STORE_METHOD,
                "Store method",
                vec![FieldOption::new(store::IN_MEMORY, "In-memory index")],
                store::IN_MEMORY,
            )
            .required(),
            FieldSchema::number(store::TOP_K, "Results", 1)
                .bounded(1.0, 50.0, 1.0)
                .in_group("search"),
            FieldSchema::range(store::SCORE_THRESHOLD, "Score threshold", 0.0, 1.0, 0.0)
                .bounded(0.0, 1.0, 0.01)
                .with_description("Matches scoring at or below this are dropped")
                .in_group("search"),
        ],
    )?
    .with_group_order(&["basic", "search"])
}

fn pdf_load_configuration() -> Result<StageConfiguration, SchemaError> {
    StageConfiguration::new(
        "pdf",
        "Extract text from PDF pages",
        vec![
            FieldSchema::select(
                load::LOADER_TOOL,
                "Loader",
                vec![FieldOption::new(load::LOPDF, "lopdf text extraction")],
                load::LOPDF,
            )
            .required(),
            FieldSchema::text(load::PAGE_RANGE, "Page range", "all")
                .with_placeholder("1-5,7,9-12")
                .in_group("pages"),
            FieldSchema::toggle(load::SKIP_EMPTY_PAGES, "Skip empty pages", true).in_group("pages"),
        ],
    )?
    .with_group_order(&["basic", "pages"])?
    .with_extensions(&["pdf"])
}

fn text_load_configuration() -> Result<StageConfiguration, SchemaError> {
    StageConfiguration::new(
        "text",
        "Read UTF-8 text files",
        vec![
            FieldSchema::select(
                load::LOADER_TOOL,
                "Loader",
                vec![FieldOption::new(load::PLAIN_TEXT, "Plain text")],
                load::PLAIN_TEXT,
            )
            .required(),
            FieldSchema::select(
                load::PAGE_SEPARATOR,
                "Page separator",
                vec![
                    FieldOption::new(load::FORM_FEED, "Form feed"),
                    FieldOption::new(load::NO_SEPARATOR, "Single page"),
                ],
                load::FORM_FEED,
            ),
            FieldSchema::toggle(load::TRIM_WHITESPACE, "Trim whitespace", true),
        ],
    )?
    .with_extensions(&["txt", "md"])
}

/// Read-only table of every configuration the pipeline knows about.
#[derive(Debug, Clone)]
pub struct ConfigurationTable {
    chunk: Arc<StageConfiguration>,
    embedding: Arc<StageConfiguration>,
    store: Arc<StageConfiguration>,
    loaders: BTreeMap<String, Arc<StageConfiguration>>,
}

impl ConfigurationTable {
    pub fn builtin() -> Result<Self, SchemaError> {
        let mut table = Self {
            chunk: Arc::new(chunk_configuration()?),
            embedding: Arc::new(embedding_configuration()?),
            store: Arc::new(store_configuration()?),
            loaders: BTreeMap::new(),
        };
        table.register_loader(pdf_load_configuration()?)?;
        table.register_loader(text_load_configuration()?)?;
        Ok(table)
    }

    pub fn stage(&self, kind: StageKind) -> &Arc<StageConfiguration> {
        match kind {
            StageKind::Chunk => &self.chunk,
            StageKind::Embedding => &self.embedding,
            StageKind::Store => &self.store,
        }
    }

    /// Adds a load configuration under each of its extensions.
    pub fn register_loader(&mut self, configuration: StageConfiguration) -> Result<(), SchemaError> {
        if configuration.allowed_extensions().is_empty() {
            return Err(SchemaError::NoExtensions(configuration.name().to_string()));
        }
        let configuration = Arc::new(configuration);
        for extension in configuration.allowed_extensions() {
            self.loaders.insert(extension.clone(), Arc::clone(&configuration));
        }
        Ok(())
    }

    pub fn loader_for(&self, file_type: &str) -> Result<&Arc<StageConfiguration>, PipelineError> {
        let file_type = normalize_file_type(file_type);
        self.loaders.get(&file_type).ok_or_else(|| {
            PipelineError::validation(format!(
                "unsupported file type '{file_type}', expected one of [{}]",
                self.supported_file_types().join(", ")
            ))
        })
    }

    pub fn supported_file_types(&self) -> Vec<&str> {
        self.loaders.keys().map(String::as_str).collect()
    }
}
