use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use ragtune_core::settings::DEFAULT_MAX_FILE_SIZE;
use ragtune_core::{
    describe_file, discover_documents, ConfigMap, ConfigurationTable, MemoryRecordStore,
    PipelineCoordinator, PipelineSettings, ProcessorRegistry, SearchOutcome, StageKind,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ragtune", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Seconds each processor call may take.
    #[arg(long, env = "RAGTUNE_TIMEOUT_SECS", default_value_t = 120)]
    timeout_secs: u64,

    /// Largest file accepted for registration, in bytes.
    #[arg(long, env = "RAGTUNE_MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    max_file_size: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Print a stage configuration with its grouped defaults.
    Schema {
        /// load, chunk, embedding or store.
        #[arg(long)]
        stage: String,
        /// File type whose load configuration to print.
        #[arg(long, default_value = "pdf")]
        file_type: String,
    },
    /// Register documents and run load, chunk, embedding and store on each.
    Run {
        /// A file, or a folder searched recursively for supported files.
        #[arg(long)]
        path: PathBuf,
        /// Load override as key=value. Repeatable.
        #[arg(long = "load", value_name = "KEY=VALUE")]
        load: Vec<String>,
        /// Chunk override as key=value. Repeatable.
        #[arg(long = "chunk", value_name = "KEY=VALUE")]
        chunk: Vec<String>,
        /// Embedding override as key=value. Repeatable.
        #[arg(long = "embedding", value_name = "KEY=VALUE")]
        embedding: Vec<String>,
        /// Store override as key=value. Repeatable.
        #[arg(long = "store", value_name = "KEY=VALUE")]
        store: Vec<String>,
        /// Search each indexed document for this text.
        #[arg(long)]
        query: Option<String>,
    },
}

/// Values parse as JSON when they can, otherwise as plain strings.
fn parse_overrides(pairs: &[String]) -> anyhow::Result<ConfigMap> {
    let mut overrides = ConfigMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("override '{pair}' is not key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("override '{pair}' has an empty key");
        }
        let value = serde_json::from_str::<Value>(raw.trim())
            .unwrap_or_else(|_| Value::String(raw.trim().to_string()));
        overrides.insert(key.to_string(), value);
    }
    Ok(overrides)
}

struct StageOverrides {
    load: ConfigMap,
    chunk: ConfigMap,
    embedding: ConfigMap,
    store: ConfigMap,
}

impl StageOverrides {
    fn for_stage(&self, kind: StageKind) -> &ConfigMap {
        match kind {
            StageKind::Chunk => &self.chunk,
            StageKind::Embedding => &self.embedding,
            StageKind::Store => &self.store,
        }
    }
}

fn print_schema(table: &ConfigurationTable, stage: &str, file_type: &str) -> anyhow::Result<()> {
    let configuration = if stage.eq_ignore_ascii_case("load") {
        table.loader_for(file_type)?
    } else {
        table.stage(stage.parse::<StageKind>()?)
    };

    let defaults = configuration.filtered_read(configuration.default_config());
    let rendered = json!({
        "configuration": configuration.as_ref(),
        "defaults": defaults,
    });
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}

fn collect_files(path: &Path, table: &ConfigurationTable) -> anyhow::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("{} is neither a file nor a folder", path.display());
    }

    let files = discover_documents(path, &table.supported_file_types());
    if files.is_empty() {
        bail!(
            "no supported files ({}) found in {}",
            table.supported_file_types().join(", "),
            path.display()
        );
    }
    Ok(files)
}

async fn run_file(
    coordinator: &PipelineCoordinator<MemoryRecordStore>,
    path: &Path,
    overrides: &StageOverrides,
    query: Option<&str>,
) -> anyhow::Result<()> {
    let new = describe_file(path)?;
    let document = coordinator.register_document(new).await?;
    let document_id = document.id;

    coordinator.load(document_id, &overrides.load).await?;
    for kind in StageKind::ALL {
        let artifact = coordinator
            .execute(document_id, kind, overrides.for_stage(kind))
            .await
            .with_context(|| format!("{kind} failed for {}", path.display()))?;
        println!(
            "document={document_id} stage={kind} records={} hash={}",
            artifact.result.len(),
            &artifact.config.hash()[..12]
        );
    }

    let document = coordinator.document(document_id).await?;
    println!(
        "document={document_id} file={} status={}",
        document.filename, document.status
    );

    if let Some(query) = query {
        match coordinator.search(document_id, query).await? {
            SearchOutcome::Found(matches) => {
                for found in matches {
                    println!(
                        "  score={:.4} page={} text={}",
                        found.score,
                        found.metadata["page"],
                        found.content
                    );
                }
            }
            SearchOutcome::NotFound => println!("  not found"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let table = Arc::new(ConfigurationTable::builtin()?);

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "ragtune boot"
    );

    match cli.command {
        Command::Schema { stage, file_type } => print_schema(&table, &stage, &file_type)?,
        Command::Run {
            path,
            load,
            chunk,
            embedding,
            store,
            query,
        } => {
            let overrides = StageOverrides {
                load: parse_overrides(&load)?,
                chunk: parse_overrides(&chunk)?,
                embedding: parse_overrides(&embedding)?,
                store: parse_overrides(&store)?,
            };
            let settings = PipelineSettings {
                processor_timeout: Duration::from_secs(cli.timeout_secs),
                max_file_size: cli.max_file_size,
            };
            let coordinator = PipelineCoordinator::new(
                MemoryRecordStore::new(),
                Arc::clone(&table),
                ProcessorRegistry::with_defaults(),
            )
            .with_settings(settings);

            let files = collect_files(&path, &table)?;
            info!(path = %path.display(), files = files.len(), "running pipeline");

            let mut failed = 0usize;
            for file in &files {
                if let Err(error) = run_file(&coordinator, file, &overrides, query.as_deref()).await {
                    failed += 1;
                    warn!(path = %file.display(), error = %error, "skipped document");
                }
            }

            println!(
                "{} of {} documents indexed at {}",
                files.len() - failed,
                files.len(),
                Utc::now().to_rfc3339()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_overrides;
    use serde_json::json;

    #[test]
    fn overrides_parse_json_then_fall_back_to_strings() {
        let parsed = parse_overrides(&[
            "token_size=800".to_string(),
            "chunk_method=by_page".to_string(),
            "lowercase=false".to_string(),
        ])
        .expect("valid overrides");
        assert_eq!(parsed["token_size"], json!(800));
        assert_eq!(parsed["chunk_method"], json!("by_page"));
        assert_eq!(parsed["lowercase"], json!(false));

        assert!(parse_overrides(&["novalue".to_string()]).is_err());
        assert!(parse_overrides(&["=1".to_string()]).is_err());
    }
}
