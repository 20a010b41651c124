use crate::error::PipelineError;
use crate::models::NewDocument;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Files under `folder` whose extension is in `extensions`, sorted by path.
pub fn discover_documents(folder: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                extensions
                    .iter()
                    .any(|allowed| ext.eq_ignore_ascii_case(allowed))
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, PipelineError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Builds the registration request for a file on disk.
pub fn describe_file(path: &Path) -> Result<NewDocument, PipelineError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            PipelineError::validation(format!("path missing filename: {}", path.display()))
        })?;
    let file_type = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let file_size = fs::metadata(path)?.len();

    Ok(NewDocument {
        filename: filename.to_string(),
        file_path: path.to_string_lossy().to_string(),
        file_type: file_type.to_string(),
        file_size,
        checksum: Some(digest_file(path)?),
    })
}
