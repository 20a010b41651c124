use crate::catalog::load;
use crate::error::PipelineError;
use crate::models::{AppliedConfig, ParsedPage};
use crate::traits::DocumentLoader;
use async_trait::async_trait;
use lopdf::Document;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const FORM_FEED: char = '\u{000c}';

/// Parses `all` or a list like `1-5,7,9-12`. `None` selects every page.
pub fn parse_page_range(range: &str) -> Result<Option<BTreeSet<u32>>, PipelineError> {
    let range = range.trim();
    if range.is_empty() || range.eq_ignore_ascii_case("all") {
        return Ok(None);
    }

    let part_re = Regex::new(r"^\s*(\d+)\s*(?:-\s*(\d+)\s*)?$")?;
    let mut pages = BTreeSet::new();
    for part in range.split(',') {
        let captures = part_re
            .captures(part)
            .ok_or_else(|| PipelineError::validation(format!("invalid page range '{part}'")))?;
        let start = parse_page_number(&captures[1])?;
        let end = match captures.get(2) {
            Some(end) => parse_page_number(end.as_str())?,
            None => start,
        };
        if start == 0 || end < start {
            return Err(PipelineError::validation(format!(
                "invalid page range '{}'",
                part.trim()
            )));
        }
        pages.extend(start..=end);
    }
    Ok(Some(pages))
}

fn parse_page_number(raw: &str) -> Result<u32, PipelineError> {
    raw.parse::<u32>()
        .map_err(|_| PipelineError::validation(format!("page number '{raw}' is out of range")))
}

/// UTF-8 text files, paged on form feeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextLoader;

#[async_trait]
impl DocumentLoader for PlainTextLoader {
    async fn load(
        &self,
        path: &Path,
        config: &AppliedConfig,
    ) -> Result<Vec<ParsedPage>, PipelineError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let separator = config.str_or(load::PAGE_SEPARATOR, load::FORM_FEED)?;
        let split_pages = separator != load::NO_SEPARATOR;
        let trim = config.bool_or(load::TRIM_WHITESPACE, true)?;

        let sections: Vec<&str> = if split_pages {
            raw.split(FORM_FEED).collect()
        } else {
            vec![raw.as_str()]
        };

        let pages = sections
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(index, text)| ParsedPage {
                number: (index + 1) as u32,
                text: if trim {
                    text.trim().to_string()
                } else {
                    text.to_string()
                },
            })
            .collect();
        Ok(pages)
    }
}

/// Per-page PDF text extraction with lopdf.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfLoader;

impl LopdfLoader {
    fn extract_pages(
        path: &Path,
        selected: Option<&BTreeSet<u32>>,
        skip_empty: bool,
    ) -> Result<Vec<ParsedPage>, PipelineError> {
        let document = Document::load(path)
            .map_err(|error| PipelineError::upstream("load", format!("pdf parse: {error}")))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            if selected.is_some_and(|selected| !selected.contains(&page_no)) {
                continue;
            }
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| PipelineError::upstream("load", format!("pdf parse: {error}")))?;

            if skip_empty && text.trim().is_empty() {
                continue;
            }
            pages.push(ParsedPage {
                number: page_no,
                text,
            });
        }
        Ok(pages)
    }
}

#[async_trait]
impl DocumentLoader for LopdfLoader {
    async fn load(
        &self,
        path: &Path,
        config: &AppliedConfig,
    ) -> Result<Vec<ParsedPage>, PipelineError> {
        let selected = parse_page_range(config.str_or(load::PAGE_RANGE, "all")?)?;
        let skip_empty = config.bool_or(load::SKIP_EMPTY_PAGES, true)?;
        let path: PathBuf = path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            LopdfLoader::extract_pages(&path, selected.as_ref(), skip_empty)
        })
        .await
        .map_err(|error| PipelineError::upstream("load", format!("pdf worker: {error}")))?
    }
}
